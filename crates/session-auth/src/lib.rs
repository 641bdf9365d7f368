//! Session credentials and token refresh
//!
//! Provides the credential pair held by a logged-in client, the stores that
//! own it, and the remote refresh endpoint that exchanges a refresh token for
//! a new pair. This crate has no dependency on the request client, so it can be
//! tested and used independently.
//!
//! Credential flow:
//! 1. Login stores a pair via `CredentialStore::set()`
//! 2. Every outgoing request reads the access token via `CredentialStore::get()`
//! 3. On an expired access token the client calls `RefreshEndpoint::refresh()`
//! 4. The new pair replaces the old one via `CredentialStore::set()`
//! 5. A rejected refresh, or logout, empties the store via `CredentialStore::clear()`

pub mod constants;
pub mod credentials;
pub mod error;
pub mod token;

pub use constants::*;
pub use credentials::{
    CredentialPair, CredentialStore, FileCredentialStore, MemoryCredentialStore,
};
pub use error::{Error, Result};
pub use token::{HttpRefreshEndpoint, RefreshEndpoint, refresh_token};
