//! Authenticated request client with single-flight token refresh
//!
//! Wraps a `Transport` so callers get the surface of a plain HTTP client
//! while bearer tokens are attached and expired tokens recovered behind
//! their back. The client reads credentials from a `CredentialStore` (single
//! source of truth) and coordinates refreshes through a per-client
//! `RefreshCoordinator`.
//!
//! Request lifecycle:
//! 1. Outbound hook attaches `Authorization: Bearer <access>` from the store
//! 2. Non-401 outcomes, replays, and calls to the refresh path pass through untouched
//! 3. The first 401 while idle makes its request the leader, which calls the refresh endpoint
//! 4. Further 401s during that refresh queue behind the leader
//! 5. Refresh success → new pair stored, queued requests replayed in order, leader replayed last
//! 6. Refresh failure → store cleared, leader and every queued request fail with the same error

pub mod client;
pub mod coordinator;
pub mod error;
pub mod metrics;

pub use client::{AuthClient, RetryContext};
pub use coordinator::RefreshCoordinator;
pub use error::{Error, Result};
pub use transport::{ApiResponse, RequestDescriptor, Transport};
