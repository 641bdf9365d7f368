//! Session API constants

/// Path of the token refresh endpoint, relative to the API base URL
pub const REFRESH_PATH: &str = "/auth/refresh-token";

/// Scheme prefix of the `Authorization` header value
pub const BEARER_PREFIX: &str = "Bearer ";

/// Default file name for the persisted session
pub const SESSION_FILE: &str = "auth-storage.json";
