//! Error types surfaced to callers of the authenticated client

use reqwest::StatusCode;
use transport::{ApiResponse, TransportError};

/// Final outcome of a failed call.
///
/// An expired token that was recovered by refresh + replay never shows up
/// here. `Clone` so one refresh failure can be handed to every request that
/// waited on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Any non-2xx response, including a 401 that was not eligible for
    /// refresh or that came back from the replay.
    #[error("request failed with status {}", .0.status)]
    Status(ApiResponse),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("token refresh failed: {0}")]
    RefreshFailed(#[from] session_auth::Error),

    /// The request driving the refresh was dropped before the cycle resolved.
    #[error("token refresh abandoned before completion")]
    RefreshAbandoned,

    #[error("failed to encode request: {0}")]
    Encode(String),
}

impl Error {
    /// HTTP status of the failing response, if one was received.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Status(response) => Some(response.status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }

    /// The response body of a `Status` error.
    pub fn response(&self) -> Option<&ApiResponse> {
        match self {
            Error::Status(response) => Some(response),
            _ => None,
        }
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
