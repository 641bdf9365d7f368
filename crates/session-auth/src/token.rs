//! Token refresh against the remote auth endpoint
//!
//! The API exchanges a refresh token for a new credential pair:
//! `POST {base_url}/auth/refresh-token` with `{"refreshToken": "..."}`,
//! answered by `{"data": {"accessToken": "...", "refreshToken": "..."}}`.
//!
//! The refresh call goes straight to reqwest and never through the
//! authenticated request client, so a 401 from this endpoint cannot start a
//! nested refresh.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::credentials::CredentialPair;
use crate::error::{Error, Result};

/// Request body sent to the refresh endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Response envelope of the refresh endpoint.
#[derive(Debug, Deserialize)]
struct RefreshEnvelope {
    data: CredentialPair,
}

/// The remote operation that trades a refresh token for a new pair.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn RefreshEndpoint>`).
pub trait RefreshEndpoint: Send + Sync {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<CredentialPair>> + Send + 'a>>;
}

/// Refresh endpoint reached over HTTP.
///
/// Every refresh call is bounded by `timeout`; while it runs the client's
/// refresh cycle stays open and queued requests wait on it.
pub struct HttpRefreshEndpoint {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpRefreshEndpoint {
    /// Build the endpoint from the API base URL and the refresh path.
    pub fn new(client: reqwest::Client, base_url: &str, path: &str, timeout: Duration) -> Self {
        Self {
            client,
            url: format!("{}{}", base_url.trim_end_matches('/'), path),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl RefreshEndpoint for HttpRefreshEndpoint {
    fn refresh<'a>(
        &'a self,
        refresh: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<CredentialPair>> + Send + 'a>> {
        Box::pin(refresh_token(&self.client, &self.url, refresh, self.timeout))
    }
}

/// Exchange a refresh token for a new credential pair.
pub async fn refresh_token(
    client: &reqwest::Client,
    url: &str,
    refresh: &str,
    timeout: Duration,
) -> Result<CredentialPair> {
    let response = client
        .post(url)
        .timeout(timeout)
        .json(&RefreshRequest {
            refresh_token: refresh,
        })
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                Error::Http(format!("token refresh timed out after {timeout:?}: {e}"))
            } else {
                Error::Http(format!("token refresh request failed: {e}"))
            }
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        // 401/403 means the refresh token is revoked or expired
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::RefreshRejected(format!(
                "refresh endpoint returned {status}: {body}"
            )));
        }

        return Err(Error::InvalidResponse(format!(
            "refresh endpoint returned {status}: {body}"
        )));
    }

    let envelope = response
        .json::<RefreshEnvelope>()
        .await
        .map_err(|e| Error::InvalidResponse(format!("malformed refresh response: {e}")))?;
    debug!(url, "received refreshed credentials");
    Ok(envelope.data)
}
