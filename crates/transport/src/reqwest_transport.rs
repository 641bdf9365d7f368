//! reqwest-backed transport that forwards descriptors to a base URL.
//!
//! Relative paths are joined onto the configured base URL; absolute
//! `http(s)://` paths are used verbatim. The configured timeout applies to
//! every request independently, so an original attempt and its replay each
//! get the full budget.

use crate::{ApiResponse, RequestDescriptor, Transport, TransportError};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

/// Transport over a shared `reqwest::Client`.
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve a descriptor path against the base URL.
    pub fn resolve(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }
}

/// Map a reqwest failure onto the transport taxonomy.
fn classify(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else if e.is_builder() {
        TransportError::InvalidRequest(e.to_string())
    } else {
        TransportError::Request(e.to_string())
    }
}

impl Transport for ReqwestTransport {
    fn id(&self) -> &str {
        "reqwest"
    }

    fn send(
        &self,
        request: RequestDescriptor,
    ) -> Pin<Box<dyn Future<Output = crate::Result<ApiResponse>> + Send + '_>> {
        let RequestDescriptor {
            method,
            path,
            headers,
            body,
        } = request;
        let url = self.resolve(&path);

        let mut builder = self
            .client
            .request(method.clone(), &url)
            .headers(headers)
            .timeout(self.timeout);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        Box::pin(async move {
            let response = builder.send().await.map_err(classify)?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response
                .bytes()
                .await
                .map_err(|e| TransportError::Body(e.to_string()))?;
            debug!(%method, url = %url, status = status.as_u16(), "response received");
            Ok(ApiResponse {
                status,
                headers,
                body,
            })
        })
    }
}
