//! Authenticated request client
//!
//! Every call goes through two hooks around the transport:
//! - outbound: attach `Authorization: Bearer <access>` from the credential store
//! - inbound: on an eligible 401, recover through the refresh coordinator
//!
//! A 401 is eligible only on a first attempt (see `RetryContext`) and only
//! when the request does not target the refresh endpoint itself. Recovery
//! replays the original request once with the new access token; whatever
//! the replay returns is final.

use std::sync::{Arc, PoisonError, RwLock};

use futures_util::future::{join, join_all};
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue};
use serde::Serialize;
use session_auth::{BEARER_PREFIX, CredentialPair, CredentialStore, RefreshEndpoint};
use tokio::sync::oneshot;
use tracing::{Instrument, debug, info, instrument, warn};
use transport::{ApiResponse, RequestDescriptor, Transport};
use uuid::Uuid;

use crate::coordinator::{PendingRequest, RefreshCoordinator, RefreshCycle, Ticket};
use crate::error::{Error, Result};
use crate::metrics;

/// One-shot retry marker threaded alongside a request.
///
/// Carried next to the descriptor rather than stored on it, so a descriptor
/// reused by unrelated code never inherits a stale flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryContext {
    retried: bool,
}

impl RetryContext {
    /// Context of a request's first attempt.
    pub fn first_attempt() -> Self {
        Self::default()
    }

    /// The same request, now past its single refresh-and-replay.
    pub fn mark_retried(self) -> Self {
        Self { retried: true }
    }

    pub fn is_retried(&self) -> bool {
        self.retried
    }
}

/// HTTP client that attaches bearer tokens and recovers from expired ones.
///
/// Share it behind an `Arc`; all methods take `&self`.
pub struct AuthClient {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn RefreshEndpoint>,
    refresh_path: String,
    default_headers: RwLock<HeaderMap>,
    coordinator: RefreshCoordinator,
}

impl AuthClient {
    /// `refresh_path` identifies calls to the refresh endpoint; their 401s
    /// are surfaced as-is instead of starting a refresh.
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        refresher: Arc<dyn RefreshEndpoint>,
        refresh_path: impl Into<String>,
    ) -> Self {
        let refresh_path = refresh_path.into();
        debug!(transport = transport.id(), refresh_path, "auth client initialized");
        Self {
            transport,
            store,
            refresher,
            refresh_path,
            default_headers: RwLock::new(HeaderMap::new()),
            coordinator: RefreshCoordinator::new(),
        }
    }

    /// Send a request with token attachment and transparent refresh.
    ///
    /// Non-2xx responses come back as `Error::Status`.
    #[instrument(skip_all, fields(request_id = %format!("req_{}", Uuid::new_v4()), method = %request.method, path = %request.route()))]
    pub async fn send(&self, request: RequestDescriptor) -> Result<ApiResponse> {
        let context = RetryContext::first_attempt();
        let access_token = self.store.get().await.map(|pair| pair.access_token);
        let outcome = self.attempt(&request, access_token.as_deref()).await;

        if !self.should_refresh(&request, &outcome, context) {
            return outcome;
        }
        self.recover(request, context.mark_retried()).await
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.send(RequestDescriptor::get(path)).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse> {
        self.send(RequestDescriptor::delete(path)).await
    }

    pub async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<ApiResponse> {
        self.send(json_request(Method::POST, path, body)?).await
    }

    pub async fn put<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<ApiResponse> {
        self.send(json_request(Method::PUT, path, body)?).await
    }

    pub async fn patch<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<ApiResponse> {
        self.send(json_request(Method::PATCH, path, body)?).await
    }

    /// Store a freshly issued pair (login).
    pub async fn login(&self, pair: CredentialPair) -> session_auth::Result<()> {
        self.store.set(pair).await
    }

    /// Drop the stored pair and the default `Authorization` header.
    pub async fn logout(&self) -> session_auth::Result<()> {
        self.set_default_authorization(None);
        self.store.clear().await
    }

    /// Headers merged under every request's own headers.
    pub fn default_headers(&self) -> HeaderMap {
        self.default_headers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_default_header(&self, name: HeaderName, value: HeaderValue) {
        self.default_headers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, value);
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn refresh_path(&self) -> &str {
        &self.refresh_path
    }

    /// Outbound hook + transport: one attempt of `request` with `access_token`.
    async fn attempt(
        &self,
        request: &RequestDescriptor,
        access_token: Option<&str>,
    ) -> Result<ApiResponse> {
        let outgoing = self.prepare(request.clone(), access_token);
        dispatch(self.transport.as_ref(), outgoing).await
    }

    /// Merge default headers under the request's own and attach the bearer token.
    fn prepare(&self, mut request: RequestDescriptor, access_token: Option<&str>) -> RequestDescriptor {
        let mut headers = self.default_headers();
        headers.extend(std::mem::take(&mut request.headers));

        if let Some(token) = access_token {
            match bearer(token) {
                Ok(value) => {
                    headers.insert(AUTHORIZATION, value);
                }
                Err(e) => warn!(error = %e, "stored access token is not a valid header value, sending without it"),
            }
        }

        request.headers = headers;
        request
    }

    /// Inbound hook decision: only a first-attempt 401 off the refresh path recovers.
    fn should_refresh(
        &self,
        request: &RequestDescriptor,
        outcome: &Result<ApiResponse>,
        context: RetryContext,
    ) -> bool {
        let unauthorized = matches!(outcome, Err(e) if e.is_unauthorized());
        unauthorized && !context.is_retried() && !request.targets(&self.refresh_path)
    }

    async fn recover(&self, request: RequestDescriptor, context: RetryContext) -> Result<ApiResponse> {
        match self.coordinator.join(request) {
            Ticket::Queued(receiver) => {
                metrics::record_queued();
                receiver
                    .await
                    .unwrap_or_else(|_| Err(Error::RefreshAbandoned))
            }
            Ticket::Leader { cycle, request } => self.lead_refresh(cycle, request, context).await,
        }
    }

    /// Drive one refresh cycle on behalf of the leader and every queued request.
    ///
    /// Store writes happen while the cycle is still open, so a 401 arriving
    /// meanwhile queues instead of starting a second refresh with a stale
    /// refresh token.
    async fn lead_refresh(
        &self,
        cycle: RefreshCycle<'_>,
        request: RequestDescriptor,
        context: RetryContext,
    ) -> Result<ApiResponse> {
        debug!("access token rejected, refreshing");
        let refreshed = match self.store.get().await {
            Some(pair) => self.refresher.refresh(&pair.refresh_token).await,
            None => Err(session_auth::Error::MissingRefreshToken),
        };

        match refreshed {
            Ok(pair) => {
                metrics::record_refresh(true);
                let access_token = pair.access_token.clone();
                if let Err(e) = self.store.set(pair).await {
                    warn!(error = %e, "failed to persist refreshed credentials");
                }
                self.set_default_authorization(Some(&access_token));

                let queued = cycle.finish();
                info!(queued = queued.len(), "token refresh succeeded, replaying requests");
                self.replay_all(queued, request, &access_token, context).await
            }
            Err(e) => {
                metrics::record_refresh(false);
                warn!(error = %e, "token refresh failed, clearing credentials");
                if let Err(clear_err) = self.store.clear().await {
                    warn!(error = %clear_err, "failed to clear credentials");
                }
                self.set_default_authorization(None);

                let error = Error::RefreshFailed(e);
                let queued = cycle.finish();
                for pending in queued {
                    let _ = pending.reply.send(Err(error.clone()));
                }
                Err(error)
            }
        }
    }

    /// Replay queued requests in arrival order, then the leader's own.
    ///
    /// Queued replays run on a detached task that owns their reply channels,
    /// so cancelling the leader cannot drop a replay that is already on the
    /// wire. The leader waits only until those replays have been issued, then
    /// returns its own outcome as soon as it has one. Callers that went away
    /// while queued are not replayed.
    async fn replay_all(
        &self,
        queued: Vec<PendingRequest>,
        own: RequestDescriptor,
        access_token: &str,
        context: RetryContext,
    ) -> Result<ApiResponse> {
        if let Some(issued) = self.spawn_queued_replays(queued, access_token) {
            // Err only if the replay task died before issuing; the leader goes ahead either way
            let _ = issued.await;
        }
        self.replay(&own, access_token, context).await
    }

    /// Start the queued replays and return a signal fired once all are issued.
    ///
    /// `None` when nothing is left to replay.
    fn spawn_queued_replays(
        &self,
        queued: Vec<PendingRequest>,
        access_token: &str,
    ) -> Option<oneshot::Receiver<()>> {
        let replays: Vec<_> = queued
            .into_iter()
            .filter_map(|pending| {
                if pending.reply.is_closed() {
                    metrics::record_replay("skipped");
                    debug!(path = %pending.request.route(), "queued caller gone, skipping replay");
                    return None;
                }
                Some((self.prepare(pending.request, Some(access_token)), pending.reply))
            })
            .collect();
        if replays.is_empty() {
            return None;
        }

        let (issued_tx, issued_rx) = oneshot::channel();
        let transport = self.transport.clone();
        tokio::spawn(
            async move {
                let transport = transport.as_ref();
                // join_all polls in order on its first poll, which fixes issuance order
                let replays = join_all(replays.into_iter().map(|(request, reply)| async move {
                    let outcome = dispatch(transport, request).await;
                    record_replay_outcome(&outcome);
                    let _ = reply.send(outcome);
                }));
                let issued = async move {
                    let _ = issued_tx.send(());
                };
                join(replays, issued).await;
            }
            .in_current_span(),
        );
        Some(issued_rx)
    }

    async fn replay(
        &self,
        request: &RequestDescriptor,
        access_token: &str,
        context: RetryContext,
    ) -> Result<ApiResponse> {
        let outcome = self.attempt(request, Some(access_token)).await;
        record_replay_outcome(&outcome);
        debug!(retried = context.is_retried(), ok = outcome.is_ok(), "leader replay completed");
        outcome
    }

    fn set_default_authorization(&self, access_token: Option<&str>) {
        let mut defaults = self
            .default_headers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match access_token.map(bearer) {
            Some(Ok(value)) => {
                defaults.insert(AUTHORIZATION, value);
            }
            Some(Err(e)) => {
                warn!(error = %e, "refreshed access token is not a valid header value");
                defaults.remove(AUTHORIZATION);
            }
            None => {
                defaults.remove(AUTHORIZATION);
            }
        }
    }
}

/// Send a prepared request; any non-2xx status becomes `Error::Status`.
async fn dispatch(transport: &dyn Transport, request: RequestDescriptor) -> Result<ApiResponse> {
    let response = transport.send(request).await?;
    if response.is_success() {
        Ok(response)
    } else {
        Err(Error::Status(response))
    }
}

fn record_replay_outcome(outcome: &Result<ApiResponse>) {
    metrics::record_replay(if outcome.is_ok() { "success" } else { "failure" });
}

/// `Bearer <token>`, marked sensitive so it never shows up in Debug output.
fn bearer(token: &str) -> std::result::Result<HeaderValue, InvalidHeaderValue> {
    let mut value = HeaderValue::from_str(&format!("{BEARER_PREFIX}{token}"))?;
    value.set_sensitive(true);
    Ok(value)
}

fn json_request<T: Serialize + ?Sized>(
    method: Method,
    path: &str,
    body: &T,
) -> Result<RequestDescriptor> {
    RequestDescriptor::new(method, path)
        .json(body)
        .map_err(|e| Error::Encode(e.to_string()))
}
