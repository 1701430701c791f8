//! Proxy engine: executes one logical client request by rotating keys.
//!
//! All dialects share a single attempt loop: acquire a key, forward,
//! classify the outcome, release with a verdict, retry or finish. Key
//! rotation is the backoff; the only sleep is when the pool is
//! momentarily empty.

pub mod client;
pub mod dialect;
pub mod streaming;

pub use dialect::Dialect;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};

use keymux_types::{ProxyError, Verdict};

use crate::config::SettingsManager;
use crate::pool::{KeyLease, KeyPool};
use client::{MODEL_LIST_TIMEOUT, VALIDATE_TIMEOUT};

/// Pause before re-entering the loop when the pool handed out nothing.
const EMPTY_POOL_BACKOFF: Duration = Duration::from_secs(2);

/// Raw upstream response, relayed to the client verbatim.
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    pub status: u16,
    pub body: Bytes,
}

/// SSE frames ready for the client. Mid-stream failures arrive as inline
/// error frames, never as stream errors, so the relay can flush them.
pub type SseStream = BoxStream<'static, Result<Bytes, ProxyError>>;

pub struct ProxyEngine {
    pool: Arc<KeyPool>,
    settings: Arc<SettingsManager>,
    http: Client,
}

impl ProxyEngine {
    pub fn new(pool: Arc<KeyPool>, settings: Arc<SettingsManager>) -> Result<Self, reqwest::Error> {
        Ok(Self { pool, settings, http: client::build_upstream_client()? })
    }

    /// Run the attempt loop for a unary request and return the raw 2xx
    /// body. On exhaustion the last upstream error is preserved.
    pub async fn execute(&self, dialect: &Dialect, body: Bytes) -> Result<UpstreamReply, ProxyError> {
        let settings = self.settings.snapshot().await;
        let mut last_error = ProxyError::NoKeysAvailable;

        for attempt in 1..=settings.max_retries {
            let lease = match self.pool.acquire().await {
                Ok(lease) => lease,
                Err(e) => {
                    tracing::warn!("no keys available ({}, attempt {})", dialect.label(), attempt);
                    last_error = e.into();
                    tokio::time::sleep(EMPTY_POOL_BACKOFF).await;
                    continue;
                }
            };

            tracing::info!(
                "attempt {} ({}) using key {} (...{})",
                attempt,
                dialect.label(),
                lease.id(),
                lease.secret_tail()
            );

            let response = self
                .http
                .post(dialect.url(&settings.upstream_base_url))
                .headers(dialect.headers(lease.secret()))
                .body(body.clone())
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    last_error = ProxyError::UpstreamUnavailable { message: e.to_string() };
                    lease.release(Verdict::Transient);
                    continue;
                }
            };

            let status = response.status();
            let bytes = match response.bytes().await {
                Ok(b) => b,
                Err(e) => {
                    last_error = ProxyError::UpstreamUnavailable {
                        message: format!("failed reading upstream body: {e}"),
                    };
                    lease.release(Verdict::Transient);
                    continue;
                }
            };

            if status.is_success() {
                lease.release(Verdict::Success);
                return Ok(UpstreamReply { status: status.as_u16(), body: bytes });
            }

            last_error = classify_failure(status, &bytes, lease);
            tracing::warn!(
                "upstream error on attempt {} ({}): HTTP {}",
                attempt,
                dialect.label(),
                status
            );
        }

        tracing::error!("all {} attempts failed ({})", settings.max_retries, dialect.label());
        Err(last_error)
    }

    /// Run the attempt loop until a 2xx streamed response is obtained,
    /// then relay it as SSE frames. Once the stream is returned, retries
    /// are over: mid-stream failures become inline error frames, and
    /// dropping the stream (client disconnect) releases the key as
    /// transient via the lease guard.
    pub async fn execute_stream(
        &self,
        dialect: &Dialect,
        body: Bytes,
    ) -> Result<SseStream, ProxyError> {
        let settings = self.settings.snapshot().await;
        let mut last_error = ProxyError::NoKeysAvailable;

        for attempt in 1..=settings.max_retries {
            let lease = match self.pool.acquire().await {
                Ok(lease) => lease,
                Err(e) => {
                    tracing::warn!("no keys available ({}, attempt {})", dialect.label(), attempt);
                    last_error = e.into();
                    tokio::time::sleep(EMPTY_POOL_BACKOFF).await;
                    continue;
                }
            };

            tracing::info!(
                "attempt {} ({}) using key {} (...{})",
                attempt,
                dialect.label(),
                lease.id(),
                lease.secret_tail()
            );

            let response = self
                .http
                .post(dialect.url(&settings.upstream_base_url))
                .headers(dialect.headers(lease.secret()))
                .body(body.clone())
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    last_error = ProxyError::UpstreamUnavailable { message: e.to_string() };
                    lease.release(Verdict::Transient);
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let bytes = response.bytes().await.unwrap_or_default();
                last_error = classify_failure(status, &bytes, lease);
                continue;
            }

            return Ok(relay_stream(response, lease, dialect.label()));
        }

        tracing::error!("all {} attempts failed ({})", settings.max_retries, dialect.label());
        Err(last_error)
    }

    /// Relay the upstream model list using one acquired key.
    ///
    /// The raw body and status are returned to the caller even on upstream
    /// failure; the verdict still feeds back into the pool.
    pub async fn list_models(
        &self,
        native: bool,
        query: Option<&str>,
    ) -> Result<UpstreamReply, ProxyError> {
        let settings = self.settings.snapshot().await;
        let lease = self.pool.acquire().await?;

        let base = &settings.upstream_base_url;
        let url = if native {
            match query.filter(|q| !q.is_empty()) {
                Some(q) => format!("{base}/v1beta/models?{q}"),
                None => format!("{base}/v1beta/models"),
            }
        } else {
            format!("{base}/v1beta/openai/models")
        };

        tracing::info!("listing models (native={}) using key {}", native, lease.id());

        let mut request =
            self.http.get(url).timeout(MODEL_LIST_TIMEOUT).header(ACCEPT, "application/json");
        request = if native {
            request.header("x-goog-api-key", lease.secret())
        } else {
            request.bearer_auth(lease.secret())
        };

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                lease.release(Verdict::Transient);
                return Err(ProxyError::UpstreamUnavailable { message: e.to_string() });
            }
        };

        let status = response.status();
        let bytes = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                lease.release(Verdict::Transient);
                return Err(ProxyError::UpstreamUnavailable {
                    message: format!("failed reading upstream body: {e}"),
                });
            }
        };

        let verdict = if status.is_success() {
            Verdict::Success
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            Verdict::RateLimited
        } else if status.is_client_error() {
            Verdict::ClientInvalid
        } else {
            Verdict::Transient
        };
        lease.release(verdict);

        Ok(UpstreamReply { status: status.as_u16(), body: bytes })
    }

    /// One-shot credential probe used on key admission. The candidate is
    /// not in the registry yet, so this bypasses the pool entirely.
    pub async fn validate_key(&self, secret: &str) -> (bool, String) {
        let settings = self.settings.snapshot().await;
        let url = format!("{}/v1beta/openai/models", settings.upstream_base_url);

        let response =
            self.http.get(url).timeout(VALIDATE_TIMEOUT).bearer_auth(secret).send().await;

        match response {
            Err(e) => (false, format!("request failed: {e}")),
            Ok(resp) if resp.status().is_success() => (true, "valid".to_string()),
            Ok(resp) => {
                let status = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_default();
                (false, format!("invalid (HTTP {status}): {body}"))
            }
        }
    }
}

/// Release the lease with the verdict matching an upstream failure and
/// build the error the loop keeps as "last seen".
fn classify_failure(status: StatusCode, body: &[u8], lease: KeyLease) -> ProxyError {
    let text = String::from_utf8_lossy(body).into_owned();
    if status == StatusCode::TOO_MANY_REQUESTS {
        lease.release(Verdict::RateLimited);
        ProxyError::UpstreamRejected { status: status.as_u16(), body: text }
    } else if status.is_client_error() {
        lease.release(Verdict::ClientInvalid);
        ProxyError::UpstreamRejected { status: status.as_u16(), body: text }
    } else {
        lease.release(Verdict::Transient);
        ProxyError::UpstreamUnavailable {
            message: format!("upstream returned HTTP {status}: {text}"),
        }
    }
}

/// Wrap a 2xx upstream response into the client-facing SSE relay.
fn relay_stream(response: reqwest::Response, lease: KeyLease, label: &'static str) -> SseStream {
    let stream = async_stream::stream! {
        let mut upstream = response.bytes_stream();
        let mut framer = streaming::LineFramer::new();
        let mut lease = Some(lease);

        'relay: loop {
            match upstream.next().await {
                Some(Ok(chunk)) => {
                    for line in framer.push(&chunk) {
                        let done = streaming::is_done(&line);
                        yield Ok::<Bytes, ProxyError>(streaming::event_frame(&line));
                        if done {
                            if let Some(l) = lease.take() {
                                l.release(Verdict::Success);
                            }
                            tracing::info!("stream finished ({})", label);
                            break 'relay;
                        }
                    }
                }
                Some(Err(e)) => {
                    // First byte already went out; this cannot be retried.
                    tracing::error!("mid-stream upstream error ({}): {}", label, e);
                    if let Some(l) = lease.take() {
                        l.release(Verdict::Transient);
                    }
                    yield Ok(streaming::error_frame(&format!("upstream stream failed: {e}")));
                    break 'relay;
                }
                None => {
                    if let Some(line) = framer.finish() {
                        yield Ok(streaming::event_frame(&line));
                    }
                    if let Some(l) = lease.take() {
                        l.release(Verdict::Success);
                    }
                    tracing::info!("stream closed by upstream ({})", label);
                    break 'relay;
                }
            }
        }
    };
    stream.boxed()
}
