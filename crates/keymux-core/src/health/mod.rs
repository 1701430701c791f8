//! Health checker: proactively finds dead keys among the enabled set and
//! recovered keys among the disabled set.
//!
//! Runs once shortly after startup, then on a fixed interval, and on
//! demand from the admin surface. At most one run is in flight; later
//! triggers are rejected while a run is active.

mod progress;

pub use progress::CheckProgress;

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use keymux_types::{ApiKey, HealthCheckProgress, Verdict};

use crate::config::SettingsManager;
use crate::pool::KeyPool;
use crate::proxy::client::{build_upstream_client, HEALTH_PROBE_TIMEOUT};
use crate::registry::KeyStore;

/// A commonly available model keeps the probe sensitive to both auth
/// validity and rate-limit state.
const PROBE_MODEL: &str = "gemini-2.5-pro";
const PROBE_BODY: &str =
    r#"{"contents":[{"parts":[{"text":"Explain how AI works in a few words"}]}]}"#;

const STARTUP_DELAY: Duration = Duration::from_secs(10);

/// Outcome of probing one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ok,
    RateLimited,
    Invalid { reason: String },
    /// Network error or 5xx: no signal, the key is not penalized.
    Transient,
}

pub struct HealthChecker {
    store: Arc<KeyStore>,
    pool: Arc<KeyPool>,
    settings: Arc<SettingsManager>,
    http: Client,
    progress: CheckProgress,
}

impl HealthChecker {
    pub fn new(
        store: Arc<KeyStore>,
        pool: Arc<KeyPool>,
        settings: Arc<SettingsManager>,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            store,
            pool,
            settings,
            http: build_upstream_client()?,
            progress: CheckProgress::default(),
        })
    }

    pub fn progress(&self) -> HealthCheckProgress {
        self.progress.snapshot()
    }

    /// Periodic schedule: one run after a short startup delay, then every
    /// HEALTH_CHECK_INTERVAL.
    pub fn spawn_schedule(self: &Arc<Self>) {
        let checker = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(STARTUP_DELAY).await;
            loop {
                checker.run_all().await;
                let interval = checker.settings.snapshot().await.health_check_interval;
                tokio::time::sleep(interval).await;
            }
        });
        tracing::info!("health check schedule started");
    }

    /// Kick off a run in the background (admin trigger). Returns false
    /// when a run is already active.
    pub fn spawn_run(self: &Arc<Self>) -> bool {
        if !self.progress.try_activate() {
            return false;
        }
        let checker = Arc::clone(self);
        tokio::spawn(async move {
            checker.run_activated().await;
        });
        true
    }

    /// Run a full check now. Returns false when a run is already active.
    pub async fn run_all(&self) -> bool {
        if !self.progress.try_activate() {
            tracing::warn!("health check already in progress, skipping trigger");
            return false;
        }
        self.run_activated().await;
        true
    }

    async fn run_activated(&self) {
        tracing::info!("================ health check started ================");
        let enabled = match self.store.list_enabled().await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::error!("health check aborted, cannot list enabled keys: {}", e);
                self.progress.finish();
                return;
            }
        };
        let disabled = match self.store.list_disabled().await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::error!("health check aborted, cannot list disabled keys: {}", e);
                self.progress.finish();
                return;
            }
        };

        let total = enabled.len() + disabled.len();
        if total == 0 {
            tracing::info!("no keys to scan");
            self.progress.finish();
            return;
        }

        tracing::info!(
            "scanning {} key(s) ({} enabled, {} disabled)",
            total,
            enabled.len(),
            disabled.len()
        );
        self.progress.set_total(total);

        self.check_enabled(enabled).await;
        self.check_disabled(disabled).await;

        self.progress.finish();
        tracing::info!("================ health check finished ================");
    }

    /// Probe the enabled set: 429 cools the key down, other 4xx retires
    /// it. Keys already on cooldown are known-bad and skipped.
    async fn check_enabled(&self, keys: Vec<ApiKey>) {
        self.progress.set_phase("enabled");
        let mut rate_limited = 0usize;
        let mut invalidated = 0usize;

        let mut outcomes = self.probe_all(keys, true).await;
        outcomes.sort_by_key(|(key, _)| key.id);

        for (key, outcome) in outcomes {
            match outcome {
                ProbeOutcome::Ok | ProbeOutcome::Transient => {}
                ProbeOutcome::RateLimited => {
                    rate_limited += 1;
                    self.progress.mark_rate_limited();
                    tracing::warn!("key {} rate limited during health check, cooling down", key.id);
                    self.pool.apply_verdict(key.id, Verdict::RateLimited).await;
                }
                ProbeOutcome::Invalid { reason } => {
                    invalidated += 1;
                    self.progress.mark_invalid();
                    self.store
                        .disable(key.id, &format!("health check found key invalid: {reason}"))
                        .await;
                    self.pool.evict(key.id);
                }
            }
        }
        tracing::info!(
            "enabled scan done: {} cooled down, {} retired",
            rate_limited,
            invalidated
        );
    }

    /// Probe the disabled set: a clean 2xx re-enables the key; the next
    /// reconcile readmits it to the pool.
    async fn check_disabled(&self, keys: Vec<ApiKey>) {
        self.progress.set_phase("disabled");
        let mut recovered = 0usize;

        for (key, outcome) in self.probe_all(keys, false).await {
            if outcome == ProbeOutcome::Ok {
                match self.store.set_enabled(key.id, true).await {
                    Ok(()) => {
                        recovered += 1;
                        self.progress.mark_recovered();
                        tracing::info!("key {} recovered, re-enabled", key.id);
                    }
                    Err(e) => tracing::error!("failed to re-enable key {}: {}", key.id, e),
                }
            }
        }
        tracing::info!("disabled scan done: {} re-enabled", recovered);
    }

    /// Bounded fan-out of probes over one subject set.
    async fn probe_all(
        &self,
        keys: Vec<ApiKey>,
        skip_cooldowns: bool,
    ) -> Vec<(ApiKey, ProbeOutcome)> {
        let settings = self.settings.snapshot().await;
        let semaphore = Arc::new(Semaphore::new(settings.health_check_concurrency));
        let mut workers: JoinSet<(ApiKey, ProbeOutcome)> = JoinSet::new();

        for key in keys {
            if skip_cooldowns && self.pool.is_on_cooldown(key.id) {
                self.progress.mark_processed();
                continue;
            }
            let semaphore = Arc::clone(&semaphore);
            let http = self.http.clone();
            let base = settings.upstream_base_url.clone();
            workers.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let outcome = probe(&http, &base, &key.secret).await;
                (key, outcome)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(result) = workers.join_next().await {
            self.progress.mark_processed();
            match result {
                Ok(pair) => outcomes.push(pair),
                Err(e) => tracing::error!("probe task panicked: {}", e),
            }
        }
        outcomes
    }
}

/// One lightweight upstream call against a key.
pub async fn probe(http: &Client, base: &str, secret: &str) -> ProbeOutcome {
    let url = format!("{base}/v1beta/models/{PROBE_MODEL}:generateContent");
    let response = http
        .post(url)
        .timeout(HEALTH_PROBE_TIMEOUT)
        .header("x-goog-api-key", secret)
        .header(CONTENT_TYPE, "application/json")
        .body(PROBE_BODY)
        .send()
        .await;

    let response = match response {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!("probe request failed (no signal): {}", e);
            return ProbeOutcome::Transient;
        }
    };

    let status = response.status();
    if status.is_success() {
        return ProbeOutcome::Ok;
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return ProbeOutcome::RateLimited;
    }
    if status.is_client_error() {
        let body = response.text().await.unwrap_or_default();
        return ProbeOutcome::Invalid { reason: format!("HTTP {}: {}", status.as_u16(), body) };
    }
    ProbeOutcome::Transient
}
