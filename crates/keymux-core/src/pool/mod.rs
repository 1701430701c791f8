//! In-memory key pool: the live set of enabled keys, acquisition under
//! contention, verdict-driven penalties, cooldowns, and periodic
//! reconciliation against the durable registry.

mod lease;
mod selection;
mod stats;

#[cfg(test)]
mod tests;

pub use lease::KeyLease;
pub use stats::KeyStats;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::Notify;

use keymux_types::{ApiKey, BannedKey, KeyStatsView, PoolError, RegistryError, Verdict};

use crate::config::{Settings, SettingsManager};
use crate::registry::KeyStore;
use stats::cooldown_duration;

/// How often a blocked acquirer re-evaluates eligibility when no wakeup
/// arrives. Bounds the latency of cooldown-expiry readmission.
const ACQUIRE_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(200);

pub(crate) struct PoolShared {
    /// The live set: exactly the registry's enabled keys as of the last
    /// reconcile. Write-locked only by reconcile and eviction, so every
    /// acquire sees either the old set or the new one, never a mix.
    pub(crate) keys: RwLock<HashMap<i64, ApiKey>>,
    pub(crate) stats: DashMap<i64, KeyStats>,
    /// Key id -> instant the key becomes acquirable again. Expired entries
    /// are ignored by readers and pruned on reconcile.
    pub(crate) cooldowns: DashMap<i64, DateTime<Utc>>,
    pub(crate) wake: Notify,
    store: Arc<KeyStore>,
}

impl PoolShared {
    /// Apply a verdict to a key's volatile state. Synchronous and
    /// non-blocking; the registry demotion on `ClientInvalid` is spawned.
    pub(crate) fn release_internal(&self, id: i64, verdict: Verdict, settings: &Settings) {
        let now = Utc::now();
        let mut entry = self.stats.entry(id).or_default();
        entry.last_used_at = Some(now);

        match verdict {
            Verdict::Success => {
                entry.record_success(settings.recovery_bonus);
                drop(entry);
                if self.cooldowns.remove(&id).is_some() {
                    tracing::info!("key {} recovered, cooldown cleared", id);
                }
                self.wake.notify_waiters();
            }
            Verdict::RateLimited => {
                entry.record_rate_limit(now);
                let duration = cooldown_duration(settings, entry.rate_limit_count);
                let health = entry.health_score;
                let hits = entry.rate_limit_count;
                drop(entry);
                let until = now
                    + chrono::Duration::from_std(duration)
                        .unwrap_or_else(|_| chrono::Duration::seconds(60));
                self.cooldowns.insert(id, until);
                tracing::info!(
                    "key {} rate limited, cooling down {:?} (health {}, 429s {})",
                    id,
                    duration,
                    health,
                    hits
                );
            }
            Verdict::ClientInvalid => {
                entry.record_client_invalid();
                drop(entry);
                self.evict(id);
                let store = Arc::clone(&self.store);
                tokio::spawn(async move {
                    store.disable(id, "upstream rejected key as invalid").await;
                });
            }
            Verdict::Transient => {}
        }
    }

    /// Remove a key and its volatile state from the live set.
    pub(crate) fn evict(&self, id: i64) {
        self.keys.write().remove(&id);
        self.stats.remove(&id);
        self.cooldowns.remove(&id);
        tracing::warn!("key {} evicted from the live set", id);
    }

    fn active_cooldown(&self, id: i64, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.cooldowns.get(&id).map(|u| *u).filter(|until| *until > now)
    }
}

/// Concurrent, self-healing scheduler over the enabled key set.
pub struct KeyPool {
    shared: Arc<PoolShared>,
    store: Arc<KeyStore>,
    settings: Arc<SettingsManager>,
}

impl KeyPool {
    pub fn new(store: Arc<KeyStore>, settings: Arc<SettingsManager>) -> Self {
        let shared = Arc::new(PoolShared {
            keys: RwLock::new(HashMap::new()),
            stats: DashMap::new(),
            cooldowns: DashMap::new(),
            wake: Notify::new(),
            store: Arc::clone(&store),
        });
        Self { shared, store, settings }
    }

    /// Supply one eligible key, blocking until a key frees up or the
    /// configured acquire timeout elapses.
    pub async fn acquire(&self) -> Result<KeyLease, PoolError> {
        let settings = self.settings.snapshot().await;
        let deadline = tokio::time::Instant::now() + settings.acquire_timeout;

        loop {
            if let Some(key) = self.shared.try_select(&settings) {
                return Ok(KeyLease::new(
                    Arc::clone(&self.shared),
                    Arc::clone(&settings),
                    key,
                ));
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(PoolError::NoKeysAvailable);
            }
            // Wake early on release/reconcile; otherwise poll so that an
            // expired cooldown is observed within one interval.
            let wait = (deadline - now).min(ACQUIRE_POLL_INTERVAL);
            tokio::select! {
                _ = self.shared.wake.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Feed a verdict for a key the caller did not lease (health checker
    /// path). A no-op for keys not in the live set.
    pub async fn apply_verdict(&self, id: i64, verdict: Verdict) {
        if !self.contains(id) {
            return;
        }
        let settings = self.settings.snapshot().await;
        self.shared.release_internal(id, verdict, &settings);
    }

    /// Remove a key from the live set immediately (registry demotion is
    /// the caller's responsibility).
    pub fn evict(&self, id: i64) {
        self.shared.evict(id);
    }

    pub fn contains(&self, id: i64) -> bool {
        self.shared.keys.read().contains_key(&id)
    }

    pub fn is_on_cooldown(&self, id: i64) -> bool {
        self.shared.active_cooldown(id, Utc::now()).is_some()
    }

    pub fn len(&self) -> usize {
        self.shared.keys.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.keys.read().is_empty()
    }

    /// Rebuild the live set from the registry. Keys present in both keep
    /// their volatile state; evicted keys lose it; new keys start fresh.
    pub async fn reconcile(&self) -> Result<usize, RegistryError> {
        let enabled = self.store.list_enabled().await?;
        let fresh: HashMap<i64, ApiKey> = enabled.into_iter().map(|k| (k.id, k)).collect();
        let live: HashSet<i64> = fresh.keys().copied().collect();

        *self.shared.keys.write() = fresh;

        self.shared.stats.retain(|id, _| live.contains(id));
        let now = Utc::now();
        self.shared.cooldowns.retain(|id, until| live.contains(id) && *until > now);

        let count = live.len();
        tracing::info!("key pool reconciled, {} enabled key(s) live", count);
        self.shared.wake.notify_waiters();
        Ok(count)
    }

    /// Background reconciliation on the configured refresh interval.
    pub fn spawn_reconcile_task(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let interval = pool.settings.snapshot().await.refresh_interval;
                tokio::time::sleep(interval).await;
                if let Err(e) = pool.reconcile().await {
                    tracing::warn!("periodic reconcile failed: {}", e);
                }
            }
        });
        tracing::info!("key pool reconcile task started");
    }

    /// Keys currently excluded by an unexpired cooldown, for the admin
    /// banned-list view.
    pub fn snapshot_cooldowns(&self) -> Vec<BannedKey> {
        let now = Utc::now();
        let keys = self.shared.keys.read();
        let mut banned: Vec<BannedKey> = self
            .shared
            .cooldowns
            .iter()
            .filter(|entry| *entry.value() > now)
            .filter_map(|entry| {
                keys.get(entry.key())
                    .map(|key| BannedKey { key: key.clone(), banned_until: *entry.value() })
            })
            .collect();
        banned.sort_by_key(|b| b.key.id);
        banned
    }

    pub fn count_cooldowns(&self) -> usize {
        let now = Utc::now();
        self.shared.cooldowns.iter().filter(|entry| *entry.value() > now).count()
    }

    /// Per-key volatile statistics for the admin surface.
    pub fn stats_snapshot(&self) -> Vec<KeyStatsView> {
        let now = Utc::now();
        let keys = self.shared.keys.read();
        let mut views: Vec<KeyStatsView> = keys
            .values()
            .map(|key| {
                let stats =
                    self.shared.stats.get(&key.id).map(|s| s.clone()).unwrap_or_default();
                let cooldown_until = self.shared.active_cooldown(key.id, now);
                KeyStatsView {
                    id: key.id,
                    health_score: stats.health_score,
                    success_count: stats.success_count,
                    failure_count: stats.failure_count,
                    rate_limit_count: stats.rate_limit_count,
                    last_used_at: stats.last_used_at,
                    last_rate_limited_at: stats.last_rate_limited_at,
                    on_cooldown: cooldown_until.is_some(),
                    cooldown_until,
                }
            })
            .collect();
        views.sort_by_key(|v| v.id);
        views
    }

    #[cfg(test)]
    pub(crate) fn inject_stats(&self, id: i64, stats: KeyStats) {
        self.shared.stats.insert(id, stats);
    }

    #[cfg(test)]
    pub(crate) fn cooldown_until(&self, id: i64) -> Option<DateTime<Utc>> {
        self.shared.cooldowns.get(&id).map(|u| *u)
    }
}
