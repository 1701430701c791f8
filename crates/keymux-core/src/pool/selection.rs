//! Eligibility filtering and weighted random selection.

use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;

use keymux_types::ApiKey;

use super::PoolShared;
use crate::config::Settings;
use crate::pool::stats::KeyStats;

/// Probability that a key rate-limited within the past hour is admitted
/// anyway. Keeps recently-hot keys mostly out of rotation without
/// abandoning them entirely.
const RECENT_429_ADMISSION: f64 = 0.1;

impl PoolShared {
    /// One selection pass over the live set. Returns `None` when no key is
    /// currently eligible; the caller decides how long to wait.
    pub(crate) fn try_select(&self, settings: &Settings) -> Option<ApiKey> {
        let now = Utc::now();
        let recent_429_window = ChronoDuration::hours(1);
        let keys = self.keys.read();
        let mut rng = rand::thread_rng();

        let mut candidates: Vec<(&ApiKey, u64)> = Vec::with_capacity(keys.len());
        let mut total_weight: u64 = 0;

        for key in keys.values() {
            if let Some(until) = self.cooldowns.get(&key.id) {
                if now < *until {
                    continue;
                }
            }

            let weight = match self.stats.get(&key.id) {
                Some(stats) => {
                    if !eligible(&stats, settings) {
                        continue;
                    }
                    if let Some(last_429) = stats.last_rate_limited_at {
                        if now - last_429 < recent_429_window
                            && rng.gen::<f64>() > RECENT_429_ADMISSION
                        {
                            continue;
                        }
                    }
                    stats.selection_weight()
                }
                // Never used since admission: treated as fresh and healthy.
                None => KeyStats::default().selection_weight(),
            };

            total_weight += weight;
            candidates.push((key, weight));
        }

        if candidates.is_empty() {
            return None;
        }
        if candidates.len() == 1 {
            return Some(candidates[0].0.clone());
        }

        let mut roll = rng.gen_range(0..total_weight);
        for (key, weight) in &candidates {
            if roll < *weight {
                return Some((*key).clone());
            }
            roll -= weight;
        }
        // Unreachable given total_weight is the sum of all weights.
        candidates.last().map(|(key, _)| (*key).clone())
    }
}

fn eligible(stats: &KeyStats, settings: &Settings) -> bool {
    stats.health_score >= settings.min_health_score
        && stats.rate_limit_count <= settings.max_429_count
}
