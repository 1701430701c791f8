//! Volatile per-key statistics and the verdict arithmetic.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::Settings;

pub(crate) const HEALTH_MAX: i32 = 100;
pub(crate) const RATE_LIMIT_PENALTY: i32 = 20;

/// Runtime statistics for one key. Never persisted; reset on restart.
#[derive(Debug, Clone)]
pub struct KeyStats {
    pub health_score: i32,
    pub success_count: u64,
    pub failure_count: u64,
    pub rate_limit_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_rate_limited_at: Option<DateTime<Utc>>,
}

impl Default for KeyStats {
    fn default() -> Self {
        Self {
            health_score: HEALTH_MAX,
            success_count: 0,
            failure_count: 0,
            rate_limit_count: 0,
            last_used_at: None,
            last_rate_limited_at: None,
        }
    }
}

impl KeyStats {
    pub fn record_success(&mut self, recovery_bonus: i32) {
        self.success_count += 1;
        self.health_score = (self.health_score + recovery_bonus).min(HEALTH_MAX);
    }

    pub fn record_rate_limit(&mut self, now: DateTime<Utc>) {
        self.failure_count += 1;
        self.rate_limit_count += 1;
        self.last_rate_limited_at = Some(now);
        self.health_score = (self.health_score - RATE_LIMIT_PENALTY).max(0);
    }

    pub fn record_client_invalid(&mut self) {
        self.failure_count += 1;
    }

    pub fn success_rate(&self) -> f64 {
        let attempts = self.success_count + self.failure_count;
        if attempts == 0 {
            1.0
        } else {
            self.success_count as f64 / attempts as f64
        }
    }

    /// Selection weight: proportional to health scaled by observed success
    /// rate, floored at 1 so every eligible key keeps a nonzero chance.
    pub fn selection_weight(&self) -> u64 {
        let weight = (self.health_score as f64 * self.success_rate()) as i64;
        weight.max(1) as u64
    }
}

/// Graduated cooldown: repeat offenders sit out longer.
pub fn cooldown_duration(settings: &Settings, rate_limit_count: u64) -> Duration {
    let base = settings.rate_limit_cooldown;
    let factor = settings.penalty_factor;
    let scaled = match rate_limit_count {
        0..=2 => return base,
        3..=5 => factor,
        6..=10 => factor * 1.5,
        _ => factor * 2.0,
    };
    base.mul_f64(scaled)
}
