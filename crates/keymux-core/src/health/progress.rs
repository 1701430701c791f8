//! Shared progress state for a health-check run.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use keymux_types::HealthCheckProgress;

/// Lock-free counters updated by the probe workers, plus a guard bit that
/// enforces at-most-one run at a time.
#[derive(Default)]
pub struct CheckProgress {
    active: AtomicBool,
    total: AtomicUsize,
    processed: AtomicUsize,
    rate_limited: AtomicUsize,
    invalid: AtomicUsize,
    recovered: AtomicUsize,
    phase: Mutex<String>,
    started_at: Mutex<Option<Instant>>,
}

impl CheckProgress {
    /// Claim the run slot. Returns false when a run is already active.
    pub fn try_activate(&self) -> bool {
        if self.active.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return false;
        }
        self.total.store(0, Ordering::Release);
        self.processed.store(0, Ordering::Release);
        self.rate_limited.store(0, Ordering::Release);
        self.invalid.store(0, Ordering::Release);
        self.recovered.store(0, Ordering::Release);
        self.phase.lock().clear();
        *self.started_at.lock() = Some(Instant::now());
        true
    }

    pub fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::Release);
    }

    pub fn set_phase(&self, phase: &str) {
        *self.phase.lock() = phase.to_string();
    }

    pub fn mark_processed(&self) {
        self.processed.fetch_add(1, Ordering::AcqRel);
    }

    pub fn mark_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::AcqRel);
    }

    pub fn mark_invalid(&self) {
        self.invalid.fetch_add(1, Ordering::AcqRel);
    }

    pub fn mark_recovered(&self) {
        self.recovered.fetch_add(1, Ordering::AcqRel);
    }

    pub fn finish(&self) {
        self.phase.lock().clear();
        self.active.store(false, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Point-in-time view, with ETA extrapolated from current throughput.
    pub fn snapshot(&self) -> HealthCheckProgress {
        let is_active = self.is_active();
        let total = self.total.load(Ordering::Acquire);
        let processed = self.processed.load(Ordering::Acquire);
        let elapsed = self
            .started_at
            .lock()
            .map(|start| start.elapsed().as_secs())
            .unwrap_or(0);

        let eta_secs = if is_active && processed > 0 && total > processed {
            let per_key = elapsed as f64 / processed as f64;
            Some((per_key * (total - processed) as f64) as u64)
        } else {
            None
        };

        HealthCheckProgress {
            total_keys: total,
            processed_keys: processed,
            progress: if total > 0 { processed as f64 / total as f64 * 100.0 } else { 0.0 },
            rate_limited_count: self.rate_limited.load(Ordering::Acquire),
            invalid_count: self.invalid.load(Ordering::Acquire),
            recovered_count: self.recovered.load(Ordering::Acquire),
            current_phase: self.phase.lock().clone(),
            elapsed_secs: if is_active { elapsed } else { 0 },
            eta_secs,
            is_active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_run_guard() {
        let progress = CheckProgress::default();
        assert!(progress.try_activate());
        assert!(!progress.try_activate());
        progress.finish();
        assert!(progress.try_activate());
    }

    #[test]
    fn test_snapshot_counts_and_percentage() {
        let progress = CheckProgress::default();
        assert!(progress.try_activate());
        progress.set_total(4);
        progress.set_phase("enabled");
        progress.mark_processed();
        progress.mark_processed();
        progress.mark_invalid();

        let snap = progress.snapshot();
        assert!(snap.is_active);
        assert_eq!(snap.total_keys, 4);
        assert_eq!(snap.processed_keys, 2);
        assert_eq!(snap.invalid_count, 1);
        assert_eq!(snap.current_phase, "enabled");
        assert!((snap.progress - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_inactive_between_runs() {
        let progress = CheckProgress::default();
        let snap = progress.snapshot();
        assert!(!snap.is_active);
        assert_eq!(snap.eta_secs, None);
    }

    #[test]
    fn test_activation_resets_previous_counts() {
        let progress = CheckProgress::default();
        assert!(progress.try_activate());
        progress.set_total(10);
        progress.mark_processed();
        progress.mark_recovered();
        progress.finish();

        assert!(progress.try_activate());
        let snap = progress.snapshot();
        assert_eq!(snap.processed_keys, 0);
        assert_eq!(snap.recovered_count, 0);
        assert_eq!(snap.total_keys, 0);
    }
}
