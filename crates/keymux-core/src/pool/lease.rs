//! RAII lease for an acquired key.

use std::sync::Arc;

use keymux_types::{ApiKey, Verdict};

use super::PoolShared;
use crate::config::Settings;

/// One checkout of a key from the pool.
///
/// Exactly one release happens per lease: either explicitly via
/// [`KeyLease::release`] with the attempt's verdict, or on drop with
/// [`Verdict::Transient`]. The drop path is what makes client disconnects
/// and task cancellation leak-free.
pub struct KeyLease {
    shared: Arc<PoolShared>,
    settings: Arc<Settings>,
    key: ApiKey,
    released: bool,
}

impl KeyLease {
    pub(crate) fn new(shared: Arc<PoolShared>, settings: Arc<Settings>, key: ApiKey) -> Self {
        Self { shared, settings, key, released: false }
    }

    pub fn id(&self) -> i64 {
        self.key.id
    }

    pub fn secret(&self) -> &str {
        &self.key.secret
    }

    /// Last four characters of the credential, safe for log lines.
    pub fn secret_tail(&self) -> &str {
        self.key.secret_tail()
    }

    /// Consume the lease with the attempt's verdict.
    pub fn release(mut self, verdict: Verdict) {
        self.released = true;
        self.shared.release_internal(self.key.id, verdict, &self.settings);
    }
}

impl Drop for KeyLease {
    fn drop(&mut self) {
        if !self.released {
            self.shared.release_internal(self.key.id, Verdict::Transient, &self.settings);
        }
    }
}
