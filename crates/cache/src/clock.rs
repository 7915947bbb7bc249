//! Access timestamps for managed caches.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock timestamp with microsecond resolution.
///
/// Zero means "never accessed".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The current wall-clock time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or_default();
        Self(micros)
    }

    pub fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub fn as_micros(&self) -> u64 {
        self.0
    }

    /// Seconds since the Unix epoch.
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }
}

/// Single stored last-access timestamp.
///
/// This is the default backing for [`ManagedCache::last_access_time`]:
/// implementations call [`AccessClock::touch`] on every access. The stored
/// value never moves backwards, even if the system clock does.
///
/// [`ManagedCache::last_access_time`]: crate::ManagedCache::last_access_time
#[derive(Debug, Default)]
pub struct AccessClock {
    last: AtomicU64,
}

impl AccessClock {
    /// Create a clock that has never been touched.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an access at the current time.
    pub fn touch(&self) {
        self.touch_at(Timestamp::now());
    }

    /// Record an access at an explicit time.
    pub fn touch_at(&self, at: Timestamp) {
        self.last.fetch_max(at.as_micros(), Ordering::Relaxed);
    }

    /// Timestamp of the most recent access.
    pub fn last(&self) -> Timestamp {
        Timestamp(self.last.load(Ordering::Relaxed))
    }
}
