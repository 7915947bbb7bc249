//! Generation-wide cancellation
//!
//! All requests handed out between two `cancel_all` calls share one token.
//! Cancelling flips the shared flag; the scheduler then installs a fresh
//! token for the next generation. Executors poll the flag and return early.
//! A result that still arrives after cancellation is harmless, since patches
//! compare versions rather than request identity.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag of one request generation
///
/// ```
/// use tilescene_scheduler::CancellationToken;
///
/// let generation = CancellationToken::new();
/// let handed_out = generation.clone();
///
/// generation.cancel();
/// assert!(handed_out.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel this generation. Repeated calls have no further effect.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Whether both tokens belong to the same generation.
    pub fn same_as(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.flag, &other.flag)
    }
}
