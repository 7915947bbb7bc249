//! Render request queue
//!
//! FIFO queue of patch requests, de-duplicated by `(layer, tile)`. Tracks
//! how many requests are being worked on so that `cancel_all` can block
//! until every running request has been acknowledged.

use crate::cancel::CancellationToken;
use crate::request::{PatchKey, PatchRequest};
use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Requests that added new work to the queue
    pub requests_queued: u64,

    /// Requests merged into an already queued request for the same patch
    pub requests_merged: u64,

    /// Requests handed to a worker and finished
    pub requests_completed: u64,

    /// Requests dropped from the queue or finished after cancellation
    pub requests_cancelled: u64,

    /// Current queue size
    pub queue_size: usize,

    /// Requests currently being worked on
    pub running: usize,
}

struct QueueState {
    /// Dispatch order
    order: VecDeque<PatchKey>,

    /// Latest requested version per queued patch
    pending: HashMap<PatchKey, u64>,

    /// Requests handed out and not yet completed
    running: usize,

    /// Token shared by requests dispatched since the last cancel-all
    token: CancellationToken,

    stats: SchedulerStats,
}

/// De-duplicating, cancellable request queue
///
/// Thread-safe. Workers pull with [`RenderScheduler::wait_for_request`] and
/// must report back with [`RenderScheduler::complete`].
///
/// # Example
///
/// ```
/// use tilescene_scheduler::{PatchRequest, RenderScheduler};
///
/// let scheduler = RenderScheduler::new();
///
/// assert!(scheduler.submit(PatchRequest::new(1, 2, 5)));
/// assert!(!scheduler.submit(PatchRequest::new(1, 2, 6))); // merged
///
/// let (request, token) = scheduler.next_request().unwrap();
/// assert_eq!(request.version, 6);
/// assert!(!token.is_cancelled());
/// scheduler.complete(&request, &token);
/// ```
pub struct RenderScheduler {
    state: Mutex<QueueState>,
    available: Condvar,
    idle: Condvar,
}

impl RenderScheduler {
    /// Create an empty scheduler
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                order: VecDeque::new(),
                pending: HashMap::new(),
                running: 0,
                token: CancellationToken::new(),
                stats: SchedulerStats::default(),
            }),
            available: Condvar::new(),
            idle: Condvar::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a request
    ///
    /// Returns `true` if new work was queued, `false` if the request was
    /// merged into a queued request for the same patch. Merging keeps the
    /// queue position and raises the version to the newest one requested.
    pub fn submit(&self, request: PatchRequest) -> bool {
        let key = request.key();
        let mut state = self.state();

        if let Some(version) = state.pending.get_mut(&key) {
            *version = (*version).max(request.version);
            state.stats.requests_merged += 1;
            log::trace!(
                "merged request for layer {} tile {} (version {})",
                key.layer,
                key.tile,
                request.version
            );
            return false;
        }

        state.pending.insert(key, request.version);
        state.order.push_back(key);
        state.stats.requests_queued += 1;
        drop(state);

        self.available.notify_one();
        true
    }

    /// Take the next request without blocking
    ///
    /// The request counts as running until [`RenderScheduler::complete`].
    pub fn next_request(&self) -> Option<(PatchRequest, CancellationToken)> {
        let mut state = self.state();
        Self::pop(&mut state)
    }

    /// Take the next request, waiting up to `timeout` for one to arrive
    pub fn wait_for_request(&self, timeout: Duration) -> Option<(PatchRequest, CancellationToken)> {
        let state = self.state();
        let (mut state, _) = self
            .available
            .wait_timeout_while(state, timeout, |s| s.order.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        Self::pop(&mut state)
    }

    fn pop(state: &mut QueueState) -> Option<(PatchRequest, CancellationToken)> {
        let key = state.order.pop_front()?;
        let version = state.pending.remove(&key)?;
        state.running += 1;
        Some((
            PatchRequest::new(key.layer, key.tile, version),
            state.token.clone(),
        ))
    }

    /// Report that a dispatched request has finished
    pub fn complete(&self, request: &PatchRequest, token: &CancellationToken) {
        let mut state = self.state();
        state.running = state.running.saturating_sub(1);
        if token.is_cancelled() {
            state.stats.requests_cancelled += 1;
            log::trace!(
                "request for layer {} tile {} finished after cancellation",
                request.layer,
                request.tile
            );
        } else {
            state.stats.requests_completed += 1;
        }
        let idle = state.running == 0;
        drop(state);

        if idle {
            self.idle.notify_all();
        }
    }

    /// Cancel all outstanding work
    ///
    /// Drops every queued request, cancels the token of running requests and
    /// blocks until all running requests have called `complete`. Returns the
    /// number of queued requests that were dropped.
    ///
    /// Must not be called from inside a worker's executor.
    pub fn cancel_all(&self) -> usize {
        let mut state = self.state();
        let dropped = state.order.len();
        state.order.clear();
        state.pending.clear();
        state.stats.requests_cancelled += dropped as u64;

        state.token.cancel();
        state.token = CancellationToken::new();

        let _state = self
            .idle
            .wait_while(state, |s| s.running > 0)
            .unwrap_or_else(PoisonError::into_inner);
        dropped
    }

    /// Wake every worker waiting for a request
    pub(crate) fn wake_all(&self) {
        self.available.notify_all();
    }

    /// Number of queued requests
    pub fn pending(&self) -> usize {
        self.state().order.len()
    }

    /// Number of requests currently being worked on
    pub fn running(&self) -> usize {
        self.state().running
    }

    /// Whether nothing is queued or running
    pub fn is_idle(&self) -> bool {
        let state = self.state();
        state.order.is_empty() && state.running == 0
    }

    /// Queued requests in dispatch order
    pub fn pending_requests(&self) -> Vec<PatchRequest> {
        let state = self.state();
        state
            .order
            .iter()
            .filter_map(|key| {
                state
                    .pending
                    .get(key)
                    .map(|&version| PatchRequest::new(key.layer, key.tile, version))
            })
            .collect()
    }

    /// Get scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        let state = self.state();
        let mut stats = state.stats.clone();
        stats.queue_size = state.order.len();
        stats.running = state.running;
        stats
    }
}

impl Default for RenderScheduler {
    fn default() -> Self {
        Self::new()
    }
}
