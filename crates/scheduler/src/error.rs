//! Scheduler errors.

/// Errors raised while managing worker threads.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// A worker thread could not be spawned.
    #[error("failed to spawn render worker: {0}")]
    Spawn(#[from] std::io::Error),
}
