//! Render service
//!
//! Couples a [`RenderScheduler`] with a [`WorkerPool`] behind the
//! [`PatchScheduler`] interface the scene talks to.

use crate::cancel::CancellationToken;
use crate::error::SchedulerError;
use crate::request::PatchRequest;
use crate::scheduler::{RenderScheduler, SchedulerStats};
use crate::worker::{WorkerPool, WorkerPoolConfig};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Callback that recomputes one patch on a worker thread.
///
/// The executor should poll the token and return early once it is
/// cancelled. Its results are delivered by the executor itself.
pub type PatchExecutor = Arc<dyn Fn(&PatchRequest, &CancellationToken) + Send + Sync>;

/// Asynchronous patch recomputation as seen by a scene.
pub trait PatchScheduler: Send + Sync {
    /// Queue recomputation of a patch.
    fn request_patch(&self, request: PatchRequest);

    /// Drop all queued requests and wait for running ones to finish.
    fn cancel_all(&self);

    /// Start processing requests.
    fn start(&self) -> Result<(), SchedulerError>;

    /// Stop processing requests. Queued requests are dropped.
    fn stop(&self);
}

/// Worker-pool backed [`PatchScheduler`]
pub struct RenderService {
    scheduler: Arc<RenderScheduler>,
    executor: PatchExecutor,
    config: WorkerPoolConfig,
    pool: Mutex<Option<WorkerPool>>,
}

impl RenderService {
    /// Create a stopped service.
    ///
    /// Requests made before [`PatchScheduler::start`] are queued.
    pub fn new(executor: PatchExecutor, config: WorkerPoolConfig) -> Self {
        Self {
            scheduler: Arc::new(RenderScheduler::new()),
            executor,
            config,
            pool: Mutex::new(None),
        }
    }

    fn pool(&self) -> MutexGuard<'_, Option<WorkerPool>> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether worker threads are running.
    pub fn is_running(&self) -> bool {
        self.pool().is_some()
    }

    /// The underlying request queue.
    pub fn scheduler(&self) -> &Arc<RenderScheduler> {
        &self.scheduler
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }
}

impl PatchScheduler for RenderService {
    fn request_patch(&self, request: PatchRequest) {
        self.scheduler.submit(request);
    }

    fn cancel_all(&self) {
        let dropped = self.scheduler.cancel_all();
        if dropped > 0 {
            log::debug!("cancelled {} queued patch requests", dropped);
        }
    }

    fn start(&self) -> Result<(), SchedulerError> {
        let mut pool = self.pool();
        if pool.is_none() {
            *pool = Some(WorkerPool::new(
                self.scheduler.clone(),
                self.executor.clone(),
                &self.config,
            )?);
        }
        Ok(())
    }

    fn stop(&self) {
        let pool = self.pool().take();
        if let Some(pool) = pool {
            self.scheduler.cancel_all();
            pool.shutdown();
            log::debug!("render service stopped");
        }
    }
}

impl Drop for RenderService {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    fn counting_executor(counter: Arc<AtomicUsize>) -> PatchExecutor {
        Arc::new(move |_: &PatchRequest, _: &CancellationToken| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn fast_config(workers: usize) -> WorkerPoolConfig {
        WorkerPoolConfig::new(workers).with_poll_interval(Duration::from_millis(10))
    }

    #[test]
    fn test_requests_queue_until_started() {
        let counter = Arc::new(AtomicUsize::new(0));
        let service = RenderService::new(counting_executor(counter.clone()), fast_config(1));

        service.request_patch(PatchRequest::new(0, 0, 1));
        service.request_patch(PatchRequest::new(0, 0, 2));
        service.request_patch(PatchRequest::new(0, 1, 1));
        assert!(!service.is_running());
        assert_eq!(service.scheduler().pending(), 2);

        service.start().unwrap();
        assert!(service.is_running());

        let start = Instant::now();
        while counter.load(Ordering::SeqCst) < 2 && start.elapsed() < Duration::from_secs(2) {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        service.stop();
        assert!(!service.is_running());
    }

    #[test]
    fn test_start_is_idempotent() {
        let service = RenderService::new(
            counting_executor(Arc::new(AtomicUsize::new(0))),
            fast_config(2),
        );
        service.start().unwrap();
        service.start().unwrap();
        assert!(service.is_running());
        service.stop();
        service.stop();
        assert!(!service.is_running());
    }

    #[test]
    fn test_cancel_all_clears_queue() {
        let service = RenderService::new(
            counting_executor(Arc::new(AtomicUsize::new(0))),
            fast_config(1),
        );
        for tile in 0..4 {
            service.request_patch(PatchRequest::new(1, tile, 1));
        }
        service.cancel_all();
        assert_eq!(service.stats().queue_size, 0);
        assert_eq!(service.stats().requests_cancelled, 4);
    }

    #[test]
    fn test_restart_after_stop() {
        let counter = Arc::new(AtomicUsize::new(0));
        let service = RenderService::new(counting_executor(counter.clone()), fast_config(1));

        service.start().unwrap();
        service.stop();
        service.start().unwrap();

        service.request_patch(PatchRequest::new(0, 5, 1));
        let start = Instant::now();
        while counter.load(Ordering::SeqCst) == 0 && start.elapsed() < Duration::from_secs(2) {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_service_as_trait_object() {
        let service: Arc<dyn PatchScheduler> = Arc::new(RenderService::new(
            counting_executor(Arc::new(AtomicUsize::new(0))),
            fast_config(1),
        ));
        service.start().unwrap();
        service.request_patch(PatchRequest::new(0, 0, 1));
        service.cancel_all();
        service.stop();
    }
}
