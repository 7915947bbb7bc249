//! Render worker threads
//!
//! Each worker repeatedly takes the oldest request from the shared
//! [`RenderScheduler`], hands it to the executor together with the current
//! generation's cancellation token, and reports completion. A panic inside
//! the executor is caught and logged; the worker keeps serving requests and
//! the completion is still reported, so `cancel_all` never waits forever.

use crate::error::SchedulerError;
use crate::scheduler::RenderScheduler;
use crate::service::PatchExecutor;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Worker count and shutdown polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Threads to spawn; defaults to the available parallelism.
    pub num_workers: usize,

    /// How long an idle worker blocks before re-checking for shutdown.
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::new(available_workers())
    }
}

impl WorkerPoolConfig {
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Running set of render worker threads
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    scheduler: Arc<RenderScheduler>,
}

impl WorkerPool {
    /// Spawn `config.num_workers` threads serving `scheduler`.
    ///
    /// # Errors
    /// Returns [`SchedulerError::Spawn`] if a thread cannot be created; the
    /// threads spawned so far are stopped first.
    pub fn new(
        scheduler: Arc<RenderScheduler>,
        executor: PatchExecutor,
        config: &WorkerPoolConfig,
    ) -> Result<Self, SchedulerError> {
        let mut pool = Self {
            handles: Vec::with_capacity(config.num_workers),
            shutdown: Arc::new(AtomicBool::new(false)),
            scheduler,
        };

        for index in 0..config.num_workers {
            let context = WorkerContext {
                index,
                scheduler: pool.scheduler.clone(),
                executor: executor.clone(),
                shutdown: pool.shutdown.clone(),
                poll_interval: config.poll_interval,
            };
            let spawned = thread::Builder::new()
                .name(format!("tile-render-worker-{index}"))
                .spawn(move || context.run());

            match spawned {
                Ok(handle) => pool.handles.push(handle),
                Err(err) => {
                    pool.shutdown();
                    return Err(err.into());
                }
            }
        }

        log::debug!("started {} render workers", pool.handles.len());
        Ok(pool)
    }

    pub fn num_workers(&self) -> usize {
        self.handles.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stop all workers and join them.
    ///
    /// A worker finishes its current request first.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.scheduler.wake_all();

        for (index, handle) in self.handles.drain(..).enumerate() {
            if handle.join().is_err() {
                log::error!("render worker {index} terminated abnormally");
            }
        }
    }
}

struct WorkerContext {
    index: usize,
    scheduler: Arc<RenderScheduler>,
    executor: PatchExecutor,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl WorkerContext {
    fn run(self) {
        while !self.shutdown.load(Ordering::Acquire) {
            let Some((request, token)) = self.scheduler.wait_for_request(self.poll_interval) else {
                continue;
            };

            if !token.is_cancelled() {
                let executor = &self.executor;
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| executor(&request, &token)));
                if outcome.is_err() {
                    log::error!(
                        "render worker {} panicked on layer={} tile={} version={}",
                        self.index,
                        request.layer,
                        request.tile,
                        request.version
                    );
                }
            }

            self.scheduler.complete(&request, &token);
        }
    }
}

fn available_workers() -> usize {
    thread::available_parallelism().map_or(4, |n| n.get())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::request::PatchRequest;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Instant;

    fn wait_until(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    fn fast(workers: usize) -> WorkerPoolConfig {
        WorkerPoolConfig::new(workers).with_poll_interval(Duration::from_millis(10))
    }

    #[test]
    fn test_config() {
        assert!(WorkerPoolConfig::default().num_workers > 0);
        assert_eq!(WorkerPoolConfig::new(3).poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(fast(2).poll_interval, Duration::from_millis(10));
    }

    #[test]
    fn test_spawn_and_shutdown() {
        let executor: PatchExecutor = Arc::new(|_: &PatchRequest, _: &CancellationToken| {});
        let pool = WorkerPool::new(Arc::new(RenderScheduler::new()), executor, &fast(3)).unwrap();
        assert_eq!(pool.num_workers(), 3);
        assert!(!pool.is_shutting_down());
        pool.shutdown();
    }

    #[test]
    fn test_all_requests_are_executed() {
        let scheduler = Arc::new(RenderScheduler::new());
        let executed = Arc::new(AtomicUsize::new(0));
        let counter = executed.clone();
        let executor: PatchExecutor = Arc::new(move |_: &PatchRequest, _: &CancellationToken| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let pool = WorkerPool::new(scheduler.clone(), executor, &fast(2)).unwrap();

        for tile in 0..5 {
            scheduler.submit(PatchRequest::new(0, tile, 1));
        }

        assert!(wait_until(|| scheduler.stats().requests_completed == 5));
        assert_eq!(executed.load(Ordering::SeqCst), 5);
        pool.shutdown();
    }

    #[test]
    fn test_single_worker_is_fifo() {
        let scheduler = Arc::new(RenderScheduler::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let sink = order.clone();
        let executor: PatchExecutor = Arc::new(move |request: &PatchRequest, _: &CancellationToken| {
            sink.lock().unwrap().push(request.tile);
        });

        for tile in [3, 1, 2] {
            scheduler.submit(PatchRequest::new(0, tile, 1));
        }
        let pool = WorkerPool::new(scheduler.clone(), executor, &fast(1)).unwrap();

        assert!(wait_until(|| scheduler.stats().requests_completed == 3));
        assert_eq!(*order.lock().unwrap(), vec![3, 1, 2]);
        pool.shutdown();
    }

    #[test]
    fn test_cancel_all_interrupts_running_request() {
        let scheduler = Arc::new(RenderScheduler::new());
        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let executor: PatchExecutor = {
            let started = started.clone();
            let finished = finished.clone();
            Arc::new(move |_: &PatchRequest, token: &CancellationToken| {
                started.fetch_add(1, Ordering::SeqCst);
                for _ in 0..1000 {
                    if token.is_cancelled() {
                        return;
                    }
                    thread::sleep(Duration::from_millis(2));
                }
                finished.fetch_add(1, Ordering::SeqCst);
            })
        };
        let pool = WorkerPool::new(scheduler.clone(), executor, &fast(1)).unwrap();

        for tile in 0..3 {
            scheduler.submit(PatchRequest::new(0, tile, 1));
        }
        assert!(wait_until(|| started.load(Ordering::SeqCst) == 1));

        assert_eq!(scheduler.cancel_all(), 2);
        assert_eq!(scheduler.running(), 0);
        assert_eq!(finished.load(Ordering::SeqCst), 0);

        pool.shutdown();
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_worker_survives_panicking_executor() {
        let scheduler = Arc::new(RenderScheduler::new());
        let executed = Arc::new(AtomicUsize::new(0));
        let counter = executed.clone();
        let executor: PatchExecutor = Arc::new(move |request: &PatchRequest, _: &CancellationToken| {
            if request.tile == 0 {
                panic!("backend failure");
            }
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let pool = WorkerPool::new(scheduler.clone(), executor, &fast(1)).unwrap();

        scheduler.submit(PatchRequest::new(0, 0, 1));
        scheduler.submit(PatchRequest::new(0, 1, 1));

        assert!(wait_until(|| scheduler.stats().requests_completed == 2));
        assert_eq!(executed.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.cancel_all(), 0);
        pool.shutdown();
    }
}
