//! Tilescene Scheduler Library
//!
//! Asynchronous patch recomputation with de-duplicated requests and
//! whole-queue cancellation.
//!
//! Requests are keyed by `(layer, tile)`. While a request is still queued, a
//! newer request for the same key only raises the queued version instead of
//! adding work. Running work observes cancellation through a token shared by
//! every request handed out since the last [`RenderScheduler::cancel_all`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tilescene_scheduler::{
//!     CancellationToken, PatchRequest, PatchScheduler, RenderService, WorkerPoolConfig,
//! };
//!
//! let executor = Arc::new(|request: &PatchRequest, token: &CancellationToken| {
//!     if token.is_cancelled() {
//!         return;
//!     }
//!     // ... compute the patch for request.layer / request.tile ...
//!     let _ = request.version;
//! });
//!
//! let service = RenderService::new(executor, WorkerPoolConfig::new(2));
//! service.start().unwrap();
//!
//! service.request_patch(PatchRequest::new(0, 3, 1));
//! service.request_patch(PatchRequest::new(0, 3, 2)); // merged while queued
//!
//! service.cancel_all();
//! service.stop();
//! ```

mod cancel;
mod error;
mod request;
mod scheduler;
mod service;
mod worker;

pub use cancel::CancellationToken;
pub use error::SchedulerError;
pub use request::{PatchKey, PatchRequest};
pub use scheduler::{RenderScheduler, SchedulerStats};
pub use service::{PatchExecutor, PatchScheduler, RenderService};
pub use worker::{WorkerPool, WorkerPoolConfig};
