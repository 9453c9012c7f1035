//! Asynchronous execution primitives on top of tokio
//!
//! # Features
//! - Cancelable execution: race a unit of work against a [`Signal`]
//! - Bounded retry with pluggable backoff and success/failure hooks
//! - Fixed-size worker pool with separate success and error streams
//! - Order-preserving stream pipelines
//!
//! Cancellation only stops the caller from waiting. Work that already
//! started runs to completion in the background; see [`cancel`].

pub mod cancel;
pub mod errors;
pub mod handle;
pub mod model;
pub mod pipeline;
pub mod pool;
pub mod retry;
pub mod signal;
pub mod work;

pub use cancel::{run_cancelable, run_cancelable_action, run_cancelable_blocking};
pub use errors::{CancelReason, PipelineError, PoolError, RetryError, RunError};
pub use pipeline::{compose, stage, stream_from_iter, BoxStage, Pipeline, PipelineOptions, Stage};
pub use pool::{Config, SharedPool, WorkerPool};
pub use retry::{run_action_with_retry, run_with_retry, Backoff, RetryPolicy};
pub use signal::Signal;
pub use work::{Action, Task};
