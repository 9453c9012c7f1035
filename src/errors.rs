use thiserror::Error;


/// Why a [`Signal`](crate::signal::Signal) fired.
#[derive(Debug, PartialEq, PartialOrd, Eq, Ord, Clone, Error)]
pub enum CancelReason {
    #[error("operation cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("cancelled: {0}")]
    Custom(String),
}

/// Outcome of a unit of work that did not produce a value.
///
/// `Cancelled` and `TaskFailed` are mutually exclusive: the first means the
/// caller stopped waiting, the second means the work itself returned an error.
#[derive(Debug, Error)]
pub enum RunError<E> {
    #[error("{0}")]
    Cancelled(CancelReason),
    #[error("task failed: {0}")]
    TaskFailed(#[source] E),
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The runtime could not join the spawned task for a reason other than
    /// a panic, e.g. the runtime shut down under it.
    #[error("task join failed: {0}")]
    JoinFailed(String),
}

impl<E> RunError<E> {
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunError::Cancelled(_))
    }

    /// The work's own error, if that is what this is.
    pub fn into_task_error(self) -> Option<E> {
        match self {
            RunError::TaskFailed(e) => Some(e),
            _ => None,
        }
    }
}

/// Failure of a retried unit of work. `T` is the value type of a task and
/// only shows up when the success hook rejects an otherwise good value.
#[derive(Debug, Error)]
pub enum RetryError<E, T = ()> {
    #[error("max attempts exceeded ({attempts} attempts): {last}")]
    Exhausted {
        attempts: usize,
        #[source]
        last: E,
    },
    /// Produced by an `on_success` / `on_failure` hook.
    #[error("{0}")]
    Hook(E),
    /// The task succeeded but `on_success` returned an error. The value is
    /// kept so the caller can still use it.
    #[error("success hook failed: {error}")]
    SuccessHookFailed {
        value: T,
        #[source]
        error: E,
    },
    #[error("retry loop panicked: {0}")]
    Panicked(String),
}

impl<E, T> RetryError<E, T> {
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }

    /// The value a rejected success still produced.
    pub fn into_value(self) -> Option<T> {
        match self {
            RetryError::SuccessHookFailed { value, .. } => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Error)]
pub enum PoolError {
    #[error("worker pool is closed")]
    Closed,
    #[error("output streams already handed to consumers")]
    AlreadyHandled,
}

#[derive(Debug, Error)]
pub enum PipelineError<E> {
    #[error("pipeline stage {index} failed: {source}")]
    StageFailed {
        index: usize,
        #[source]
        source: E,
    },
}

impl<E> PipelineError<E> {
    pub fn stage_index(&self) -> usize {
        match self {
            PipelineError::StageFailed { index, .. } => *index,
        }
    }
}
