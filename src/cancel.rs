//! Race a unit of work against a [`Signal`].
//!
//! Cancellation here means the caller stops *waiting*. The spawned work is
//! never aborted: when the signal wins, the work keeps running detached on the
//! runtime and whatever it produces is dropped. Work that must stop early has
//! to watch [`Signal::token`] itself.

use super::{
    errors::RunError,
    signal::Signal,
    work::catch_panic,
};
use std::future::Future;
use tokio::task::JoinError;


/// Runs `task` on a spawned tokio task and returns whichever comes first:
/// the signal firing or the task's own outcome.
///
/// Exactly one task is spawned per call, even when `signal` has already fired.
/// `task` itself is invoked on the spawned task, never on the caller's.
pub async fn run_cancelable<T, E, F, Fut>(signal: &Signal, task: F) -> Result<T, RunError<E>>
where
    T: Send + 'static,
    E: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    let handle = tokio::spawn(catch_panic(async move { task().await }));

    tokio::select! {
        biased;
        reason = signal.cancelled() => {
            tracing::debug!(%reason, "stopped waiting for cancelable task");
            Err(RunError::Cancelled(reason))
        }
        joined = handle => match joined {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(RunError::TaskFailed(e)),
            Ok(Err(msg)) => Err(RunError::Panicked(msg)),
            Err(join_err) => Err(join_failed(join_err)),
        }
    }
}

/// [`run_cancelable`] for work that yields no value.
#[inline]
pub async fn run_cancelable_action<E, F, Fut>(signal: &Signal, action: F) -> Result<(), RunError<E>>
where
    E: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
{
    run_cancelable(signal, action).await
}

/// Same race for a synchronous closure, executed on tokio's blocking pool.
pub async fn run_cancelable_blocking<T, E, F>(signal: &Signal, f: F) -> Result<T, RunError<E>>
where
    T: Send + 'static,
    E: Send + 'static,
    F: FnOnce() -> Result<T, E> + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(f);

    tokio::select! {
        biased;
        reason = signal.cancelled() => {
            tracing::debug!(%reason, "stopped waiting for blocking task");
            Err(RunError::Cancelled(reason))
        }
        joined = handle => match joined {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(RunError::TaskFailed(e)),
            Err(join_err) => Err(join_failed(join_err)),
        }
    }
}

fn join_failed<E>(join_err: JoinError) -> RunError<E> {
    if join_err.is_panic() {
        RunError::Panicked(crate::work::panic_message(join_err.into_panic().as_ref()))
    } else {
        RunError::JoinFailed(join_err.to_string())
    }
}
