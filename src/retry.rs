//! Bounded retry with a pluggable delay between attempts.

use super::{
    errors::RetryError,
    work::catch_panic,
};
use std::{
    fmt,
    future::Future,
    sync::Arc,
};
use tokio::{
    sync::oneshot,
    time::Duration,
};


pub type DelayFn = Arc<dyn Fn(usize) -> Duration + Send + Sync>;
type SuccessHook<E> = Arc<dyn Fn() -> Result<(), E> + Send + Sync>;
type FailureHook<E> = Arc<dyn Fn(E) -> E + Send + Sync>;

/// Stock delay schedules. `attempt` is zero-based: 0 is the wait before the
/// second attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Constant(Duration),
    /// `step * (attempt + 1)`
    Linear(Duration),
    /// `base * multiplier^attempt`, optionally capped.
    Exponential {
        base: Duration,
        multiplier: f64,
        max: Option<Duration>,
    },
}

impl Backoff {
    pub fn delay(&self, attempt: usize) -> Duration {
        match *self {
            Backoff::Constant(d) => d,
            Backoff::Linear(step) => {
                let factor = u32::try_from(attempt.saturating_add(1)).unwrap_or(u32::MAX);
                step.saturating_mul(factor)
            }
            Backoff::Exponential { base, multiplier, max } => {
                let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
                let secs = base.as_secs_f64() * multiplier.powi(exp);
                let d = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
                max.map_or(d, |cap| d.min(cap))
            }
        }
    }
}

/// How many times to retry, how long to wait in between, and what to do
/// with the final outcome.
pub struct RetryPolicy<E> {
    max_retries: usize,
    delay: DelayFn,
    on_success: Option<SuccessHook<E>>,
    on_failure: Option<FailureHook<E>>,
}

impl<E> Default for RetryPolicy<E> {
    fn default() -> Self {
        Self {
            max_retries: 1,
            delay: Arc::new(|_| Duration::from_secs(1)),
            on_success: None,
            on_failure: None,
        }
    }
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_retries: self.max_retries,
            delay: self.delay.clone(),
            on_success: self.on_success.clone(),
            on_failure: self.on_failure.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("on_success", &self.on_success.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .finish_non_exhaustive()
    }
}

impl<E> RetryPolicy<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retries after the first attempt; 0 means a single attempt.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delay<F>(mut self, delay: F) -> Self
    where
        F: Fn(usize) -> Duration + Send + Sync + 'static,
    {
        self.delay = Arc::new(delay);
        self
    }

    pub fn with_backoff(self, backoff: Backoff) -> Self {
        self.with_delay(move |attempt| backoff.delay(attempt))
    }

    /// Called once after a successful attempt.
    pub fn on_success<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> Result<(), E> + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(hook));
        self
    }

    /// Called with the last error once the budget is spent; its return value
    /// replaces the generic exhaustion error.
    pub fn on_failure<F>(mut self, hook: F) -> Self
    where
        F: Fn(E) -> E + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(hook));
        self
    }

    #[inline]
    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    #[inline]
    pub fn max_attempts(&self) -> usize {
        self.max_retries.saturating_add(1)
    }

    #[inline]
    pub fn delay_for(&self, attempt: usize) -> Duration {
        (self.delay)(attempt)
    }

    fn exhausted<T>(&self, attempts: usize, last: E) -> RetryError<E, T> {
        tracing::warn!(attempts, "retry budget exhausted");
        match &self.on_failure {
            Some(hook) => RetryError::Hook(hook(last)),
            None => RetryError::Exhausted { attempts, last },
        }
    }
}

/// Runs attempts in sequence. On exhaustion yields the number of attempts
/// made and the last error.
async fn attempt_loop<T, E, F, Fut>(task: &mut F, policy: &RetryPolicy<E>) -> Result<T, (usize, E)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match task().await {
            Ok(value) => {
                tracing::trace!(attempt, "attempt succeeded");
                return Ok(value);
            }
            Err(e) if attempt >= policy.max_retries => return Err((attempt + 1, e)),
            Err(e) => {
                drop(e);
                let delay = policy.delay_for(attempt);
                tracing::debug!(attempt, ?delay, "attempt failed, backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Retries `action` in place on the calling task.
pub async fn run_action_with_retry<E, F, Fut>(mut action: F, policy: &RetryPolicy<E>) -> Result<(), RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    match attempt_loop(&mut action, policy).await {
        Ok(()) => match &policy.on_success {
            Some(hook) => hook().map_err(RetryError::Hook),
            None => Ok(()),
        },
        Err((attempts, last)) => Err(policy.exhausted(attempts, last)),
    }
}

/// Runs the whole retry loop for `task` on a spawned tokio task and hands the
/// final outcome back over a oneshot, so the returned future can itself be
/// raced by [`run_cancelable`](crate::cancel::run_cancelable).
///
/// When the `on_success` hook rejects a good value the caller gets
/// [`RetryError::SuccessHookFailed`] carrying both the value and the error.
pub async fn run_with_retry<T, E, F, Fut>(mut task: F, policy: RetryPolicy<E>) -> Result<T, RetryError<E, T>>
where
    T: Send + 'static,
    E: Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send,
{
    let (tx, rx) = oneshot::channel::<Result<T, RetryError<E, T>>>();

    tokio::spawn(async move {
        let run = async {
            match attempt_loop(&mut task, &policy).await {
                Ok(value) => match policy.on_success.as_ref().map(|hook| hook()) {
                    Some(Err(error)) => {
                        tracing::warn!("success hook rejected the task's value");
                        Err(RetryError::SuccessHookFailed { value, error })
                    }
                    _ => Ok(value),
                },
                Err((attempts, last)) => Err(policy.exhausted(attempts, last)),
            }
        };
        let outcome = catch_panic(run).await.unwrap_or_else(|msg| Err(RetryError::Panicked(msg)));
        let _ = tx.send(outcome);
    });

    rx.await
        .unwrap_or_else(|_| Err(RetryError::Panicked("retry task dropped before reporting".into())))
}
