use super::errors::CancelReason;
use std::sync::{Arc, OnceLock};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;


/// Cancellation trigger with a reason and an optional deadline.
///
/// Cloning is cheap and every clone observes the same trigger. Once fired a
/// signal never resets; the first reason recorded wins.
#[derive(Debug, Clone, Default)]
pub struct Signal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    token: CancellationToken,
    reason: OnceLock<CancelReason>,
    deadline: Option<Instant>,
    parent: Option<Signal>,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal that fires on its own once `timeout` elapses.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            inner: Arc::new(Inner {
                deadline: Some(deadline),
                ..Default::default()
            }),
        }
    }

    /// Derived signal: fires when `self` fires, but cancelling it leaves
    /// `self` untouched.
    pub fn child(&self) -> Self {
        self.derive(None)
    }

    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        self.derive(Some(Instant::now() + timeout))
    }

    fn derive(&self, deadline: Option<Instant>) -> Self {
        let deadline = match (self.inner.deadline, deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            inner: Arc::new(Inner {
                token: self.inner.token.child_token(),
                reason: OnceLock::new(),
                deadline,
                parent: Some(self.clone()),
            }),
        }
    }

    #[inline]
    pub fn cancel(&self) {
        self.trigger(CancelReason::Cancelled);
    }

    pub fn cancel_with(&self, cause: impl Into<String>) {
        self.trigger(CancelReason::Custom(cause.into()));
    }

    fn trigger(&self, reason: CancelReason) {
        // reason before token: anyone woken by the token must see it
        let _ = self.inner.reason.set(reason);
        self.inner.token.cancel();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Reason the signal fired, or `None` while it is still live.
    pub fn reason(&self) -> Option<CancelReason> {
        if let Some(reason) = self.inner.reason.get() {
            return Some(reason.clone());
        }
        if self.inner.token.is_cancelled() {
            let inherited = self.inner.parent.as_ref().and_then(Signal::reason);
            return Some(inherited.unwrap_or(CancelReason::Cancelled));
        }
        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.trigger(CancelReason::DeadlineExceeded);
                self.inner.reason.get().cloned()
            }
            _ => None,
        }
    }

    /// Completes once the signal fires and yields the reason.
    pub async fn cancelled(&self) -> CancelReason {
        if let Some(reason) = self.reason() {
            return reason;
        }
        match self.inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.inner.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {
                        self.trigger(CancelReason::DeadlineExceeded);
                    }
                }
            }
            None => self.inner.token.cancelled().await,
        }
        self.reason().unwrap_or(CancelReason::Cancelled)
    }

    /// Token tied to this signal, for work that wants to observe
    /// cancellation cooperatively. Deadlines are not reflected in it until
    /// someone waits on the signal.
    #[inline]
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_reason_wins() {
        let signal = Signal::new();
        assert!(!signal.is_cancelled());
        signal.cancel_with("shutdown");
        signal.cancel();
        assert_eq!(signal.reason(), Some(CancelReason::Custom("shutdown".into())));
    }

    #[test]
    fn child_inherits_parent_reason_but_not_the_reverse() {
        let parent = Signal::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let other = parent.child();
        parent.cancel_with("parent gone");
        assert_eq!(other.reason(), Some(CancelReason::Custom("parent gone".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fires_with_deadline_exceeded() {
        let signal = Signal::with_timeout(Duration::from_millis(50));
        assert!(!signal.is_cancelled());
        assert_eq!(signal.cancelled().await, CancelReason::DeadlineExceeded);
        assert!(signal.token().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn child_takes_the_earlier_deadline() {
        let parent = Signal::with_timeout(Duration::from_millis(10));
        let child = parent.child_with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
        assert_eq!(child.cancelled().await, CancelReason::DeadlineExceeded);
    }
}
