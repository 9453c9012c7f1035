use tokio::task::{JoinError, JoinHandle};


/// The two consumers started by [`WorkerPool::handle`](crate::pool::WorkerPool::handle).
///
/// They finish on their own once the pool closes its output streams.
pub struct Consumers {
    success: JoinHandle<()>,
    failure: JoinHandle<()>,
}

impl Consumers {

    pub fn new
    (
        success: JoinHandle<()>,
        failure: JoinHandle<()>,
    ) -> Self {
        Self {
            success,
            failure
        }
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.success.is_finished() && self.failure.is_finished()
    }

    /// Stops both consumers. Workers blocked on a full output stream stay
    /// blocked until the receiver is dropped, which aborting does.
    #[inline]
    pub fn abort(&self) {
        self.success.abort();
        self.failure.abort();
    }

    /// Waits for both consumers to drain their streams.
    pub async fn join(self) -> Result<(), JoinError> {
        let (success, failure) = tokio::join!(self.success, self.failure);
        success.and(failure)
    }
}
