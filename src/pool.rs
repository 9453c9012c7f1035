use super::{
    errors::{PoolError, RunError},
    handle::Consumers,
    model::PoolMetrics,
    work::{self, catch_panic, Task},
};
use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        Notify,
    },
    task::JoinHandle,
    time::{Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;


/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub max_workers: usize,
    /// Capacity of each output stream.
    pub output_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_workers: 1,
            output_buffer: 1,
        }
    }
}

impl Config {
    pub fn cpu_bound() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            max_workers: num_cpus,
            output_buffer: num_cpus,
        }
    }

    pub fn io_bound() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            max_workers: num_cpus * 2,
            output_buffer: num_cpus * 2,
        }
    }

    /// Zero is ignored; the previous value stays.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        if max_workers >= 1 {
            self.max_workers = max_workers;
        }
        self
    }

    /// Zero is ignored; the previous value stays.
    pub fn with_output_buffer(mut self, output_buffer: usize) -> Self {
        if output_buffer >= 1 {
            self.output_buffer = output_buffer;
        }
        self
    }

    fn normalized(self) -> Self {
        Self {
            max_workers: self.max_workers.max(1),
            output_buffer: self.output_buffer.max(1),
        }
    }
}


pub type SharedPool<T, E> = Arc<WorkerPool<T, E>>;

type Outputs<T, E> = (mpsc::Receiver<T>, mpsc::Receiver<RunError<E>>);

#[inline]
fn lock<X>(m: &Mutex<X>) -> MutexGuard<'_, X> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Shared {
    pending: AtomicUsize,
    closing: AtomicBool,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    all_tasks_completed: Notify,
    /// Fired once the workers have exited and both output streams are closed.
    closed: CancellationToken,
}

impl Shared {
    #[inline]
    fn finish(&self, n: usize) {
        if n > 0 && self.pending.fetch_sub(n, Ordering::AcqRel) == n {
            self.all_tasks_completed.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.all_tasks_completed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Fixed set of workers draining a bounded queue.
///
/// Every accepted task ends up on exactly one of the two output streams:
/// its value on the success stream, its error (or panic) on the error stream.
/// Outcomes arrive in completion order.
///
/// Output streams are bounded. If nobody calls [`handle`](Self::handle),
/// workers stall once the buffers fill, and so does [`wait`](Self::wait).
pub struct WorkerPool<T, E> {
    queue: Mutex<Option<mpsc::Sender<Task<T, E>>>>,
    outputs: Mutex<Option<Outputs<T, E>>>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    shared: Arc<Shared>,
    config: Config,
}

impl<T, E> WorkerPool<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Starts `config.max_workers` workers and queues `tasks` in the
    /// background. Must be called inside a tokio runtime.
    pub fn new<I>(tasks: I, config: Config) -> SharedPool<T, E>
    where
        I: IntoIterator<Item = Task<T, E>>,
    {
        let config = config.normalized();
        let (queue_tx, queue_rx) = mpsc::channel::<Task<T, E>>(config.max_workers);
        let (result_tx, result_rx) = mpsc::channel::<T>(config.output_buffer);
        let (error_tx, error_rx) = mpsc::channel::<RunError<E>>(config.output_buffer);
        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));
        let shared = Arc::new(Shared::default());

        let workers = (1..=config.max_workers)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    queue_rx.clone(),
                    result_tx.clone(),
                    error_tx.clone(),
                    shared.clone(),
                ))
            })
            .collect();

        let initial: Vec<Task<T, E>> = tasks.into_iter().collect();
        if !initial.is_empty() {
            shared.pending.fetch_add(initial.len(), Ordering::SeqCst);
            let feeder = queue_tx.clone();
            let feeder_shared = shared.clone();
            tokio::spawn(async move {
                let mut remaining = initial.len();
                for task in initial {
                    if feeder.send(task).await.is_err() {
                        break;
                    }
                    remaining -= 1;
                }
                feeder_shared.finish(remaining);
            });
        }

        tracing::debug!(workers = config.max_workers, "worker pool started");

        Arc::new(Self {
            queue: Mutex::new(Some(queue_tx)),
            outputs: Mutex::new(Some((result_rx, error_rx))),
            workers: tokio::sync::Mutex::new(workers),
            shared,
            config,
        })
    }

    /// Pool with no initial batch.
    pub fn with_config(config: Config) -> SharedPool<T, E> {
        Self::new(Vec::new(), config)
    }

    /// Queues one more task without blocking the caller.
    ///
    /// The pending count is raised before the task becomes visible to any
    /// worker. Once [`wait`](Self::wait) has started the pool accepts nothing
    /// and this returns [`PoolError::Closed`].
    pub fn submit_task(&self, task: Task<T, E>) -> Result<(), PoolError> {
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        if self.shared.closing.load(Ordering::SeqCst) {
            self.shared.finish(1);
            return Err(PoolError::Closed);
        }

        let sender = lock(&self.queue).clone();
        let Some(sender) = sender else {
            self.shared.finish(1);
            return Err(PoolError::Closed);
        };

        match sender.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(task)) => {
                let shared = self.shared.clone();
                tokio::spawn(async move {
                    if sender.send(task).await.is_err() {
                        shared.finish(1);
                    }
                });
                Ok(())
            }
            Err(TrySendError::Closed(_)) => {
                self.shared.finish(1);
                Err(PoolError::Closed)
            }
        }
    }

    /// Boxes `f` and queues it, see [`submit_task`](Self::submit_task).
    #[inline]
    pub fn submit<F, Fut>(&self, f: F) -> Result<(), PoolError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.submit_task(work::task(f))
    }

    /// Blocks until every task accepted so far has finished, then closes the
    /// queue and both output streams.
    ///
    /// Safe to call more than once and from several tasks: every caller
    /// returns only after the workers have exited and the streams are closed.
    pub async fn wait(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        let mut workers = self.workers.lock().await;
        self.shared.wait_idle().await;
        drop(lock(&self.queue).take());

        // a handle leaves the list only once joined, so a caller that gives
        // up halfway leaves the rest for the next one
        while let Some(worker) = workers.last_mut() {
            let joined = worker.await;
            workers.pop();
            if let Err(e) = joined {
                tracing::warn!(error = %e, "worker did not exit cleanly");
            }
        }

        if !self.shared.closed.is_cancelled() {
            self.shared.closed.cancel();
            tracing::debug!("worker pool drained and closed");
        }
    }

    /// Hands the success and error streams to two concurrently running
    /// consumers. Only the first call succeeds.
    pub fn handle<S, SFut, F, FFut>(&self, on_success: S, on_failure: F) -> Result<Consumers, PoolError>
    where
        S: FnOnce(mpsc::Receiver<T>) -> SFut,
        SFut: Future<Output = ()> + Send + 'static,
        F: FnOnce(mpsc::Receiver<RunError<E>>) -> FFut,
        FFut: Future<Output = ()> + Send + 'static,
    {
        let (results, errors) = lock(&self.outputs).take().ok_or(PoolError::AlreadyHandled)?;
        let success = tokio::spawn(on_success(results));
        let failure = tokio::spawn(on_failure(errors));
        Ok(Consumers::new(success, failure))
    }

    /// [`handle`](Self::handle) with per-item callbacks.
    pub fn handle_each<S, F>(&self, mut on_value: S, mut on_error: F) -> Result<Consumers, PoolError>
    where
        S: FnMut(T) + Send + 'static,
        F: FnMut(RunError<E>) + Send + 'static,
    {
        self.handle(
            |mut results| async move {
                while let Some(value) = results.recv().await {
                    on_value(value);
                }
            },
            |mut errors| async move {
                while let Some(err) = errors.recv().await {
                    on_error(err);
                }
            },
        )
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn is_closing(&self) -> bool {
        self.shared.closing.load(Ordering::Acquire)
    }

    #[inline]
    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            workers: self.config.max_workers,
            pending: self.shared.pending.load(Ordering::Relaxed),
            succeeded: self.shared.succeeded.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
        }
    }

    /// Reports metrics to `report` every `period`.
    ///
    /// Reporting stops when the returned token is cancelled or when the pool
    /// closes at the end of [`wait`](Self::wait), whichever happens first.
    pub fn start_monitoring<C>(self: &Arc<Self>, period: Duration, report: C) -> CancellationToken
    where
        C: Fn(PoolMetrics) + Send + 'static,
    {
        let pool = Arc::downgrade(self);
        let stop = self.shared.closed.child_token();
        let stopped = stop.clone();

        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period.max(Duration::from_millis(1)));
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticks.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = stopped.cancelled() => break,
                    _ = ticks.tick() => match pool.upgrade() {
                        Some(pool) => report(pool.metrics()),
                        None => break,
                    },
                }
            }
            tracing::trace!("pool monitor stopped");
        });

        stop
    }
}

async fn worker_loop<T, E>(
    worker_id: usize,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<Task<T, E>>>>,
    results: mpsc::Sender<T>,
    errors: mpsc::Sender<RunError<E>>,
    shared: Arc<Shared>,
) where
    T: Send + 'static,
    E: Send + 'static,
{
    tracing::trace!(worker_id, "worker started");
    loop {
        let next = queue.lock().await.recv().await;
        let Some(task) = next else { break };

        match catch_panic(async move { task().await }).await {
            Ok(Ok(value)) => {
                shared.succeeded.fetch_add(1, Ordering::Relaxed);
                if results.send(value).await.is_err() {
                    tracing::trace!(worker_id, "success stream dropped, value discarded");
                }
            }
            Ok(Err(e)) => {
                shared.failed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(worker_id, "task returned an error");
                if errors.send(RunError::TaskFailed(e)).await.is_err() {
                    tracing::trace!(worker_id, "error stream dropped, error discarded");
                }
            }
            Err(msg) => {
                shared.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(worker_id, panic = %msg, "task panicked");
                if errors.send(RunError::Panicked(msg)).await.is_err() {
                    tracing::trace!(worker_id, "error stream dropped, error discarded");
                }
            }
        }

        shared.finish(1);
    }
    tracing::trace!(worker_id, "worker exiting");
}
