//! Sequential stream pipelines.
//!
//! Each stage turns one stream into another, usually by spawning a single
//! loop that reads its input, writes its output and drops the output sender
//! once the input is exhausted. One loop per stage keeps element order intact
//! from source to sink while neighbouring stages run concurrently.

use super::errors::PipelineError;
use std::{
    fmt,
    sync::Arc,
};
use tokio::sync::mpsc;


/// A pipeline transform from one stream to another.
pub trait Stage<T, E>: Send {
    fn build(self: Box<Self>, input: mpsc::Receiver<T>) -> Result<mpsc::Receiver<T>, E>;
}

impl<T, E, F> Stage<T, E> for F
where
    F: FnOnce(mpsc::Receiver<T>) -> Result<mpsc::Receiver<T>, E> + Send,
{
    #[inline]
    fn build(self: Box<Self>, input: mpsc::Receiver<T>) -> Result<mpsc::Receiver<T>, E> {
        (*self)(input)
    }
}

pub type BoxStage<T, E> = Box<dyn Stage<T, E>>;

type ErrorHook<E> = Arc<dyn Fn(PipelineError<E>) + Send + Sync>;

pub struct PipelineOptions<E> {
    on_error: Option<ErrorHook<E>>,
}

impl<E> Default for PipelineOptions<E> {
    fn default() -> Self {
        Self { on_error: None }
    }
}

impl<E> Clone for PipelineOptions<E> {
    fn clone(&self) -> Self {
        Self { on_error: self.on_error.clone() }
    }
}

impl<E> fmt::Debug for PipelineOptions<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineOptions")
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl<E> PipelineOptions<E> {
    /// With a hook installed a failing stage no longer aborts composition:
    /// the hook gets the error and the next stage is fed a closed, empty
    /// stream.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(PipelineError<E>) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }
}

fn closed_stream<T>() -> mpsc::Receiver<T> {
    let (_, rx) = mpsc::channel(1);
    rx
}

/// Wires `stages` in order over `source` and returns the last stage's output.
pub fn compose<T, E>(
    source: mpsc::Receiver<T>,
    stages: Vec<BoxStage<T, E>>,
    options: PipelineOptions<E>,
) -> Result<mpsc::Receiver<T>, PipelineError<E>> {
    let mut stream = source;
    for (index, stage) in stages.into_iter().enumerate() {
        stream = match stage.build(stream) {
            Ok(next) => next,
            Err(source) => {
                tracing::warn!(index, "pipeline stage failed to build");
                let err = PipelineError::StageFailed { index, source };
                match &options.on_error {
                    Some(hook) => {
                        hook(err);
                        closed_stream()
                    }
                    None => return Err(err),
                }
            }
        };
    }
    Ok(stream)
}

/// Builder over [`compose`].
pub struct Pipeline<T, E> {
    stages: Vec<BoxStage<T, E>>,
    options: PipelineOptions<E>,
}

impl<T, E> Default for Pipeline<T, E> {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            options: PipelineOptions::default(),
        }
    }
}

impl<T, E> Pipeline<T, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: BoxStage<T, E>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stage_fn<F>(self, f: F) -> Self
    where
        F: FnOnce(mpsc::Receiver<T>) -> Result<mpsc::Receiver<T>, E> + Send + 'static,
        T: 'static,
        E: 'static,
    {
        self.stage(Box::new(f))
    }

    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(PipelineError<E>) + Send + Sync + 'static,
    {
        self.options = self.options.on_error(hook);
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn run(self, source: mpsc::Receiver<T>) -> Result<mpsc::Receiver<T>, PipelineError<E>> {
        compose(source, self.stages, self.options)
    }
}

/// Spawns a producer that pushes every item of `iter` and then closes.
pub fn stream_from_iter<T, I>(buffer: usize, iter: I) -> mpsc::Receiver<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = T> + Send + 'static,
    I::IntoIter: Send,
{
    let (tx, rx) = mpsc::channel(buffer.max(1));
    tokio::spawn(async move {
        for item in iter {
            if tx.send(item).await.is_err() {
                break;
            }
        }
    });
    rx
}

/// Ready-made single-loop stages. `buffer` is the capacity of the stage's
/// output stream.
pub mod stage {
    use super::BoxStage;
    use std::future::Future;
    use tokio::sync::mpsc;

    pub fn map<T, E, F>(buffer: usize, mut f: F) -> BoxStage<T, E>
    where
        T: Send + 'static,
        E: 'static,
        F: FnMut(T) -> T + Send + 'static,
    {
        Box::new(move |mut input: mpsc::Receiver<T>| -> Result<mpsc::Receiver<T>, E> {
            let (tx, rx) = mpsc::channel(buffer.max(1));
            tokio::spawn(async move {
                while let Some(item) = input.recv().await {
                    if tx.send(f(item)).await.is_err() {
                        break;
                    }
                }
            });
            Ok(rx)
        })
    }

    /// Like [`map`] but awaits `f` for each element before taking the next.
    pub fn then<T, E, F, Fut>(buffer: usize, mut f: F) -> BoxStage<T, E>
    where
        T: Send + 'static,
        E: 'static,
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        Box::new(move |mut input: mpsc::Receiver<T>| -> Result<mpsc::Receiver<T>, E> {
            let (tx, rx) = mpsc::channel(buffer.max(1));
            tokio::spawn(async move {
                while let Some(item) = input.recv().await {
                    let out = f(item).await;
                    if tx.send(out).await.is_err() {
                        break;
                    }
                }
            });
            Ok(rx)
        })
    }

    pub fn filter<T, E, P>(buffer: usize, mut keep: P) -> BoxStage<T, E>
    where
        T: Send + 'static,
        E: 'static,
        P: FnMut(&T) -> bool + Send + 'static,
    {
        Box::new(move |mut input: mpsc::Receiver<T>| -> Result<mpsc::Receiver<T>, E> {
            let (tx, rx) = mpsc::channel(buffer.max(1));
            tokio::spawn(async move {
                while let Some(item) = input.recv().await {
                    if !keep(&item) {
                        continue;
                    }
                    if tx.send(item).await.is_err() {
                        break;
                    }
                }
            });
            Ok(rx)
        })
    }

    pub fn inspect<T, E, F>(buffer: usize, mut f: F) -> BoxStage<T, E>
    where
        T: Send + 'static,
        E: 'static,
        F: FnMut(&T) + Send + 'static,
    {
        map(buffer, move |item| {
            f(&item);
            item
        })
    }
}
