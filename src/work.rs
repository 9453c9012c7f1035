//! Units of work shared by every primitive in the crate.
//!
//! A unit of work is a zero-argument callable that produces a future resolving
//! to `Result<T, E>`. Free functions accept any `FnOnce() -> Fut`; the worker
//! pool stores them boxed as [`Task`].

use std::{
    any::Any,
    future::Future,
    panic::AssertUnwindSafe,
};
use futures::{
    future::BoxFuture,
    FutureExt,
};


/// Boxed task producing a value of type `T` or an error of type `E`.
pub type Task<T, E> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T, E>> + Send + 'static>;

/// Boxed task producing nothing but an error outcome.
pub type Action<E> = Task<(), E>;

/// Boxes a closure into a [`Task`].
#[inline]
pub fn task<T, E, F, Fut>(f: F) -> Task<T, E>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    Box::new(move || f().boxed())
}

/// Boxes a closure into an [`Action`].
#[inline]
pub fn action<E, F, Fut>(f: F) -> Action<E>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
{
    task(f)
}

/// Drives `fut` to completion, turning a panic into its message.
pub(crate) async fn catch_panic<F>(fut: F) -> Result<F::Output, String>
where
    F: Future,
{
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(|payload| panic_message(payload.as_ref()))
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_reads_str_and_string_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("kaboom"));
        assert_eq!(panic_message(payload.as_ref()), "kaboom");

        let payload: Box<dyn Any + Send> = Box::new(7_u32);
        assert_eq!(panic_message(payload.as_ref()), "panic with non-string payload");
    }

    #[tokio::test]
    async fn catch_panic_passes_through_normal_output() {
        let out = catch_panic(async { 5 }).await;
        assert_eq!(out, Ok(5));
    }

    #[tokio::test]
    async fn boxed_task_runs_once() {
        let t: Task<u8, String> = task(|| async { Ok(3) });
        assert_eq!(t().await, Ok(3));
    }
}
