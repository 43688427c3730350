use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::task::{JoinError, JoinHandle};

/// A thin, named wrapper around [`tokio::task::JoinHandle`]. `#[must_use]`
/// so a spawned worker is never silently dropped without either being joined
/// or explicitly detached.
#[must_use]
pub struct NamedTask<T> {
    name: &'static str,
    handle: JoinHandle<T>,
}

impl<T> NamedTask<T> {
    pub fn spawn_named<F>(name: &'static str, future: F) -> NamedTask<F::Output>
    where
        F: Future<Output = T> + Send + 'static,
        F::Output: Send + 'static,
    {
        NamedTask {
            name,
            handle: tokio::spawn(future),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Future for NamedTask<T> {
    type Output = Result<T, JoinError>;
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx)
    }
}
