use std::sync::Arc;

use tokio::sync::Semaphore;

/// A synchronization utility for sending / receiving shutdown signals.
///
/// Multi-producer, multi-consumer (clone for another handle); late
/// subscribers still observe a signal sent before they subscribed, unlike
/// [`tokio::sync::broadcast`]; sending twice is harmless. This (ab)uses the
/// fact that acquiring a permit from a zero-permit [`Semaphore`] only
/// resolves once the semaphore is closed.
#[derive(Clone, Debug)]
pub struct ShutdownChannel {
    inner: Arc<Semaphore>,
}

impl ShutdownChannel {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Semaphore::new(0)),
        }
    }

    /// Send a shutdown signal, releasing every current and future waiter.
    pub fn send(&self) {
        self.inner.close();
    }

    /// Waits for a shutdown signal. Returns immediately if one was already
    /// sent.
    pub async fn recv(&self) {
        self.inner
            .acquire()
            .await
            .map_err(|_| ())
            .expect_err("semaphore should never hand out a permit");
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.is_closed()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sending_twice_does_not_panic() {
        let s = ShutdownChannel::new();
        s.send();
        s.send();
    }

    #[tokio::test(start_paused = true)]
    async fn late_subscriber_still_observes_signal() {
        let s = ShutdownChannel::new();
        s.send();
        let s2 = s.clone();
        s2.recv().await;
    }

    #[tokio::test]
    async fn recv_blocks_until_sent() {
        let s = ShutdownChannel::new();
        assert!(!s.is_shutdown());
        let s2 = s.clone();
        let handle = tokio::spawn(async move { s2.recv().await });
        tokio::task::yield_now().await;
        s.send();
        handle.await.unwrap();
        assert!(s.is_shutdown());
    }
}
