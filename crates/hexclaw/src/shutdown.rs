//! Cooperative shutdown signal shared by the daemon, bot, and monitor.
//!
//! An atomic flag plus a notifier. Clone is cheap and shares state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Clone, Default)]
pub struct Shutdown {
    inner: Arc<ShutdownInner>,
}

#[derive(Default)]
struct ShutdownInner {
    triggered: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.inner.triggered.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait(&self) {
        loop {
            if self.is_triggered() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_releases_waiters() {
        let shutdown = Shutdown::new();
        let waiter = shutdown.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.trigger();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter released")
            .unwrap();
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_wait_after_trigger_returns_immediately() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        shutdown.wait().await;
    }
}
