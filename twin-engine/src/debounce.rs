use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

/// A trigger that, when called repeatedly within its window, fires its
/// action at most once per window. Used to collapse bursts of
/// `collector:completed` events into a single harvester enqueue.
#[derive(Clone)]
pub struct DebouncedTrigger {
    window: Duration,
    pending: Arc<AtomicBool>,
    action: Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>,
}

impl DebouncedTrigger {
    pub fn new<F>(window: Duration, action: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Self {
            window,
            pending: Arc::new(AtomicBool::new(false)),
            action: Arc::new(action),
        }
    }

    /// Lock-free on the propagation path: one atomic swap decides
    /// whether this call opens a window.
    pub fn call(&self) {
        if self.pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let window = self.window;
        let pending = self.pending.clone();
        let action = self.action.clone();
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            action().await;
            pending.store(false, Ordering::SeqCst);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn counting(counter: Arc<AtomicU32>) -> impl Fn() -> BoxFuture<'static, ()> + Send + Sync {
        move || -> BoxFuture<'static, ()> {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    #[tokio::test]
    async fn bursts_collapse_to_one_fire_per_window() {
        let counter = Arc::new(AtomicU32::new(0));
        let trigger = DebouncedTrigger::new(Duration::from_millis(100), counting(counter.clone()));

        // Twenty calls inside half a window.
        for _ in 0..20 {
            trigger.call();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn separate_windows_fire_separately() {
        let counter = Arc::new(AtomicU32::new(0));
        let trigger = DebouncedTrigger::new(Duration::from_millis(30), counting(counter.clone()));

        trigger.call();
        tokio::time::sleep(Duration::from_millis(80)).await;
        trigger.call();
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
