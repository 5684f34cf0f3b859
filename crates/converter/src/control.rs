//! Run context shared between the batch orchestrator and the encoder driver
//!
//! Replaces ambient pause/cancel flags with an explicit object: a
//! cancellation token, an observable pause flag and the grace period used
//! when the active encoder has to be stopped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Inner {
    cancel: CancellationToken,
    pause_tx: watch::Sender<bool>,
    grace_ms: AtomicU64,
}

/// Cloneable handle to the control state of one batch run.
#[derive(Debug, Clone)]
pub struct RunContext {
    inner: Arc<Inner>,
}

impl RunContext {
    pub fn new(grace: Duration) -> Self {
        let (pause_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                cancel: CancellationToken::new(),
                pause_tx,
                grace_ms: AtomicU64::new(grace.as_millis() as u64),
            }),
        }
    }

    /// Request cancellation of the whole run
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    /// Request cancellation with a different termination grace period
    ///
    /// Used at application shutdown, where in-flight work gets longer to flush.
    pub fn cancel_with_grace(&self, grace: Duration) {
        self.inner
            .grace_ms
            .store(grace.as_millis() as u64, Ordering::SeqCst);
        self.inner.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Wait until cancellation is requested
    pub async fn cancelled(&self) {
        self.inner.cancel.cancelled().await
    }

    pub fn set_paused(&self, paused: bool) {
        self.inner.pause_tx.send_replace(paused);
    }

    /// Flip the pause flag, returns the new value
    pub fn toggle_pause(&self) -> bool {
        let mut now = false;
        self.inner.pause_tx.send_modify(|p| {
            *p = !*p;
            now = *p;
        });
        now
    }

    pub fn is_paused(&self) -> bool {
        *self.inner.pause_tx.borrow()
    }

    /// Receiver notified on every pause flag change
    pub fn subscribe_pause(&self) -> watch::Receiver<bool> {
        self.inner.pause_tx.subscribe()
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.inner.grace_ms.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_toggle_and_subscribe() {
        let ctx = RunContext::new(Duration::from_millis(10));
        let mut rx = ctx.subscribe_pause();
        assert!(!ctx.is_paused());
        assert!(ctx.toggle_pause());
        assert!(ctx.is_paused());
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());
        assert!(!ctx.toggle_pause());
        assert!(!*rx.borrow_and_update());
    }

    #[test]
    fn test_cancel_with_grace_overrides_grace() {
        let ctx = RunContext::new(Duration::from_millis(1000));
        let clone = ctx.clone();
        assert_eq!(ctx.grace(), Duration::from_millis(1000));
        clone.cancel_with_grace(Duration::from_secs(5));
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.grace(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let ctx = RunContext::new(Duration::from_millis(10));
        let waiter = ctx.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        ctx.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("cancelled() should resolve")
            .unwrap();
    }
}
