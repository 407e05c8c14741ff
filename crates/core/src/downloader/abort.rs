//! Cooperative cancellation for download runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

#[derive(Default)]
struct Inner {
    aborted: AtomicBool,
    notify: Notify,
}

/// Cloneable abort handle. Checked between dispatches and between retry
/// attempts; backoff sleeps wake as soon as it fires.
#[derive(Clone, Default)]
pub struct AbortSignal {
    inner: Arc<Inner>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.inner.aborted.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    /// Clear the flag so the same handle can drive another run.
    pub fn reset(&self) {
        self.inner.aborted.store(false, Ordering::SeqCst);
    }

    /// Sleep for `duration` unless aborted first. Returns `true` if aborted.
    pub async fn sleep_or_abort(&self, duration: Duration) -> bool {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so an abort in between is not lost.
        notified.as_mut().enable();

        if self.is_aborted() {
            return true;
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_aborted(),
            _ = notified => true,
        }
    }
}
