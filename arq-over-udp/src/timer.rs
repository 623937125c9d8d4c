//! Per-packet retransmission timers.
//!
//! Each in-flight packet owns one [`TimerHandle`].  Arming spawns a tokio
//! task that sleeps for the retransmission timeout and then runs the supplied
//! callback.  Cancelling aborts that task.
//!
//! Abort only takes effect at an `.await`, so a callback that has already
//! woken may still run after [`TimerHandle::cancel`].  Callbacks must
//! therefore re-check under the window lock that their packet is still
//! outstanding before acting.

use std::future::Future;
use std::time::Duration;

use tokio::task::AbortHandle;

/// Handle to one armed retransmission timer.
///
/// Dropping the handle does **not** cancel the timer; call [`cancel`].
///
/// [`cancel`]: TimerHandle::cancel
#[derive(Debug)]
pub struct TimerHandle {
    abort: AbortHandle,
}

impl TimerHandle {
    /// Run `on_expiry` after `timeout` unless cancelled first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm<F>(timeout: Duration, on_expiry: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            on_expiry.await;
        });
        Self {
            abort: task.abort_handle(),
        }
    }

    /// Stop the timer.  Consumes the handle so a timer is cancelled at most
    /// once.
    pub fn cancel(self) {
        self.abort.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn fires_after_timeout() {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let timer = TimerHandle::arm(Duration::from_millis(20), async move {
            f.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        // Cancelling a timer that already fired is harmless.
        timer.cancel();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_timer_never_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let timer = TimerHandle::arm(Duration::from_millis(50), async move {
            f.fetch_add(1, Ordering::SeqCst);
        });
        timer.cancel();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
