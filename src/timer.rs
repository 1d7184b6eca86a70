//! Cancellable delays
//!
//! All time-bounded waits in the engine (trickle batching, gathering grace,
//! invite expiry) go through the [`TimeoutCreator`] capability so that hosts
//! can substitute their own clock and `dispose()` can cancel every live
//! handle through the [`Disposables`] tracker.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// A single cancellable delay
#[async_trait]
pub trait Timeout: Send + Sync {
    /// Wait for the delay to elapse.
    ///
    /// Resolves `true` once the deadline passes, `false` if the handle was
    /// aborted first.
    async fn elapsed(&self) -> bool;

    /// Cancel the delay; any waiter resolves `false`.
    fn abort(&self);
}

/// Factory for cancellable delays
pub trait TimeoutCreator: Send + Sync {
    /// Create a timeout that elapses after `duration`
    fn create_timeout(&self, duration: Duration) -> Arc<dyn Timeout>;
}

/// [`TimeoutCreator`] backed by the tokio clock.
///
/// Respects `tokio::time::pause`/`advance`, which is what the scenario
/// tests use as a virtual clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioTimeoutCreator;

struct TokioTimeout {
    deadline: Instant,
    aborted: AtomicBool,
    notify: Notify,
}

#[async_trait]
impl Timeout for TokioTimeout {
    async fn elapsed(&self) -> bool {
        if self.aborted.load(Ordering::Acquire) {
            return false;
        }
        tokio::select! {
            () = tokio::time::sleep_until(self.deadline) => !self.aborted.load(Ordering::Acquire),
            () = self.notify.notified() => false,
        }
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

impl TimeoutCreator for TokioTimeoutCreator {
    fn create_timeout(&self, duration: Duration) -> Arc<dyn Timeout> {
        Arc::new(TokioTimeout {
            deadline: Instant::now() + duration,
            aborted: AtomicBool::new(false),
            notify: Notify::new(),
        })
    }
}

/// Tracker for every live timeout of a call.
///
/// `abort_all` is invoked from `terminate` and `dispose` so no delayed
/// continuation outlives the call.
#[derive(Default)]
pub struct Disposables {
    live: Mutex<Vec<Arc<dyn Timeout>>>,
}

impl Disposables {
    /// Register a timeout for later cancellation
    pub fn track(&self, timeout: Arc<dyn Timeout>) {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(timeout);
    }

    /// Abort every tracked timeout and forget the handles
    pub fn abort_all(&self) {
        let handles = std::mem::take(
            &mut *self.live.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            handle.abort();
        }
    }
}
