//! Renegotiation serialization
//!
//! Every negotiation-needed callback turns into a task on a FIFO queue
//! drained by a single worker, so at most one renegotiation runs at a time
//! and a second request never overtakes the first. Closing the queue (on
//! call end) skips pending tasks without running them.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

type NegotiationTask = Pin<Box<dyn Future<Output = ()> + Send>>;

/// FIFO queue of negotiation tasks with a single worker
pub struct NegotiationQueue {
    tx: mpsc::UnboundedSender<NegotiationTask>,
    closed: Arc<AtomicBool>,
}

impl NegotiationQueue {
    /// Create the queue and spawn its worker
    #[must_use]
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<NegotiationTask>();
        let closed = Arc::new(AtomicBool::new(false));
        let worker_closed = Arc::clone(&closed);
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                if worker_closed.load(Ordering::Acquire) {
                    continue;
                }
                task.await;
            }
        });
        Self { tx, closed }
    }

    /// Append a task; it runs after every previously enqueued task has
    /// fully completed. Returns whether the task was accepted.
    pub fn enqueue<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.tx.send(Box::pin(task)).is_ok()
    }

    /// Stop running tasks; anything still queued is dropped unrun
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether the queue has been closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for NegotiationQueue {
    fn default() -> Self {
        Self::new()
    }
}
