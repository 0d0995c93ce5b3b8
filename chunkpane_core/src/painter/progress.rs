//! Cancellable progress handle returned by `MerklePainter::paint_async`
//! (SPEC_FULL.md §4.6.6).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::error::PaintError;

/// The eventual outcome of a `paint_async` call.
#[derive(Debug, Clone)]
pub enum PaintOutcome {
    Downloaded(u64),
    Skipped,
    Failed(Arc<PaintError>),
}

struct Inner {
    total_bytes: u64,
    current_bytes: AtomicU64,
    cancelled: AtomicBool,
    done: Notify,
    outcome: parking_lot::Mutex<Option<PaintOutcome>>,
}

/// A shared handle to an in-flight `paint` operation: live byte counters
/// plus a cancellable, awaitable completion.
#[derive(Clone)]
pub struct DownloadProgress {
    inner: Arc<Inner>,
}

impl DownloadProgress {
    #[must_use]
    pub fn new(total_bytes: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                total_bytes,
                current_bytes: AtomicU64::new(0),
                cancelled: AtomicBool::new(false),
                done: Notify::new(),
                outcome: parking_lot::Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.inner.total_bytes
    }

    #[must_use]
    pub fn current_bytes(&self) -> u64 {
        self.inner.current_bytes.load(Ordering::Acquire)
    }

    pub fn add_bytes(&self, n: u64) {
        self.inner.current_bytes.fetch_add(n, Ordering::AcqRel);
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn complete(&self, outcome: PaintOutcome) {
        *self.inner.outcome.lock() = Some(outcome);
        self.inner.done.notify_waiters();
    }

    /// Wait for completion and return the final outcome.
    pub async fn wait(&self) -> PaintOutcome {
        loop {
            // Register interest before checking state, so a `complete()`
            // that races with this call can't be missed between the two.
            let notified = self.inner.done.notified();
            if let Some(outcome) = self.inner.outcome.lock().clone() {
                return outcome;
            }
            notified.await;
        }
    }
}
