//! A single shared future for one in-flight chunk (SPEC_FULL.md §4.6.4):
//! `Arc<ChunkFetch>` plus `tokio::sync::Notify` rather than
//! `futures::future::Shared`, since the latter requires the inner future's
//! output to be `Clone`.

use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::Notify;

const PENDING: u8 = 0;
const OK: u8 = 1;
const FAILED: u8 = 2;

/// Tracks the outcome of downloading+verifying one chunk, shared by every
/// caller whose requested range overlaps it.
pub struct ChunkFetch {
    state: AtomicU8,
    done: Notify,
}

impl ChunkFetch {
    #[must_use]
    pub fn pending() -> Self {
        Self {
            state: AtomicU8::new(PENDING),
            done: Notify::new(),
        }
    }

    pub fn resolve(&self, ok: bool) {
        self.state
            .store(if ok { OK } else { FAILED }, Ordering::Release);
        self.done.notify_waiters();
    }

    /// Wait for resolution and return whether the chunk committed
    /// successfully.
    pub async fn wait(&self) -> bool {
        loop {
            let notified = self.done.notified();
            match self.state.load(Ordering::Acquire) {
                OK => return true,
                FAILED => return false,
                _ => {}
            }
            notified.await;
        }
    }
}
