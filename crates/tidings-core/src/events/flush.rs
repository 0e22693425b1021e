//! Dirty flag + flush-after(interval) policy
//!
//! Mutations call [`FlushPolicy::mark_dirty`]. A background task waits for
//! the signal, sleeps for the coalescing window, then flushes once for every
//! mutation that landed in the meantime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Default coalescing window
pub const DEFAULT_FLUSH_DEBOUNCE: Duration = Duration::from_secs(1);

/// Write-coalescing policy
#[derive(Debug)]
pub struct FlushPolicy {
    dirty: AtomicBool,
    notify: Notify,
    debounce: Duration,
}

impl FlushPolicy {
    /// Policy with the given coalescing window
    pub fn new(debounce: Duration) -> Self {
        Self {
            dirty: AtomicBool::new(false),
            notify: Notify::new(),
            debounce,
        }
    }

    /// Coalescing window
    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Record a mutation and wake the flusher
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Re-set the flag after a failed write without waking the flusher;
    /// the next mutation retries.
    pub fn restore_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Clear the flag, returning whether a write is owed
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::SeqCst)
    }

    /// Clear the flag for a write in progress.
    ///
    /// The returned guard re-sets the flag when dropped, unless
    /// [`PendingFlush::complete`] was called. A save that fails or is
    /// cancelled mid-write therefore still leaves a write owed.
    pub fn begin_flush(&self) -> Option<PendingFlush<'_>> {
        self.take_dirty().then_some(PendingFlush {
            policy: self,
            done: false,
        })
    }

    /// Whether unflushed mutations exist
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Wait until a mutation was signalled and the coalescing window has
    /// passed. Returns `false` if cancelled first.
    pub async fn wait_for_flush(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = self.notify.notified() => {}
            _ = cancel.cancelled() => return false,
        }
        tokio::select! {
            _ = tokio::time::sleep(self.debounce) => true,
            _ = cancel.cancelled() => false,
        }
    }
}

/// A write in progress; see [`FlushPolicy::begin_flush`]
#[derive(Debug)]
pub struct PendingFlush<'a> {
    policy: &'a FlushPolicy,
    done: bool,
}

impl PendingFlush<'_> {
    /// The snapshot reached storage
    pub fn complete(mut self) {
        self.done = true;
    }
}

impl Drop for PendingFlush<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.policy.restore_dirty();
        }
    }
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_FLUSH_DEBOUNCE)
    }
}
