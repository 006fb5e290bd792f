//! Cancellation handle for background listeners.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Handle to a running listener (notification forwarder, power-state
/// callback, ...).
///
/// The listener stops when the handle is cancelled or dropped. Keep the
/// handle alive for as long as events should be delivered.
pub struct Subscription {
    id: u64,
    cancel_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Create a handle that runs `cancel_fn` once on cancel or drop.
    pub(crate) fn new(cancel_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            cancel_fn: Some(Box::new(cancel_fn)),
        }
    }

    /// Handle that stops a spawned task.
    pub(crate) fn for_task(handle: tokio::task::JoinHandle<()>) -> Self {
        Self::new(move || handle.abort())
    }

    /// Stop the listener.
    pub fn cancel(mut self) {
        if let Some(f) = self.cancel_fn.take() {
            f();
        }
    }

    /// Get the subscription ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.cancel_fn.take() {
            f();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
