use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Counter of outstanding acceptors and sessions.
///
/// Incremented when work is spawned and decremented when it finishes, in any
/// order. Shutdown waits on it reaching zero.
#[derive(Debug, Default)]
pub struct SessionTracker {
    active: AtomicUsize,
    idle: Notify,
}

impl SessionTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Count one more outstanding unit of work until the guard is dropped
    pub fn register(self: &Arc<Self>) -> SessionGuard {
        self.active.fetch_add(1, Ordering::AcqRel);
        SessionGuard {
            tracker: Arc::clone(self),
            decremented: false,
        }
    }

    /// Get the current outstanding count
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Wait until the outstanding count is zero
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register interest before checking so a concurrent release can't be missed
            notified.as_mut().enable();
            if self.active_count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// RAII guard to ensure the outstanding count is properly decremented
#[derive(Debug)]
pub struct SessionGuard {
    tracker: Arc<SessionTracker>,
    decremented: bool,
}

impl SessionGuard {
    /// Manually decrement the outstanding count
    pub fn decrement(&mut self) {
        if !self.decremented {
            self.decremented = true;
            if self.tracker.active.fetch_sub(1, Ordering::AcqRel) == 1 {
                self.tracker.idle.notify_waiters();
            }
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.decrement();
    }
}
