use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::connection::SessionTracker;

/// How often drain progress is logged
const DRAIN_REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Process-wide lifecycle, broadcast to every acceptor
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ShutdownState {
    /// Accepting new connections
    Running,
    /// Listeners closed, waiting for in-flight sessions
    Draining,
    /// Every acceptor and session has finished
    Drained,
}

/// Turns a termination signal into listener close plus drain.
pub struct ShutdownCoordinator {
    state: watch::Sender<ShutdownState>,
    tracker: Arc<SessionTracker>,
}

impl ShutdownCoordinator {
    pub fn new(tracker: Arc<SessionTracker>) -> Self {
        let (state, _) = watch::channel(ShutdownState::Running);
        Self { state, tracker }
    }

    /// Receiver that acceptors watch to know when to stop accepting
    pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.state.subscribe()
    }

    #[allow(dead_code)]
    pub fn state(&self) -> ShutdownState {
        *self.state.borrow()
    }

    /// Wait for `signal`, then move to Draining and block until everything
    /// registered with the tracker has finished.
    ///
    /// A failed signal listener is treated like a received signal.
    pub async fn run<F>(&self, signal: F)
    where
        F: Future<Output = std::io::Result<()>>,
    {
        match signal.await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => warn!("Failed to listen for shutdown signal, shutting down: {}", e),
        }

        self.state.send_replace(ShutdownState::Draining);

        let active = self.tracker.active_count();
        if active > 0 {
            info!("Waiting for {} sessions to finish...", active);
        }

        let idle = self.tracker.wait_idle();
        tokio::pin!(idle);
        let mut report = tokio::time::interval(DRAIN_REPORT_INTERVAL);
        report.tick().await;
        loop {
            tokio::select! {
                _ = &mut idle => break,
                _ = report.tick() => {
                    info!("Still waiting for {} sessions...", self.tracker.active_count());
                }
            }
        }

        self.state.send_replace(ShutdownState::Drained);
        info!("All sessions finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn drains_after_signal_and_last_guard() {
        let tracker = SessionTracker::new();
        let coordinator = Arc::new(ShutdownCoordinator::new(Arc::clone(&tracker)));
        let mut states = coordinator.subscribe();
        assert_eq!(coordinator.state(), ShutdownState::Running);

        let guard = tracker.register();
        let (signal_tx, signal_rx) = oneshot::channel::<()>();
        let run = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                coordinator
                    .run(async move {
                        let _ = signal_rx.await;
                        Ok(())
                    })
                    .await
            })
        };

        tokio::task::yield_now().await;
        assert_eq!(coordinator.state(), ShutdownState::Running);

        signal_tx.send(()).unwrap();
        states
            .wait_for(|s| *s == ShutdownState::Draining)
            .await
            .unwrap();

        // A session still in flight holds the coordinator in Draining
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!run.is_finished());
        assert_eq!(coordinator.state(), ShutdownState::Draining);

        drop(guard);
        run.await.unwrap();
        assert_eq!(coordinator.state(), ShutdownState::Drained);
    }

    #[tokio::test]
    async fn signal_error_still_drains() {
        let tracker = SessionTracker::new();
        let coordinator = ShutdownCoordinator::new(tracker);
        coordinator
            .run(async { Err(std::io::Error::other("no signal handler")) })
            .await;
        assert_eq!(coordinator.state(), ShutdownState::Drained);
    }

    #[tokio::test(start_paused = true)]
    async fn long_drain_keeps_waiting() {
        let tracker = SessionTracker::new();
        let coordinator = Arc::new(ShutdownCoordinator::new(Arc::clone(&tracker)));
        let guard = tracker.register();

        let run = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.run(async { Ok(()) }).await })
        };

        // No forced exit while a session is active, however long it takes
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(!run.is_finished());

        drop(guard);
        run.await.unwrap();
        assert_eq!(coordinator.state(), ShutdownState::Drained);
    }
}
