use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ProxyConfig;
use crate::connection::{SessionGuard, SessionTracker};
use crate::session::{handle_connection, SessionContext};
use crate::shutdown::ShutdownState;
use crate::sniff::Protocol;

/// One listening socket and the sniffer its connections go through
pub struct Acceptor {
    listener: TcpListener,
    ctx: Arc<SessionContext>,
    tracker: Arc<SessionTracker>,
}

impl Acceptor {
    /// Bind `addr` for `protocol`. Failure here is fatal to the caller.
    pub async fn bind(
        addr: SocketAddr,
        protocol: Protocol,
        config: &ProxyConfig,
        tracker: Arc<SessionTracker>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(listener, SessionContext::new(protocol, config), tracker))
    }

    pub fn from_listener(listener: TcpListener, ctx: SessionContext, tracker: Arc<SessionTracker>) -> Self {
        Self {
            listener,
            ctx: Arc::new(ctx),
            tracker,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared session settings, including this listener's traffic counters
    pub fn context(&self) -> Arc<SessionContext> {
        Arc::clone(&self.ctx)
    }

    /// Start the accept loop on its own task.
    ///
    /// The acceptor counts as outstanding work from this call until its loop exits.
    pub fn spawn(self, shutdown: watch::Receiver<ShutdownState>) -> JoinHandle<()> {
        let registration = self.tracker.register();
        tokio::spawn(self.run(shutdown, registration))
    }

    async fn run(self, mut shutdown: watch::Receiver<ShutdownState>, _registration: SessionGuard) {
        let protocol = self.ctx.protocol;
        loop {
            tokio::select! {
                res = self.listener.accept() => match res {
                    Ok((stream, peer)) => {
                        let guard = self.tracker.register();
                        let ctx = Arc::clone(&self.ctx);
                        tokio::spawn(async move {
                            let _guard = guard;
                            handle_connection(stream, peer, ctx).await;
                        });
                    }
                    Err(e) => {
                        warn!("Accept error on {} listener, stopping: {}", protocol, e);
                        break;
                    }
                },
                res = shutdown.wait_for(|s| *s != ShutdownState::Running) => {
                    if res.is_err() {
                        warn!("Shutdown coordinator went away, stopping {} listener", protocol);
                    }
                    break;
                }
            }
        }

        // Dropping the listener closes the socket; no further connects succeed
        let addr = self.listener.local_addr().ok();
        drop(self.listener);
        info!("Stopped accepting {} connections on {:?}", protocol, addr);
    }
}
