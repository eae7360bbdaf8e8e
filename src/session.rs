use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::net::TcpStream;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::ProxyConfig;
use crate::relay::{relay, RelayError, RelayStats};
use crate::sniff::{sniff, Destination, Protocol, SniffError};
use crate::socks::{SocksConnector, SocksError};
use crate::traffic::TrafficCounters;

/// Global session counter for generating unique session IDs
static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a new unique session ID
///
/// The session ID is composed of:
/// - Current timestamp (lower 48 bits of nanoseconds since UNIX epoch)
/// - Monotonic counter (lower 32 bits)
///
/// Only used to correlate log lines of one session.
pub fn new_session_id() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();

    let counter = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);

    format!(
        "{:x}{:x}",
        now.as_nanos() & 0xffffffffffff,
        counter & 0xffffffff
    )
}

/// Error type for a single session. None of these leave the session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no destination: {0}")]
    NoDestination(#[from] SniffError),

    #[error("can't connect to {dest}: {source}")]
    Upstream {
        dest: Destination,
        #[source]
        source: SocksError,
    },

    #[error("relay to {dest} aborted: {source}")]
    Relay {
        dest: Destination,
        #[source]
        source: RelayError,
    },
}

/// Per-listener settings shared read-only by its sessions
#[derive(Debug)]
pub struct SessionContext {
    pub protocol: Protocol,
    pub connector: SocksConnector,
    pub sniff_timeout: Duration,
    pub session_lifetime: Duration,
    pub traffic: TrafficCounters,
}

impl SessionContext {
    pub fn new(protocol: Protocol, config: &ProxyConfig) -> Self {
        Self {
            protocol,
            connector: SocksConnector::from_config(config),
            sniff_timeout: config.sniff_timeout,
            session_lifetime: config.session_lifetime,
            traffic: TrafficCounters::default(),
        }
    }
}

/// Sniff, dial and relay one client connection.
///
/// The client is closed on every exit path; on failure before the relay no
/// byte is ever written back to it.
pub async fn run_session(mut client: TcpStream, ctx: &SessionContext) -> Result<(Destination, RelayStats), SessionError> {
    let (outcome, replay) = sniff(ctx.protocol, &mut client, ctx.sniff_timeout).await;
    let dest = outcome?;
    debug!("SN: '{}', len: {}", dest, replay.len());

    let upstream = match ctx.connector.connect(&dest).await {
        Ok(stream) => stream,
        Err(source) => return Err(SessionError::Upstream { dest, source }),
    };

    debug!("Started proxying connection to {}", dest);
    ctx.traffic.add_session();
    let stats = match relay(client, upstream, replay, ctx.session_lifetime).await {
        Ok(stats) => stats,
        Err(source) => return Err(SessionError::Relay { dest, source }),
    };
    ctx.traffic.add_rx(stats.replayed + stats.to_upstream);
    ctx.traffic.add_tx(stats.to_client);

    Ok((dest, stats))
}

/// Task body for an accepted connection: runs the session inside its own
/// span and logs the outcome. Never fails.
pub async fn handle_connection(client: TcpStream, peer: SocketAddr, ctx: Arc<SessionContext>) {
    let span = info_span!("session", id = %new_session_id(), %peer, proto = %ctx.protocol);
    async move {
        match run_session(client, &ctx).await {
            Ok((dest, stats)) if stats.expired => {
                info!(
                    "Session to {} hit the {:?} lifetime cap: {}↑ {}↓ bytes",
                    dest, ctx.session_lifetime, stats.replayed + stats.to_upstream, stats.to_client
                );
            }
            Ok((dest, stats)) => {
                debug!(
                    "Ended proxying to {}: {}↑ {}↓ bytes",
                    dest, stats.replayed + stats.to_upstream, stats.to_client
                );
            }
            Err(SessionError::NoDestination(e)) if e.is_benign() => {
                debug!("Client closed before sending data");
            }
            Err(e) => warn!("{}", e),
        }
    }
    .instrument(span)
    .await
}
