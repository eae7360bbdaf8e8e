//! Destination discovery from the first bytes of a client connection.
//!
//! Two sniffers are provided: [`http`] extracts the `Host` of a plain HTTP
//! request and [`tls`] extracts the SNI server name of a TLS ClientHello.
//! Both only read, so running them through a [`ReplayStream`] keeps every
//! consumed byte available for the relay.

pub mod http;
pub mod tls;

use bytes::Bytes;
use std::fmt;
use std::io;
use std::time::Duration;
use tokio::io::AsyncRead;

use crate::config::join_host_port;
use crate::replay::ReplayStream;

/// Default port for plain HTTP destinations
pub const HTTP_DEFAULT_PORT: u16 = 80;
/// Fixed port for TLS destinations
pub const TLS_PORT: u16 = 443;

/// Error type for destination sniffing. Every variant means "no destination".
#[derive(Debug, thiserror::Error)]
pub enum SniffError {
    #[error("connection closed before any data")]
    Closed,

    #[error("connection closed mid-message")]
    Truncated,

    #[error("no Host in HTTP request")]
    NoHost,

    #[error("no server_name extension in ClientHello")]
    NoSni,

    #[error("request headers exceed {0} bytes")]
    HeaderTooLarge(usize),

    #[error("malformed input: {0}")]
    Malformed(&'static str),

    #[error("timed out after {0:?} waiting for a destination")]
    Timeout(Duration),

    #[error("read error: {0}")]
    Io(#[from] io::Error),
}

impl SniffError {
    /// A client that connects and leaves without sending anything is not an error
    pub fn is_benign(&self) -> bool {
        matches!(self, SniffError::Closed)
    }
}

/// Result type for sniffing operations
pub type SniffResult<T> = Result<T, SniffError>;

/// Where a session's bytes should be relayed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

impl Destination {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&join_host_port(&self.host, self.port))
    }
}

/// Which sniffer a listener runs on its connections
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Protocol {
    Http,
    Tls,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Tls => "tls",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run the sniffer for `protocol` over `stream`, bounded by `limit`.
///
/// Returns the outcome together with every byte consumed from `stream`,
/// whether or not a destination was found.
pub async fn sniff<S>(protocol: Protocol, stream: &mut S, limit: Duration) -> (SniffResult<Destination>, Bytes)
where
    S: AsyncRead + Unpin,
{
    let mut replay = ReplayStream::new(stream);
    let outcome = tokio::time::timeout(limit, async {
        match protocol {
            Protocol::Http => http::sniff_http(&mut replay).await,
            Protocol::Tls => tls::sniff_tls(&mut replay).await,
        }
    })
    .await
    .unwrap_or(Err(SniffError::Timeout(limit)));

    (outcome, replay.into_captured())
}
