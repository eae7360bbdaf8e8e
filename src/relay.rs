//! Full-duplex relay between a sniffed client and its upstream.
//!
//! The replay buffer goes to the upstream first, then one pump per
//! direction copies live traffic. When a direction ends its writer is shut
//! down (half-close) while the opposite direction keeps running. The whole
//! relay runs under an absolute lifetime cap that is never reset by traffic.

use bytes::Bytes;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::buffer_pool::BufferLease;

/// Error type for relay operations
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("replaying {len} sniffed bytes to upstream failed: {source}")]
    Replay {
        len: usize,
        #[source]
        source: io::Error,
    },
}

/// What a finished relay moved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Sniffed bytes replayed to the upstream
    pub replayed: u64,
    /// Live bytes pumped client -> upstream
    pub to_upstream: u64,
    /// Bytes pumped upstream -> client
    pub to_client: u64,
    /// The lifetime cap fired and both connections were closed
    pub expired: bool,
}

/// Relay `client` and `upstream` until both directions finish or `lifetime` elapses.
///
/// Both streams are consumed; they are closed when this returns.
pub async fn relay<C, U>(client: C, upstream: U, replay: Bytes, lifetime: Duration) -> Result<RelayStats, RelayError>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let to_upstream = AtomicU64::new(0);
    let to_client = AtomicU64::new(0);

    let (mut client_r, mut client_w) = tokio::io::split(client);
    let (mut upstream_r, mut upstream_w) = tokio::io::split(upstream);

    let session = async {
        upstream_w
            .write_all(&replay)
            .await
            .map_err(|source| RelayError::Replay {
                len: replay.len(),
                source,
            })?;

        let (up, down) = tokio::join!(
            pump(&mut client_r, &mut upstream_w, &to_upstream),
            pump(&mut upstream_r, &mut client_w, &to_client),
        );
        if let Err(e) = up {
            debug!("client -> upstream ended with error: {}", e);
        }
        if let Err(e) = down {
            debug!("upstream -> client ended with error: {}", e);
        }
        Ok(())
    };

    let expired = match tokio::time::timeout(lifetime, session).await {
        Ok(res) => {
            res?;
            false
        }
        Err(_) => true,
    };

    Ok(RelayStats {
        replayed: replay.len() as u64,
        to_upstream: to_upstream.load(Ordering::Relaxed),
        to_client: to_client.load(Ordering::Relaxed),
        expired,
    })
}

/// Copy `reader` into `writer` until EOF or error, then half-close `writer`
async fn pump<R, W>(reader: &mut R, writer: &mut W, copied: &AtomicU64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = BufferLease::new().await;
    let result = loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(e) => break Err(e),
        };
        if let Err(e) = writer.write_all(&buf[..n]).await {
            break Err(e);
        }
        copied.fetch_add(n as u64, Ordering::Relaxed);
    };

    // The peer may already be gone; nothing left to report
    let _ = writer.shutdown().await;
    result
}
