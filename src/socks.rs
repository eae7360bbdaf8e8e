use crate::auth::Auth;
use crate::config::ProxyConfig;
use crate::sniff::Destination;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_socks::tcp::Socks5Stream;

/// Error type for SOCKS5 connection operations
#[derive(Debug, thiserror::Error)]
pub enum SocksError {
    #[error("SOCKS5 connection failed: {0}")]
    ConnectionFailed(String),

    #[error("SOCKS5 connect to {0} timed out after {1:?}")]
    Timeout(String, Duration),
}

/// Result type for SOCKS5 operations
pub type SocksResult<T> = Result<T, SocksError>;

/// Opens upstream connections through the configured SOCKS5 server.
///
/// One attempt per call; a failure is returned to the session as-is.
#[derive(Debug, Clone)]
pub struct SocksConnector {
    socks_addr: SocketAddr,
    auth: Option<Auth>,
    dial_timeout: Duration,
}

impl SocksConnector {
    pub fn new(socks_addr: SocketAddr, auth: Option<Auth>, dial_timeout: Duration) -> Self {
        Self {
            socks_addr,
            auth,
            dial_timeout,
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(config.socks_addr, config.socks_auth.clone(), config.dial_timeout)
    }

    /// Open a SOCKS5 stream to `dest` and hand back the raw TCP connection
    pub async fn connect(&self, dest: &Destination) -> SocksResult<TcpStream> {
        let target = (dest.host.as_str(), dest.port);
        let handshake = async {
            match &self.auth {
                Some(auth) => {
                    Socks5Stream::connect_with_password(
                        self.socks_addr,
                        target,
                        &auth.username,
                        &auth.password,
                    )
                    .await
                }
                None => Socks5Stream::connect(self.socks_addr, target).await,
            }
        };

        match tokio::time::timeout(self.dial_timeout, handshake).await {
            Ok(Ok(stream)) => Ok(stream.into_inner()),
            Ok(Err(e)) => Err(SocksError::ConnectionFailed(e.to_string())),
            Err(_) => Err(SocksError::Timeout(dest.to_string(), self.dial_timeout)),
        }
    }

    /// Get the SOCKS5 server address
    #[allow(dead_code)]
    pub fn socks_addr(&self) -> SocketAddr {
        self.socks_addr
    }
}

/// Minimal in-process SOCKS5 server for tests.
///
/// Accepts no-auth or username/password, answers CONNECT by dialing the
/// requested target directly, then splices the two sockets.
#[cfg(test)]
pub(crate) mod testing {
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    /// Spawn the server; each CONNECT target is reported on the returned channel.
    ///
    /// With `redirect`, every CONNECT is dialed there instead of the requested target.
    pub(crate) async fn spawn_socks5(
        credentials: Option<(&'static str, &'static str)>,
        redirect: Option<SocketAddr>,
    ) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, credentials, redirect, tx).await;
                });
            }
        });
        (addr, rx)
    }

    async fn serve(
        mut client: TcpStream,
        credentials: Option<(&'static str, &'static str)>,
        redirect: Option<SocketAddr>,
        targets: mpsc::UnboundedSender<String>,
    ) -> std::io::Result<()> {
        let mut head = [0u8; 2];
        client.read_exact(&mut head).await?;
        let mut methods = vec![0u8; head[1] as usize];
        client.read_exact(&mut methods).await?;

        match credentials {
            None => client.write_all(&[0x05, 0x00]).await?,
            Some((user, pass)) => {
                client.write_all(&[0x05, 0x02]).await?;
                let mut ver_ulen = [0u8; 2];
                client.read_exact(&mut ver_ulen).await?;
                let mut u = vec![0u8; ver_ulen[1] as usize];
                client.read_exact(&mut u).await?;
                let mut plen = [0u8; 1];
                client.read_exact(&mut plen).await?;
                let mut p = vec![0u8; plen[0] as usize];
                client.read_exact(&mut p).await?;
                let ok = u == user.as_bytes() && p == pass.as_bytes();
                client.write_all(&[0x01, if ok { 0x00 } else { 0x01 }]).await?;
                if !ok {
                    return Ok(());
                }
            }
        }

        let mut req = [0u8; 4];
        client.read_exact(&mut req).await?;
        let host = match req[3] {
            0x01 => {
                let mut ip = [0u8; 4];
                client.read_exact(&mut ip).await?;
                std::net::Ipv4Addr::from(ip).to_string()
            }
            0x03 => {
                let mut len = [0u8; 1];
                client.read_exact(&mut len).await?;
                let mut name = vec![0u8; len[0] as usize];
                client.read_exact(&mut name).await?;
                String::from_utf8_lossy(&name).into_owned()
            }
            _ => return Ok(()),
        };
        let mut port = [0u8; 2];
        client.read_exact(&mut port).await?;
        let target = format!("{}:{}", host, u16::from_be_bytes(port));
        let _ = targets.send(target.clone());

        let dialed = match redirect {
            Some(addr) => TcpStream::connect(addr).await,
            None => TcpStream::connect(&target).await,
        };
        let mut upstream = match dialed {
            Ok(s) => s,
            Err(_) => {
                // host unreachable
                client.write_all(&[0x05, 0x04, 0x00, 0x01, 0, 0, 0, 0, 0, 0]).await?;
                return Ok(());
            }
        };
        client.write_all(&[0x05, 0x00, 0x00, 0x01, 127, 0, 0, 1, 0, 0]).await?;
        tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
        Ok(())
    }
}
