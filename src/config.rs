use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

use crate::auth::Auth;

/// Command line interface configuration
#[derive(Parser, Debug)]
#[command(
    author, version,
    about = "Transparent HTTP/TLS sniffing proxy",
    long_about = "sniff-proxy accepts plain HTTP and TLS connections, discovers the intended destination \
from the Host header or the TLS SNI, and relays the untouched byte stream through an upstream SOCKS5 server.\n\n\
Every option can also be supplied through the environment variable shown next to it."
)]
pub struct Cli {
    /// Upstream SOCKS5 server host
    #[arg(long = "socks-server", env = "SOCKS_SERVER", value_name = "HOST")]
    pub socks_server: String,

    /// Upstream SOCKS5 server port
    #[arg(long = "socks-port", env = "SOCKS_PORT", value_name = "PORT")]
    pub socks_port: u16,

    /// Upstream SOCKS5 username (requires --socks-password)
    #[arg(long = "socks-username", env = "SOCKS_USERNAME")]
    pub socks_username: Option<String>,

    /// Upstream SOCKS5 password (requires --socks-username)
    #[arg(long = "socks-password", env = "SOCKS_PASSWORD", hide_env_values = true)]
    pub socks_password: Option<String>,

    /// Listen address for plain HTTP connections (Host header sniffing)
    #[arg(long = "http-listen", env = "HTTP_LISTEN", default_value = "127.0.0.1:80")]
    pub http_listen: SocketAddr,

    /// Listen address for TLS connections (SNI sniffing)
    #[arg(long = "tls-listen", env = "TLS_LISTEN", default_value = "127.0.0.1:443")]
    pub tls_listen: SocketAddr,

    /// Hard cap on a relayed session's duration, in seconds
    #[arg(long = "session-lifetime", env = "SESSION_LIFETIME", default_value_t = 600)]
    pub session_lifetime: u64,

    /// How long a new connection may take to reveal its destination, in seconds
    #[arg(long = "sniff-timeout", env = "SNIFF_TIMEOUT", default_value_t = 60)]
    pub sniff_timeout: u64,

    /// Timeout for the SOCKS5 connect handshake, in seconds
    #[arg(long = "dial-timeout", env = "DIAL_TIMEOUT", default_value_t = 30)]
    pub dial_timeout: u64,

    /// Log every session start/end at debug level
    #[arg(long, env = "DEBUG")]
    pub debug: bool,
}

/// Proxy server configuration derived from CLI arguments.
///
/// Built once at startup and shared read-only by every acceptor and session.
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    pub http_listen: SocketAddr,
    pub tls_listen: SocketAddr,
    pub socks_addr: SocketAddr,
    pub socks_auth: Option<Auth>,
    pub session_lifetime: Duration,
    pub sniff_timeout: Duration,
    pub dial_timeout: Duration,
    pub debug: bool,
}

impl ProxyConfig {
    /// Create ProxyConfig from CLI arguments
    pub async fn from_cli(args: Cli) -> color_eyre::Result<Self> {
        let socks_target = join_host_port(&args.socks_server, args.socks_port);
        let socks_addr = match tokio::net::lookup_host(&socks_target).await {
            Ok(mut addrs) => match addrs.next() {
                Some(addr) => addr,
                None => return Err(color_eyre::eyre::eyre!("No addresses found for {}", socks_target)),
            },
            Err(e) => return Err(color_eyre::eyre::eyre!("Failed to resolve {}: {}", socks_target, e)),
        };

        let socks_auth = Auth::from_parts(args.socks_username, args.socks_password)
            .map_err(|e| color_eyre::eyre::eyre!(e))?;

        if args.session_lifetime == 0 {
            return Err(color_eyre::eyre::eyre!("--session-lifetime must be greater than zero"));
        }
        if args.sniff_timeout == 0 {
            return Err(color_eyre::eyre::eyre!("--sniff-timeout must be greater than zero"));
        }
        if args.dial_timeout == 0 {
            return Err(color_eyre::eyre::eyre!("--dial-timeout must be greater than zero"));
        }
        if args.http_listen == args.tls_listen {
            return Err(color_eyre::eyre::eyre!(
                "HTTP and TLS listeners cannot share the address {}",
                args.http_listen
            ));
        }

        Ok(Self {
            http_listen: args.http_listen,
            tls_listen: args.tls_listen,
            socks_addr,
            socks_auth,
            session_lifetime: Duration::from_secs(args.session_lifetime),
            sniff_timeout: Duration::from_secs(args.sniff_timeout),
            dial_timeout: Duration::from_secs(args.dial_timeout),
            debug: args.debug,
        })
    }
}

/// Join host and port, bracketing bare IPv6 literals
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        let mut argv = vec!["sniff-proxy"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv)
    }

    #[test]
    fn defaults_match_fixed_ports() {
        let cli = parse(&["--socks-server", "127.0.0.1", "--socks-port", "1080"]).unwrap();
        assert_eq!(cli.http_listen, "127.0.0.1:80".parse::<SocketAddr>().unwrap());
        assert_eq!(cli.tls_listen, "127.0.0.1:443".parse::<SocketAddr>().unwrap());
        assert_eq!(cli.session_lifetime, 600);
    }

    #[test]
    fn socks_port_must_be_numeric() {
        assert!(parse(&["--socks-server", "127.0.0.1", "--socks-port", "socks"]).is_err());
    }

    #[tokio::test]
    async fn from_cli_resolves_socks_address() {
        let cli = parse(&[
            "--socks-server", "127.0.0.1",
            "--socks-port", "1080",
            "--session-lifetime", "5",
        ])
        .unwrap();
        let config = ProxyConfig::from_cli(cli).await.unwrap();
        assert_eq!(config.socks_addr, "127.0.0.1:1080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.session_lifetime, Duration::from_secs(5));
        assert!(config.socks_auth.is_none());
    }

    #[tokio::test]
    async fn from_cli_rejects_half_auth() {
        let cli = parse(&[
            "--socks-server", "127.0.0.1",
            "--socks-port", "1080",
            "--socks-username", "user",
        ])
        .unwrap();
        assert!(ProxyConfig::from_cli(cli).await.is_err());
    }

    #[tokio::test]
    async fn from_cli_rejects_zero_lifetime() {
        let cli = parse(&[
            "--socks-server", "127.0.0.1",
            "--socks-port", "1080",
            "--session-lifetime", "0",
        ])
        .unwrap();
        assert!(ProxyConfig::from_cli(cli).await.is_err());
    }

    #[test]
    fn join_host_port_brackets_ipv6() {
        assert_eq!(join_host_port("example.com", 80), "example.com:80");
        assert_eq!(join_host_port("::1", 1080), "[::1]:1080");
        assert_eq!(join_host_port("[::1]", 1080), "[::1]:1080");
    }
}
