mod auth;
mod buffer_pool;
mod config;
mod connection;
mod relay;
mod replay;
mod server;
mod session;
mod shutdown;
mod sniff;
mod socks;
mod traffic;

use crate::config::{Cli, ProxyConfig};
use crate::connection::SessionTracker;
use crate::server::Acceptor;
use crate::shutdown::ShutdownCoordinator;
use crate::sniff::Protocol;
use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};

use tracing::info;
use tracing_subscriber::EnvFilter;

use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Cli::parse();

    let default_filter = if args.debug { "sniff_proxy=debug" } else { "sniff_proxy=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ProxyConfig::from_cli(args).await?;

    let tracker = SessionTracker::new();
    let coordinator = ShutdownCoordinator::new(Arc::clone(&tracker));

    // Both listeners must be up before anything is served
    let http = Acceptor::bind(config.http_listen, Protocol::Http, &config, Arc::clone(&tracker))
        .await
        .wrap_err_with(|| format!("Can't start listening on {}", config.http_listen))?;
    let tls = Acceptor::bind(config.tls_listen, Protocol::Tls, &config, Arc::clone(&tracker))
        .await
        .wrap_err_with(|| format!("Can't start listening on {}", config.tls_listen))?;

    let http_addr = http.local_addr()?;
    let tls_addr = tls.local_addr()?;
    let contexts = [http.context(), tls.context()];
    http.spawn(coordinator.subscribe());
    tls.spawn(coordinator.subscribe());

    info!(
        "Started proxy server: http={} tls={} socks5={}",
        http_addr, tls_addr, config.socks_addr
    );
    if config.debug {
        info!("Debug logging enabled");
    }
    if let Some(auth) = &config.socks_auth {
        info!("SOCKS5 backend authenticates as {}", auth.username);
    }

    // Block until interrupted, then close listeners and drain
    coordinator.run(signal::ctrl_c()).await;

    for ctx in &contexts {
        let (sessions, rx, tx) = ctx.traffic.get();
        info!(
            "{} listener relayed {} sessions: {}↑ {}↓ bytes",
            ctx.protocol, sessions, rx, tx
        );
    }
    info!("Proxy server finished");

    Ok(())
}
