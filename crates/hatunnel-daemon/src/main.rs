//! hatunnel Daemon
//!
//! Maintains an outbound reverse tunnel from the local network to a relay
//! and serves a health endpoint for external monitoring. The tunnel runs
//! under a supervisor that reconnects with jittered exponential backoff;
//! losing the relay never takes the daemon down.

use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use hatunnel_core::tracing_init::init_tracing;
use hatunnel_core::{TunnelConfig, health};
use hatunnel_daemon::health::{AppState, build_router};
use hatunnel_daemon::tunnel::{Supervisor, TcpTransport};

#[derive(Parser, Debug)]
#[command(name = "hatunnel-daemon")]
#[command(version, about = "Reverse tunnel client for Home Assistant remote access")]
struct Args {
    /// Relay endpoint URL, e.g. "tcp://relay.example.net:9443"
    #[arg(long, env = "HATUNNEL_REMOTE_URL")]
    remote_url: String,

    /// Username for relay authentication
    #[arg(long, env = "HATUNNEL_AUTH_USER")]
    auth_user: String,

    /// Password for relay authentication
    #[arg(long, env = "HATUNNEL_AUTH_PASS", hide_env_values = true)]
    auth_pass: String,

    /// Local port the tunnel forwards to (Home Assistant)
    #[arg(long, default_value_t = 8123, env = "HATUNNEL_LOCAL_PORT")]
    local_port: u16,

    /// Interval between keepalive pings, e.g. "25s"
    #[arg(long, default_value = "25s", env = "HATUNNEL_KEEPALIVE")]
    keepalive: humantime::Duration,

    /// Budget for one dial plus handshake, e.g. "10s"
    #[arg(long, default_value = "10s", env = "HATUNNEL_CONNECT_TIMEOUT")]
    connect_timeout: humantime::Duration,

    /// Port for the HTTP health endpoint
    #[arg(long, default_value_t = 8080, env = "HATUNNEL_HEALTH_PORT")]
    health_port: u16,

    /// Surface Google report-state sync as enabled in /health
    #[arg(long, env = "HATUNNEL_REPORT_STATE")]
    report_state: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "HATUNNEL_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "HATUNNEL_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn tunnel_config(&self) -> TunnelConfig {
        let mut config = TunnelConfig::new(
            self.remote_url.clone(),
            self.auth_user.clone(),
            self.auth_pass.clone(),
            format!("127.0.0.1:{}", self.local_port),
        );
        config.keepalive_interval = self.keepalive.into();
        config.connect_timeout = self.connect_timeout.into();
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_filter = format!(
        "hatunnel_daemon={level},hatunnel_core={level},hatunnel_wire={level}",
        level = args.log_level
    );
    init_tracing(&log_filter, args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        remote_url = %args.remote_url,
        local_port = args.local_port,
        "Starting hatunnel-daemon"
    );

    let config = args.tunnel_config();
    config.validate().context("invalid tunnel configuration")?;

    // Subscribe before handing shutdown_tx to any component so nothing can
    // miss the signal.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let (proxy_tx, proxy_rx) = tokio::sync::watch::channel(false);
    let (reporter, health_rx) = health::channel();

    let transport = TcpTransport::new();
    info!(client_id = %transport.client_id(), "Generated client identity");
    let mut supervisor = Supervisor::new(transport, config, reporter);
    let tunnel_handle = tokio::spawn(async move { supervisor.run(shutdown_rx).await });

    let state = AppState {
        tunnel: health_rx,
        proxy_up: proxy_rx,
        report_state_enabled: args.report_state,
    };
    let app = build_router(state);
    let health_addr = SocketAddr::from(([0, 0, 0, 0], args.health_port));
    let listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .with_context(|| format!("bind health endpoint on {health_addr}"))?;
    info!(addr = %health_addr, "Health endpoint ready");

    let mut serve_shutdown = shutdown_tx.subscribe();
    let mut server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = serve_shutdown.changed().await;
            })
            .await
    });

    let _ = proxy_tx.send(true);

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("install SIGTERM handler")?;
    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    tokio::select! {
        result = &mut server_handle => {
            result??;
            anyhow::bail!("health server exited unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C shutdown signal"),
        _ = sigterm_future => info!("Received SIGTERM shutdown signal"),
    }

    let _ = proxy_tx.send(false);
    let _ = shutdown_tx.send(true);

    let _ = tunnel_handle.await;
    if let Err(e) = server_handle.await? {
        warn!(error = %e, "Health server shutdown error");
    }

    info!("Daemon stopped");
    Ok(())
}
