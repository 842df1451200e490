use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use browserd::config::ServerConfig;
use browserd::dispatch::Dispatcher;
use browserd::server::{build_router, AppState};
use browserd::session::SessionManager;
use browserd::{metrics, ToolCall};
use clap::Parser;
use telemetry_tap::TelemetryTap;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "browserd",
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("BUILD_DATE"), ")"),
    about = "Stateful browser-automation tool server over CDP"
)]
struct Cli {
    /// Address to bind the HTTP surface to.
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Run the browser with a visible window.
    #[arg(long)]
    headful: bool,

    /// Default timeout for waits and interactions, in milliseconds.
    #[arg(long)]
    default_timeout_ms: Option<u64>,

    /// Navigation timeout, in milliseconds.
    #[arg(long)]
    nav_timeout_ms: Option<u64>,

    /// Dispatch a single tool call (JSON) and exit instead of serving.
    #[arg(long)]
    once: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::from_env();
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if cli.headful {
        config.headless = false;
    }
    if let Some(timeout) = cli.default_timeout_ms {
        config.default_timeout_ms = timeout;
    }
    if let Some(timeout) = cli.nav_timeout_ms {
        config.navigation_timeout_ms = timeout;
    }

    metrics::register_metrics(prometheus::default_registry());

    let tap = Arc::new(TelemetryTap::new(config.tap_config()));
    let session = Arc::new(SessionManager::new(config.driver_config(), Arc::clone(&tap)));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&session),
        Arc::clone(&tap),
        config.clone(),
    ));

    if let Some(raw) = cli.once {
        let call: ToolCall =
            serde_json::from_str(&raw).context("--once expects a JSON tool call")?;
        let response = dispatcher.dispatch(call).await;
        println!("{}", serde_json::to_string_pretty(&response)?);
        session.shutdown().await;
        return Ok(());
    }

    let state = Arc::new(AppState {
        dispatcher,
        session: Arc::clone(&session),
    });

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(target: "browserd", addr = %config.bind_addr, "serving tool calls");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    session.shutdown().await;
    info!(target: "browserd", "shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!(?err, "failed to listen for shutdown signal");
    }
}
