//! Orders demo service.
//!
//! ```text
//!   client ──▶ set request id ──▶ trace ──▶ HTTP monitor (root span)
//!                                               │
//!                                               ▼
//!                                  /orders handlers (Context extractor)
//!                                               │
//!                                               ▼
//!                                  monitored cache view (child spans)
//!                                               │
//!                                               ▼
//!                                  capture sink (log or remote collector)
//! ```

use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

use backend_monitor::backends::cache::{Cache, MemoryCache};
use backend_monitor::config::{load_config, MonitorConfig};
use backend_monitor::http::{AppState, HttpServer};
use backend_monitor::lifecycle::{wait_for_signal, Shutdown};
use backend_monitor::observability::{logging, metrics};
use backend_monitor::Monitor;

#[derive(Parser)]
#[command(name = "backend-monitor")]
#[command(about = "Orders demo service instrumented with backend-monitor", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => MonitorConfig::default(),
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!("backend-monitor v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.server.bind_address,
        sink = config.sink.dsn.as_deref().unwrap_or("log"),
        environment = %config.sink.environment,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let monitor = Monitor::from_config(&config.sink)?;
    let cache = Cache::connect(MemoryCache::new(), &config.cache).await?;
    let state = AppState {
        monitor: monitor.clone(),
        cache,
    };

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    let shutdown = Shutdown::new();
    let server = HttpServer::new(state, config.http.clone());
    let serving = tokio::spawn(server.run(listener, shutdown.subscribe()));

    wait_for_signal().await;
    shutdown.trigger();
    match serving.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "HTTP server failed"),
        Err(e) => tracing::error!(error = %e, "HTTP server task aborted"),
    }

    if !monitor.flush_default().await {
        tracing::warn!(timeout_ms = config.sink.flush_timeout_ms, "Pending captures dropped at shutdown");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
