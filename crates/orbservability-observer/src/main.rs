//! Orbservability Observer
//!
//! Runs a PxL script against Pixie on a fixed interval and streams every
//! result row to the Orbservability event gateway as a `PixieEvent`.
//!
//! Exits 0 when stopped by Ctrl-C / SIGTERM, non-zero when the script cannot
//! compile or the error budget runs out.

mod bridge;
mod column;
mod engine;
mod event;
mod mapper;
mod mux;
mod outbound;
mod session;
mod telemetry;

use crate::bridge::{Bridge, RetryPolicy};
use crate::engine::VizierExecutor;
use crate::outbound::{EventSink, GrpcEventStream, DEFAULT_OUTBOUND_BUFFER};
use clap::Parser;
use orbservability_common::config::{
    DEFAULT_MAX_ERROR_COUNT, DEFAULT_PIXIE_URL, DEFAULT_PXL_FILE_PATH, DEFAULT_STREAM_SLEEP_SECS,
    DEFAULT_VIZIER_HOST,
};
use orbservability_common::proto::PixieEvent;
use orbservability_common::ObserverConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "orbservability-observer")]
#[command(about = "Streams Pixie script results to the Orbservability event gateway")]
struct Args {
    /// Event gateway address (required)
    #[arg(long, env = "ORBSERVABILITY_URL")]
    orbservability_url: Option<String>,

    /// Pixie API address
    #[arg(long, env = "PIXIE_URL", default_value = DEFAULT_PIXIE_URL)]
    pixie_url: String,

    /// Cluster id sent with each execution
    #[arg(long, env = "VIZIER_HOST", default_value = DEFAULT_VIZIER_HOST)]
    vizier_host: String,

    /// PxL script to run
    #[arg(long, env = "PXL_FILE_PATH", default_value = DEFAULT_PXL_FILE_PATH)]
    pxl_file_path: String,

    /// Seconds to sleep between executions
    #[arg(long, env = "PIXIE_STREAM_SLEEP", default_value_t = DEFAULT_STREAM_SLEEP_SECS)]
    stream_sleep: u64,

    /// Failed executions tolerated before exiting
    #[arg(long, env = "PIXIE_ERROR_MAX", default_value_t = DEFAULT_MAX_ERROR_COUNT)]
    error_max: u32,

    /// Events queued ahead of the gateway stream
    #[arg(long, env = "OUTBOUND_BUFFER", default_value_t = DEFAULT_OUTBOUND_BUFFER)]
    outbound_buffer: usize,

    /// Serve /metrics and /health on this address
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "JSON_LOGS", default_value = "false")]
    json_logs: bool,
}

impl Args {
    fn config(&self) -> ObserverConfig {
        ObserverConfig {
            orbservability_url: self.orbservability_url.clone().unwrap_or_default(),
            pixie_url: self.pixie_url.clone(),
            vizier_host: self.vizier_host.clone(),
            pxl_file_path: self.pxl_file_path.clone(),
            stream_sleep_secs: self.stream_sleep,
            max_error_count: self.error_max,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    telemetry::init(&args.log_level, args.json_logs)?;
    telemetry::metrics::init_metrics();

    let config = args.config();
    config.validate()?;
    let script = config.load_script()?;

    info!(
        pixie_url = %config.pixie_url,
        vizier_host = %config.vizier_host,
        pxl_file_path = %config.pxl_file_path,
        "Starting Orbservability Observer"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let metrics_server = args.metrics_addr.map(|addr| {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = telemetry::serve_metrics(addr, shutdown).await {
                error!("Metrics server failed: {}", e);
            }
        })
    });

    let observer_id = std::env::var("HOSTNAME").unwrap_or_else(|_| Uuid::new_v4().to_string());
    let events = Arc::new(
        GrpcEventStream::connect(config.gateway_endpoint(), &observer_id, args.outbound_buffer)
            .await?,
    );
    let executor = VizierExecutor::connect_lazy(config.pixie_endpoint(), config.vizier_host.clone())?;

    let mut bridge = Bridge::<PixieEvent>::new(
        Box::new(executor),
        script,
        events.clone(),
        RetryPolicy::from_config(&config),
    );
    let outcome = bridge.run(shutdown.clone()).await;

    if let Err(e) = events.finalize().await {
        warn!("Failed to close event stream cleanly: {}", e);
    }

    shutdown.cancel();
    if let Some(server) = metrics_server {
        server.await.ok();
    }

    match outcome {
        Ok(()) => {
            info!("Orbservability Observer stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Orbservability Observer terminated");
            Err(e.into())
        }
    }
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM
async fn watch_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }

    shutdown.cancel();
}
