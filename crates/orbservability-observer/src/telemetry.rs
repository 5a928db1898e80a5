//! Logging and Prometheus instrumentation
//!
//! Logs go through `tracing` with an env filter (`RUST_LOG` overrides the
//! configured level) and optional JSON formatting. Metrics are process-wide
//! statics in the default Prometheus registry, optionally served over HTTP.

use anyhow::Result;
use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber
pub fn init(log_level: &str, json_logs: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let subscriber = tracing_subscriber::registry().with(filter);

    if json_logs {
        subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        subscriber.with(tracing_subscriber::fmt::layer()).try_init()?;
    }

    Ok(())
}

/// Prometheus metrics registry
pub mod metrics {
    use once_cell::sync::Lazy;
    use prometheus::{
        register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
        IntCounterVec, IntGauge, TextEncoder,
    };
    use tracing::error;

    /// Rows mapped and handed to the event gateway
    pub static ROWS_FORWARDED: Lazy<IntCounter> = Lazy::new(|| {
        register_int_counter!(
            "observer_rows_forwarded_total",
            "Total rows forwarded to the event gateway"
        )
        .expect("observer_rows_forwarded_total registers once")
    });

    /// Rows dropped because they did not fit the event schema
    pub static ROWS_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
        register_int_counter_vec!(
            "observer_rows_dropped_total",
            "Total rows dropped by reason",
            &["reason"]
        )
        .expect("observer_rows_dropped_total registers once")
    });

    pub static TABLES_ACCEPTED: Lazy<IntCounter> = Lazy::new(|| {
        register_int_counter!(
            "observer_tables_accepted_total",
            "Total result tables accepted from script executions"
        )
        .expect("observer_tables_accepted_total registers once")
    });

    /// Script execution attempts by outcome
    pub static SCRIPT_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
        register_int_counter_vec!(
            "observer_script_attempts_total",
            "Total script execution attempts by outcome",
            &["outcome"]
        )
        .expect("observer_script_attempts_total registers once")
    });

    pub static CONSECUTIVE_ERRORS: Lazy<IntGauge> = Lazy::new(|| {
        register_int_gauge!(
            "observer_consecutive_errors",
            "Failed script executions counted against the error budget"
        )
        .expect("observer_consecutive_errors registers once")
    });

    pub fn record_row_forwarded() {
        ROWS_FORWARDED.inc();
    }

    pub fn record_row_dropped(reason: &str) {
        ROWS_DROPPED.with_label_values(&[reason]).inc();
    }

    pub fn record_table_accepted() {
        TABLES_ACCEPTED.inc();
    }

    pub fn record_attempt(outcome: &str, consecutive_errors: u32) {
        SCRIPT_ATTEMPTS.with_label_values(&[outcome]).inc();
        CONSECUTIVE_ERRORS.set(i64::from(consecutive_errors));
    }

    /// Force registration so every series shows up before first use
    pub fn init_metrics() {
        Lazy::force(&ROWS_FORWARDED);
        Lazy::force(&ROWS_DROPPED);
        Lazy::force(&TABLES_ACCEPTED);
        Lazy::force(&SCRIPT_ATTEMPTS);
        Lazy::force(&CONSECUTIVE_ERRORS);
    }

    /// Text exposition of the default registry
    pub fn encode_metrics() -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
            error!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

async fn prometheus_metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        metrics::encode_metrics(),
    )
}

async fn health() -> &'static str {
    "OK"
}

fn router() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
}

/// Serve `/metrics` and `/health` until `shutdown` is cancelled.
pub async fn serve_metrics(addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    axum::serve(listener, router())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_metrics_include_observer_series() {
        metrics::init_metrics();
        metrics::record_row_dropped("type_mismatch");
        metrics::record_attempt("success", 1);

        let text = metrics::encode_metrics();
        assert!(text.contains("observer_rows_dropped_total{reason=\"type_mismatch\"}"));
        assert!(text.contains("observer_script_attempts_total{outcome=\"success\"}"));
        assert!(text.contains("observer_consecutive_errors"));
    }

    #[tokio::test]
    async fn test_metrics_server_stops_on_cancel() {
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve_metrics("127.0.0.1:0".parse().unwrap(), shutdown.clone()));

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }
}
