use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const NAMESPACE: &str = "interest_report";

/// Prometheus metrics for the report pipeline.
///
/// All metrics use the "interest_report" namespace.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,

    /// Total pipeline cycles started.
    pub cycles_total: Counter,
    /// Wall-clock duration of a full cycle.
    pub cycle_duration: Histogram,
    /// Topics returned by the last discovery.
    pub topics_discovered: Gauge,
    /// Topic discovery failures.
    pub discovery_errors: Counter,
    /// Messages accepted into topic batches.
    pub messages_drained: Counter,
    /// Payloads skipped because they were absent or not UTF-8.
    pub payloads_rejected: Counter,
    /// Drains ended early by a bus error.
    pub drain_errors: Counter,
    /// Topics left out of a snapshot by aggregation.
    pub aggregation_failures: Counter,
    /// Topics in the last snapshot.
    pub snapshot_topics: Gauge,
    /// Chart images produced.
    pub charts_rendered: Counter,
    /// Report step outcomes by label (written/skipped_busy/skipped_empty/failed).
    pub report_outcomes: CounterVec,
    /// Unix time of the last report written.
    pub last_report_timestamp: Gauge,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let cycles_total = Counter::with_opts(
            Opts::new("cycles_total", "Total pipeline cycles started.").namespace(NAMESPACE),
        )?;
        let cycle_duration = Histogram::with_opts(
            HistogramOpts::new(
                "cycle_duration_seconds",
                "Wall-clock duration of a full pipeline cycle.",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 12.5, 15.0, 20.0, 30.0, 60.0]),
        )?;
        let topics_discovered = Gauge::with_opts(
            Opts::new("topics_discovered", "Topics returned by the last discovery.")
                .namespace(NAMESPACE),
        )?;
        let discovery_errors = Counter::with_opts(
            Opts::new("discovery_errors_total", "Topic discovery failures.").namespace(NAMESPACE),
        )?;
        let messages_drained = Counter::with_opts(
            Opts::new(
                "messages_drained_total",
                "Messages accepted into topic batches.",
            )
            .namespace(NAMESPACE),
        )?;
        let payloads_rejected = Counter::with_opts(
            Opts::new(
                "payloads_rejected_total",
                "Payloads skipped because they were absent or not UTF-8.",
            )
            .namespace(NAMESPACE),
        )?;
        let drain_errors = Counter::with_opts(
            Opts::new("drain_errors_total", "Drains ended early by a bus error.")
                .namespace(NAMESPACE),
        )?;
        let aggregation_failures = Counter::with_opts(
            Opts::new(
                "aggregation_failures_total",
                "Topics left out of a snapshot by aggregation.",
            )
            .namespace(NAMESPACE),
        )?;
        let snapshot_topics = Gauge::with_opts(
            Opts::new("snapshot_topics", "Topics in the last snapshot.").namespace(NAMESPACE),
        )?;
        let charts_rendered = Counter::with_opts(
            Opts::new("charts_rendered_total", "Chart images produced.").namespace(NAMESPACE),
        )?;
        let report_outcomes = CounterVec::new(
            Opts::new("report_outcomes_total", "Report step outcomes by label.")
                .namespace(NAMESPACE),
            &["outcome"],
        )?;
        let last_report_timestamp = Gauge::with_opts(
            Opts::new(
                "last_report_timestamp_seconds",
                "Unix time of the last report written.",
            )
            .namespace(NAMESPACE),
        )?;

        registry.register(Box::new(cycles_total.clone()))?;
        registry.register(Box::new(cycle_duration.clone()))?;
        registry.register(Box::new(topics_discovered.clone()))?;
        registry.register(Box::new(discovery_errors.clone()))?;
        registry.register(Box::new(messages_drained.clone()))?;
        registry.register(Box::new(payloads_rejected.clone()))?;
        registry.register(Box::new(drain_errors.clone()))?;
        registry.register(Box::new(aggregation_failures.clone()))?;
        registry.register(Box::new(snapshot_topics.clone()))?;
        registry.register(Box::new(charts_rendered.clone()))?;
        registry.register(Box::new(report_outcomes.clone()))?;
        registry.register(Box::new(last_report_timestamp.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            cycles_total,
            cycle_duration,
            topics_discovered,
            discovery_errors,
            messages_drained,
            payloads_rejected,
            drain_errors,
            aggregation_failures,
            snapshot_topics,
            charts_rendered,
            report_outcomes,
            last_report_timestamp,
        })
    }

    /// Starts the HTTP server serving /metrics and /healthz.
    pub async fn start(&self) -> Result<()> {
        let addr = if self.addr.is_empty() {
            ":9090"
        } else {
            &self.addr
        };

        // Parse address, handling ":port" shorthand.
        let bind_addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        let app_state = Arc::new(AppState {
            registry: self.registry.clone(),
        });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(app_state);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "health metrics server started");

            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "health metrics server error");
            }
        });

        Ok(())
    }

    /// Gracefully shuts down the health metrics server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }

    /// Renders all registered metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String> {
        encode_registry(&self.registry)
    }
}

fn encode_registry(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&registry.gather(), &mut buffer)
        .context("encoding metrics")?;
    String::from_utf8(buffer).context("converting metrics to string")
}

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match encode_registry(&state.registry) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "encoding metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_and_encode() {
        let health = HealthMetrics::new(":0").expect("metrics");
        health.cycles_total.inc();
        health
            .report_outcomes
            .with_label_values(&["written"])
            .inc();

        let text = health.encode().expect("encode");
        assert!(text.contains("interest_report_cycles_total 1"));
        assert!(text.contains("interest_report_report_outcomes_total{outcome=\"written\"} 1"));
    }

    #[tokio::test]
    async fn test_server_start_and_stop() {
        let health = HealthMetrics::new("127.0.0.1:0").expect("metrics");
        health.start().await.expect("server starts");
        health.stop().await.expect("server stops");
    }
}
