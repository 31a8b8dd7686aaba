use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: admission-controlled operations. Labels: op, outcome.
pub const ADMISSIONS_TOTAL: &str = "katu_admissions_total";

/// Histogram: admission latency in seconds, store round-trip included. Labels: op.
pub const ADMISSION_DURATION_SECONDS: &str = "katu_admission_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: live appointments held by the durable store.
pub const APPOINTMENTS_ACTIVE: &str = "katu_appointments_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "katu_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "katu_wal_flush_batch_size";

/// Install the stderr fmt subscriber, filtered by `RUST_LOG` (default `info`).
/// Stdout stays clean for command output.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}
