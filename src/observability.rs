use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── Store writes ────────────────────────────────────────────────

/// Counter: successful document writes. Labels: op (set, merge, update).
pub const STORE_WRITES_TOTAL: &str = "overlap_store_writes_total";

/// Counter: writes rejected by the WAL writer.
pub const STORE_WRITE_FAILURES_TOTAL: &str = "overlap_store_write_failures_total";

// ── Subscriptions ───────────────────────────────────────────────

/// Gauge: live snapshot listeners across all events.
pub const SUBSCRIPTIONS_ACTIVE: &str = "overlap_subscriptions_active";

// ── WAL ─────────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "overlap_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "overlap_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "overlap_wal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
