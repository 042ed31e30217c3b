use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: reservation operations handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "carrel_requests_total";

/// Histogram: operation latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "carrel_request_duration_seconds";

/// Counter: requests the constraint engine turned away. Labels: kind.
pub const REJECTIONS_TOTAL: &str = "carrel_rejections_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Counter: bookings flipped to completed by the sweep.
pub const BOOKINGS_SWEPT_TOTAL: &str = "carrel_bookings_swept_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "carrel_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "carrel_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
