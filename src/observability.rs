use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "clinic_booking_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "clinic_booking_query_duration_seconds";

// ── Domain ──────────────────────────────────────────────────────

/// Counter: bookings stored.
pub const BOOKINGS_ADDED_TOTAL: &str = "clinic_booking_bookings_added_total";

/// Counter: bookings soft-deleted.
pub const BOOKINGS_DELETED_TOTAL: &str = "clinic_booking_bookings_deleted_total";

/// Counter: requests turned away by validation. Labels: operation.
pub const VALIDATION_REJECTIONS_TOTAL: &str = "clinic_booking_validation_rejections_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "clinic_booking_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "clinic_booking_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "clinic_booking_connections_rejected_total";

/// Histogram: WAL append + fsync duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "clinic_booking_wal_flush_duration_seconds";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "clinic_booking_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
/// A failed install is logged and the server keeps running without metrics.
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

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::RegisterClinic { .. } => "register_clinic",
        Command::RegisterPatient { .. } => "register_patient",
        Command::RegisterDoctor { .. } => "register_doctor",
        Command::AddBooking(_) => "add_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectNextBooking { .. } => "select_next_booking",
    }
}
