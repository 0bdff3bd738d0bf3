use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "parkspace_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "parkspace_query_duration_seconds";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: reservations committed.
pub const RESERVATIONS_CREATED_TOTAL: &str = "parkspace_reservations_created_total";

/// Counter: bookings refused because the slot overlapped a live reservation.
pub const BOOKING_CONFLICTS_TOTAL: &str = "parkspace_booking_conflicts_total";

/// Counter: reservation status changes. Labels: from, to.
pub const RESERVATION_TRANSITIONS_TOTAL: &str = "parkspace_reservation_transitions_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "parkspace_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "parkspace_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "parkspace_connections_rejected_total";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "parkspace_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "parkspace_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "parkspace_wal_flush_batch_size";

/// Counter: WAL rewrites.
pub const WAL_COMPACTIONS_TOTAL: &str = "parkspace_wal_compactions_total";

#[derive(Debug, thiserror::Error)]
#[error("failed to install Prometheus exporter on port {port}: {source}")]
pub struct MetricsInitError {
    port: u16,
    source: metrics_exporter_prometheus::BuildError,
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), MetricsInitError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|source| MetricsInitError { port, source })?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertReservation { .. } => "insert_reservation",
        Command::UpdateReservationStatus { .. } => "update_reservation_status",
        Command::UpdatePaymentStatus { .. } => "update_payment_status",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectBookedSlots { .. } => "select_booked_slots",
        Command::SelectNearbyListings { .. } => "select_nearby_listings",
        Command::SelectLocationSuggestions { .. } => "select_location_suggestions",
        Command::InsertListing { .. } => "insert_listing",
        Command::UpdateListing { .. } => "update_listing",
        Command::SelectListings { .. } => "select_listings",
        Command::InsertParkingRequest { .. } => "insert_parking_request",
        Command::ReviewParkingRequest { .. } => "review_parking_request",
        Command::SelectParkingRequests { .. } => "select_parking_requests",
    }
}
