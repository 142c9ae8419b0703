use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use crate::model::Event;

// ── Booking metrics ─────────────────────────────────────────────

/// Counter: reservations accepted.
pub const RESERVATIONS_CREATED_TOTAL: &str = "pista_reservations_created_total";

/// Counter: reservations rejected because the time was taken.
pub const RESERVATION_CONFLICTS_TOTAL: &str = "pista_reservation_conflicts_total";

/// Histogram: end-to-end booking latency in seconds. Labels: outcome.
pub const BOOKING_DURATION_SECONDS: &str = "pista_booking_duration_seconds";

/// Counter: committed events. Labels: event.
pub const EVENTS_TOTAL: &str = "pista_events_total";

// ── Storage metrics ─────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "pista_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "pista_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "pista_wal_compactions_total";

/// Gauge: live slot-watch streams.
pub const SLOT_WATCHERS_ACTIVE: &str = "pista_slot_watchers_active";

/// Install a `fmt` subscriber filtered by `RUST_LOG`, defaulting to `info`.
/// A second call is a no-op.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Install the Prometheus exporter on `port`. No-op if `port` is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metric label for an event variant.
pub fn event_label(event: &Event) -> &'static str {
    match event {
        Event::CourtCreated { .. } => "court_created",
        Event::CourtUpdated { .. } => "court_updated",
        Event::ReservationCreated { .. } => "reservation_created",
        Event::ReservationStatusChanged { .. } => "reservation_status_changed",
        Event::ChallengeOpened { .. } => "challenge_opened",
        Event::ChallengesMatched { .. } => "challenges_matched",
        Event::ChallengeCanceled { .. } => "challenge_canceled",
    }
}
