//! Prometheus metrics for the reservation engine.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `boxoffice_reservations_total{status}` - Reservation transitions by resulting status
//! - `boxoffice_payments_total{status}` - Payment transitions by resulting status
//! - `boxoffice_payment_revenue_cents_total` - Revenue from completed payments in cents
//! - `boxoffice_events_total{status}` - Event transitions by resulting status
//! - `boxoffice_sweeps_total` - Sweeper passes
//! - `boxoffice_notifications_dropped_total` - Notifications lost to a full or closed outbox
//! - `boxoffice_reconciled_payments_total` - Completed payments whose target was re-driven
//!
//! ## Gauges
//! - `boxoffice_active_holds` - Pending reservations
//! - `boxoffice_capacity_available{event_id}` - Available capacity per event
//!
//! ## Histograms
//! - `boxoffice_sweep_duration_seconds` - Time taken by one sweeper pass

use boxoffice_core::event::Event;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics recorder.
///
/// Holds the handle used to render the scrape payload.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server for `addr`.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Registers metric descriptions and installs the Prometheus recorder.
    ///
    /// An already installed recorder is tolerated with a warning.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                register_metrics();
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder was not installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        "boxoffice_reservations_total",
        "Reservation transitions by resulting status (pending, confirmed, cancelled, expired)"
    );
    describe_gauge!("boxoffice_active_holds", "Reservations currently Pending");
    describe_gauge!(
        "boxoffice_capacity_available",
        "Available capacity per event"
    );
    describe_counter!(
        "boxoffice_payments_total",
        "Payment transitions by resulting status (pending, completed, failed, refunded)"
    );
    describe_counter!(
        "boxoffice_payment_revenue_cents_total",
        "Revenue from completed payments in cents"
    );
    describe_counter!("boxoffice_events_total", "Event transitions by resulting status");
    describe_counter!("boxoffice_sweeps_total", "Expiration sweeper passes");
    describe_histogram!(
        "boxoffice_sweep_duration_seconds",
        "Time taken by one expiration sweeper pass"
    );
    describe_counter!(
        "boxoffice_notifications_dropped_total",
        "Notifications dropped because the outbox was full or closed"
    );
    describe_counter!(
        "boxoffice_reconciled_payments_total",
        "Completed payments whose target transition was re-driven"
    );
}

/// Record a reservation reaching `status`.
pub fn record_reservation(status: &'static str) {
    metrics::counter!("boxoffice_reservations_total", "status" => status).increment(1);
    match status {
        "pending" => metrics::gauge!("boxoffice_active_holds").increment(1.0),
        _ => metrics::gauge!("boxoffice_active_holds").decrement(1.0),
    }
}

/// Set the active-holds gauge after recovery.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_holds(count: usize) {
    metrics::gauge!("boxoffice_active_holds").set(count as f64);
}

/// Record a payment reaching `status`; completed payments add to revenue.
pub fn record_payment(status: &'static str, amount_cents: u64) {
    metrics::counter!("boxoffice_payments_total", "status" => status).increment(1);
    if status == "completed" {
        metrics::counter!("boxoffice_payment_revenue_cents_total").increment(amount_cents);
    }
}

/// Record an event reaching `status`.
pub fn record_event(status: &'static str) {
    metrics::counter!("boxoffice_events_total", "status" => status).increment(1);
}

/// Update the available-capacity gauge of `event`.
pub fn update_capacity(event: &Event) {
    metrics::gauge!("boxoffice_capacity_available", "event_id" => event.id.to_string())
        .set(f64::from(event.available_capacity));
}

/// Record one sweeper pass.
pub fn record_sweep(duration_secs: f64) {
    metrics::counter!("boxoffice_sweeps_total").increment(1);
    metrics::histogram!("boxoffice_sweep_duration_seconds").record(duration_secs);
}

/// Record a dropped notification.
pub fn record_notification_dropped() {
    metrics::counter!("boxoffice_notifications_dropped_total").increment(1);
}

/// Record re-driven payments.
pub fn record_reconciled(count: u64) {
    metrics::counter!("boxoffice_reconciled_payments_total").increment(count);
}
