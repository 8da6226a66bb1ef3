//! Prometheus metrics for the gridlink client.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, a programming error that should crash at
//! first use rather than silently drop observations.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_int_counter, register_int_gauge, CounterVec, Encoder,
    IntCounter, IntGauge, TextEncoder,
};

use crate::error::{TelemetryError, TelemetryResult};

/// Inbound messages decoded by the dispatcher.
/// Labels: kind (market/finish/selection/...)
pub static MESSAGES_RECEIVED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "gridlink_messages_received_total",
        "Inbound pub/sub messages decoded by the dispatcher",
        &["kind"]
    )
    .unwrap()
});

/// Inbound messages dropped at the dispatch boundary.
/// Labels: reason (malformed/unrecognized/foreign_aggregator/not_allowed)
pub static MESSAGES_DROPPED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "gridlink_messages_dropped_total",
        "Inbound messages dropped without processing",
        &["reason"]
    )
    .unwrap()
});

/// Commands published. Labels: command (CREATE/DELETE/BATCHED/SELECT/UNSELECT)
pub static COMMANDS_PUBLISHED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "gridlink_commands_published_total",
        "Commands published to the simulation",
        &["command"]
    )
    .unwrap()
});

/// Transactions completed by a matching response.
pub static TRANSACTIONS_COMPLETED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "gridlink_transactions_completed_total",
        "Transactions completed by a matching response"
    )
    .unwrap()
});

/// Blocking waits that timed out. Labels: command
pub static TRANSACTIONS_TIMED_OUT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "gridlink_transactions_timed_out_total",
        "Blocking waits that expired before a response arrived",
        &["command"]
    )
    .unwrap()
});

/// Fire-and-forget transactions swept without a response.
pub static TRANSACTIONS_EXPIRED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "gridlink_transactions_expired_total",
        "Unanswered fire-and-forget transactions removed by the sweep"
    )
    .unwrap()
});

/// Transactions currently awaiting a response (all sessions).
pub static OUTSTANDING_TRANSACTIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "gridlink_outstanding_transactions",
        "Transactions currently awaiting a response"
    )
    .unwrap()
});

/// Callback failures. Labels: callback, reason (error/panic)
pub static CALLBACKS_FAILED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "gridlink_callbacks_failed_total",
        "User callbacks that returned an error or panicked",
        &["callback", "reason"]
    )
    .unwrap()
});

/// Callback units dropped because the pool was shut down.
pub static CALLBACKS_DROPPED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "gridlink_callbacks_dropped_total",
        "Callback units dropped by pool shutdown"
    )
    .unwrap()
});

/// Metrics helper.
pub struct Metrics;

impl Metrics {
    /// Record a decoded inbound message.
    pub fn message_received(kind: &str) {
        MESSAGES_RECEIVED_TOTAL.with_label_values(&[kind]).inc();
    }

    /// Record a dropped inbound message.
    pub fn message_dropped(reason: &str) {
        MESSAGES_DROPPED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn command_published(command: &str) {
        COMMANDS_PUBLISHED_TOTAL.with_label_values(&[command]).inc();
    }

    pub fn transaction_started() {
        OUTSTANDING_TRANSACTIONS.inc();
    }

    /// Record a transaction leaving the outstanding set for any reason.
    pub fn transaction_finished() {
        OUTSTANDING_TRANSACTIONS.dec();
    }

    pub fn transaction_completed() {
        TRANSACTIONS_COMPLETED_TOTAL.inc();
    }

    pub fn transaction_timed_out(command: &str) {
        TRANSACTIONS_TIMED_OUT_TOTAL
            .with_label_values(&[command])
            .inc();
    }

    pub fn transactions_expired(count: usize) {
        TRANSACTIONS_EXPIRED_TOTAL.inc_by(count as u64);
    }

    pub fn callback_failed(callback: &str, reason: &str) {
        CALLBACKS_FAILED_TOTAL
            .with_label_values(&[callback, reason])
            .inc();
    }

    pub fn callbacks_dropped(count: usize) {
        CALLBACKS_DROPPED_TOTAL.inc_by(count as u64);
    }

    /// Render all registered metrics in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment() {
        let before = MESSAGES_DROPPED_TOTAL
            .with_label_values(&["malformed"])
            .get();
        Metrics::message_dropped("malformed");
        let after = MESSAGES_DROPPED_TOTAL
            .with_label_values(&["malformed"])
            .get();
        assert!(after >= before + 1.0);
    }

    #[test]
    fn test_render_contains_registered_metric() {
        Metrics::command_published("CREATE");
        let text = Metrics::render().unwrap();
        assert!(text.contains("gridlink_commands_published_total"));
    }
}
