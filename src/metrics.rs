// src/metrics.rs

#[cfg(feature = "observability")]
pub use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

// NOTE: When observability feature is disabled, provide stub implementations
#[cfg(not(feature = "observability"))]
pub enum Unit {}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {{
        let _ = &$value;
        $(let _ = &$label_value;)*
    }};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! gauge {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {{
        let _ = &$value;
        $(let _ = &$label_value;)*
    }};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! histogram {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {{
        let _ = &$value;
        $(let _ = &$label_value;)*
    }};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_counter {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_gauge {
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_histogram {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
use crate::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Initializes the descriptions for all the metrics in the SDK.
/// This should be called once at startup.
pub fn describe_metrics() {
    // Endpoint routing
    describe_counter!(
        "rpc_endpoint_selected_total",
        Unit::Count,
        "Endpoint selections, labeled by endpoint url."
    );
    describe_counter!(
        "rpc_endpoint_selection_misses_total",
        Unit::Count,
        "Selection attempts whose random draw landed outside every band."
    );
    describe_counter!(
        "rpc_endpoint_selection_timeouts_total",
        Unit::Count,
        "Selections that gave up after the configured timeout."
    );
    describe_counter!(
        "rpc_endpoint_requests_total",
        Unit::Count,
        "Requests sent through a tracked transport, labeled by endpoint and result."
    );
    describe_gauge!(
        "rpc_endpoint_success_rate",
        "Rolling success rate per endpoint in basis points (0-10000)."
    );
    describe_histogram!(
        "rpc_endpoint_request_latency_ms",
        "Latency of requests sent through a tracked transport in milliseconds."
    );

    // Source aggregation
    describe_gauge!(
        "source_available_count",
        "Indexing sources that passed the most recent health probe."
    );
    describe_counter!(
        "source_failures_total",
        Unit::Count,
        "Per-source failures, labeled by phase (probe/query) and kind."
    );
    describe_counter!(
        "source_records_total",
        Unit::Count,
        "Order records returned by indexing sources, labeled by source."
    );

    // Order state
    describe_gauge!("order_state_known_orders", "Order profiles known to the store.");
    describe_gauge!("order_state_active_orders", "Order profiles currently active.");
    describe_counter!(
        "order_state_events_applied_total",
        Unit::Count,
        "Add/remove events folded into the order store, labeled by kind."
    );
}

// --- Helper functions to update metrics ---

pub fn increment_endpoint_selected(url: &str) {
    counter!("rpc_endpoint_selected_total", 1, "endpoint" => url.to_string());
}

pub fn increment_endpoint_selection_miss() {
    counter!("rpc_endpoint_selection_misses_total", 1);
}

pub fn increment_endpoint_selection_timeout() {
    counter!("rpc_endpoint_selection_timeouts_total", 1);
}

pub fn record_endpoint_request(url: &str, success: bool, duration: std::time::Duration) {
    let result = if success { "success" } else { "failure" };
    counter!("rpc_endpoint_requests_total", 1,
             "endpoint" => url.to_string(),
             "result" => result);
    histogram!("rpc_endpoint_request_latency_ms", duration.as_millis() as f64,
               "endpoint" => url.to_string());
}

pub fn set_endpoint_success_rate(url: &str, rate: u64) {
    gauge!("rpc_endpoint_success_rate", rate as f64, "endpoint" => url.to_string());
}

pub fn set_available_sources(count: usize) {
    gauge!("source_available_count", count as f64);
}

pub fn increment_source_failure(source: &str, phase: &'static str, kind: &'static str) {
    counter!("source_failures_total", 1,
             "source" => source.to_string(),
             "phase" => phase,
             "kind" => kind);
}

pub fn increment_source_records(source: &str, count: u64) {
    counter!("source_records_total", count, "source" => source.to_string());
}

pub fn set_order_counts(known: usize, active: usize) {
    gauge!("order_state_known_orders", known as f64);
    gauge!("order_state_active_orders", active as f64);
}

pub fn increment_events_applied(kind: &'static str, count: u64) {
    counter!("order_state_events_applied_total", count, "kind" => kind);
}
