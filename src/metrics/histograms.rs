//! Histogram metrics

use super::labels;
use metrics::histogram;

pub const OPERATION_DURATION_MS: &str = "clickhouse_plugin_operation_duration_ms";
pub const CONNECT_DURATION_MS: &str = "clickhouse_plugin_connect_duration_ms";

/// Wall time of a plugin operation, including lock wait
pub fn operation_duration(operation: &'static str, duration_ms: u64) {
    histogram!(OPERATION_DURATION_MS, labels::OPERATION => operation).record(duration_ms as f64);
}

/// Time to open and authenticate a native session
pub fn connect_duration(duration_ms: u64) {
    histogram!(CONNECT_DURATION_MS).record(duration_ms as f64);
}
