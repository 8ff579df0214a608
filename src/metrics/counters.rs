//! Counter metrics

use super::labels;
use metrics::counter;

pub const OPERATIONS_TOTAL: &str = "clickhouse_plugin_operations_total";
pub const STATEMENTS_EXECUTED_TOTAL: &str = "clickhouse_plugin_statements_executed_total";
pub const CONNECTIONS_OPENED_TOTAL: &str = "clickhouse_plugin_connections_opened_total";
pub const CONNECTION_RECREATED_TOTAL: &str = "clickhouse_plugin_connection_recreated_total";
pub const ERRORS_TOTAL: &str = "clickhouse_plugin_errors_total";

/// Record a finished plugin operation
pub fn operation_completed(operation: &'static str, success: bool) {
    let outcome = if success {
        labels::OUTCOME_SUCCESS
    } else {
        labels::OUTCOME_ERROR
    };
    counter!(
        OPERATIONS_TOTAL,
        labels::OPERATION => operation,
        labels::OUTCOME => outcome
    )
    .increment(1);
}

/// Record one statement sent to the server
pub fn statement_executed() {
    counter!(STATEMENTS_EXECUTED_TOTAL).increment(1);
}

/// Record a new native session
pub fn connection_opened() {
    counter!(CONNECTIONS_OPENED_TOTAL).increment(1);
}

/// Record a handle replaced after a failed liveness probe
pub fn connection_recreated() {
    counter!(CONNECTION_RECREATED_TOTAL).increment(1);
}

/// Record an error by category
pub fn error(category: &'static str) {
    counter!(ERRORS_TOTAL, labels::CATEGORY => category).increment(1);
}
