//! Metrics for plugin operations and the native driver
//!
//! Recorded through the `metrics` facade; no exporter is installed here.
//! Hosts that want the numbers install a recorder (Prometheus, statsd, ...)
//! before constructing the plugin.

pub mod counters;
pub mod histograms;
pub mod labels;
