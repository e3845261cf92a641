//! `CallMetrics` backed by the `metrics` facade. Nothing is exported unless a
//! recorder (e.g. the Prometheus exporter) is installed by the binary.

use converge_core::{CallMetrics, OpCategory, RemoteError};
use metrics::counter;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct PromMetrics;

impl CallMetrics for PromMetrics {
    fn record(&self, category: OpCategory, name: &'static str, error: Option<&RemoteError>) {
        counter!("converge_api_calls_total", 1u64, "op_type" => category.as_str(), "op_id" => name);
        if let Some(e) = error {
            counter!("converge_api_call_errors_total", 1u64, "op_type" => category.as_str(), "op_id" => name);
            debug!(op_type = category.as_str(), op_id = name, error = %e, "remote call failed");
        }
    }
}
