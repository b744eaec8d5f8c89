//! Metrics for the gateway and the pipeline
//!
//! Each phase defines its metrics in a dedicated submodule. All names follow
//! `datalake_{phase}_{metric}` and counters end in `_total`.

pub mod gateway;
pub mod pipeline;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing::{info, warn};

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Idempotent.
pub fn init_metrics() {
    if HANDLE.get().is_some() {
        return;
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if HANDLE.set(handle).is_ok() {
                gateway::describe();
                pipeline::describe();
                info!("Prometheus recorder installed");
            }
        }
        Err(e) => {
            warn!("Failed to install Prometheus recorder: {}", e);
        }
    }
}

/// Render the current snapshot in Prometheus text format.
pub fn render() -> Option<String> {
    HANDLE.get().map(|h| h.render())
}

macro_rules! phase_metric {
    (counter, $phase:literal, $name:literal) => {
        concat!("datalake_", $phase, "_", $name, "_total")
    };
    (histogram, $phase:literal, $name:literal) => {
        concat!("datalake_", $phase, "_", $name)
    };
    (gauge, $phase:literal, $name:literal) => {
        concat!("datalake_", $phase, "_", $name)
    };
}

pub(crate) use phase_metric;

#[cfg(test)]
mod tests {
    #[test]
    fn metric_names_follow_convention() {
        assert_eq!(
            phase_metric!(counter, "gateway", "files_parsed"),
            "datalake_gateway_files_parsed_total"
        );
        assert_eq!(
            phase_metric!(histogram, "pipeline", "task_duration_seconds"),
            "datalake_pipeline_task_duration_seconds"
        );
    }
}
