// src/observability/mod.rs
//! Tracing and metrics installation
//!
//! Metric names recorded by the runtime:
//!
//! - `cvm_requests_total{mode}`: requests dispatched onto component executors
//! - `cvm_task_failures_total`: failed asynchronous or scheduled tasks
//! - `cvm_scheduled_firings_total`: delayed/periodic task firings
//! - `cvm_connections_total`: outbound connections established
//! - `cvm_tool_parked_total{tool}`: callers parked by a synchronization tool
//! - `cvm_components`: components currently deployed

use crate::utils::config::{LoggingConfig, MetricsConfig};
use crate::utils::errors::{CvmError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| CvmError::Config(format!("Invalid log filter: {}", e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| CvmError::Config(format!("Failed to install subscriber: {}", e)))
}

/// Install the Prometheus exporter when an address is configured
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    let Some(addr) = config.prometheus_addr else {
        return Ok(());
    };

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| CvmError::Config(format!("Failed to install metrics exporter: {}", e)))?;

    info!("Prometheus metrics exposed on {}", addr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_disabled_without_address() {
        assert!(init_metrics(&MetricsConfig::default()).is_ok());
    }
}
