//! Prometheus metrics for the retention service.
//!
//! Provides metrics for:
//! - Messages and objects deleted
//! - Purge run outcomes and duration
//! - Per-unit and notification failures
//! - Scheduler ticks skipped because a run was in flight

#[cfg(feature = "prometheus")]
use std::sync::OnceLock;

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;

/// Global Prometheus handle, set once the recorder is installed.
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the metrics system with the given configuration.
///
/// With `prometheus_listen` set, an HTTP scrape listener is started on that
/// address; this must be called from within a Tokio runtime.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let mut builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            &config.run_duration_buckets_secs,
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?;

    match &config.prometheus_listen {
        Some(listen) => {
            let addr: std::net::SocketAddr = listen
                .parse()
                .map_err(|e| MetricsError::Setup(format!("invalid listen address {listen}: {e}")))?;
            builder = builder.with_http_listener(addr);
            builder
                .install()
                .map_err(|e| MetricsError::Install(e.to_string()))?;
            tracing::info!(listen = %addr, "Prometheus metrics listener started");
        }
        None => {
            let handle = builder
                .install_recorder()
                .map_err(|e| MetricsError::Install(e.to_string()))?;
            PROMETHEUS_HANDLE
                .set(handle)
                .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;
        }
    }

    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    Ok(())
}

/// Render the current metrics in Prometheus text format, if a recorder
/// without a listener was installed.
#[cfg(feature = "prometheus")]
pub fn render() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record deletions made by a purge run.
///
/// `kind` is `"messages"` or `"objects:<category>"`.
pub fn record_retention_deletion(kind: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("retention_deletions_total", "kind" => kind.to_string()).increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (kind, count);
    }
}

/// Record a finished purge run.
pub fn record_retention_run(status: &str, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("retention_runs_total", "status" => status.to_string()).increment(1);
        histogram!("retention_run_duration_seconds", "status" => status.to_string())
            .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (status, duration_secs);
    }
}

/// Record a conversation or category that failed within a run.
pub fn record_unit_failure(kind: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("retention_unit_failures_total", "kind" => kind.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = kind;
    }
}

/// Record a notification that could not be dispatched.
pub fn record_notification_failure(event: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("retention_notification_failures_total", "event" => event.to_string())
            .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = event;
    }
}

/// Record a scheduler tick skipped because a run was still active.
pub fn record_skipped_tick() {
    #[cfg(feature = "prometheus")]
    {
        counter!("retention_skipped_ticks_total").increment(1);
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[error("Failed to install metrics recorder: {0}")]
    Install(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_retention_deletion("messages", 10);
        record_retention_run("completed", 1.5);
        record_unit_failure("conversation");
        record_notification_failure("delete_msgs");
        record_skipped_tick();
    }

    #[test]
    fn test_disabled_metrics_init() {
        let config = MetricsConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(init_metrics(&config).is_ok());
    }

    #[cfg(feature = "prometheus")]
    #[test]
    fn test_invalid_listen_address() {
        let config = MetricsConfig {
            prometheus_listen: Some("not-an-address".into()),
            ..Default::default()
        };
        let err = init_metrics(&config).unwrap_err();
        assert!(matches!(err, MetricsError::Setup(_)));
    }
}
