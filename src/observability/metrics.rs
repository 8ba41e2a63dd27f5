//! Prometheus metrics for archive purging.
//!
//! Recording is a no-op unless the `prometheus` feature is compiled in and a
//! recorder has been installed with [`init_metrics`].

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};

use crate::config::MetricsConfig;

/// Install the Prometheus recorder and its scrape endpoint, if configured.
///
/// Must be called from within a Tokio runtime.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    let Some(prometheus) = config.prometheus.as_ref().filter(|p| p.enabled) else {
        return Ok(());
    };

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(prometheus.listen)
        .install()
        .map_err(MetricsError::Install)?;

    tracing::info!(listen = %prometheus.listen, "Prometheus metrics endpoint started");
    Ok(())
}

/// Without the `prometheus` feature only an unconfigured exporter is accepted.
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    match &config.prometheus {
        Some(prometheus) if prometheus.enabled => Err(MetricsError::Setup(
            "observability.metrics.prometheus requires the 'prometheus' feature".into(),
        )),
        _ => Ok(()),
    }
}

/// Record rows deleted from trimmed archive tables.
///
/// # Arguments
/// * `kind` - `numeric` or `blob`
/// * `rows` - Rows removed from one table
pub fn record_archive_rows_deleted(kind: &str, rows: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "archive_purge_rows_deleted_total",
            "kind" => kind.to_string()
        )
        .increment(rows);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (kind, rows);
    }
}

/// Record archive tables dropped outright.
pub fn record_archive_tables_dropped(kind: &str, tables: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "archive_purge_tables_dropped_total",
            "kind" => kind.to_string()
        )
        .increment(tables);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (kind, tables);
    }
}

/// Record one scheduled purge run.
///
/// # Arguments
/// * `outcome` - `success`, `dry_run`, `cancelled` or `error`
/// * `duration_secs` - Wall time of the run
pub fn record_purge_run(outcome: &str, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "archive_purge_runs_total",
            "outcome" => outcome.to_string()
        )
        .increment(1);
        histogram!("archive_purge_run_duration_seconds").record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (outcome, duration_secs);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install Prometheus recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
