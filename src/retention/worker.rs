//! Scheduled archive purge worker.

use std::{sync::Arc, time::Instant};

use tokio_util::sync::CancellationToken;

use crate::{
    config::{PolicySource, RetentionConfig},
    db::{DbPool, OptionRepo},
    observability::metrics,
    purger::{PurgeError, PurgeEstimate, ReportsPurger, RetentionPolicy},
};

/// Results from a single purge run.
#[derive(Debug, Default)]
pub struct RetentionRunResult {
    /// Number of archive tables dropped.
    pub tables_dropped: u64,
    /// Number of archive rows deleted from trimmed tables.
    pub rows_deleted: u64,
    /// Number of tables optimized after trimming.
    pub tables_optimized: u64,
    /// In dry-run mode, what a purge would have done instead.
    pub estimate: Option<PurgeEstimate>,
}

impl RetentionRunResult {
    /// Tables dropped plus rows deleted.
    pub fn total(&self) -> u64 {
        self.tables_dropped + self.rows_deleted
    }

    /// Check if anything was removed.
    pub fn has_deletions(&self) -> bool {
        self.total() > 0
    }
}

/// Starts the purge worker loop.
///
/// Runs a purge every `interval_hours` until `cancel` fires. A cancelled run
/// stops between batches; what it already removed stays removed.
pub async fn start_purge_worker(
    db: Arc<DbPool>,
    config: RetentionConfig,
    cancel: CancellationToken,
) {
    if !config.enabled {
        tracing::info!("Purge worker disabled by configuration");
        return;
    }

    let dry_run_msg = if config.safety.dry_run {
        " (DRY RUN)"
    } else {
        ""
    };

    tracing::info!(
        interval_hours = config.interval_hours,
        source = ?config.source,
        dry_run = config.safety.dry_run,
        "Starting purge worker{}",
        dry_run_msg
    );

    let interval = config.interval();

    loop {
        let started = Instant::now();
        let outcome = run_purge(&db, &config, &cancel).await;
        let elapsed = started.elapsed().as_secs_f64();

        match outcome {
            Ok(result) => {
                if result.has_deletions() {
                    tracing::info!(
                        tables_dropped = result.tables_dropped,
                        rows_deleted = result.rows_deleted,
                        tables_optimized = result.tables_optimized,
                        "Purge run complete"
                    );
                } else if let Some(estimate) = &result.estimate {
                    tracing::info!(
                        tables = estimate.len(),
                        tables_to_drop = estimate.tables_to_drop().len(),
                        rows = estimate.total_rows(),
                        "DRY RUN: Purge run would remove archives"
                    );
                } else {
                    tracing::debug!("Purge run complete, no archives to delete");
                }
                let outcome = if result.estimate.is_some() { "dry_run" } else { "success" };
                metrics::record_purge_run(outcome, elapsed);
            }
            Err(PurgeError::Cancelled) => {
                metrics::record_purge_run("cancelled", elapsed);
                tracing::info!("Purge worker stopping");
                return;
            }
            Err(e) => {
                metrics::record_purge_run("error", elapsed);
                tracing::error!(error = %e, "Error running purge");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => {
                tracing::info!("Purge worker stopping");
                return;
            }
        }
    }
}

/// The policy for the next run, from the config file or the options table.
pub async fn resolve_policy(
    options: &dyn OptionRepo,
    config: &RetentionConfig,
) -> Result<RetentionPolicy, PurgeError> {
    match config.source {
        PolicySource::Config => Ok(config.to_policy()?),
        PolicySource::Options => {
            let names = RetentionPolicy::setting_names();
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            let settings = options.get_many(&names).await?;
            Ok(config.policy_from_settings(&settings)?)
        }
    }
}

/// Run a single purge pass (or estimate, in dry-run mode).
pub async fn run_purge(
    db: &DbPool,
    config: &RetentionConfig,
    cancel: &CancellationToken,
) -> Result<RetentionRunResult, PurgeError> {
    let policy = resolve_policy(db.options().as_ref(), config).await?;
    let purger = ReportsPurger::new(db.archives(), policy).with_cancellation(cancel.clone());

    if config.safety.dry_run {
        let estimate = purger.estimate().await?;
        for (table, estimate) in estimate.iter() {
            tracing::info!(
                table,
                estimate = estimate.as_legacy_value(),
                "DRY RUN: Would purge archive table"
            );
        }
        return Ok(RetentionRunResult {
            estimate: Some(estimate),
            ..Default::default()
        });
    }

    let report = purger.purge(config.safety.optimize_tables).await?;
    Ok(RetentionRunResult {
        tables_dropped: report.tables_dropped.len() as u64,
        rows_deleted: report.total_rows_deleted(),
        tables_optimized: report.tables_optimized.len() as u64,
        estimate: None,
    })
}
