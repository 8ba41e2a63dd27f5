use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Serialize, Serializer, ser::SerializeMap};
use tokio_util::sync::CancellationToken;

use super::{
    PurgeError, RetentionPolicy,
    batch::BatchRunner,
    cutoff::{purge_cutoff, should_period_be_purged},
    segments::SegmentArchiveIndex,
};
use crate::{
    archive::{ArchiveKind, ArchiveTableRef, YearMonth, classify_archive_table},
    db::{ArchiveStore, ID_COLUMN, query::Predicate},
    observability::metrics,
};

/// Legacy estimate value meaning "the whole table will be dropped".
pub const DROP_TABLE: i64 = -1;

/// Most segment archive ids bound into one statement. SQLite caps a
/// statement at 32766 placeholders and PostgreSQL at 65535.
const SEGMENT_IDS_PER_STATEMENT: usize = 10_000;

/// Rows to delete from one table.
#[derive(Debug, Clone, PartialEq)]
pub enum RowSelection {
    All,
    /// Rows matching any of the filters. The filters never overlap, so their
    /// counts add up to the rows deleted.
    AnyOf(Vec<Predicate>),
}

impl RowSelection {
    fn filters(&self) -> Vec<Option<&Predicate>> {
        match self {
            RowSelection::All => vec![None],
            RowSelection::AnyOf(filters) => filters.iter().map(Some).collect(),
        }
    }
}

/// What a purge does to one old archive table.
#[derive(Debug, Clone, PartialEq)]
pub enum PurgeClassification {
    DropEntireTable,
    DeleteMatching(RowSelection),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TablePlan {
    pub table: ArchiveTableRef,
    pub action: PurgeClassification,
}

/// Classification of every purgeable table. Blob tables come first.
#[derive(Debug, Clone, PartialEq)]
pub struct PurgePlan {
    pub cutoff: YearMonth,
    pub blob: Vec<TablePlan>,
    pub numeric: Vec<TablePlan>,
}

impl PurgePlan {
    pub fn iter(&self) -> impl Iterator<Item = &TablePlan> {
        self.blob.iter().chain(self.numeric.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.blob.is_empty() && self.numeric.is_empty()
    }
}

/// Estimated effect of a purge on one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimatedPurge {
    DropTable,
    Rows(u64),
}

impl EstimatedPurge {
    /// Row count, or [`DROP_TABLE`] for a dropped table.
    pub fn as_legacy_value(&self) -> i64 {
        match self {
            EstimatedPurge::DropTable => DROP_TABLE,
            EstimatedPurge::Rows(rows) => i64::try_from(*rows).unwrap_or(i64::MAX),
        }
    }
}

impl Serialize for EstimatedPurge {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_legacy_value())
    }
}

/// Per-table estimate, in processing order. Tables with nothing to delete
/// are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeEstimate {
    entries: Vec<(String, EstimatedPurge)>,
}

impl PurgeEstimate {
    pub fn get(&self, table: &str) -> Option<EstimatedPurge> {
        self.entries
            .iter()
            .find(|(name, _)| name == table)
            .map(|(_, estimate)| *estimate)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, EstimatedPurge)> {
        self.entries.iter().map(|(name, e)| (name.as_str(), *e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tables_to_drop(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, e)| *e == EstimatedPurge::DropTable)
            .map(|(name, _)| name)
            .collect()
    }

    /// Rows removed by deletes; dropped tables are not counted.
    pub fn total_rows(&self) -> u64 {
        self.iter()
            .filter_map(|(_, e)| match e {
                EstimatedPurge::Rows(rows) => Some(rows),
                EstimatedPurge::DropTable => None,
            })
            .sum()
    }
}

impl Serialize for PurgeEstimate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, estimate) in &self.entries {
            map.serialize_entry(name, estimate)?;
        }
        map.end()
    }
}

/// Outcome of a purge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub tables_dropped: Vec<String>,
    /// Tables that had rows deleted, with the row count.
    pub rows_deleted: Vec<(String, u64)>,
    pub tables_optimized: Vec<String>,
}

impl PurgeReport {
    pub fn total_rows_deleted(&self) -> u64 {
        self.rows_deleted.iter().map(|(_, rows)| rows).sum()
    }

    pub fn has_changes(&self) -> bool {
        !self.tables_dropped.is_empty() || !self.rows_deleted.is_empty()
    }
}

/// Deletes archived reports older than the retention window.
///
/// Each `purge`/`estimate` call works from a fresh view of the installed
/// tables; nothing is cached between calls.
pub struct ReportsPurger {
    store: Arc<dyn ArchiveStore>,
    policy: RetentionPolicy,
    today: Option<NaiveDate>,
    cancel: CancellationToken,
}

impl ReportsPurger {
    pub fn new(store: Arc<dyn ArchiveStore>, policy: RetentionPolicy) -> Self {
        Self {
            store,
            policy,
            today: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Pin the date the retention window is measured from.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// Stop between batches once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    pub fn cutoff(&self) -> YearMonth {
        let today = self.today.unwrap_or_else(|| Utc::now().date_naive());
        purge_cutoff(today, self.policy.older_than_months)
    }

    /// Classifies every purgeable table without modifying anything.
    pub async fn plan(&self) -> Result<PurgePlan, PurgeError> {
        PurgeRun::new(self).plan().await
    }

    /// Drops or trims every purgeable table. With `optimize`, tables that had
    /// rows deleted are optimized afterwards.
    pub async fn purge(&self, optimize: bool) -> Result<PurgeReport, PurgeError> {
        let run = PurgeRun::new(self);
        let plan = run.plan().await?;
        let mut report = PurgeReport::default();

        for (kind, tables) in [
            (ArchiveKind::Blob, &plan.blob),
            (ArchiveKind::Numeric, &plan.numeric),
        ] {
            let to_drop: Vec<String> = tables
                .iter()
                .filter(|t| t.action == PurgeClassification::DropEntireTable)
                .map(|t| t.table.table_name.clone())
                .collect();
            if !to_drop.is_empty() {
                run.check_cancelled()?;
                self.store.drop_tables(&to_drop).await?;
                tracing::info!(kind = %kind, tables = ?to_drop, "Dropped archive tables");
                metrics::record_archive_tables_dropped(kind.as_str(), to_drop.len() as u64);
                report.tables_dropped.extend(to_drop);
            }

            let mut to_optimize = Vec::new();
            for table in tables {
                let PurgeClassification::DeleteMatching(selection) = &table.action else {
                    continue;
                };
                let name = &table.table.table_name;
                let mut deleted = 0;
                for filter in selection.filters() {
                    deleted += run
                        .runner
                        .delete_all(name, filter, self.policy.max_rows_per_delete)
                        .await?;
                }
                tracing::debug!(table = %name, deleted, "Purged archive rows");
                if deleted > 0 {
                    metrics::record_archive_rows_deleted(kind.as_str(), deleted);
                    report.rows_deleted.push((name.clone(), deleted));
                    to_optimize.push(name.clone());
                }
            }

            if optimize && !to_optimize.is_empty() {
                run.check_cancelled()?;
                self.store.optimize_tables(&to_optimize).await?;
                tracing::debug!(kind = %kind, tables = ?to_optimize, "Optimized archive tables");
                report.tables_optimized.extend(to_optimize);
            }
        }

        tracing::info!(
            cutoff = %plan.cutoff,
            tables_dropped = report.tables_dropped.len(),
            rows_deleted = report.total_rows_deleted(),
            "Archive purge complete"
        );
        Ok(report)
    }

    /// What [`ReportsPurger::purge`] would do, computed read-only.
    pub async fn estimate(&self) -> Result<PurgeEstimate, PurgeError> {
        let run = PurgeRun::new(self);
        let plan = run.plan().await?;
        let mut estimate = PurgeEstimate::default();

        for table in plan.iter() {
            let name = &table.table.table_name;
            match &table.action {
                PurgeClassification::DropEntireTable => {
                    estimate.entries.push((name.clone(), EstimatedPurge::DropTable));
                }
                PurgeClassification::DeleteMatching(selection) => {
                    let mut rows = 0;
                    for filter in selection.filters() {
                        rows += run.runner.count(name, filter).await?;
                    }
                    if rows > 0 {
                        estimate.entries.push((name.clone(), EstimatedPurge::Rows(rows)));
                    }
                }
            }
        }
        Ok(estimate)
    }
}

/// State of one purge or estimate call.
struct PurgeRun<'a> {
    purger: &'a ReportsPurger,
    runner: BatchRunner<'a>,
}

impl<'a> PurgeRun<'a> {
    fn new(purger: &'a ReportsPurger) -> Self {
        Self {
            purger,
            runner: BatchRunner::new(
                purger.store.as_ref(),
                purger.policy.select_batch_size,
                &purger.cancel,
            ),
        }
    }

    fn check_cancelled(&self) -> Result<(), PurgeError> {
        if self.purger.cancel.is_cancelled() {
            Err(PurgeError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Old archive tables, split by kind, in catalog order.
    async fn old_tables(
        &self,
        cutoff: YearMonth,
    ) -> Result<(Vec<ArchiveTableRef>, Vec<ArchiveTableRef>), PurgeError> {
        let mut blob = Vec::new();
        let mut numeric = Vec::new();
        for name in self.purger.store.list_tables().await? {
            let Some(table) = classify_archive_table(&name) else {
                continue;
            };
            if !should_period_be_purged(table.year_month.year, table.year_month.month, cutoff) {
                continue;
            }
            match table.kind {
                ArchiveKind::Blob => blob.push(table),
                ArchiveKind::Numeric => numeric.push(table),
            }
        }
        Ok((blob, numeric))
    }

    async fn plan(&self) -> Result<PurgePlan, PurgeError> {
        let policy = &self.purger.policy;
        policy.validate()?;
        self.check_cancelled()?;
        let cutoff = self.purger.cutoff();
        let (old_blob, old_numeric) = self.old_tables(cutoff).await?;

        tracing::info!(
            cutoff = %cutoff,
            blob_tables = old_blob.len(),
            numeric_tables = old_numeric.len(),
            "Planning archive purge"
        );

        let mut segments: Option<SegmentArchiveIndex> = None;
        let mut blob = Vec::with_capacity(old_blob.len());
        for table in old_blob {
            let action = if policy.drops_blob_tables() {
                PurgeClassification::DropEntireTable
            } else {
                if !policy.keep_segment_reports && segments.is_none() {
                    // Markers live in numeric tables, which may be dropped
                    // later in the same purge; read them all up front.
                    segments =
                        Some(SegmentArchiveIndex::discover(&self.runner, &old_numeric).await?);
                }
                PurgeClassification::DeleteMatching(blob_selection(
                    policy,
                    segments.as_ref(),
                    table.year_month,
                ))
            };
            blob.push(TablePlan { table, action });
        }

        let numeric = old_numeric
            .into_iter()
            .map(|table| {
                let action = if policy.drops_numeric_tables() {
                    PurgeClassification::DropEntireTable
                } else {
                    PurgeClassification::DeleteMatching(RowSelection::AnyOf(vec![
                        numeric_filter(policy),
                    ]))
                };
                TablePlan { table, action }
            })
            .collect();

        Ok(PurgePlan {
            cutoff,
            blob,
            numeric,
        })
    }
}

/// Blob rows to delete: reports of periods not kept, plus (unless segment
/// reports are kept) every report of a segment archive.
///
/// Segment ids are split into bounded chunks. Chunks only match kept
/// periods, since the first filter already covers the others.
fn blob_selection(
    policy: &RetentionPolicy,
    segments: Option<&SegmentArchiveIndex>,
    year_month: YearMonth,
) -> RowSelection {
    let kept = policy.period_codes_to_keep();
    let mut filters = Vec::new();
    if !kept.is_empty() {
        filters.push(Predicate::not_in("period", kept.iter().copied()));
    }
    if let Some(segments) = segments {
        if segments.contains_month(year_month) {
            let ids: Vec<i64> = segments.archive_ids(year_month).collect();
            for chunk in ids.chunks(SEGMENT_IDS_PER_STATEMENT) {
                let in_chunk = Predicate::is_in(ID_COLUMN, chunk.iter().copied());
                filters.push(if kept.is_empty() {
                    in_chunk
                } else {
                    Predicate::is_in("period", kept.iter().copied()).and(in_chunk)
                });
            }
        } else {
            tracing::debug!(month = %year_month, "No segment archives for month");
        }
    }
    if filters.is_empty() {
        RowSelection::All
    } else {
        RowSelection::AnyOf(filters)
    }
}

/// Numeric rows to delete: everything except kept metrics and `done*`
/// completion markers.
fn numeric_filter(policy: &RetentionPolicy) -> Predicate {
    Predicate::not_in("name", policy.metrics_to_keep.iter().map(String::as_str))
        .and(Predicate::not_like("name", "done%"))
}
