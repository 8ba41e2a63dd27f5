//! End-to-end purge scenarios against real archive tables.
//!
//! Each scenario seeds three months (2012-12, 2013-01, 2013-02) and purges
//! with "today" pinned to 2013-08-15 and a six month window, so the first two
//! months are old and 2013-02 must never be touched.

use std::{collections::BTreeSet, sync::Arc};

use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::{
    archive::{ArchiveKind, ArchiveTableRef, Period, YearMonth},
    db::{ArchiveRow, ArchiveStore, ArchiveValue, query::Predicate},
};

const OLD_MONTHS: [(i32, u32); 2] = [(2012, 12), (2013, 1)];
const NEW_MONTH: (i32, u32) = (2013, 2);

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2013, 8, 15).unwrap()
}

fn blob(y: i32, m: u32) -> String {
    format!("archive_blob_{y:04}_{m:02}")
}

fn numeric(y: i32, m: u32) -> String {
    format!("archive_numeric_{y:04}_{m:02}")
}

fn row(idarchive: i64, name: &str, period: i64, value: ArchiveValue) -> ArchiveRow {
    let date = NaiveDate::from_ymd_opt(2013, 1, 1).unwrap();
    ArchiveRow {
        idarchive,
        name: name.to_string(),
        idsite: 1,
        date1: date,
        date2: date,
        period,
        value,
    }
}

/// Archive 1 is a plain day archive, archive 2 a segmented day archive and
/// archive 3 a plain week archive.
async fn seed(store: &dyn ArchiveStore) {
    for (y, m) in OLD_MONTHS.into_iter().chain([NEW_MONTH]) {
        let ym = YearMonth::new(y, m);
        let numeric_ref = ArchiveTableRef::new("", ArchiveKind::Numeric, ym);
        let blob_ref = ArchiveTableRef::new("", ArchiveKind::Blob, ym);
        store.create_archive_table(&numeric_ref).await.unwrap();
        store.create_archive_table(&blob_ref).await.unwrap();

        let n = |v: f64| ArchiveValue::Numeric(v);
        store
            .insert_rows(
                &numeric_ref.table_name,
                &[
                    row(1, "done", 1, n(1.0)),
                    row(1, "nb_visits", 1, n(10.0)),
                    row(1, "nb_actions", 1, n(25.0)),
                    row(1, "done.123", 1, n(1.0)),
                    row(2, "done5f4f9ae2b1.VisitsSummary", 1, n(1.0)),
                    row(2, "nb_visits", 1, n(4.0)),
                    row(2, "nb_actions", 1, n(6.0)),
                    row(3, "done", 2, n(1.0)),
                    row(3, "nb_visits", 2, n(70.0)),
                ],
            )
            .await
            .unwrap();

        let b = || ArchiveValue::Blob(b"a:0:{}".to_vec());
        store
            .insert_rows(
                &blob_ref.table_name,
                &[
                    row(1, "Actions_actions", 1, b()),
                    row(2, "Actions_actions", 1, b()),
                    row(3, "Actions_actions", 2, b()),
                    row(3, "Referrers_type", 2, b()),
                ],
            )
            .await
            .unwrap();
    }
}

fn policy(
    periods: &[Period],
    keep_segments: bool,
    keep_basic_metrics: bool,
    metrics: &[&str],
) -> RetentionPolicy {
    RetentionPolicy {
        older_than_months: 6,
        keep_basic_metrics,
        periods_to_keep: periods.iter().copied().collect(),
        keep_segment_reports: keep_segments,
        metrics_to_keep: metrics.iter().map(|m| m.to_string()).collect(),
        // Small limits so every scenario crosses batch and chunk boundaries.
        max_rows_per_delete: 2,
        select_batch_size: 2,
    }
}

/// Keep day reports (not segmented) and `nb_visits`.
fn trimming_policy() -> RetentionPolicy {
    policy(&[Period::Day], false, true, &["nb_visits"])
}

fn purger(store: &Arc<dyn ArchiveStore>, policy: RetentionPolicy) -> ReportsPurger {
    ReportsPurger::new(Arc::clone(store), policy).with_today(today())
}

async fn count(store: &dyn ArchiveStore, table: &str, filter: Option<&Predicate>) -> u64 {
    store.count_in_range(table, filter, 0..i64::MAX).await.unwrap()
}

async fn archive_ids(store: &dyn ArchiveStore, table: &str) -> Vec<i64> {
    store.fetch_ids_in_range(table, None, 0..i64::MAX).await.unwrap()
}

async fn assert_new_month_untouched(store: &dyn ArchiveStore) {
    let (y, m) = NEW_MONTH;
    assert_eq!(count(store, &numeric(y, m), None).await, 9);
    assert_eq!(count(store, &blob(y, m), None).await, 4);
}

// ============================================================================
// Scenarios
// ============================================================================

pub async fn test_estimate_lists_trimmed_tables(store: Arc<dyn ArchiveStore>) {
    seed(store.as_ref()).await;

    let estimate = purger(&store, trimming_policy()).estimate().await.unwrap();

    let entries: Vec<(&str, EstimatedPurge)> = estimate.iter().collect();
    assert_eq!(
        entries,
        vec![
            ("archive_blob_2012_12", EstimatedPurge::Rows(3)),
            ("archive_blob_2013_01", EstimatedPurge::Rows(3)),
            ("archive_numeric_2012_12", EstimatedPurge::Rows(2)),
            ("archive_numeric_2013_01", EstimatedPurge::Rows(2)),
        ]
    );
    assert_eq!(estimate.total_rows(), 10);
    // Estimating is read-only.
    assert_eq!(count(store.as_ref(), &blob(2013, 1), None).await, 4);
}

pub async fn test_purge_matches_estimate(store: Arc<dyn ArchiveStore>) {
    seed(store.as_ref()).await;
    let purger = purger(&store, trimming_policy());

    let estimate = purger.estimate().await.unwrap();
    let report = purger.purge(false).await.unwrap();

    assert!(report.tables_dropped.is_empty());
    assert!(report.tables_optimized.is_empty());
    let estimated: Vec<(String, u64)> = estimate
        .iter()
        .map(|(name, e)| match e {
            EstimatedPurge::Rows(rows) => (name.to_string(), rows),
            EstimatedPurge::DropTable => panic!("unexpected drop of {name}"),
        })
        .collect();
    assert_eq!(report.rows_deleted, estimated);
    assert_new_month_untouched(store.as_ref()).await;
}

pub async fn test_purge_is_idempotent(store: Arc<dyn ArchiveStore>) {
    seed(store.as_ref()).await;
    let purger = purger(&store, trimming_policy());

    assert!(purger.purge(false).await.unwrap().has_changes());
    let second = purger.purge(false).await.unwrap();

    assert!(!second.has_changes());
    assert!(purger.estimate().await.unwrap().is_empty());
}

pub async fn test_numeric_keeps_metrics_and_done_markers(store: Arc<dyn ArchiveStore>) {
    seed(store.as_ref()).await;
    purger(&store, trimming_policy()).purge(false).await.unwrap();

    for (y, m) in OLD_MONTHS {
        let table = numeric(y, m);
        let store = store.as_ref();
        assert_eq!(count(store, &table, None).await, 7);
        assert_eq!(
            count(store, &table, Some(&Predicate::like("name", "done%"))).await,
            4,
            "done, done.123 and segment markers survive"
        );
        assert_eq!(
            count(store, &table, Some(&Predicate::is_in("name", ["nb_visits"]))).await,
            3
        );
        assert_eq!(
            count(store, &table, Some(&Predicate::is_in("name", ["nb_actions"]))).await,
            0
        );
    }
}

pub async fn test_segment_reports_are_deleted(store: Arc<dyn ArchiveStore>) {
    seed(store.as_ref()).await;
    purger(&store, trimming_policy()).purge(false).await.unwrap();

    for (y, m) in OLD_MONTHS {
        assert_eq!(archive_ids(store.as_ref(), &blob(y, m)).await, vec![1]);
    }
    assert_new_month_untouched(store.as_ref()).await;
}

pub async fn test_keep_segment_reports(store: Arc<dyn ArchiveStore>) {
    seed(store.as_ref()).await;
    let purger = purger(&store, policy(&[Period::Day], true, true, &["nb_visits"]));

    let estimate = purger.estimate().await.unwrap();
    assert_eq!(estimate.get("archive_blob_2013_01"), Some(EstimatedPurge::Rows(2)));

    purger.purge(false).await.unwrap();
    for (y, m) in OLD_MONTHS {
        assert_eq!(archive_ids(store.as_ref(), &blob(y, m)).await, vec![1, 2]);
    }
}

pub async fn test_drop_when_nothing_is_kept(store: Arc<dyn ArchiveStore>) {
    seed(store.as_ref()).await;
    let purger = purger(&store, policy(&[], false, false, &["nb_visits"]));

    let estimate = purger.estimate().await.unwrap();
    assert_eq!(
        estimate.tables_to_drop(),
        vec![
            "archive_blob_2012_12",
            "archive_blob_2013_01",
            "archive_numeric_2012_12",
            "archive_numeric_2013_01",
        ]
    );
    assert!(estimate.iter().all(|(_, e)| e.as_legacy_value() == DROP_TABLE));

    let report = purger.purge(true).await.unwrap();
    assert_eq!(report.tables_dropped.len(), 4);
    assert!(report.rows_deleted.is_empty());
    assert!(report.tables_optimized.is_empty(), "dropped tables are never optimized");

    let remaining: BTreeSet<String> = store.list_tables().await.unwrap().into_iter().collect();
    for (y, m) in OLD_MONTHS {
        assert!(!remaining.contains(&blob(y, m)));
        assert!(!remaining.contains(&numeric(y, m)));
    }
    assert!(remaining.contains(&blob(2013, 2)));
    assert_new_month_untouched(store.as_ref()).await;
}

pub async fn test_keep_basic_metrics_without_metrics_drops_numeric(store: Arc<dyn ArchiveStore>) {
    seed(store.as_ref()).await;
    let purger = purger(&store, policy(&[Period::Day], false, true, &[]));

    let estimate = purger.estimate().await.unwrap();
    assert_eq!(
        estimate.tables_to_drop(),
        vec!["archive_numeric_2012_12", "archive_numeric_2013_01"]
    );
    // Segment ids are read before the numeric tables go away.
    let report = purger.purge(false).await.unwrap();
    assert_eq!(report.tables_dropped, estimate.tables_to_drop());
    for (y, m) in OLD_MONTHS {
        assert_eq!(archive_ids(store.as_ref(), &blob(y, m)).await, vec![1]);
    }
}

pub async fn test_keep_segments_without_periods_empties_blob(store: Arc<dyn ArchiveStore>) {
    seed(store.as_ref()).await;
    let purger = purger(&store, policy(&[], true, false, &[]));

    let estimate = purger.estimate().await.unwrap();
    assert_eq!(estimate.get("archive_blob_2012_12"), Some(EstimatedPurge::Rows(4)));
    assert_eq!(estimate.get("archive_numeric_2012_12"), Some(EstimatedPurge::DropTable));

    purger.purge(false).await.unwrap();
    let tables = store.list_tables().await.unwrap();
    for (y, m) in OLD_MONTHS {
        assert!(tables.contains(&blob(y, m)), "blob table is emptied, not dropped");
        assert_eq!(count(store.as_ref(), &blob(y, m), None).await, 0);
    }
}

pub async fn test_optimize_only_tables_with_deletions(store: Arc<dyn ArchiveStore>) {
    seed(store.as_ref()).await;
    // Both numeric metrics kept: numeric tables have nothing to delete.
    let purger = purger(&store, policy(&[Period::Day], false, true, &["nb_visits", "nb_actions"]));

    let report = purger.purge(true).await.unwrap();

    assert_eq!(
        report.tables_optimized,
        vec!["archive_blob_2012_12", "archive_blob_2013_01"]
    );
    assert_eq!(report.total_rows_deleted(), 6);
}

pub async fn test_cancelled_purge_changes_nothing(store: Arc<dyn ArchiveStore>) {
    seed(store.as_ref()).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    for policy in [trimming_policy(), policy(&[], false, false, &[])] {
        let purger = purger(&store, policy).with_cancellation(cancel.clone());
        assert!(matches!(purger.purge(false).await, Err(PurgeError::Cancelled)));
    }

    for (y, m) in OLD_MONTHS {
        assert_eq!(count(store.as_ref(), &blob(y, m), None).await, 4);
        assert_eq!(count(store.as_ref(), &numeric(y, m), None).await, 9);
    }
}

pub async fn test_unrecognized_tables_are_ignored(store: Arc<dyn ArchiveStore>) {
    seed(store.as_ref()).await;
    // Archive-like name with an impossible month.
    let bogus = ArchiveTableRef::new("", ArchiveKind::Blob, YearMonth::new(2012, 13));
    store.create_archive_table(&bogus).await.unwrap();

    let report = purger(&store, policy(&[], false, false, &[]))
        .purge(false)
        .await
        .unwrap();

    assert!(!report.tables_dropped.contains(&bogus.table_name));
    assert!(store.list_tables().await.unwrap().contains(&bogus.table_name));
}

pub async fn test_empty_catalog(store: Arc<dyn ArchiveStore>) {
    let purger = purger(&store, trimming_policy());

    assert!(purger.plan().await.unwrap().is_empty());
    assert!(purger.estimate().await.unwrap().is_empty());
    assert_eq!(purger.purge(true).await.unwrap(), PurgeReport::default());
}

pub async fn test_many_segment_archives(store: Arc<dyn ArchiveStore>) {
    // More segment archives than either backend accepts as bound parameters
    // in a single statement.
    const SEGMENT_ARCHIVES: i64 = 40_000;
    let ym = YearMonth::new(2013, 1);
    let numeric_ref = ArchiveTableRef::new("", ArchiveKind::Numeric, ym);
    let blob_ref = ArchiveTableRef::new("", ArchiveKind::Blob, ym);
    store.create_archive_table(&numeric_ref).await.unwrap();
    store.create_archive_table(&blob_ref).await.unwrap();

    let markers: Vec<ArchiveRow> = (1..=SEGMENT_ARCHIVES)
        .map(|id| row(id, "doneabc.VisitsSummary", 1, ArchiveValue::Numeric(1.0)))
        .collect();
    store.insert_rows(&numeric_ref.table_name, &markers).await.unwrap();

    let b = || ArchiveValue::Blob(b"a:0:{}".to_vec());
    let mut reports: Vec<ArchiveRow> = (1..=10)
        .map(|id| row(id * 4_000, "VisitsSummary_get", 1, b()))
        .collect();
    reports.push(row(SEGMENT_ARCHIVES + 1, "VisitsSummary_get", 1, b()));
    reports.push(row(SEGMENT_ARCHIVES + 2, "VisitsSummary_get", 2, b()));
    store.insert_rows(&blob_ref.table_name, &reports).await.unwrap();

    let policy = RetentionPolicy {
        max_rows_per_delete: 1_000,
        select_batch_size: DEFAULT_SELECT_BATCH_SIZE,
        ..trimming_policy()
    };
    let purger = purger(&store, policy);

    let estimate = purger.estimate().await.unwrap();
    assert_eq!(estimate.get(&blob_ref.table_name), Some(EstimatedPurge::Rows(11)));
    assert_eq!(estimate.get(&numeric_ref.table_name), None, "markers are kept");

    let report = purger.purge(false).await.unwrap();
    assert_eq!(report.rows_deleted, vec![(blob_ref.table_name.clone(), 11)]);
    assert_eq!(
        archive_ids(store.as_ref(), &blob_ref.table_name).await,
        vec![SEGMENT_ARCHIVES + 1]
    );
    assert_eq!(
        count(store.as_ref(), &numeric_ref.table_name, None).await,
        SEGMENT_ARCHIVES as u64
    );
}

pub async fn test_zero_row_limit_is_rejected(store: Arc<dyn ArchiveStore>) {
    seed(store.as_ref()).await;
    let policy = RetentionPolicy {
        max_rows_per_delete: 0,
        ..trimming_policy()
    };
    let purger = purger(&store, policy);

    let result = tokio::time::timeout(std::time::Duration::from_secs(10), purger.purge(false))
        .await
        .expect("purge must not spin on a zero row limit");
    match result {
        Err(PurgeError::Settings(SettingsError::InvalidValue { key, .. })) => {
            assert_eq!(key, keys::MAX_ROWS_PER_QUERY);
        }
        other => panic!("expected invalid setting, got {other:?}"),
    }

    for (y, m) in OLD_MONTHS {
        assert_eq!(count(store.as_ref(), &blob(y, m), None).await, 4);
        assert_eq!(count(store.as_ref(), &numeric(y, m), None).await, 9);
    }
}

// ============================================================================
// SQLite Tests
// ============================================================================

#[cfg(feature = "database-sqlite")]
mod sqlite_tests {
    use super::*;
    use crate::db::{
        sqlite::SqliteArchiveStore,
        tests::harness::{create_sqlite_pool, run_sqlite_migrations},
    };

    macro_rules! sqlite_test {
        ($name:ident) => {
            #[tokio::test]
            async fn $name() {
                let pool = create_sqlite_pool().await;
                run_sqlite_migrations(&pool).await;
                let store: Arc<dyn ArchiveStore> = Arc::new(SqliteArchiveStore::new(pool));
                super::$name(store).await;
            }
        };
    }

    sqlite_test!(test_estimate_lists_trimmed_tables);
    sqlite_test!(test_purge_matches_estimate);
    sqlite_test!(test_purge_is_idempotent);
    sqlite_test!(test_numeric_keeps_metrics_and_done_markers);
    sqlite_test!(test_segment_reports_are_deleted);
    sqlite_test!(test_keep_segment_reports);
    sqlite_test!(test_drop_when_nothing_is_kept);
    sqlite_test!(test_keep_basic_metrics_without_metrics_drops_numeric);
    sqlite_test!(test_keep_segments_without_periods_empties_blob);
    sqlite_test!(test_optimize_only_tables_with_deletions);
    sqlite_test!(test_cancelled_purge_changes_nothing);
    sqlite_test!(test_unrecognized_tables_are_ignored);
    sqlite_test!(test_empty_catalog);
    sqlite_test!(test_many_segment_archives);
    sqlite_test!(test_zero_row_limit_is_rejected);
}

// ============================================================================
// PostgreSQL Tests - Require Docker, run with `cargo test -- --ignored`
// ============================================================================

#[cfg(feature = "database-postgres")]
mod postgres_tests {
    use super::*;
    use crate::db::{
        postgres::PostgresArchiveStore,
        tests::harness::postgres::{create_isolated_postgres_pool, run_postgres_migrations},
    };

    macro_rules! postgres_test {
        ($name:ident) => {
            #[tokio::test]
            #[ignore = "Requires Docker - run with `cargo test -- --ignored`"]
            async fn $name() {
                let pool = create_isolated_postgres_pool().await;
                run_postgres_migrations(&pool).await;
                let store: Arc<dyn ArchiveStore> = Arc::new(PostgresArchiveStore::new(pool));
                super::$name(store).await;
            }
        };
    }

    postgres_test!(test_estimate_lists_trimmed_tables);
    postgres_test!(test_purge_matches_estimate);
    postgres_test!(test_purge_is_idempotent);
    postgres_test!(test_numeric_keeps_metrics_and_done_markers);
    postgres_test!(test_segment_reports_are_deleted);
    postgres_test!(test_keep_segment_reports);
    postgres_test!(test_drop_when_nothing_is_kept);
    postgres_test!(test_keep_basic_metrics_without_metrics_drops_numeric);
    postgres_test!(test_keep_segments_without_periods_empties_blob);
    postgres_test!(test_optimize_only_tables_with_deletions);
    postgres_test!(test_cancelled_purge_changes_nothing);
    postgres_test!(test_unrecognized_tables_are_ignored);
    postgres_test!(test_empty_catalog);
    postgres_test!(test_many_segment_archives);
    postgres_test!(test_zero_row_limit_is_rejected);
}
