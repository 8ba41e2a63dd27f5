use std::ops::Range;

use async_trait::async_trait;

use crate::{
    archive::ArchiveTableRef,
    db::{error::DbResult, query::Predicate},
};

/// Primary key column shared by every archive table.
pub const ID_COLUMN: &str = "idarchive";

/// Stored value of an archive row: numeric tables hold a number, blob tables
/// hold serialized report data.
#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveValue {
    Numeric(f64),
    Blob(Vec<u8>),
}

/// A single archive row, as written by the archiver.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveRow {
    pub idarchive: i64,
    pub name: String,
    pub idsite: i64,
    pub date1: chrono::NaiveDate,
    pub date2: chrono::NaiveDate,
    pub period: i64,
    pub value: ArchiveValue,
}

/// Storage operations over month-partitioned archive tables.
///
/// Every method is a single short statement (or one statement per table for
/// the schema operations), so callers control batching and can stop between
/// calls.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Names of all installed tables, in a stable order.
    async fn list_tables(&self) -> DbResult<Vec<String>>;

    /// Create the numeric or blob schema for one month, if missing.
    async fn create_archive_table(&self, table: &ArchiveTableRef) -> DbResult<()>;

    /// Insert archive rows into an existing table.
    async fn insert_rows(&self, table: &str, rows: &[ArchiveRow]) -> DbResult<u64>;

    /// Largest value of `column`, or 0 for an empty table.
    async fn max_id(&self, table: &str, column: &str) -> DbResult<i64>;

    /// Count rows matching `filter` whose id lies in `range` (half-open).
    async fn count_in_range(
        &self,
        table: &str,
        filter: Option<&Predicate>,
        range: Range<i64>,
    ) -> DbResult<u64>;

    /// Distinct ids of rows matching `filter` within `range`, ascending.
    async fn fetch_ids_in_range(
        &self,
        table: &str,
        filter: Option<&Predicate>,
        range: Range<i64>,
    ) -> DbResult<Vec<i64>>;

    /// Delete at most `limit` rows matching `filter`, lowest ids first.
    ///
    /// Returns the number of rows deleted by this one statement.
    async fn delete_chunk(
        &self,
        table: &str,
        filter: Option<&Predicate>,
        limit: u64,
    ) -> DbResult<u64>;

    /// Drop the given tables. Missing tables are ignored.
    async fn drop_tables(&self, tables: &[String]) -> DbResult<()>;

    /// Reclaim space after large deletes.
    async fn optimize_tables(&self, tables: &[String]) -> DbResult<()>;
}
