//! Archived report purging.
//!
//! [`ReportsPurger`] drops or trims the monthly archive tables that fall
//! outside the retention window described by a [`RetentionPolicy`].

mod batch;
mod cutoff;
mod engine;
mod policy;
mod segments;
#[cfg(all(test, any(feature = "database-sqlite", feature = "database-postgres")))]
mod tests;

pub use batch::{BatchRunner, id_batches};
pub use cutoff::{purge_cutoff, should_period_be_purged};
pub use engine::{
    DROP_TABLE, EstimatedPurge, PurgeClassification, PurgeEstimate, PurgePlan, PurgeReport,
    ReportsPurger, RowSelection, TablePlan,
};
pub use policy::{DEFAULT_SELECT_BATCH_SIZE, RetentionPolicy, SettingsError, keys};
pub use segments::{SegmentArchiveIndex, segment_marker_filter};

use crate::db::DbError;

/// Errors from a purge or estimate run.
#[derive(Debug, thiserror::Error)]
pub enum PurgeError {
    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// Cancellation was requested between batches. Work already committed
    /// stays committed.
    #[error("Purge cancelled")]
    Cancelled,
}
