//! Scheduled purging of old archived reports.
//!
//! The worker re-reads the retention policy on every run, so changes to the
//! options table take effect without a restart. Dry-run mode only estimates.

mod worker;

pub use worker::{RetentionRunResult, resolve_policy, run_purge, start_purge_worker};
