//! Retention purger for month-partitioned analytics archive tables.
//!
//! Archived reports live in `archive_numeric_YYYY_MM` and
//! `archive_blob_YYYY_MM` tables. [`purger::ReportsPurger`] drops or trims the
//! tables older than a configurable window, and [`retention`] runs it on a
//! schedule.

pub mod archive;
pub mod config;
pub mod db;
pub mod observability;
pub mod purger;
pub mod retention;
