//! Archive table catalog.
//!
//! Reports are archived into one numeric and one blob table per month, named
//! `[prefix]archive_numeric_YYYY_MM` and `[prefix]archive_blob_YYYY_MM`. This
//! module recognizes those names and carries the parsed parts around.

mod period;

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub use period::Period;

static TABLE_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[A-Za-z0-9_]*_)?archive_(numeric|blob)_(\d{4})_(\d{2})$")
        .expect("valid archive table regex")
});

/// Which of the two monthly archive tables a name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveKind {
    /// Scalar metrics plus the `done*` archive-completion markers.
    Numeric,
    /// Serialized report tables.
    Blob,
}

impl ArchiveKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveKind::Numeric => "numeric",
            ArchiveKind::Blob => "blob",
        }
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The month an archive table covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}_{:02}", self.year, self.month)
    }
}

/// One physical archive partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveTableRef {
    pub table_name: String,
    pub kind: ArchiveKind,
    pub year_month: YearMonth,
}

impl ArchiveTableRef {
    pub fn new(prefix: &str, kind: ArchiveKind, year_month: YearMonth) -> Self {
        Self {
            table_name: table_name(prefix, kind, year_month),
            kind,
            year_month,
        }
    }
}

/// Builds the name of the `kind` archive table for a month.
pub fn table_name(prefix: &str, kind: ArchiveKind, year_month: YearMonth) -> String {
    format!("{prefix}archive_{kind}_{year_month}")
}

/// Parses an installed table name.
///
/// Returns `None` for anything that is not an archive table, including
/// archive-looking names with an impossible month.
pub fn classify_archive_table(table_name: &str) -> Option<ArchiveTableRef> {
    let caps = TABLE_NAME_RE.captures(table_name)?;
    let kind = match &caps[1] {
        "numeric" => ArchiveKind::Numeric,
        "blob" => ArchiveKind::Blob,
        _ => return None,
    };
    let year: i32 = caps[2].parse().ok()?;
    let month: u32 = caps[3].parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    Some(ArchiveTableRef {
        table_name: table_name.to_string(),
        kind,
        year_month: YearMonth::new(year, month),
    })
}
