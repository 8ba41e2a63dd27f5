//! Retention policy and its construction from flat settings.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::archive::Period;

/// Default number of ids covered by one scan batch.
pub const DEFAULT_SELECT_BATCH_SIZE: u64 = 100_000;

/// Setting names, as stored in the options table.
pub mod keys {
    pub const OLDER_THAN: &str = "delete_reports_older_than";
    pub const KEEP_BASIC_METRICS: &str = "delete_reports_keep_basic_metrics";
    pub const KEEP_SEGMENT_REPORTS: &str = "delete_reports_keep_segment_reports";
    pub const MAX_ROWS_PER_QUERY: &str = "delete_logs_max_rows_per_query";

    /// `delete_reports_keep_<period>_reports`
    pub fn keep_period_reports(period: crate::archive::Period) -> String {
        format!("delete_reports_keep_{}_reports", period.as_str())
    }
}

/// Errors building a [`RetentionPolicy`] from settings.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Missing retention setting: {0}")]
    MissingKey(String),

    #[error("Invalid value for retention setting {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

/// What to keep when purging old archives. Built once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetentionPolicy {
    /// Archives strictly older than this many full months are purged.
    pub older_than_months: u32,
    /// Keep `metrics_to_keep` rows in numeric tables instead of dropping them.
    pub keep_basic_metrics: bool,
    /// Blob reports for these periods survive.
    pub periods_to_keep: BTreeSet<Period>,
    /// Keep segment-scoped blob reports of kept periods.
    pub keep_segment_reports: bool,
    pub metrics_to_keep: BTreeSet<String>,
    /// Row limit of one DELETE statement.
    pub max_rows_per_delete: u64,
    /// Id span of one read-only scan batch.
    pub select_batch_size: u64,
}

impl RetentionPolicy {
    /// Names of every setting [`RetentionPolicy::from_settings`] reads.
    pub fn setting_names() -> Vec<String> {
        let mut names = vec![
            keys::OLDER_THAN.to_string(),
            keys::KEEP_BASIC_METRICS.to_string(),
        ];
        names.extend(Period::ALL.into_iter().map(keys::keep_period_reports));
        names.push(keys::KEEP_SEGMENT_REPORTS.to_string());
        names.push(keys::MAX_ROWS_PER_QUERY.to_string());
        names
    }

    /// Builds a policy from the flat privacy settings map.
    ///
    /// Every key in [`RetentionPolicy::setting_names`] must be present. Flags
    /// accept `1`/`0` (and `true`/`false`); an empty value counts as off.
    pub fn from_settings<M>(
        settings: &HashMap<String, String>,
        metrics_to_keep: impl IntoIterator<Item = M>,
    ) -> Result<Self, SettingsError>
    where
        M: Into<String>,
    {
        let periods_to_keep = Period::ALL
            .into_iter()
            .map(|period| Ok((period, flag(settings, &keys::keep_period_reports(period))?)))
            .collect::<Result<Vec<_>, SettingsError>>()?
            .into_iter()
            .filter_map(|(period, keep)| keep.then_some(period))
            .collect();

        let policy = Self {
            older_than_months: number(settings, keys::OLDER_THAN)?,
            keep_basic_metrics: flag(settings, keys::KEEP_BASIC_METRICS)?,
            periods_to_keep,
            keep_segment_reports: flag(settings, keys::KEEP_SEGMENT_REPORTS)?,
            metrics_to_keep: metrics_to_keep.into_iter().map(Into::into).collect(),
            max_rows_per_delete: number(settings, keys::MAX_ROWS_PER_QUERY)?,
            select_batch_size: DEFAULT_SELECT_BATCH_SIZE,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn with_select_batch_size(mut self, size: u64) -> Self {
        self.select_batch_size = size;
        self
    }

    /// Rejects limits that would make chunked deletes or scans loop forever.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.max_rows_per_delete == 0 {
            return Err(SettingsError::InvalidValue {
                key: keys::MAX_ROWS_PER_QUERY.to_string(),
                value: "0".to_string(),
            });
        }
        if self.select_batch_size == 0 {
            return Err(SettingsError::InvalidValue {
                key: "select_batch_size".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Period codes to keep, ascending.
    pub fn period_codes_to_keep(&self) -> Vec<i64> {
        self.periods_to_keep.iter().map(Period::code).collect()
    }

    /// Whether old blob tables can be dropped outright.
    pub fn drops_blob_tables(&self) -> bool {
        self.periods_to_keep.is_empty() && !self.keep_segment_reports
    }

    /// Whether old numeric tables can be dropped outright.
    pub fn drops_numeric_tables(&self) -> bool {
        !self.keep_basic_metrics || self.metrics_to_keep.is_empty()
    }
}

fn raw<'a>(settings: &'a HashMap<String, String>, key: &str) -> Result<&'a str, SettingsError> {
    settings
        .get(key)
        .map(|v| v.trim())
        .ok_or_else(|| SettingsError::MissingKey(key.to_string()))
}

fn flag(settings: &HashMap<String, String>, key: &str) -> Result<bool, SettingsError> {
    match raw(settings, key)? {
        "1" | "true" => Ok(true),
        "0" | "false" | "" => Ok(false),
        other => Err(SettingsError::InvalidValue {
            key: key.to_string(),
            value: other.to_string(),
        }),
    }
}

fn number<T: std::str::FromStr>(
    settings: &HashMap<String, String>,
    key: &str,
) -> Result<T, SettingsError> {
    let value = raw(settings, key)?;
    value.parse().map_err(|_| SettingsError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
