//! Report retention configuration.
//!
//! Describes which archived reports survive a purge, where that policy comes
//! from, and how aggressively the purger may touch the database.
//!
//! # Example
//!
//! ```toml
//! [retention]
//! enabled = true
//! interval_hours = 24
//! delete_reports_older_than = 12
//! keep_basic_metrics = true
//! keep_month_reports = true
//! keep_year_reports = true
//!
//! [retention.safety]
//! dry_run = false
//! max_rows_per_query = 100000
//! optimize_tables = true
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    archive::Period,
    purger::{DEFAULT_SELECT_BATCH_SIZE, RetentionPolicy, SettingsError, keys},
};

/// Where the retention policy is read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicySource {
    /// The `[retention]` section of this file.
    #[default]
    Config,
    /// The privacy settings stored in the options table.
    Options,
}

/// Report retention configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    /// Whether the scheduled worker purges at all.
    /// Default: false (must be explicitly enabled)
    #[serde(default)]
    pub enabled: bool,

    /// How often the worker runs (in hours).
    /// Default: 24 (once per day)
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,

    /// Whether the settings below or the options table define the policy.
    #[serde(default)]
    pub source: PolicySource,

    /// Reports older than this many full months (beyond the current one)
    /// are purged.
    #[serde(default = "default_older_than")]
    pub delete_reports_older_than: u32,

    /// Keep the metrics in `metrics_to_keep` when trimming numeric tables.
    #[serde(default)]
    pub keep_basic_metrics: bool,

    #[serde(default)]
    pub keep_day_reports: bool,

    #[serde(default)]
    pub keep_week_reports: bool,

    #[serde(default)]
    pub keep_month_reports: bool,

    #[serde(default)]
    pub keep_year_reports: bool,

    #[serde(default)]
    pub keep_range_reports: bool,

    /// Keep segment-scoped reports of the kept periods.
    #[serde(default)]
    pub keep_segment_reports: bool,

    /// Metric names kept by `keep_basic_metrics`.
    #[serde(default = "default_metrics_to_keep")]
    pub metrics_to_keep: Vec<String>,

    /// Safety settings to prevent accidental data loss.
    #[serde(default)]
    pub safety: RetentionSafety,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_hours: default_interval_hours(),
            source: PolicySource::default(),
            delete_reports_older_than: default_older_than(),
            keep_basic_metrics: false,
            keep_day_reports: false,
            keep_week_reports: false,
            keep_month_reports: false,
            keep_year_reports: false,
            keep_range_reports: false,
            keep_segment_reports: false,
            metrics_to_keep: default_metrics_to_keep(),
            safety: RetentionSafety::default(),
        }
    }
}

fn default_interval_hours() -> u64 {
    24
}

fn default_older_than() -> u32 {
    12
}

/// Visit summary metrics.
fn default_metrics_to_keep() -> Vec<String> {
    [
        "nb_uniq_visitors",
        "nb_visits",
        "nb_actions",
        "max_actions",
        "sum_visit_length",
        "bounce_count",
        "nb_visits_converted",
        "nb_conversions",
        "revenue",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Safety settings for purge operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionSafety {
    /// If true, the worker only estimates and logs what a purge would do.
    /// Default: false
    #[serde(default)]
    pub dry_run: bool,

    /// Row limit of a single DELETE statement.
    /// Default: 100000
    #[serde(default = "default_max_rows_per_query")]
    pub max_rows_per_query: u64,

    /// Span of archive ids covered by one read-only scan.
    /// Default: 100000
    #[serde(default = "default_select_batch_size")]
    pub select_batch_size: u64,

    /// Optimize trimmed tables after the worker purges.
    /// Default: false
    #[serde(default)]
    pub optimize_tables: bool,
}

impl Default for RetentionSafety {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_rows_per_query: default_max_rows_per_query(),
            select_batch_size: default_select_batch_size(),
            optimize_tables: false,
        }
    }
}

fn default_max_rows_per_query() -> u64 {
    100_000
}

fn default_select_batch_size() -> u64 {
    DEFAULT_SELECT_BATCH_SIZE
}

impl RetentionConfig {
    /// Get the interval as a Duration.
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_hours.saturating_mul(3600))
    }

    fn keeps_period(&self, period: Period) -> bool {
        match period {
            Period::Day => self.keep_day_reports,
            Period::Week => self.keep_week_reports,
            Period::Month => self.keep_month_reports,
            Period::Year => self.keep_year_reports,
            Period::Range => self.keep_range_reports,
        }
    }

    /// This section in the flat settings form stored in the options table.
    pub fn to_settings(&self) -> HashMap<String, String> {
        let flag = |on: bool| if on { "1" } else { "0" }.to_string();
        let mut settings = HashMap::from([
            (
                keys::OLDER_THAN.to_string(),
                self.delete_reports_older_than.to_string(),
            ),
            (keys::KEEP_BASIC_METRICS.to_string(), flag(self.keep_basic_metrics)),
            (
                keys::KEEP_SEGMENT_REPORTS.to_string(),
                flag(self.keep_segment_reports),
            ),
            (
                keys::MAX_ROWS_PER_QUERY.to_string(),
                self.safety.max_rows_per_query.to_string(),
            ),
        ]);
        for period in Period::ALL {
            settings.insert(keys::keep_period_reports(period), flag(self.keeps_period(period)));
        }
        settings
    }

    /// Policy described by this section.
    pub fn to_policy(&self) -> Result<RetentionPolicy, SettingsError> {
        self.policy_from_settings(&self.to_settings())
    }

    /// Policy from externally stored settings; metrics and scan size still
    /// come from this section.
    pub fn policy_from_settings(
        &self,
        settings: &HashMap<String, String>,
    ) -> Result<RetentionPolicy, SettingsError> {
        let policy = RetentionPolicy::from_settings(settings, self.metrics_to_keep.iter().cloned())?
            .with_select_batch_size(self.safety.select_batch_size);
        policy.validate()?;
        Ok(policy)
    }

    pub(super) fn validate(&self) -> Result<(), String> {
        if self.enabled && self.interval_hours == 0 {
            return Err("retention.interval_hours must be at least 1".into());
        }
        if self.safety.max_rows_per_query == 0 {
            return Err("retention.safety.max_rows_per_query must be at least 1".into());
        }
        if self.safety.select_batch_size == 0 {
            return Err("retention.safety.select_batch_size must be at least 1".into());
        }
        Ok(())
    }
}
