use std::collections::{BTreeMap, BTreeSet};

use super::{PurgeError, batch::BatchRunner};
use crate::{
    archive::{ArchiveTableRef, YearMonth},
    db::query::Predicate,
};

/// Matches the `done<segment hash>.<plugin>` completion markers written for
/// segment-scoped archives. The bare `done` marker belongs to the unsegmented
/// archive and is excluded.
pub fn segment_marker_filter() -> Predicate {
    Predicate::not_eq("name", "done").and(Predicate::like("name", "done_%.%"))
}

/// Archive ids that belong to segment-scoped archives, per month.
///
/// Discovered from the numeric tables, which hold the completion markers, and
/// applied to the blob table of the same month.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentArchiveIndex {
    by_month: BTreeMap<YearMonth, BTreeSet<i64>>,
}

impl SegmentArchiveIndex {
    /// Scans every numeric table in id batches.
    pub async fn discover(
        runner: &BatchRunner<'_>,
        numeric_tables: &[ArchiveTableRef],
    ) -> Result<Self, PurgeError> {
        let filter = segment_marker_filter();
        let mut index = Self::default();
        for table in numeric_tables {
            let mut ids = BTreeSet::new();
            runner
                .for_each_id_batch(&table.table_name, Some(&filter), |batch| ids.extend(batch))
                .await?;
            tracing::debug!(
                table = %table.table_name,
                segment_archives = ids.len(),
                "Discovered segment archives"
            );
            if !ids.is_empty() {
                index.by_month.entry(table.year_month).or_default().extend(ids);
            }
        }
        tracing::debug!(
            months = index.by_month.len(),
            segment_archives = index.total_archives(),
            "Segment archive discovery complete"
        );
        Ok(index)
    }

    /// Segment archive ids for a month; empty when the month has none.
    pub fn archive_ids(&self, year_month: YearMonth) -> impl Iterator<Item = i64> + '_ {
        self.by_month
            .get(&year_month)
            .into_iter()
            .flat_map(|ids| ids.iter().copied())
    }

    /// Whether any segment archive was found for the month.
    pub fn contains_month(&self, year_month: YearMonth) -> bool {
        self.by_month.contains_key(&year_month)
    }

    pub fn total_archives(&self) -> usize {
        self.by_month.values().map(BTreeSet::len).sum()
    }

    #[cfg(test)]
    pub(crate) fn insert(&mut self, year_month: YearMonth, ids: impl IntoIterator<Item = i64>) {
        self.by_month.entry(year_month).or_default().extend(ids);
    }
}
