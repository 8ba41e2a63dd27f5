//! Id-range batching over archive tables.
//!
//! Scans never touch a whole table in one statement: `[0, max_id]` is split
//! into fixed-size half-open ranges and each range is its own short query.
//! Deletes are chunked by row count instead, and repeat until a chunk comes
//! back short.

use std::ops::Range;

use tokio_util::sync::CancellationToken;

use super::PurgeError;
use crate::db::{ArchiveStore, ID_COLUMN, query::Predicate};

/// Half-open id ranges `[k*size, (k+1)*size)` covering `0..=max_id`.
/// An empty table (`max_id == 0`) still yields the first range.
pub fn id_batches(max_id: i64, batch_size: u64) -> impl Iterator<Item = Range<i64>> {
    let step = i64::try_from(batch_size.max(1)).unwrap_or(i64::MAX);
    std::iter::successors(Some(0_i64), move |lo| lo.checked_add(step))
        .take_while(move |lo| *lo <= max_id)
        .map(move |lo| lo..lo.saturating_add(step))
}

/// Runs batched statements against one store, honoring cancellation between
/// batches.
pub struct BatchRunner<'a> {
    store: &'a dyn ArchiveStore,
    batch_size: u64,
    cancel: &'a CancellationToken,
}

impl<'a> BatchRunner<'a> {
    pub fn new(
        store: &'a dyn ArchiveStore,
        batch_size: u64,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            store,
            batch_size,
            cancel,
        }
    }

    fn check_cancelled(&self) -> Result<(), PurgeError> {
        if self.cancel.is_cancelled() {
            Err(PurgeError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Total rows matching `filter`, summed over every id batch.
    pub async fn count(&self, table: &str, filter: Option<&Predicate>) -> Result<u64, PurgeError> {
        let max_id = self.store.max_id(table, ID_COLUMN).await?;
        let mut total = 0_u64;
        for range in id_batches(max_id, self.batch_size) {
            self.check_cancelled()?;
            let count = self.store.count_in_range(table, filter, range.clone()).await?;
            tracing::trace!(
                table,
                start = range.start,
                end = range.end,
                count,
                "Counted archive rows in batch"
            );
            total += count;
        }
        Ok(total)
    }

    /// Feeds the distinct ids matching `filter` to `on_batch`, one id range at
    /// a time. Empty batches are skipped.
    pub async fn for_each_id_batch<F>(
        &self,
        table: &str,
        filter: Option<&Predicate>,
        mut on_batch: F,
    ) -> Result<(), PurgeError>
    where
        F: FnMut(Vec<i64>) + Send,
    {
        let max_id = self.store.max_id(table, ID_COLUMN).await?;
        for range in id_batches(max_id, self.batch_size) {
            self.check_cancelled()?;
            let ids = self.store.fetch_ids_in_range(table, filter, range).await?;
            if !ids.is_empty() {
                on_batch(ids);
            }
        }
        Ok(())
    }

    /// Deletes every row matching `filter` in chunks of at most `limit` rows.
    /// A zero limit is treated as one.
    pub async fn delete_all(
        &self,
        table: &str,
        filter: Option<&Predicate>,
        limit: u64,
    ) -> Result<u64, PurgeError> {
        let limit = limit.max(1);
        let mut total = 0_u64;
        loop {
            self.check_cancelled()?;
            let deleted = self.store.delete_chunk(table, filter, limit).await?;
            total += deleted;
            tracing::trace!(table, deleted, total, "Deleted archive chunk");
            if deleted < limit {
                break;
            }
        }
        Ok(total)
    }
}
