//! Storage-engine capability interface.
//!
//! A `StorageEngine` is the physical side of a store handle: it addresses
//! nodes by canonical key, reads row groups in index order, resolves row
//! positions for index predicates, and carries per-node metadata. The
//! windowed reader in [`crate::store`] is generic over this trait, so the
//! engine variant is picked when the handle is constructed:
//!
//! - [`ParquetEngine`]: a directory tree of Parquet segments on disk.
//! - [`MemoryEngine`]: the same semantics held in memory.
//!
//! Keys passed to engines are already normalized (leading slash, no
//! trailing slash).

use std::collections::BTreeSet;

use arrow::array::RecordBatch;
use arrow::compute::concat_batches;
use serde_json::{Map, Value};
use snafu::ResultExt;

use crate::error::{ArrowSnafu, StoreError, StoreResult};
use crate::index::IndexPredicate;
use crate::timeframe::TimeFrame;

pub mod disk;
pub mod memory;

pub use disk::{OpenMode, ParquetEngine};
pub use memory::MemoryEngine;

/// Metadata payload attached to a node.
pub type Metadata = Map<String, Value>;

/// Lazy sequence of row groups produced by [`StorageEngine::select`].
pub type RowGroups<'a> = Box<dyn Iterator<Item = StoreResult<RecordBatch>> + 'a>;

/// Physical operations a store handle needs from its engine.
pub trait StorageEngine {
    /// Every table key in the store, sorted.
    fn keys(&self) -> StoreResult<Vec<String>>;

    /// True if `key` addresses a table.
    fn has_table(&self, key: &str) -> bool;

    /// Data column names (the index excluded) of the table at `key`.
    fn column_names(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Total number of rows stored at `key`.
    fn nrows(&self, key: &str) -> StoreResult<u64>;

    /// Stream rows whose index lies in `range`, projected to `columns`
    /// (plus the index), in index order, in groups of at most `chunk_size`.
    fn select<'a>(
        &'a self,
        key: &str,
        columns: Option<&[String]>,
        range: &TimeFrame,
        chunk_size: usize,
    ) -> StoreResult<RowGroups<'a>>;

    /// Ordered absolute row positions matching `predicate`.
    fn select_coordinates(&self, key: &str, predicate: &IndexPredicate) -> StoreResult<Vec<u64>>;

    /// Up to `n` rows starting at absolute position `start`.
    fn select_rows(
        &self,
        key: &str,
        columns: Option<&[String]>,
        start: u64,
        n: usize,
    ) -> StoreResult<RecordBatch>;

    /// First absolute position matching `predicate`, if any.
    fn first_coordinate(&self, key: &str, predicate: &IndexPredicate) -> StoreResult<Option<u64>> {
        Ok(self.select_coordinates(key, predicate)?.first().copied())
    }

    /// Append a batch to the table at `key`, creating it if needed.
    fn append(&mut self, key: &str, batch: &RecordBatch) -> StoreResult<()>;

    /// Metadata attached to the node at `key` (`/` is the root).
    fn metadata(&self, key: &str) -> StoreResult<Metadata>;

    /// Attach metadata to the node at `key`; may be buffered until [`flush`](Self::flush).
    fn set_metadata(&mut self, key: &str, metadata: Metadata) -> StoreResult<()>;

    /// Persist buffered writes.
    fn flush(&mut self) -> StoreResult<()>;

    /// Names of the immediate children of the node at `key`.
    fn children(&self, key: &str) -> StoreResult<BTreeSet<String>>;

    /// Flush and release the underlying handle.
    fn close(&mut self) -> StoreResult<()>;

    /// Flush and reload the engine's view of the underlying store.
    fn reopen(&mut self) -> StoreResult<()>;
}

/// Re-groups a stream of batches into groups of exactly `chunk_size` rows
/// (the last group may be shorter). Empty input batches are skipped, and the
/// first error ends the stream.
pub(crate) struct Rechunk<I> {
    inner: I,
    chunk_size: usize,
    pending: Vec<RecordBatch>,
    buffered: usize,
    exhausted: bool,
}

impl<I> Rechunk<I>
where
    I: Iterator<Item = StoreResult<RecordBatch>>,
{
    pub(crate) fn new(inner: I, chunk_size: usize) -> Self {
        Rechunk {
            inner,
            chunk_size: chunk_size.max(1),
            pending: Vec::new(),
            buffered: 0,
            exhausted: false,
        }
    }

    fn take_head(&mut self) -> StoreResult<RecordBatch> {
        let schema = self.pending[0].schema();
        let merged = concat_batches(&schema, &self.pending).context(ArrowSnafu)?;
        self.pending.clear();

        let take = merged.num_rows().min(self.chunk_size);
        let rest = merged.num_rows() - take;
        if rest > 0 {
            self.pending.push(merged.slice(take, rest));
        }
        self.buffered = rest;
        Ok(merged.slice(0, take))
    }
}

impl<I> Iterator for Rechunk<I>
where
    I: Iterator<Item = StoreResult<RecordBatch>>,
{
    type Item = StoreResult<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.buffered < self.chunk_size && !self.exhausted {
            match self.inner.next() {
                Some(Ok(batch)) if batch.num_rows() == 0 => {}
                Some(Ok(batch)) => {
                    self.buffered += batch.num_rows();
                    self.pending.push(batch);
                }
                Some(Err(e)) => {
                    self.exhausted = true;
                    self.pending.clear();
                    self.buffered = 0;
                    return Some(Err(e));
                }
                None => self.exhausted = true,
            }
        }

        if self.buffered == 0 {
            return None;
        }
        Some(self.take_head())
    }
}

/// Split `key` into its non-empty segments.
pub(crate) fn key_segments(key: &str) -> Vec<&str> {
    key.split('/').filter(|s| !s.is_empty()).collect()
}

/// Reject keys whose segments cannot name a node.
pub(crate) fn validate_key(key: &str) -> StoreResult<()> {
    for segment in key_segments(key) {
        if segment == "." || segment == ".." || segment.starts_with('_') {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
                reason: format!("segment '{segment}' is reserved"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;

    fn rechunk_sizes(inputs: &[&[i64]], chunk_size: usize) -> Vec<Vec<i64>> {
        let batches: Vec<StoreResult<RecordBatch>> = inputs
            .iter()
            .map(|ts| Ok(batch_from_secs(ts).unwrap()))
            .collect();
        Rechunk::new(batches.into_iter(), chunk_size)
            .map(|b| index_secs(&b.unwrap()).unwrap())
            .collect()
    }

    #[test]
    fn rechunk_regroups_across_batch_boundaries() {
        let out = rechunk_sizes(&[&[1, 2], &[3], &[], &[4, 5, 6, 7]], 3);
        assert_eq!(out, vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]);
    }

    #[test]
    fn rechunk_of_nothing_yields_nothing() {
        assert!(rechunk_sizes(&[&[], &[]], 3).is_empty());
    }

    #[test]
    fn rechunk_stops_after_error() {
        let items: Vec<StoreResult<RecordBatch>> = vec![
            Ok(batch_from_secs(&[1]).unwrap()),
            Err(StoreError::KeyNotFound { key: "/x".into() }),
            Ok(batch_from_secs(&[2]).unwrap()),
        ];
        let mut it = Rechunk::new(items.into_iter(), 10);
        assert!(it.next().unwrap().is_err());
        assert!(it.next().is_none());
    }

    #[test]
    fn reserved_segments_are_rejected() {
        assert!(validate_key("/building1/elec").is_ok());
        assert!(validate_key("/building1/_data").is_err());
        assert!(validate_key("/../etc").is_err());
    }
}
