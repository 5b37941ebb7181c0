//! In-memory storage engine.
//!
//! Nodes live in a `BTreeMap` keyed by canonical path. Intermediate nodes
//! are created implicitly when a table is appended below them, mirroring the
//! on-disk engine. Useful for tests and for short-lived stores assembled in
//! process.

use std::collections::{BTreeMap, BTreeSet};

use arrow::array::RecordBatch;
use arrow::compute::concat_batches;
use snafu::prelude::*;

use crate::engine::{Metadata, RowGroups, StorageEngine, key_segments, validate_key};
use crate::error::{
    ArrowSnafu, KeyNotFoundSnafu, MetadataNotFoundSnafu, SchemaMismatchSnafu, StoreResult,
};
use crate::index::{
    self, IndexPredicate, check_append_order, data_column_names, projection_indices,
};
use crate::timeframe::TimeFrame;

#[derive(Debug, Default, Clone)]
struct MemoryNode {
    table: Option<RecordBatch>,
    metadata: Option<Metadata>,
}

/// Storage engine holding every node in memory.
#[derive(Debug, Clone)]
pub struct MemoryEngine {
    nodes: BTreeMap<String, MemoryNode>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    /// An empty store containing only the root node.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), MemoryNode::default());
        MemoryEngine { nodes }
    }

    fn node(&self, key: &str) -> StoreResult<&MemoryNode> {
        self.nodes.get(key).context(KeyNotFoundSnafu { key })
    }

    fn table(&self, key: &str) -> StoreResult<&RecordBatch> {
        self.nodes
            .get(key)
            .and_then(|n| n.table.as_ref())
            .context(KeyNotFoundSnafu { key })
    }

    fn projected(&self, key: &str, columns: Option<&[String]>) -> StoreResult<RecordBatch> {
        let table = self.table(key)?;
        let indices = projection_indices(&table.schema(), key, columns)?;
        table.project(&indices).context(ArrowSnafu)
    }

    fn ensure_path(&mut self, key: &str) {
        let mut path = String::new();
        for segment in key_segments(key) {
            path.push('/');
            path.push_str(segment);
            self.nodes.entry(path.clone()).or_default();
        }
    }
}

impl StorageEngine for MemoryEngine {
    fn keys(&self) -> StoreResult<Vec<String>> {
        Ok(self
            .nodes
            .iter()
            .filter(|(_, n)| n.table.is_some())
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn has_table(&self, key: &str) -> bool {
        self.table(key).is_ok()
    }

    fn column_names(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(data_column_names(&self.table(key)?.schema()))
    }

    fn nrows(&self, key: &str) -> StoreResult<u64> {
        Ok(self.table(key)?.num_rows() as u64)
    }

    fn select<'a>(
        &'a self,
        key: &str,
        columns: Option<&[String]>,
        range: &TimeFrame,
        chunk_size: usize,
    ) -> StoreResult<RowGroups<'a>> {
        let projected = self.projected(key, columns)?;
        let filtered = index::filter_batch(&projected, key, &IndexPredicate::Within(*range))?;

        let chunk_size = chunk_size.max(1);
        let total = filtered.num_rows();
        let groups = (0..total)
            .step_by(chunk_size)
            .map(move |offset| Ok(filtered.slice(offset, chunk_size.min(total - offset))));
        Ok(Box::new(groups))
    }

    fn select_coordinates(&self, key: &str, predicate: &IndexPredicate) -> StoreResult<Vec<u64>> {
        let table = self.table(key)?;
        Ok(index::matching_positions(table, key, predicate)?
            .into_iter()
            .map(|p| p as u64)
            .collect())
    }

    fn select_rows(
        &self,
        key: &str,
        columns: Option<&[String]>,
        start: u64,
        n: usize,
    ) -> StoreResult<RecordBatch> {
        let projected = self.projected(key, columns)?;
        let total = projected.num_rows();
        let start = usize::try_from(start).unwrap_or(usize::MAX).min(total);
        Ok(projected.slice(start, n.min(total - start)))
    }

    fn append(&mut self, key: &str, batch: &RecordBatch) -> StoreResult<()> {
        validate_key(key)?;

        let merged = match self.nodes.get(key).and_then(|n| n.table.as_ref()) {
            Some(existing) => {
                ensure!(
                    existing.schema().fields() == batch.schema().fields(),
                    SchemaMismatchSnafu {
                        key,
                        expected: existing.schema().to_string(),
                        found: batch.schema().to_string(),
                    }
                );
                let last = index::index_bounds(existing, key)?.map(|(_, hi)| hi);
                check_append_order(batch, key, last)?;
                concat_batches(&existing.schema(), [existing, batch]).context(ArrowSnafu)?
            }
            None => {
                check_append_order(batch, key, None)?;
                batch.clone()
            }
        };

        self.ensure_path(key);
        if let Some(node) = self.nodes.get_mut(key) {
            node.table = Some(merged);
        }
        Ok(())
    }

    fn metadata(&self, key: &str) -> StoreResult<Metadata> {
        self.node(key)?
            .metadata
            .clone()
            .context(MetadataNotFoundSnafu { key })
    }

    fn set_metadata(&mut self, key: &str, metadata: Metadata) -> StoreResult<()> {
        let node = self.nodes.get_mut(key).context(KeyNotFoundSnafu { key })?;
        node.metadata = Some(metadata);
        Ok(())
    }

    fn flush(&mut self) -> StoreResult<()> {
        Ok(())
    }

    fn children(&self, key: &str) -> StoreResult<BTreeSet<String>> {
        self.node(key)?;
        let depth = key_segments(key).len();
        let prefix = if key == "/" {
            "/".to_string()
        } else {
            format!("{key}/")
        };

        Ok(self
            .nodes
            .keys()
            .filter(|k| k.starts_with(&prefix) && key_segments(k).len() == depth + 1)
            .filter_map(|k| key_segments(k).last().map(|s| s.to_string()))
            .collect())
    }

    fn close(&mut self) -> StoreResult<()> {
        Ok(())
    }

    fn reopen(&mut self) -> StoreResult<()> {
        Ok(())
    }
}
