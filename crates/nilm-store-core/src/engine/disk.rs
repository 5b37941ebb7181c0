//! On-disk storage engine: a directory tree of Parquet segments.
//!
//! Layout under the store root:
//!
//! - Node `/a/b` is the directory `<root>/a/b`.
//! - A table at a node is a `_table.json` manifest plus one Parquet file per
//!   append under `_data/` (for example, `_data/part-00000001.parquet`).
//! - Node metadata lives in `_metadata.json`.
//!
//! Segments are appended in index order, so a table's rows are the
//! concatenation of its segments in manifest order. The manifest records
//! each segment's row count and `[ts_min, ts_max]`, which lets range scans
//! and coordinate lookups skip segments without opening them and lets
//! positional reads jump straight to the segment holding a row.
//!
//! Manifests are loaded when the engine is opened (or reopened). Metadata
//! writes are buffered and persisted by `flush`.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::compute::concat_batches;
use arrow::datatypes::SchemaRef;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::engine::{Metadata, Rechunk, RowGroups, StorageEngine, key_segments, validate_key};
use crate::error::{
    ArrowSnafu, IoSnafu, KeyNotFoundSnafu, MetadataNotFoundSnafu, ParquetSnafu, ReadOnlySnafu,
    SchemaMismatchSnafu, StoreError, StoreResult,
};
use crate::index::{
    self, IndexPredicate, check_append_order, data_column_names, projection_indices,
};
use crate::key::join_key;
use crate::storage::{self, child_dirs, read_json_opt, write_atomic, write_json_atomic};
use crate::timeframe::TimeFrame;

const MANIFEST_FILE: &str = "_table.json";
const METADATA_FILE: &str = "_metadata.json";
const DATA_DIR: &str = "_data";

/// How a store is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Reads only; the root must already exist.
    ReadOnly,
    /// Reads and writes; the root is created if missing.
    ReadWrite,
}

/// One Parquet file of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SegmentEntry {
    /// Path relative to the node directory.
    path: String,
    row_count: u64,
    ts_min: Option<DateTime<Utc>>,
    ts_max: Option<DateTime<Utc>>,
}

impl SegmentEntry {
    fn may_match(&self, predicate: &IndexPredicate) -> bool {
        match (self.ts_min, self.ts_max) {
            (Some(lo), Some(hi)) => self.row_count > 0 && predicate.may_match(lo, hi),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct TableManifest {
    segments: Vec<SegmentEntry>,
}

impl TableManifest {
    fn nrows(&self) -> u64 {
        self.segments.iter().map(|s| s.row_count).sum()
    }

    fn last_index(&self) -> Option<DateTime<Utc>> {
        self.segments.iter().rev().find_map(|s| s.ts_max)
    }

    /// Segments paired with the absolute position of their first row.
    fn with_offsets(&self) -> impl Iterator<Item = (u64, &SegmentEntry)> {
        self.segments.iter().scan(0u64, |offset, seg| {
            let start = *offset;
            *offset += seg.row_count;
            Some((start, seg))
        })
    }
}

/// Storage engine over a directory of Parquet segments.
#[derive(Debug)]
pub struct ParquetEngine {
    root: PathBuf,
    mode: OpenMode,
    tables: BTreeMap<String, TableManifest>,
    pending_metadata: BTreeMap<String, Metadata>,
}

fn node_dir(root: &Path, key: &str) -> PathBuf {
    key_segments(key)
        .into_iter()
        .fold(root.to_path_buf(), |dir, segment| dir.join(segment))
}

fn load_tables(root: &Path) -> StoreResult<BTreeMap<String, TableManifest>> {
    let mut tables = BTreeMap::new();
    let mut stack = vec!["/".to_string()];

    while let Some(key) = stack.pop() {
        let dir = node_dir(root, &key);
        if let Some(manifest) = read_json_opt::<TableManifest>(&dir.join(MANIFEST_FILE))? {
            tables.insert(key.clone(), manifest);
        }
        for child in child_dirs(&dir)? {
            stack.push(join_key([key.as_str(), child.as_str()]));
        }
    }
    Ok(tables)
}

fn open_segment(dir: &Path, seg: &SegmentEntry) -> StoreResult<ParquetRecordBatchReaderBuilder<File>> {
    let path = dir.join(&seg.path);
    let file = File::open(&path).context(IoSnafu {
        path: path.display().to_string(),
    })?;
    ParquetRecordBatchReaderBuilder::try_new(file).context(ParquetSnafu)
}

fn projection_mask(
    builder: &ParquetRecordBatchReaderBuilder<File>,
    key: &str,
    columns: Option<&[String]>,
) -> StoreResult<ProjectionMask> {
    let indices = projection_indices(builder.schema(), key, columns)?;
    Ok(ProjectionMask::roots(builder.parquet_schema(), indices))
}

/// Lazily read one segment, projected and filtered by `predicate`.
fn scan_segment(
    dir: &Path,
    key: &str,
    seg: &SegmentEntry,
    columns: Option<&[String]>,
    batch_size: usize,
    predicate: IndexPredicate,
) -> StoreResult<impl Iterator<Item = StoreResult<RecordBatch>> + use<>> {
    let builder = open_segment(dir, seg)?;
    let mask = projection_mask(&builder, key, columns)?;
    let reader = builder
        .with_projection(mask)
        .with_batch_size(batch_size)
        .build()
        .context(ParquetSnafu)?;

    let key = key.to_string();
    Ok(reader.map(move |batch| {
        let batch = batch.context(ArrowSnafu)?;
        index::filter_batch(&batch, &key, &predicate)
    }))
}

impl ParquetEngine {
    /// Open (or, in `ReadWrite` mode, create) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>, mode: OpenMode) -> StoreResult<Self> {
        let root = root.into();
        match mode {
            OpenMode::ReadWrite => storage::create_dir_all(&root)?,
            OpenMode::ReadOnly => {
                std::fs::metadata(&root).context(IoSnafu {
                    path: root.display().to_string(),
                })?;
            }
        }

        let tables = load_tables(&root)?;
        debug!(
            "opened store at {} ({:?}, {} tables)",
            root.display(),
            mode,
            tables.len()
        );
        Ok(ParquetEngine {
            root,
            mode,
            tables,
            pending_metadata: BTreeMap::new(),
        })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Mode the store was opened with.
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    fn ensure_writable(&self) -> StoreResult<()> {
        ensure!(
            self.mode == OpenMode::ReadWrite,
            ReadOnlySnafu {
                root: self.root.display().to_string(),
            }
        );
        Ok(())
    }

    fn manifest(&self, key: &str) -> StoreResult<&TableManifest> {
        self.tables.get(key).context(KeyNotFoundSnafu { key })
    }

    fn has_node(&self, key: &str) -> bool {
        key == "/" || (validate_key(key).is_ok() && node_dir(&self.root, key).is_dir())
    }

    fn table_schema(&self, key: &str) -> StoreResult<SchemaRef> {
        let manifest = self.manifest(key)?;
        let seg = manifest
            .segments
            .first()
            .context(KeyNotFoundSnafu { key })?;
        let builder = open_segment(&node_dir(&self.root, key), seg)?;
        Ok(builder.schema().clone())
    }

    fn empty_projection(&self, key: &str, columns: Option<&[String]>) -> StoreResult<RecordBatch> {
        let schema = self.table_schema(key)?;
        let indices = projection_indices(&schema, key, columns)?;
        let projected = schema.project(&indices).context(ArrowSnafu)?;
        Ok(RecordBatch::new_empty(Arc::new(projected)))
    }

    fn write_segment(&self, key: &str, seq: usize, batch: &RecordBatch) -> StoreResult<String> {
        let rel = format!("{DATA_DIR}/part-{seq:08}.parquet");
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();

        let mut writer =
            ArrowWriter::try_new(Vec::new(), batch.schema(), Some(props)).context(ParquetSnafu)?;
        writer.write(batch).context(ParquetSnafu)?;
        let bytes = writer.into_inner().context(ParquetSnafu)?;

        write_atomic(&node_dir(&self.root, key).join(&rel), &bytes)?;
        Ok(rel)
    }
}

impl StorageEngine for ParquetEngine {
    fn keys(&self) -> StoreResult<Vec<String>> {
        Ok(self.tables.keys().cloned().collect())
    }

    fn has_table(&self, key: &str) -> bool {
        self.tables.contains_key(key)
    }

    fn column_names(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(data_column_names(&*self.table_schema(key)?))
    }

    fn nrows(&self, key: &str) -> StoreResult<u64> {
        Ok(self.manifest(key)?.nrows())
    }

    fn select<'a>(
        &'a self,
        key: &str,
        columns: Option<&[String]>,
        range: &TimeFrame,
        chunk_size: usize,
    ) -> StoreResult<RowGroups<'a>> {
        // Surface unknown columns before the first group is pulled.
        projection_indices(&*self.table_schema(key)?, key, columns)?;

        let predicate = IndexPredicate::Within(*range);
        let candidates: Vec<SegmentEntry> = self
            .manifest(key)?
            .segments
            .iter()
            .filter(|seg| seg.may_match(&predicate))
            .cloned()
            .collect();

        let dir = node_dir(&self.root, key);
        let key = key.to_string();
        let columns = columns.map(<[String]>::to_vec);
        let batch_size = chunk_size.max(1);

        let batches = candidates.into_iter().flat_map(move |seg| {
            let groups: RowGroups<'static> =
                match scan_segment(&dir, &key, &seg, columns.as_deref(), batch_size, predicate) {
                    Ok(it) => Box::new(it),
                    Err(e) => Box::new(std::iter::once(Err(e))),
                };
            groups
        });

        Ok(Box::new(Rechunk::new(batches, chunk_size)))
    }

    fn select_coordinates(&self, key: &str, predicate: &IndexPredicate) -> StoreResult<Vec<u64>> {
        let dir = node_dir(&self.root, key);
        let index_only: &[String] = &[];
        let mut positions = Vec::new();

        for (offset, seg) in self.manifest(key)?.with_offsets() {
            if !seg.may_match(predicate) {
                continue;
            }
            let builder = open_segment(&dir, seg)?;
            let mask = projection_mask(&builder, key, Some(index_only))?;
            let reader = builder
                .with_projection(mask)
                .build()
                .context(ParquetSnafu)?;

            let mut row = offset;
            for batch in reader {
                let batch = batch.context(ArrowSnafu)?;
                positions.extend(
                    index::matching_positions(&batch, key, predicate)?
                        .into_iter()
                        .map(|p| row + p as u64),
                );
                row += batch.num_rows() as u64;
            }
        }
        Ok(positions)
    }

    fn first_coordinate(&self, key: &str, predicate: &IndexPredicate) -> StoreResult<Option<u64>> {
        let dir = node_dir(&self.root, key);
        let index_only: &[String] = &[];

        for (offset, seg) in self.manifest(key)?.with_offsets() {
            if !seg.may_match(predicate) {
                continue;
            }
            let builder = open_segment(&dir, seg)?;
            let mask = projection_mask(&builder, key, Some(index_only))?;
            let reader = builder
                .with_projection(mask)
                .build()
                .context(ParquetSnafu)?;

            let mut row = offset;
            for batch in reader {
                let batch = batch.context(ArrowSnafu)?;
                if let Some(p) = index::matching_positions(&batch, key, predicate)?.first() {
                    return Ok(Some(row + *p as u64));
                }
                row += batch.num_rows() as u64;
            }
        }
        Ok(None)
    }

    fn select_rows(
        &self,
        key: &str,
        columns: Option<&[String]>,
        start: u64,
        n: usize,
    ) -> StoreResult<RecordBatch> {
        let empty = self.empty_projection(key, columns)?;
        let dir = node_dir(&self.root, key);
        let mut remaining = n;
        let mut out = Vec::new();

        for (offset, seg) in self.manifest(key)?.with_offsets() {
            if remaining == 0 {
                break;
            }
            let end = offset + seg.row_count;
            if end <= start {
                continue;
            }

            let skip = start.saturating_sub(offset) as usize;
            let builder = open_segment(&dir, seg)?;
            let mask = projection_mask(&builder, key, columns)?;
            let reader = builder
                .with_projection(mask)
                .with_offset(skip)
                .with_limit(remaining)
                .with_batch_size(remaining)
                .build()
                .context(ParquetSnafu)?;

            for batch in reader {
                let batch = batch.context(ArrowSnafu)?;
                remaining = remaining.saturating_sub(batch.num_rows());
                out.push(batch);
            }
        }

        concat_batches(&empty.schema(), &out).context(ArrowSnafu)
    }

    fn append(&mut self, key: &str, batch: &RecordBatch) -> StoreResult<()> {
        self.ensure_writable()?;
        validate_key(key)?;
        if key == "/" {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
                reason: "cannot store a table at the root".to_string(),
            });
        }

        let last = match self.tables.get(key) {
            Some(manifest) => {
                let expected = self.table_schema(key)?;
                ensure!(
                    expected.fields() == batch.schema().fields(),
                    SchemaMismatchSnafu {
                        key,
                        expected: expected.to_string(),
                        found: batch.schema().to_string(),
                    }
                );
                if batch.num_rows() == 0 {
                    return Ok(());
                }
                manifest.last_index()
            }
            None => None,
        };

        let bounds = check_append_order(batch, key, last)?;
        let mut manifest = self.tables.get(key).cloned().unwrap_or_default();
        let path = self.write_segment(key, manifest.segments.len() + 1, batch)?;

        manifest.segments.push(SegmentEntry {
            path,
            row_count: batch.num_rows() as u64,
            ts_min: bounds.map(|(lo, _)| lo),
            ts_max: bounds.map(|(_, hi)| hi),
        });
        write_json_atomic(&node_dir(&self.root, key).join(MANIFEST_FILE), &manifest)?;

        debug!(
            "appended {} rows to {key} (segment {})",
            batch.num_rows(),
            manifest.segments.len()
        );
        self.tables.insert(key.to_string(), manifest);
        Ok(())
    }

    fn metadata(&self, key: &str) -> StoreResult<Metadata> {
        if let Some(pending) = self.pending_metadata.get(key) {
            return Ok(pending.clone());
        }
        ensure!(self.has_node(key), KeyNotFoundSnafu { key });

        let path = node_dir(&self.root, key).join(METADATA_FILE);
        read_json_opt::<Metadata>(&path)?.context(MetadataNotFoundSnafu { key })
    }

    fn set_metadata(&mut self, key: &str, metadata: Metadata) -> StoreResult<()> {
        self.ensure_writable()?;
        ensure!(self.has_node(key), KeyNotFoundSnafu { key });
        self.pending_metadata.insert(key.to_string(), metadata);
        Ok(())
    }

    fn flush(&mut self) -> StoreResult<()> {
        for (key, metadata) in std::mem::take(&mut self.pending_metadata) {
            let path = node_dir(&self.root, &key).join(METADATA_FILE);
            write_json_atomic(&path, &metadata)?;
            debug!("flushed metadata for {key}");
        }
        Ok(())
    }

    fn children(&self, key: &str) -> StoreResult<BTreeSet<String>> {
        ensure!(self.has_node(key), KeyNotFoundSnafu { key });
        Ok(child_dirs(&node_dir(&self.root, key))?.into_iter().collect())
    }

    fn close(&mut self) -> StoreResult<()> {
        self.flush()?;
        self.tables.clear();
        debug!("closed store at {}", self.root.display());
        Ok(())
    }

    fn reopen(&mut self) -> StoreResult<()> {
        self.flush()?;
        self.tables = load_tables(&self.root)?;
        debug!("reopened store at {}", self.root.display());
        Ok(())
    }
}

impl Drop for ParquetEngine {
    fn drop(&mut self) {
        if !self.pending_metadata.is_empty() {
            warn!(
                "dropping store at {} with {} unflushed metadata writes",
                self.root.display(),
                self.pending_metadata.len()
            );
        }
    }
}
