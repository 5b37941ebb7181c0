//! Windowed, chunked reader over a storage engine.
//!
//! A [`WindowedStore`] owns one engine handle and a global time window. Every
//! read made through it is clipped to that window:
//!
//! - [`WindowedStore::load`] streams a table as a lazy sequence of
//!   [`Chunk`]s, one pass per caller period, each chunk carrying a small
//!   look-ahead buffer read from the rows that physically follow it.
//! - Row counts and the table's extent are computed against the window.
//! - A memory guard estimates the footprint of a read before it is made.
//!
//! ```
//! use nilm_store_core::{LoadOptions, MemoryEngine, WindowedStore};
//!
//! let store = WindowedStore::new(MemoryEngine::new());
//! let mut chunks = store.load("/building1/elec/meter1", LoadOptions::default());
//! // Missing tables surface on the first pull.
//! assert!(chunks.next().unwrap().is_err());
//! assert!(chunks.next().is_none());
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::datatypes::Schema;
use chrono::{DateTime, Utc};
use log::debug;
use snafu::prelude::*;

use crate::config::StoreConfig;
use crate::engine::{Metadata, RowGroups, StorageEngine};
use crate::error::{ColumnsNotFoundSnafu, OutOfMemorySnafu, StoreResult};
use crate::index::{INDEX_COLUMN, IndexPredicate, index_bounds, index_values};
use crate::key::normalize_key;
use crate::timeframe::TimeFrame;

/// Bytes assumed per data value by the memory estimator.
const BYTES_PER_VALUE: u64 = 4;
/// Bytes per index value.
const BYTES_PER_INDEX: u64 = 8;

/// Estimated in-memory size, in bytes, of `nrows` rows of `columns`.
///
/// Each data column costs 4 bytes per row and the index 8 bytes per row.
/// A projection of only the index (`["index"]`) costs just the index term.
///
/// ```
/// use nilm_store_core::estimate_memory_requirement;
///
/// assert_eq!(estimate_memory_requirement(1000, &["a", "b"]), 16_000);
/// assert_eq!(estimate_memory_requirement(1000, &["index"]), 8_000);
/// ```
pub fn estimate_memory_requirement<S: AsRef<str>>(nrows: u64, columns: &[S]) -> u64 {
    let index_bytes = nrows * BYTES_PER_INDEX;
    if matches!(columns, [only] if only.as_ref() == INDEX_COLUMN) {
        return index_bytes;
    }
    nrows * columns.len() as u64 * BYTES_PER_VALUE + index_bytes
}

/// One bounded unit of rows produced by [`WindowedStore::load`].
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Rows of the chunk, the index column included.
    pub data: RecordBatch,
    /// `[first, last]` index of `data`, or empty when `data` has no rows.
    pub timeframe: TimeFrame,
    /// Up to `look_ahead_rows` rows stored immediately after the chunk's last row.
    pub look_ahead: RecordBatch,
}

impl Chunk {
    /// The "no data for this period" chunk.
    pub fn empty() -> Self {
        let schema = Arc::new(Schema::empty());
        Chunk {
            data: RecordBatch::new_empty(schema.clone()),
            timeframe: TimeFrame::empty(),
            look_ahead: RecordBatch::new_empty(schema),
        }
    }

    /// True if the chunk carries no rows.
    pub fn is_empty(&self) -> bool {
        self.data.num_rows() == 0
    }

    /// Number of rows in the chunk (look-ahead excluded).
    pub fn num_rows(&self) -> usize {
        self.data.num_rows()
    }

    /// Index of the chunk's rows as UTC instants.
    pub fn index(&self) -> StoreResult<Vec<DateTime<Utc>>> {
        if self.data.num_columns() == 0 {
            return Ok(Vec::new());
        }
        index_values(&self.data)
    }
}

/// Options for [`WindowedStore::load`]. Unset sizes fall back to the
/// store's [`StoreConfig`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadOptions {
    /// Data columns to read; `None` reads every column.
    pub columns: Option<Vec<String>>,
    /// Periods to read, in order; `None` reads one unbounded period.
    pub periods: Option<Vec<TimeFrame>>,
    /// Look-ahead rows per chunk.
    pub look_ahead_rows: Option<usize>,
    /// Maximum rows per chunk.
    pub chunk_size: Option<usize>,
}

impl LoadOptions {
    /// Options with every field unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the read to `columns` (the index is always read).
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Read these periods, in order.
    pub fn periods(mut self, periods: impl IntoIterator<Item = TimeFrame>) -> Self {
        self.periods = Some(periods.into_iter().collect());
        self
    }

    /// Attach up to `rows` look-ahead rows to each chunk.
    pub fn look_ahead_rows(mut self, rows: usize) -> Self {
        self.look_ahead_rows = Some(rows);
        self
    }

    /// Emit chunks of at most `rows` rows.
    pub fn chunk_size(mut self, rows: usize) -> Self {
        self.chunk_size = Some(rows);
        self
    }
}

/// A store handle scoped to a global time window.
#[derive(Debug)]
pub struct WindowedStore<E> {
    engine: E,
    window: TimeFrame,
    config: StoreConfig,
}

impl<E: StorageEngine> WindowedStore<E> {
    /// Wrap `engine` with an unbounded window and default configuration.
    pub fn new(engine: E) -> Self {
        Self::with_config(engine, StoreConfig::default())
    }

    /// Wrap `engine` with an unbounded window and the given configuration.
    pub fn with_config(engine: E, config: StoreConfig) -> Self {
        WindowedStore {
            engine,
            window: TimeFrame::unbounded(),
            config,
        }
    }

    /// The window every read is clipped to.
    pub fn window(&self) -> &TimeFrame {
        &self.window
    }

    /// Replace the window.
    pub fn set_window(&mut self, window: TimeFrame) {
        self.window = window;
    }

    /// Read configuration of this handle.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The underlying engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Give up the window and return the engine.
    pub fn into_engine(self) -> E {
        self.engine
    }

    /// Stream the table at `key` as window-clipped chunks.
    ///
    /// For each period (one unbounded period if none are given):
    ///
    /// 1. The period is intersected with the window. An empty intersection
    ///    yields exactly one empty chunk.
    /// 2. Otherwise rows in the intersection are streamed in index order in
    ///    groups of `chunk_size` rows (the last group may be shorter). A
    ///    period with no matching rows yields one empty chunk.
    /// 3. Each group's look-ahead is read from the rows stored strictly
    ///    after its last index, regardless of the window.
    ///
    /// Errors end the sequence.
    pub fn load(&self, key: &str, options: LoadOptions) -> Chunks<'_, E> {
        let key = normalize_key(key);
        let periods = options
            .periods
            .unwrap_or_else(|| vec![TimeFrame::unbounded()]);
        let look_ahead_rows = options
            .look_ahead_rows
            .unwrap_or(self.config.look_ahead_rows);
        let chunk_size = options
            .chunk_size
            .unwrap_or(self.config.chunk_size)
            .max(1);

        debug!(
            "load {key}: {} period(s), window {}, chunk_size {chunk_size}, look_ahead {look_ahead_rows}",
            periods.len(),
            self.window
        );
        Chunks {
            store: self,
            key,
            columns: options.columns,
            periods: periods.into_iter(),
            look_ahead_rows,
            chunk_size,
            current: None,
            yielded: false,
            done: false,
        }
    }

    /// Fail with `ColumnsNotFound` unless every requested column exists in
    /// the table at `key` (`index` always exists). `None` always passes.
    pub fn check_columns(&self, key: &str, columns: Option<&[String]>) -> StoreResult<()> {
        let Some(columns) = columns else {
            return Ok(());
        };
        let key = normalize_key(key);
        let known: BTreeSet<String> = self
            .engine
            .column_names(&key)?
            .into_iter()
            .chain([INDEX_COLUMN.to_string()])
            .collect();

        let missing: Vec<String> = columns
            .iter()
            .filter(|c| !known.contains(*c))
            .cloned()
            .collect();
        ensure!(
            missing.is_empty(),
            ColumnsNotFoundSnafu {
                key,
                columns: missing,
            }
        );
        Ok(())
    }

    /// Data column names of the table at `key`.
    pub fn column_names(&self, key: &str) -> StoreResult<Vec<String>> {
        self.engine.column_names(&normalize_key(key))
    }

    /// Estimated bytes to read `nrows` rows of `columns` (every column when
    /// `None`) from the table at `key`.
    pub fn estimate_memory(
        &self,
        key: &str,
        nrows: u64,
        columns: Option<&[String]>,
    ) -> StoreResult<u64> {
        match columns {
            Some(columns) => Ok(estimate_memory_requirement(nrows, columns)),
            None => Ok(estimate_memory_requirement(
                nrows,
                self.column_names(key)?.as_slice(),
            )),
        }
    }

    /// Fail with `OutOfMemory` if the estimated read exceeds the configured
    /// allowance. Reads exactly at the allowance pass.
    pub fn check_data_will_fit(
        &self,
        key: &str,
        nrows: u64,
        columns: Option<&[String]>,
    ) -> StoreResult<()> {
        let estimate = self.estimate_memory(key, nrows, columns)?;
        let allowance = self.config.memory_allowance_bytes;
        ensure!(
            estimate <= allowance,
            OutOfMemorySnafu {
                estimated_mb: estimate as f64 / 1e6,
                allowance,
            }
        );
        Ok(())
    }

    /// Rows of the table at `key` inside the window (further restricted to
    /// `timeframe` when given).
    pub fn row_count(&self, key: &str, timeframe: Option<&TimeFrame>) -> StoreResult<u64> {
        let key = normalize_key(key);
        let frame = match timeframe {
            Some(tf) => tf.intersect(&self.window),
            None => self.window,
        };

        if frame.is_empty() {
            return Ok(0);
        }
        if !frame.is_bounded() {
            return self.engine.nrows(&key);
        }
        let coords = self
            .engine
            .select_coordinates(&key, &IndexPredicate::Within(frame))?;
        Ok(coords.len() as u64)
    }

    /// `[first, last]` index of the table at `key`, clipped to the window as
    /// a closed interval. Empty when the table has no rows inside the window.
    pub fn table_timeframe(&self, key: &str) -> StoreResult<TimeFrame> {
        let key = normalize_key(key);
        let nrows = self.engine.nrows(&key)?;
        if nrows == 0 || self.window.is_empty() {
            return Ok(TimeFrame::empty());
        }
        if self.window.is_bounded()
            && self
                .engine
                .first_coordinate(&key, &IndexPredicate::Within(self.window))?
                .is_none()
        {
            return Ok(TimeFrame::empty());
        }

        let index_only: &[String] = &[];
        let first = self.engine.select_rows(&key, Some(index_only), 0, 1)?;
        let last = self.engine.select_rows(&key, Some(index_only), nrows - 1, 1)?;
        let (Some(first), Some(last)) = (
            index_values(&first)?.first().copied(),
            index_values(&last)?.first().copied(),
        ) else {
            return Ok(TimeFrame::empty());
        };

        let start = self.window.start().map_or(first, |s| s.max(first));
        let end = self.window.end().map_or(last, |e| e.min(last));
        Ok(TimeFrame::new(start, end))
    }

    /// Independent copy of the metadata attached to the node at `key`
    /// (`/` for the root).
    pub fn load_metadata(&self, key: &str) -> StoreResult<Metadata> {
        self.engine.metadata(&normalize_key(key))
    }

    /// Attach `metadata` to the node at `key` and flush before returning.
    pub fn save_metadata(&mut self, key: &str, metadata: Metadata) -> StoreResult<()> {
        let key = normalize_key(key);
        self.engine.set_metadata(&key, metadata)?;
        self.engine.flush()?;
        debug!("saved metadata for {key}");
        Ok(())
    }

    /// Names of the immediate children of the node at `key`.
    pub fn child_keys(&self, key: &str) -> StoreResult<BTreeSet<String>> {
        self.engine.children(&normalize_key(key))
    }

    /// Every table key in the store.
    pub fn keys(&self) -> StoreResult<Vec<String>> {
        self.engine.keys()
    }

    /// Append `rows` to the table at `key`, creating it if needed.
    pub fn append(&mut self, key: &str, rows: &RecordBatch) -> StoreResult<()> {
        self.engine.append(&normalize_key(key), rows)
    }

    /// Flush and release the handle.
    pub fn close(mut self) -> StoreResult<()> {
        self.engine.close()
    }

    /// Flush and reload the handle's view of the store.
    pub fn reopen(&mut self) -> StoreResult<()> {
        self.engine.reopen()
    }
}

/// Lazy chunk sequence returned by [`WindowedStore::load`].
///
/// Single pass; the first error is yielded and then the sequence ends.
pub struct Chunks<'a, E> {
    store: &'a WindowedStore<E>,
    key: String,
    columns: Option<Vec<String>>,
    periods: std::vec::IntoIter<TimeFrame>,
    look_ahead_rows: usize,
    chunk_size: usize,
    current: Option<RowGroups<'a>>,
    yielded: bool,
    done: bool,
}

impl<E: StorageEngine> Chunks<'_, E> {
    fn enrich(&self, data: RecordBatch) -> StoreResult<Chunk> {
        let Some((first, last)) = index_bounds(&data, &self.key)? else {
            return Ok(Chunk::empty());
        };
        let engine = &self.store.engine;

        let successor = match self.look_ahead_rows {
            0 => None,
            _ => engine.first_coordinate(&self.key, &IndexPredicate::After(last))?,
        };
        let look_ahead = match successor {
            Some(pos) => engine.select_rows(
                &self.key,
                self.columns.as_deref(),
                pos,
                self.look_ahead_rows,
            )?,
            None => RecordBatch::new_empty(data.schema()),
        };

        Ok(Chunk {
            look_ahead,
            timeframe: TimeFrame::new(first, last),
            data,
        })
    }

    fn fail<T>(&mut self, result: StoreResult<T>) -> StoreResult<T> {
        if result.is_err() {
            self.done = true;
            self.current = None;
        }
        result
    }
}

impl<E: StorageEngine> Iterator for Chunks<'_, E> {
    type Item = StoreResult<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }

            if let Some(groups) = self.current.as_mut() {
                match groups.next() {
                    Some(Ok(batch)) => {
                        self.yielded = true;
                        let chunk = self.enrich(batch);
                        return Some(self.fail(chunk));
                    }
                    Some(Err(e)) => return Some(self.fail(Err(e))),
                    None => {
                        self.current = None;
                        if !self.yielded {
                            return Some(Ok(Chunk::empty()));
                        }
                        continue;
                    }
                }
            }

            let Some(period) = self.periods.next() else {
                self.done = true;
                return None;
            };
            let range = period.intersect(&self.store.window);
            if range.is_empty() {
                debug!("load {}: period {period} outside window", self.key);
                return Some(Ok(Chunk::empty()));
            }

            let groups = self.store.engine.select(
                &self.key,
                self.columns.as_deref(),
                &range,
                self.chunk_size,
            );
            match self.fail(groups) {
                Ok(groups) => {
                    self.current = Some(groups);
                    self.yielded = false;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
