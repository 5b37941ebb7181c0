//! Error types and SNAFU context selectors for the store.
//!
//! `StoreError` is the single error type surfaced by the reader and by both
//! storage engines. Context selectors are crate-visible so engine and reader
//! code can attach the key or path being touched without re-exporting the
//! selectors at the crate root.

use arrow::{datatypes::DataType, error::ArrowError};
use chrono::{DateTime, Utc};
use parquet::errors::ParquetError;
use snafu::prelude::*;

/// Convenience alias for results produced by store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from store, engine and reader operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    /// The requested key does not address a table (or node) in the store.
    #[snafu(display("{key} not in store"))]
    KeyNotFound {
        /// Normalized key that was looked up.
        key: String,
    },

    /// One or more requested columns are not part of the table schema.
    #[snafu(display("Columns {columns:?} not found in table {key}"))]
    ColumnsNotFound {
        /// Table key whose schema was checked.
        key: String,
        /// The requested columns that are missing.
        columns: Vec<String>,
    },

    /// The estimated footprint of a read exceeds the configured allowance.
    #[snafu(display(
        "Requested data would use {estimated_mb:.3}MBytes: too much memory (allowance {allowance} bytes)"
    ))]
    OutOfMemory {
        /// Estimated size of the read in megabytes (10^6 bytes).
        estimated_mb: f64,
        /// Configured allowance in bytes.
        allowance: u64,
    },

    /// A node exists but carries no metadata payload.
    #[snafu(display("No metadata attached to node {key}"))]
    MetadataNotFound {
        /// Node key.
        key: String,
    },

    /// A key contains a segment the container cannot represent.
    #[snafu(display("Invalid key {key}: {reason}"))]
    InvalidKey {
        /// Offending key.
        key: String,
        /// Why the key was rejected.
        reason: String,
    },

    /// A write was attempted through a handle opened read-only.
    #[snafu(display("Store at {root} is opened read-only"))]
    ReadOnly {
        /// Root of the store.
        root: String,
    },

    /// An appended batch does not match the schema of the existing table.
    #[snafu(display("Schema mismatch appending to {key}: expected {expected}, found {found}"))]
    SchemaMismatch {
        /// Table key.
        key: String,
        /// Rendered schema of the existing table.
        expected: String,
        /// Rendered schema of the rejected batch.
        found: String,
    },

    /// An appended batch would break the index ordering of the table.
    #[snafu(display(
        "Out-of-order append to {key}: batch starts at {first} but table ends at {last}"
    ))]
    OutOfOrderAppend {
        /// Table key.
        key: String,
        /// Last index already stored in the table.
        last: DateTime<Utc>,
        /// First offending index in the batch.
        first: DateTime<Utc>,
    },

    /// A batch has no `index` column.
    #[snafu(display("Missing index column in batch for {key}"))]
    MissingIndexColumn {
        /// Table key.
        key: String,
    },

    /// The `index` column exists but is not an Arrow timestamp.
    #[snafu(display("Unsupported index column type {datatype:?} for {key}"))]
    UnsupportedIndexType {
        /// Table key.
        key: String,
        /// Arrow data type encountered for the index column.
        datatype: DataType,
    },

    /// A stored index value cannot be represented as a UTC instant.
    #[snafu(display("Index value {value} out of range for {key}"))]
    IndexOutOfRange {
        /// Table key.
        key: String,
        /// Raw index value in the column's unit.
        value: i64,
    },

    /// The index column contains nulls.
    #[snafu(display("Index column of {key} contains {null_count} null values"))]
    NullIndex {
        /// Table key.
        key: String,
        /// Number of null index entries.
        null_count: usize,
    },

    /// Filesystem I/O failure.
    #[snafu(display("I/O error at {path}: {source}"))]
    Io {
        /// Path being accessed.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A JSON sidecar (manifest or metadata) could not be read or written.
    #[snafu(display("JSON error at {path}: {source}"))]
    Json {
        /// Path of the sidecar file.
        path: String,
        /// Underlying serde_json error.
        source: serde_json::Error,
    },

    /// Parquet read or write error.
    #[snafu(display("Parquet error: {source}"))]
    Parquet {
        /// Underlying Parquet error.
        source: ParquetError,
    },

    /// Arrow compute or conversion error.
    #[snafu(display("Arrow error: {source}"))]
    Arrow {
        /// Underlying Arrow error.
        source: ArrowError,
    },
}

impl StoreError {
    /// True for the "requested thing is absent" family (keys, columns, metadata).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::KeyNotFound { .. }
                | StoreError::ColumnsNotFound { .. }
                | StoreError::MetadataNotFound { .. }
        )
    }
}
