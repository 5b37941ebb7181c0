//! Windowed, chunked reads over a hierarchical, time-indexed columnar store.
//!
//! This crate provides the pieces needed to stream a metered dataset in
//! memory-bounded pieces:
//!
//! - Half-open time intervals with intersection and emptiness (`timeframe`).
//! - Location keys such as `/building1/elec/meter1` and canonical path
//!   joining (`key`).
//! - A storage-engine capability trait with an on-disk Parquet engine and an
//!   in-memory engine (`engine`).
//! - A windowed reader that clips every read to a global time window, splits
//!   tables into chunks and attaches a look-ahead buffer to each chunk
//!   (`store`).
//!
//! Tools (for example, the `nilm-store` CLI) are expected to depend on this
//! crate rather than reading the container layout directly.
#![deny(missing_docs)]
pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod key;
pub mod store;
pub mod timeframe;

mod storage;

#[cfg(test)]
mod test_util;

pub use config::StoreConfig;
pub use engine::{
    MemoryEngine, Metadata, OpenMode, ParquetEngine, RowGroups, StorageEngine,
};
pub use error::{StoreError, StoreResult};
pub use index::{INDEX_COLUMN, IndexPredicate, index_values};
pub use key::{Key, KeyErrorKind, ParseKeyError, join_key, normalize_key};
pub use store::{Chunk, Chunks, LoadOptions, WindowedStore, estimate_memory_requirement};
pub use timeframe::TimeFrame;
