//! Store configuration.
//!
//! `StoreConfig` carries the per-handle knobs that shape reads:
//!
//! - **memory_allowance_bytes**: ceiling used by the memory guard (default: 1 GB)
//! - **look_ahead_rows**: rows attached after each chunk (default: 10)
//! - **chunk_size**: maximum rows per chunk (default: 1,000,000)
//!
//! ```
//! use nilm_store_core::StoreConfig;
//!
//! let config = StoreConfig {
//!     chunk_size: 10_000,
//!     ..Default::default()
//! };
//! assert_eq!(config.look_ahead_rows, 10);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::error::{IoSnafu, JsonSnafu, StoreResult};

/// Default ceiling for the memory guard, in bytes.
pub const DEFAULT_MEMORY_ALLOWANCE_BYTES: u64 = 1_000_000_000;
/// Default number of look-ahead rows attached to each chunk.
pub const DEFAULT_LOOK_AHEAD_ROWS: usize = 10;
/// Default maximum number of rows per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1_000_000;

/// Per-handle read configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Reads estimated above this many bytes are refused by the memory guard.
    #[serde(default = "default_memory_allowance")]
    pub memory_allowance_bytes: u64,

    /// Default look-ahead size for `load`.
    #[serde(default = "default_look_ahead_rows")]
    pub look_ahead_rows: usize,

    /// Default chunk size for `load`.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_memory_allowance() -> u64 {
    DEFAULT_MEMORY_ALLOWANCE_BYTES
}

fn default_look_ahead_rows() -> usize {
    DEFAULT_LOOK_AHEAD_ROWS
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            memory_allowance_bytes: default_memory_allowance(),
            look_ahead_rows: default_look_ahead_rows(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl StoreConfig {
    /// Read a config from a JSON file; missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path).context(IoSnafu {
            path: path.display().to_string(),
        })?;
        serde_json::from_str(&text).context(JsonSnafu {
            path: path.display().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: StoreConfig = serde_json::from_str(r#"{"chunk_size": 500}"#).unwrap();
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.look_ahead_rows, DEFAULT_LOOK_AHEAD_ROWS);
        assert_eq!(config.memory_allowance_bytes, DEFAULT_MEMORY_ALLOWANCE_BYTES);
    }

    #[test]
    fn from_json_file_reads_overrides() -> Result<(), Box<dyn std::error::Error>> {
        let tmp = tempfile::TempDir::new()?;
        let path = tmp.path().join("store.json");
        std::fs::write(&path, r#"{"memory_allowance_bytes": 1024, "look_ahead_rows": 2}"#)?;

        let config = StoreConfig::from_json_file(&path)?;
        assert_eq!(config.memory_allowance_bytes, 1024);
        assert_eq!(config.look_ahead_rows, 2);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        Ok(())
    }
}
