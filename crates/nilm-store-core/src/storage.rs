//! Filesystem helpers for the on-disk engine.
//!
//! Sidecar files (table manifests, node metadata) and segment files are
//! written with write-then-rename semantics so a crash never leaves a
//! half-written file under its final name.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Serialize, de::DeserializeOwned};
use snafu::prelude::*;

use crate::error::{IoSnafu, JsonSnafu, StoreResult};

/// Guard that removes a temporary file on drop unless disarmed.
/// Used to ensure cleanup on error paths during atomic writes.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            // Best-effort cleanup; we are already on an error path.
            let _ = fs::remove_file(&self.path);
        }
    }
}

pub(crate) fn create_dir_all(path: &Path) -> StoreResult<()> {
    fs::create_dir_all(path).context(IoSnafu {
        path: path.display().to_string(),
    })
}

/// Write `contents` to `path` atomically (temp file, fsync, rename).
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("tmp");
    let mut guard = TempFileGuard::new(tmp_path.clone());
    let tmp_display = tmp_path.display().to_string();

    {
        let mut file = fs::File::create(&tmp_path).context(IoSnafu {
            path: tmp_display.clone(),
        })?;
        file.write_all(contents).context(IoSnafu {
            path: tmp_display.clone(),
        })?;
        file.sync_all().context(IoSnafu { path: tmp_display })?;
    }

    fs::rename(&tmp_path, path).context(IoSnafu {
        path: path.display().to_string(),
    })?;
    guard.disarm();
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    let bytes = serde_json::to_vec_pretty(value).context(JsonSnafu {
        path: path.display().to_string(),
    })?;
    write_atomic(path, &bytes)
}

/// Read and deserialize a JSON file; `Ok(None)` if it does not exist.
pub(crate) fn read_json_opt<T: DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).context(IoSnafu {
                path: path.display().to_string(),
            });
        }
    };
    serde_json::from_str(&text)
        .map(Some)
        .context(JsonSnafu {
            path: path.display().to_string(),
        })
}

/// Immediate subdirectory names of `dir`, skipping reserved (`_`-prefixed) ones.
pub(crate) fn child_dirs(dir: &Path) -> StoreResult<Vec<String>> {
    let entries = fs::read_dir(dir).context(IoSnafu {
        path: dir.display().to_string(),
    })?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.context(IoSnafu {
            path: dir.display().to_string(),
        })?;
        let is_dir = entry
            .file_type()
            .context(IoSnafu {
                path: entry.path().display().to_string(),
            })?
            .is_dir();
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_dir && !name.starts_with('_') {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn write_atomic_replaces_contents_and_leaves_no_temp() -> TestResult {
        let tmp = TempDir::new()?;
        let path = tmp.path().join("nested/dir/file.json");

        write_atomic(&path, b"first")?;
        write_atomic(&path, b"second")?;

        assert_eq!(fs::read(&path)?, b"second");
        assert!(!path.with_extension("tmp").exists());
        Ok(())
    }

    #[test]
    fn read_json_opt_missing_is_none() -> TestResult {
        let tmp = TempDir::new()?;
        let missing: Option<serde_json::Value> = read_json_opt(&tmp.path().join("nope.json"))?;
        assert!(missing.is_none());

        write_json_atomic(&tmp.path().join("v.json"), &serde_json::json!({"a": [1, 2]}))?;
        let value: Option<serde_json::Value> = read_json_opt(&tmp.path().join("v.json"))?;
        assert_eq!(value, Some(serde_json::json!({"a": [1, 2]})));
        Ok(())
    }

    #[test]
    fn child_dirs_skips_files_and_reserved_names() -> TestResult {
        let tmp = TempDir::new()?;
        fs::create_dir_all(tmp.path().join("b"))?;
        fs::create_dir_all(tmp.path().join("a"))?;
        fs::create_dir_all(tmp.path().join("_data"))?;
        fs::write(tmp.path().join("file.txt"), b"x")?;

        assert_eq!(child_dirs(tmp.path())?, vec!["a", "b"]);
        Ok(())
    }
}
