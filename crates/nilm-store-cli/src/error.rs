use std::path::PathBuf;

use arrow::error::ArrowError;
use nilm_store_core::StoreError;
use snafu::Snafu;

pub type CliResult<T> = std::result::Result<T, CliError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("Failed to load config from {}: {source}", path.display()))]
    LoadConfig { path: PathBuf, source: StoreError },

    #[snafu(display(
        "Failed to open store at {}: {source}. \
         Ensure the directory exists and is a nilm-store container.",
        path.display()
    ))]
    OpenStore { path: PathBuf, source: StoreError },

    #[snafu(display("Failed to read {key}: {source}"))]
    Read { key: String, source: StoreError },

    #[snafu(display("Refusing to load {key}: {source}"))]
    Guard { key: String, source: StoreError },

    #[snafu(display("Failed to render metadata for {key}: {source}"))]
    RenderMetadata {
        key: String,
        source: serde_json::Error,
    },

    #[snafu(display("Failed to render rows: {source}"))]
    RenderRows { source: ArrowError },
}
