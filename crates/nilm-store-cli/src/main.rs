//! CLI tool for inspecting nilm-store containers.

mod error;
mod report;

use std::path::{Path, PathBuf};

use arrow::util::pretty::pretty_format_batches;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use log::debug;
use nilm_store_core::{
    LoadOptions, OpenMode, ParquetEngine, StoreConfig, TimeFrame, WindowedStore,
};
use snafu::ResultExt;

use crate::{
    error::{
        CliResult, GuardSnafu, LoadConfigSnafu, OpenStoreSnafu, ReadSnafu, RenderMetadataSnafu,
        RenderRowsSnafu,
    },
    report::{TableInfo, chunk_line, parse_timestamp},
};

type Store = WindowedStore<ParquetEngine>;

#[derive(Debug, Subcommand)]
enum Command {
    /// List every table key in the store
    Keys,

    /// List the immediate children of a node
    Ls {
        #[arg(default_value = "/")]
        key: String,
    },

    /// Print the metadata attached to a node as JSON
    Metadata {
        #[arg(default_value = "/")]
        key: String,
    },

    /// Summarize a table: columns, row count, timeframe and memory estimate
    Info {
        key: String,

        #[command(flatten)]
        window: WindowArgs,
    },

    /// Stream a table chunk by chunk, printing one line per chunk
    Load {
        key: String,

        /// Repeatable data column names (default: every column)
        #[arg(long = "column")]
        columns: Vec<String>,

        /// Period start (RFC 3339 or epoch seconds)
        #[arg(long, value_parser = parse_timestamp)]
        start: Option<DateTime<Utc>>,

        /// Period end, exclusive (RFC 3339 or epoch seconds)
        #[arg(long, value_parser = parse_timestamp)]
        end: Option<DateTime<Utc>>,

        #[command(flatten)]
        window: WindowArgs,

        /// Maximum rows per chunk (default: from config)
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Look-ahead rows per chunk (default: from config)
        #[arg(long)]
        look_ahead: Option<usize>,

        /// Refuse the load if the period's estimated footprint exceeds the allowance
        #[arg(long, default_value_t = false)]
        guard: bool,

        /// Print each chunk's rows as a table
        #[arg(long, default_value_t = false)]
        print: bool,
    },
}

#[derive(Debug, clap::Args)]
struct WindowArgs {
    /// Window start (RFC 3339 or epoch seconds)
    #[arg(long, value_parser = parse_timestamp)]
    window_start: Option<DateTime<Utc>>,

    /// Window end, exclusive (RFC 3339 or epoch seconds)
    #[arg(long, value_parser = parse_timestamp)]
    window_end: Option<DateTime<Utc>>,
}

impl WindowArgs {
    fn frame(&self) -> TimeFrame {
        TimeFrame::from_bounds(self.window_start, self.window_end)
    }
}

#[derive(Debug, Parser)]
#[command(name = "nilm-store")]
struct Cli {
    /// Root directory of the store
    #[arg(long)]
    store: PathBuf,

    /// JSON file with read configuration (memory allowance, chunk size, look-ahead)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

fn open_store(root: &Path, config: Option<&Path>) -> CliResult<Store> {
    let config = match config {
        Some(path) => StoreConfig::from_json_file(path).context(LoadConfigSnafu { path })?,
        None => StoreConfig::default(),
    };
    debug!("opening {} with {config:?}", root.display());

    let engine =
        ParquetEngine::open(root, OpenMode::ReadOnly).context(OpenStoreSnafu { path: root })?;
    Ok(WindowedStore::with_config(engine, config))
}

fn cmd_keys(store: &Store) -> CliResult<()> {
    for key in store.keys().context(ReadSnafu { key: "/" })? {
        println!("{key}");
    }
    Ok(())
}

fn cmd_ls(store: &Store, key: &str) -> CliResult<()> {
    for child in store.child_keys(key).context(ReadSnafu { key })? {
        println!("{child}");
    }
    Ok(())
}

fn cmd_metadata(store: &Store, key: &str) -> CliResult<()> {
    let metadata = store.load_metadata(key).context(ReadSnafu { key })?;
    let rendered = serde_json::to_string_pretty(&metadata).context(RenderMetadataSnafu { key })?;
    println!("{rendered}");
    Ok(())
}

fn cmd_info(store: &Store, key: &str) -> CliResult<()> {
    let columns = store.column_names(key).context(ReadSnafu { key })?;
    let rows = store.row_count(key, None).context(ReadSnafu { key })?;
    let timeframe = store.table_timeframe(key).context(ReadSnafu { key })?;
    let estimated_bytes = store
        .estimate_memory(key, rows, None)
        .context(ReadSnafu { key })?;

    let info = TableInfo {
        key: nilm_store_core::normalize_key(key),
        columns,
        rows,
        timeframe,
        estimated_bytes,
    };
    println!("{info}");
    Ok(())
}

struct LoadArgs {
    columns: Vec<String>,
    period: TimeFrame,
    chunk_size: Option<usize>,
    look_ahead: Option<usize>,
    guard: bool,
    print: bool,
}

fn cmd_load(store: &Store, key: &str, args: LoadArgs) -> CliResult<()> {
    let columns = (!args.columns.is_empty()).then_some(args.columns);

    store
        .check_columns(key, columns.as_deref())
        .context(ReadSnafu { key })?;
    if args.guard {
        let rows = store
            .row_count(key, Some(&args.period))
            .context(ReadSnafu { key })?;
        store
            .check_data_will_fit(key, rows, columns.as_deref())
            .context(GuardSnafu { key })?;
    }

    let mut options = LoadOptions::new().periods([args.period]);
    options.columns = columns;
    options.chunk_size = args.chunk_size;
    options.look_ahead_rows = args.look_ahead;

    for (n, chunk) in store.load(key, options).enumerate() {
        let chunk = chunk.context(ReadSnafu { key })?;
        println!("{}", chunk_line(n, &chunk));
        if args.print && !chunk.is_empty() {
            let rendered = pretty_format_batches(&[chunk.data]).context(RenderRowsSnafu)?;
            println!("{rendered}");
        }
    }
    Ok(())
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();
    let mut store = open_store(&cli.store, cli.config.as_deref())?;

    match cli.cmd {
        Command::Keys => cmd_keys(&store),
        Command::Ls { key } => cmd_ls(&store, &key),
        Command::Metadata { key } => cmd_metadata(&store, &key),
        Command::Info { key, window } => {
            store.set_window(window.frame());
            cmd_info(&store, &key)
        }
        Command::Load {
            key,
            columns,
            start,
            end,
            window,
            chunk_size,
            look_ahead,
            guard,
            print,
        } => {
            store.set_window(window.frame());
            let args = LoadArgs {
                columns,
                period: TimeFrame::from_bounds(start, end),
                chunk_size,
                look_ahead,
                guard,
                print,
            };
            cmd_load(&store, &key, args)
        }
    }
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
