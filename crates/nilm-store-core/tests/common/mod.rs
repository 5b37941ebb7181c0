#![allow(dead_code)]

use std::sync::Arc;

use arrow::array::{Float32Array, Float64Array, RecordBatch, TimestampNanosecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use chrono::{DateTime, TimeZone, Utc};
use nilm_store_core::{Chunk, OpenMode, ParquetEngine, StorageEngine, WindowedStore};
use tempfile::TempDir;

pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

pub const METER1: &str = "/building1/elec/meter1";
pub const METER2: &str = "/building1/elec/meter2";

pub fn secs(s: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(s, 0).single().expect("valid timestamp")
}

/// Readings at the given second offsets: `power` = offset, `reactive` = -offset.
pub fn readings(ts: &[i64]) -> TestResult<RecordBatch> {
    let schema = Schema::new(vec![
        Field::new(
            "index",
            DataType::Timestamp(TimeUnit::Nanosecond, Some("UTC".into())),
            false,
        ),
        Field::new("power", DataType::Float64, false),
        Field::new("reactive", DataType::Float32, false),
    ]);

    let index = TimestampNanosecondArray::from(
        ts.iter().map(|s| s * 1_000_000_000).collect::<Vec<_>>(),
    )
    .with_timezone("UTC");
    let power = Float64Array::from(ts.iter().map(|s| *s as f64).collect::<Vec<_>>());
    let reactive = Float32Array::from(ts.iter().map(|s| -(*s as f32)).collect::<Vec<_>>());

    Ok(RecordBatch::try_new(
        Arc::new(schema),
        vec![Arc::new(index), Arc::new(power), Arc::new(reactive)],
    )?)
}

/// A read-write store under a fresh temp dir with `segments` appended to `key`.
pub fn store_with_segments(
    key: &str,
    segments: &[&[i64]],
) -> TestResult<(TempDir, WindowedStore<ParquetEngine>)> {
    let tmp = TempDir::new()?;
    let engine = ParquetEngine::open(tmp.path(), OpenMode::ReadWrite)?;
    let mut store = WindowedStore::new(engine);
    for ts in segments {
        store.append(key, &readings(ts)?)?;
    }
    Ok((tmp, store))
}

pub fn chunk_secs(chunk: &Chunk) -> TestResult<Vec<i64>> {
    Ok(chunk.index()?.iter().map(|t| t.timestamp()).collect())
}

pub fn batch_secs(batch: &RecordBatch) -> TestResult<Vec<i64>> {
    Ok(nilm_store_core::index_values(batch)?
        .iter()
        .map(|t| t.timestamp())
        .collect())
}

pub fn has_table<E: StorageEngine>(store: &WindowedStore<E>, key: &str) -> bool {
    store.engine().has_table(key)
}
