#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use arrow::array::{Float64Array, RecordBatch, TimestampSecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use nilm_store_core::{Metadata, OpenMode, ParquetEngine, WindowedStore};

pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

pub fn power_batch(ts: &[i64]) -> TestResult<RecordBatch> {
    let schema = Schema::new(vec![
        Field::new("index", DataType::Timestamp(TimeUnit::Second, None), false),
        Field::new("power", DataType::Float64, false),
        Field::new("voltage", DataType::Float64, false),
    ]);
    Ok(RecordBatch::try_new(
        Arc::new(schema),
        vec![
            Arc::new(TimestampSecondArray::from(ts.to_vec())),
            Arc::new(Float64Array::from(
                ts.iter().map(|s| *s as f64 * 10.0).collect::<Vec<_>>(),
            )),
            Arc::new(Float64Array::from(vec![240.0; ts.len()])),
        ],
    )?)
}

/// Two meters under building 1, ten readings each at 0..10 seconds, plus
/// dataset and building metadata.
pub fn seed_store(root: &Path) -> TestResult {
    let mut store = WindowedStore::new(ParquetEngine::open(root, OpenMode::ReadWrite)?);
    let ts: Vec<i64> = (0..10).collect();
    store.append("/building1/elec/meter1", &power_batch(&ts[..6])?)?;
    store.append("/building1/elec/meter1", &power_batch(&ts[6..])?)?;
    store.append("/building1/elec/meter2", &power_batch(&ts)?)?;

    let mut dataset = Metadata::new();
    dataset.insert("name".into(), "REDD".into());
    store.save_metadata("/", dataset)?;

    let mut building = Metadata::new();
    building.insert("instance".into(), 1.into());
    store.save_metadata("/building1", building)?;

    store.close()?;
    Ok(())
}
