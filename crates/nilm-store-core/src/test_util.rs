use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{
    ArrayRef, AsArray, Float32Array, Float64Array, Int64Array, RecordBatch,
    TimestampMicrosecondArray, TimestampMillisecondArray, TimestampNanosecondArray,
    TimestampSecondArray,
};
use arrow::datatypes::{DataType, Field, Float64Type, Schema, TimeUnit};
use arrow::error::ArrowError;
use chrono::{DateTime, TimeZone, Utc};

use crate::error::StoreError;
use crate::index::index_values;

pub(crate) type TestResult = Result<(), Box<dyn std::error::Error>>;

pub(crate) fn secs(s: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(s, 0).single().expect("valid timestamp")
}

/// Batch with a nanosecond `index`, `power` (= seconds) and constant `voltage`.
pub(crate) fn batch_from_secs(ts: &[i64]) -> Result<RecordBatch, ArrowError> {
    batch_with_unit(TimeUnit::Nanosecond, ts, None)
}

pub(crate) fn batch_with_unit(
    unit: TimeUnit,
    ts: &[i64],
    tz: Option<&str>,
) -> Result<RecordBatch, ArrowError> {
    let index: ArrayRef = match unit {
        TimeUnit::Second => {
            Arc::new(TimestampSecondArray::from(ts.to_vec()).with_timezone_opt(tz))
        }
        TimeUnit::Millisecond => Arc::new(
            TimestampMillisecondArray::from(ts.iter().map(|s| s * 1_000).collect::<Vec<_>>())
                .with_timezone_opt(tz),
        ),
        TimeUnit::Microsecond => Arc::new(
            TimestampMicrosecondArray::from(
                ts.iter().map(|s| s * 1_000_000).collect::<Vec<_>>(),
            )
            .with_timezone_opt(tz),
        ),
        TimeUnit::Nanosecond => Arc::new(
            TimestampNanosecondArray::from(
                ts.iter().map(|s| s * 1_000_000_000).collect::<Vec<_>>(),
            )
            .with_timezone_opt(tz),
        ),
    };

    let schema = Schema::new(vec![
        Field::new("index", DataType::Timestamp(unit, tz.map(Into::into)), false),
        Field::new("power", DataType::Float64, false),
        Field::new("voltage", DataType::Float32, false),
    ]);

    let power = Float64Array::from(ts.iter().map(|s| *s as f64).collect::<Vec<_>>());
    let voltage = Float32Array::from(vec![230.0_f32; ts.len()]);

    RecordBatch::try_new(
        Arc::new(schema),
        vec![index, Arc::new(power), Arc::new(voltage)],
    )
}

/// `batch` with a schema-level metadata entry added.
pub(crate) fn with_schema_metadata(batch: &RecordBatch) -> Result<RecordBatch, ArrowError> {
    let tagged = batch
        .schema()
        .as_ref()
        .clone()
        .with_metadata(HashMap::from([("source".to_string(), "redd".to_string())]));
    batch.clone().with_schema(Arc::new(tagged))
}

pub(crate) fn batch_with_int_index(ts: &[i64]) -> Result<RecordBatch, ArrowError> {
    let schema = Schema::new(vec![
        Field::new("index", DataType::Int64, false),
        Field::new("power", DataType::Float64, false),
    ]);
    RecordBatch::try_new(
        Arc::new(schema),
        vec![
            Arc::new(Int64Array::from(ts.to_vec())),
            Arc::new(Float64Array::from(vec![1.0; ts.len()])),
        ],
    )
}

/// Index of `batch` as whole seconds since the epoch.
pub(crate) fn index_secs(batch: &RecordBatch) -> Result<Vec<i64>, StoreError> {
    Ok(index_values(batch)?
        .into_iter()
        .map(|t| t.timestamp())
        .collect())
}

pub(crate) fn power_values(batch: &RecordBatch) -> Vec<f64> {
    batch
        .column_by_name("power")
        .map(|c| c.as_primitive::<Float64Type>().values().to_vec())
        .unwrap_or_default()
}
