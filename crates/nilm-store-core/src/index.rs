//! Index-column helpers shared by the storage engines.
//!
//! Every table carries a reserved `index` column of Arrow type
//! `Timestamp(unit, tz)`. This module implements the predicates the engines
//! evaluate against it:
//! - Half-open range filtering `[start, end)` with either bound optional.
//! - Strict "after" filtering used to locate the look-ahead start.
//!
//! Comparisons run on the column's native unit. Bounds are converted to that
//! unit (rounded so sub-unit bounds keep their meaning, and clamped when they
//! fall outside the column's `i64` range) and wrapped as 1-element `Scalar`s carrying the column's timezone, so
//! Arrow's comparison kernels broadcast them without materializing full-length
//! bound arrays and accept both operands as the same `DataType`.

use std::ops::Bound;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, RecordBatch, Scalar, TimestampMicrosecondArray,
    TimestampMillisecondArray, TimestampNanosecondArray, TimestampSecondArray,
};
use arrow::compute::kernels::{boolean as boolean_kernels, cmp as cmp_kernels};
use arrow::compute::{cast, filter_record_batch};
use arrow::datatypes::{DataType, Int64Type, Schema, TimeUnit};
use chrono::{DateTime, Utc};
use snafu::prelude::*;

use crate::error::{
    ArrowSnafu, ColumnsNotFoundSnafu, IndexOutOfRangeSnafu, MissingIndexColumnSnafu,
    NullIndexSnafu, StoreError, StoreResult,
};
use crate::timeframe::TimeFrame;

/// Name of the reserved timestamp index column.
pub const INDEX_COLUMN: &str = "index";

/// A predicate over the index column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPredicate {
    /// Rows with `start <= index < end` (bounds optional; empty frame matches nothing).
    Within(TimeFrame),
    /// Rows with `index > ts`.
    After(DateTime<Utc>),
}

impl IndexPredicate {
    /// True if an index span `[lo, hi]` could contain matching rows.
    pub(crate) fn may_match(&self, lo: DateTime<Utc>, hi: DateTime<Utc>) -> bool {
        match self {
            IndexPredicate::Within(tf) => {
                !tf.is_empty()
                    && tf.start().is_none_or(|s| hi >= s)
                    && tf.end().is_none_or(|e| lo < e)
            }
            IndexPredicate::After(ts) => hi > *ts,
        }
    }
}

/// Build a boolean mask over a timestamp column for the given bounds.
///
/// `$lower` is a `Bound<i64>` and `$upper` an exclusive `Option<i64>`, both
/// already in the column's unit. Null index values compare to null and are
/// dropped by `filter_record_batch`.
macro_rules! index_mask {
    ($array_ty:ty, $column:expr, $key:expr, $lower:expr, $upper:expr) => {{
        let ts_arr = $column.as_any().downcast_ref::<$array_ty>().ok_or_else(|| {
            StoreError::UnsupportedIndexType {
                key: $key.to_string(),
                datatype: $column.data_type().clone(),
            }
        })?;

        let tz_opt = match ts_arr.data_type() {
            DataType::Timestamp(_, tz_opt) => tz_opt.clone(),
            _ => None,
        };
        let scalar =
            |v: i64| Scalar::new(<$array_ty>::from(vec![v]).with_timezone_opt(tz_opt.clone()));

        let lower_mask = match $lower {
            Bound::Included(v) => Some(cmp_kernels::gt_eq(ts_arr, &scalar(v)).context(ArrowSnafu)?),
            Bound::Excluded(v) => Some(cmp_kernels::gt(ts_arr, &scalar(v)).context(ArrowSnafu)?),
            Bound::Unbounded => None,
        };
        let upper_mask = match $upper {
            Some(v) => Some(cmp_kernels::lt(ts_arr, &scalar(v)).context(ArrowSnafu)?),
            None => None,
        };

        match (lower_mask, upper_mask) {
            (Some(lo), Some(hi)) => boolean_kernels::and(&lo, &hi).context(ArrowSnafu)?,
            (Some(mask), None) | (None, Some(mask)) => mask,
            (None, None) => BooleanArray::from(vec![true; ts_arr.len()]),
        }
    }};
}

/// Where a bound lands on a column's integer scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitBound {
    BelowRange,
    At(i64),
    AboveRange,
}

/// Convert `dt` to `unit`, rounding sub-unit remainders up (`ceil`) or down.
fn to_unit_bound(unit: TimeUnit, dt: DateTime<Utc>, ceil: bool) -> UnitBound {
    let per_unit: i128 = match unit {
        TimeUnit::Second => 1_000_000_000,
        TimeUnit::Millisecond => 1_000_000,
        TimeUnit::Microsecond => 1_000,
        TimeUnit::Nanosecond => 1,
    };
    let nanos =
        i128::from(dt.timestamp()) * 1_000_000_000 + i128::from(dt.timestamp_subsec_nanos());
    let mut value = nanos.div_euclid(per_unit);
    if ceil && nanos.rem_euclid(per_unit) != 0 {
        value += 1;
    }
    match i64::try_from(value) {
        Ok(v) => UnitBound::At(v),
        Err(_) if value < 0 => UnitBound::BelowRange,
        Err(_) => UnitBound::AboveRange,
    }
}

fn from_unit_i64(unit: TimeUnit, value: i64) -> Option<DateTime<Utc>> {
    match unit {
        TimeUnit::Second => DateTime::from_timestamp(value, 0),
        TimeUnit::Millisecond => DateTime::from_timestamp_millis(value),
        TimeUnit::Microsecond => DateTime::from_timestamp_micros(value),
        TimeUnit::Nanosecond => Some(DateTime::from_timestamp_nanos(value)),
    }
}

/// Locate the index column and its time unit.
pub(crate) fn index_column<'a>(
    batch: &'a RecordBatch,
    key: &str,
) -> StoreResult<(&'a ArrayRef, TimeUnit)> {
    let idx = batch
        .schema()
        .index_of(INDEX_COLUMN)
        .ok()
        .context(MissingIndexColumnSnafu { key })?;
    let column = batch.column(idx);
    match column.data_type() {
        DataType::Timestamp(unit, _) => Ok((column, *unit)),
        other => Err(StoreError::UnsupportedIndexType {
            key: key.to_string(),
            datatype: other.clone(),
        }),
    }
}

/// Evaluate `predicate` against every row of `batch`.
pub(crate) fn index_mask(
    batch: &RecordBatch,
    key: &str,
    predicate: &IndexPredicate,
) -> StoreResult<BooleanArray> {
    let (column, unit) = index_column(batch, key)?;

    let nothing = || BooleanArray::from(vec![false; column.len()]);
    let (lower, upper) = match predicate {
        IndexPredicate::Within(tf) if tf.is_empty() => return Ok(nothing()),
        IndexPredicate::Within(tf) => {
            // Integer rows satisfy `v >= start` iff `v >= ceil(start)`, and
            // `v < end` iff `v < ceil(end)`.
            let lower = match tf.start().map(|s| to_unit_bound(unit, s, true)) {
                None | Some(UnitBound::BelowRange) => Bound::Unbounded,
                Some(UnitBound::At(v)) => Bound::Included(v),
                Some(UnitBound::AboveRange) => return Ok(nothing()),
            };
            let upper = match tf.end().map(|e| to_unit_bound(unit, e, true)) {
                None | Some(UnitBound::AboveRange) => None,
                Some(UnitBound::At(v)) => Some(v),
                Some(UnitBound::BelowRange) => return Ok(nothing()),
            };
            (lower, upper)
        }
        IndexPredicate::After(ts) => match to_unit_bound(unit, *ts, false) {
            UnitBound::BelowRange => (Bound::Unbounded, None),
            UnitBound::At(v) => (Bound::Excluded(v), None),
            UnitBound::AboveRange => return Ok(nothing()),
        },
    };

    let mask = match unit {
        TimeUnit::Second => index_mask!(TimestampSecondArray, column, key, lower, upper),
        TimeUnit::Millisecond => index_mask!(TimestampMillisecondArray, column, key, lower, upper),
        TimeUnit::Microsecond => index_mask!(TimestampMicrosecondArray, column, key, lower, upper),
        TimeUnit::Nanosecond => index_mask!(TimestampNanosecondArray, column, key, lower, upper),
    };
    Ok(mask)
}

/// Keep only the rows of `batch` matching `predicate`.
pub(crate) fn filter_batch(
    batch: &RecordBatch,
    key: &str,
    predicate: &IndexPredicate,
) -> StoreResult<RecordBatch> {
    if matches!(predicate, IndexPredicate::Within(tf) if !tf.is_bounded() && !tf.is_empty()) {
        return Ok(batch.clone());
    }
    let mask = index_mask(batch, key, predicate)?;
    filter_record_batch(batch, &mask).context(ArrowSnafu)
}

/// Positions (relative to the batch) of rows matching `predicate`.
pub(crate) fn matching_positions(
    batch: &RecordBatch,
    key: &str,
    predicate: &IndexPredicate,
) -> StoreResult<Vec<usize>> {
    let mask = index_mask(batch, key, predicate)?;
    Ok(mask
        .iter()
        .enumerate()
        .filter_map(|(i, keep)| (keep == Some(true)).then_some(i))
        .collect())
}

fn raw_index(batch: &RecordBatch, key: &str) -> StoreResult<(Vec<i64>, TimeUnit)> {
    let (column, unit) = index_column(batch, key)?;
    ensure!(
        column.null_count() == 0,
        NullIndexSnafu {
            key,
            null_count: column.null_count(),
        }
    );
    let raw = cast(column, &DataType::Int64).context(ArrowSnafu)?;
    Ok((raw.as_primitive::<Int64Type>().values().to_vec(), unit))
}

fn to_datetime(unit: TimeUnit, value: i64, key: &str) -> StoreResult<DateTime<Utc>> {
    from_unit_i64(unit, value).context(IndexOutOfRangeSnafu { key, value })
}

/// The index values of `batch` as UTC instants, in row order.
pub fn index_values(batch: &RecordBatch) -> StoreResult<Vec<DateTime<Utc>>> {
    let (raw, unit) = raw_index(batch, "<batch>")?;
    raw.into_iter()
        .map(|v| to_datetime(unit, v, "<batch>"))
        .collect()
}

/// Minimum and maximum index of `batch`, or `None` when it has no rows.
pub(crate) fn index_bounds(
    batch: &RecordBatch,
    key: &str,
) -> StoreResult<Option<(DateTime<Utc>, DateTime<Utc>)>> {
    let (raw, unit) = raw_index(batch, key)?;
    match (raw.iter().min(), raw.iter().max()) {
        (Some(lo), Some(hi)) => Ok(Some((
            to_datetime(unit, *lo, key)?,
            to_datetime(unit, *hi, key)?,
        ))),
        _ => Ok(None),
    }
}

/// Validate that the index of an appended batch is non-decreasing and starts
/// no earlier than `not_before`. Returns the batch's `[first, last]` index.
pub(crate) fn check_append_order(
    batch: &RecordBatch,
    key: &str,
    not_before: Option<DateTime<Utc>>,
) -> StoreResult<Option<(DateTime<Utc>, DateTime<Utc>)>> {
    let (raw, unit) = raw_index(batch, key)?;
    let (Some(first), Some(last)) = (raw.first(), raw.last()) else {
        return Ok(None);
    };
    let first = to_datetime(unit, *first, key)?;
    let last = to_datetime(unit, *last, key)?;

    if let Some(prev) = not_before.filter(|prev| first < *prev) {
        return Err(StoreError::OutOfOrderAppend {
            key: key.to_string(),
            last: prev,
            first,
        });
    }

    if let Some(pair) = raw.windows(2).find(|w| w[1] < w[0]) {
        return Err(StoreError::OutOfOrderAppend {
            key: key.to_string(),
            last: to_datetime(unit, pair[0], key)?,
            first: to_datetime(unit, pair[1], key)?,
        });
    }

    Ok(Some((first, last)))
}

/// Column positions to read for a projection, in schema order.
///
/// The index column is always included. `None` selects every column.
pub(crate) fn projection_indices(
    schema: &Schema,
    key: &str,
    columns: Option<&[String]>,
) -> StoreResult<Vec<usize>> {
    let Some(columns) = columns else {
        return Ok((0..schema.fields().len()).collect());
    };

    let missing: Vec<String> = columns
        .iter()
        .filter(|c| c.as_str() != INDEX_COLUMN && schema.index_of(c).is_err())
        .cloned()
        .collect();
    ensure!(
        missing.is_empty(),
        ColumnsNotFoundSnafu {
            key,
            columns: missing,
        }
    );

    Ok(schema
        .fields()
        .iter()
        .enumerate()
        .filter(|(_, f)| f.name() == INDEX_COLUMN || columns.iter().any(|c| c == f.name()))
        .map(|(i, _)| i)
        .collect())
}

/// Names of the data (non-index) columns of a schema.
pub(crate) fn data_column_names(schema: &Schema) -> Vec<String> {
    schema
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .filter(|name| name != INDEX_COLUMN)
        .collect()
}
