//! End-to-end tests of the windowed reader over the on-disk Parquet engine.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use arrow::compute::concat_batches;
use common::*;
use nilm_store_core::{
    Key, LoadOptions, Metadata, OpenMode, ParquetEngine, StoreConfig, StoreError, TimeFrame,
    WindowedStore,
};

#[test]
fn chunks_cover_table_across_segments() -> TestResult {
    let (_tmp, store) = store_with_segments(METER1, &[&[1, 2, 3], &[4, 5], &[6, 7, 8, 9]])?;

    let chunks: Vec<_> = store
        .load(METER1, LoadOptions::new().chunk_size(4))
        .collect::<Result<_, _>>()?;
    let sizes: Vec<usize> = chunks.iter().map(|c| c.num_rows()).collect();
    assert_eq!(sizes, vec![4, 4, 1]);

    let batches: Vec<_> = chunks.iter().map(|c| c.data.clone()).collect();
    let all = concat_batches(&batches[0].schema(), &batches)?;
    assert_eq!(batch_secs(&all)?, (1..=9).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn look_ahead_reads_past_window_and_segment_boundaries() -> TestResult {
    let (_tmp, mut store) = store_with_segments(METER1, &[&[1, 2, 3], &[10, 11], &[20]])?;
    store.set_window(TimeFrame::new(secs(0), secs(4)));

    let chunks: Vec<_> = store
        .load(METER1, LoadOptions::new().look_ahead_rows(2))
        .collect::<Result<_, _>>()?;
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunk_secs(&chunks[0])?, vec![1, 2, 3]);
    assert_eq!(batch_secs(&chunks[0].look_ahead)?, vec![10, 11]);
    assert_eq!(chunks[0].timeframe, TimeFrame::new(secs(1), secs(3)));
    Ok(())
}

#[test]
fn empty_window_intersection_is_not_an_error() -> TestResult {
    let (_tmp, mut store) = store_with_segments(METER1, &[&[1, 2, 3]])?;
    store.set_window(TimeFrame::new(secs(100), secs(200)));

    let options = LoadOptions::new().periods([
        TimeFrame::new(secs(0), secs(10)),
        TimeFrame::new(secs(150), secs(160)),
    ]);
    let chunks: Vec<_> = store.load(METER1, options).collect::<Result<_, _>>()?;
    assert_eq!(chunks.len(), 2);
    assert!(chunks[0].is_empty() && chunks[0].timeframe.is_empty());
    assert!(chunks[1].is_empty() && chunks[1].look_ahead.num_rows() == 0);
    Ok(())
}

#[test]
fn column_selection_and_validation() -> TestResult {
    let (_tmp, store) = store_with_segments(METER1, &[&[1, 2]])?;
    assert_eq!(store.column_names(METER1)?, vec!["power", "reactive"]);

    let chunk = store
        .load(METER1, LoadOptions::new().columns(["reactive"]))
        .next()
        .unwrap()?;
    assert_eq!(chunk.data.num_columns(), 2);
    assert!(chunk.data.column_by_name("power").is_none());

    let requested = vec!["reactive".to_string(), "apparent".to_string()];
    let err = store
        .check_columns(METER1, Some(requested.as_slice()))
        .unwrap_err();
    assert!(err.to_string().contains("apparent"));
    Ok(())
}

#[test]
fn row_count_and_timeframe_on_disk() -> TestResult {
    let (_tmp, mut store) = store_with_segments(METER1, &[&[10, 20], &[30, 40, 50]])?;
    assert_eq!(store.row_count(METER1, None)?, 5);
    assert_eq!(
        store.row_count(METER1, Some(&TimeFrame::new(secs(20), secs(45))))?,
        3
    );
    assert_eq!(
        store.table_timeframe(METER1)?,
        TimeFrame::new(secs(10), secs(50))
    );

    store.set_window(TimeFrame::from_bounds(Some(secs(25)), None));
    assert_eq!(store.row_count(METER1, None)?, 3);
    assert_eq!(
        store.table_timeframe(METER1)?,
        TimeFrame::new(secs(25), secs(50))
    );
    Ok(())
}

#[test]
fn metadata_persists_across_close_and_open() -> TestResult {
    let (tmp, mut store) = store_with_segments(METER1, &[&[1]])?;
    store.append(METER2, &readings(&[1])?)?;

    let mut root = Metadata::new();
    root.insert("name".into(), "REDD".into());
    store.save_metadata("/", root.clone())?;

    let mut building = Metadata::new();
    building.insert("instance".into(), 1.into());
    building.insert("timezone".into(), "US/Eastern".into());
    store.save_metadata(&Key::new(1, None)?.to_string(), building.clone())?;
    store.close()?;

    let engine = ParquetEngine::open(tmp.path(), OpenMode::ReadOnly)?;
    let store = WindowedStore::new(engine);
    assert_eq!(store.load_metadata("/")?, root);
    assert_eq!(store.load_metadata("building1")?, building);
    assert_eq!(store.keys()?, vec![METER1, METER2]);
    assert_eq!(
        store.child_keys("/building1/elec")?.into_iter().collect::<Vec<_>>(),
        vec!["meter1", "meter2"]
    );
    Ok(())
}

#[test]
fn read_only_handle_refuses_writes() -> TestResult {
    let (tmp, store) = store_with_segments(METER1, &[&[1, 2]])?;
    store.close()?;

    let mut store = WindowedStore::new(ParquetEngine::open(tmp.path(), OpenMode::ReadOnly)?);
    let err = store.append(METER1, &readings(&[3])?).unwrap_err();
    assert!(matches!(err, StoreError::ReadOnly { .. }));
    assert!(store.save_metadata("/", Metadata::new()).is_err());
    Ok(())
}

#[test]
fn append_enforces_order_and_schema() -> TestResult {
    let (_tmp, mut store) = store_with_segments(METER1, &[&[5, 6]])?;

    let err = store.append(METER1, &readings(&[4])?).unwrap_err();
    assert!(matches!(err, StoreError::OutOfOrderAppend { .. }));

    let err = store.append(METER1, &readings(&[9, 8])?).unwrap_err();
    assert!(matches!(err, StoreError::OutOfOrderAppend { .. }));

    let projected = readings(&[7])?.project(&[0, 1])?;
    let err = store.append(METER1, &projected).unwrap_err();
    assert!(matches!(err, StoreError::SchemaMismatch { .. }));

    store.append(METER1, &readings(&[6, 7])?)?;
    assert_eq!(store.row_count(METER1, None)?, 4);
    Ok(())
}

#[test]
fn reopen_picks_up_external_writes() -> TestResult {
    let (tmp, mut reader) = store_with_segments(METER1, &[&[1]])?;

    let mut writer =
        WindowedStore::new(ParquetEngine::open(tmp.path(), OpenMode::ReadWrite)?);
    writer.append(METER2, &readings(&[1, 2])?)?;

    assert!(!has_table(&reader, METER2));
    reader.reopen()?;
    assert!(has_table(&reader, METER2));
    assert_eq!(reader.row_count(METER2, None)?, 2);
    Ok(())
}

#[test]
fn memory_guard_uses_configured_allowance() -> TestResult {
    let tmp = tempfile::TempDir::new()?;
    let config = StoreConfig {
        memory_allowance_bytes: 1_600,
        ..Default::default()
    };
    let mut store = WindowedStore::with_config(
        ParquetEngine::open(tmp.path(), OpenMode::ReadWrite)?,
        config,
    );
    store.append(METER1, &readings(&[1])?)?;

    // 2 data columns: 100 * (2 * 4 + 8) == 1600.
    store.check_data_will_fit(METER1, 100, None)?;
    let err = store.check_data_will_fit(METER1, 101, None).unwrap_err();
    assert!(matches!(err, StoreError::OutOfMemory { .. }));
    Ok(())
}

#[test]
fn missing_key_is_reported_on_first_pull() -> TestResult {
    let (_tmp, store) = store_with_segments(METER1, &[&[1]])?;
    let mut chunks = store.load("/building9/elec/meter1", LoadOptions::new());
    let err = chunks.next().unwrap().unwrap_err();
    assert!(err.is_not_found());
    assert!(chunks.next().is_none());
    Ok(())
}
