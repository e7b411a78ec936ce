mod common;

use std::fs;

use common::{i64_values, str_values, trip, trips_frame, zones_frame, Trip};
use polars::prelude::*;
use taxistar_core::dimensions::DistanceKeyMode;
use taxistar_core::pipeline::build_star_schema;
use taxistar_core::storage::{
    inspect, read_csv_table, read_parquet_table, CsvStore, ParquetCodec, ParquetStore, StarSchema,
    StorageError, TableKind, SOURCE_BATCH, TRIP_FACT,
};
use tempfile::tempdir;

fn schema_for(trips: &[Trip]) -> StarSchema {
    build_star_schema(&trips_frame(trips), &zones_frame(), DistanceKeyMode::Exact)
        .expect("star schema")
        .schema
}

fn january_batch() -> StarSchema {
    schema_for(&[
        trip("2025-01-05 08:00:00", 10),
        trip("2025-01-06 09:00:00", 15).distance(Some(8.0)),
    ])
}

fn february_batch() -> StarSchema {
    schema_for(&[
        trip("2025-02-01 08:00:00", 12),
        trip("2025-02-02 09:00:00", 18),
        trip("2025-02-03 10:00:00", 20),
    ])
}

#[test]
fn tables_list_append_and_static_kinds() {
    let schema = january_batch();
    let kinds: Vec<(&str, TableKind)> = schema
        .tables()
        .iter()
        .map(|table| (table.name, table.kind))
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("trip_fact", TableKind::Append),
            ("vendor_dim", TableKind::Static),
            ("ratecode_dim", TableKind::Static),
            ("payment_dim", TableKind::Static),
            ("datetime_dim", TableKind::Append),
            ("distance_dim", TableKind::Append),
            ("location_dim", TableKind::Static),
        ]
    );
}

#[test]
fn parquet_fact_is_partitioned_by_pickup_month() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let store = ParquetStore::new(dir.path(), ParquetCodec::Snappy);
    let mixed = schema_for(&[
        trip("2025-01-31 23:50:00", 20),
        trip("2025-02-01 00:10:00", 20),
        trip("2025-02-14 12:00:00", 20),
    ]);

    let report = store.write(&mixed, "mixed")?;

    let root = dir.path().join("parquet/star_schema/trip_fact");
    let january = root.join("year=2025/month=1/part-0.parquet");
    let february = root.join("year=2025/month=2/part-0.parquet");
    assert!(january.is_file());
    assert!(february.is_file());
    assert_eq!(report.rows_written(TRIP_FACT), 3);

    let jan = ParquetReader::new(fs::File::open(&january)?).finish()?;
    let feb = ParquetReader::new(fs::File::open(&february)?).finish()?;
    assert_eq!(i64_values(&jan, "trip_id"), vec![Some(1)]);
    assert_eq!(i64_values(&feb, "trip_id"), vec![Some(2), Some(3)]);
    assert!(jan.column("year").is_err());
    assert!(jan.column("month").is_err());
    Ok(())
}

#[test]
fn distinct_batches_accumulate_in_parquet() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let store = ParquetStore::new(dir.path(), ParquetCodec::Zstd);

    store.write(&january_batch(), "batch-a")?;
    store.write(&february_batch(), "batch-b")?;

    let fact = read_parquet_table(dir.path(), TRIP_FACT)?;
    assert_eq!(fact.height(), 5);
    let datetime = read_parquet_table(dir.path(), "datetime_dim")?;
    assert_eq!(datetime.height(), 5);
    let vendor = read_parquet_table(dir.path(), "vendor_dim")?;
    assert_eq!(vendor.height(), 1);
    assert!(vendor.column(SOURCE_BATCH).is_err());
    Ok(())
}

#[test]
fn rerunning_a_batch_replaces_its_rows() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let parquet = ParquetStore::new(dir.path(), ParquetCodec::Snappy);
    let csv = CsvStore::new(dir.path());
    let batch = january_batch();

    for _ in 0..2 {
        parquet.write(&batch, "batch-a")?;
        csv.write(&batch, "batch-a")?;
    }

    assert_eq!(read_parquet_table(dir.path(), TRIP_FACT)?.height(), 2);
    assert_eq!(read_parquet_table(dir.path(), "distance_dim")?.height(), 2);
    assert_eq!(read_csv_table(dir.path(), TRIP_FACT)?.height(), 2);
    assert_eq!(read_csv_table(dir.path(), "datetime_dim")?.height(), 2);

    csv.write(&february_batch(), "batch-b")?;
    let fact = read_csv_table(dir.path(), TRIP_FACT)?;
    assert_eq!(fact.height(), 5);
    let batches = str_values(&fact, SOURCE_BATCH);
    assert_eq!(
        batches.iter().filter(|b| b.as_deref() == Some("batch-a")).count(),
        2
    );
    assert_eq!(
        batches.iter().filter(|b| b.as_deref() == Some("batch-b")).count(),
        3
    );
    Ok(())
}

#[test]
fn rerun_that_moves_months_clears_its_old_partition() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let store = ParquetStore::new(dir.path(), ParquetCodec::Snappy);

    store.write(&january_batch(), "batch-a")?;
    store.write(&schema_for(&[trip("2025-01-20 07:00:00", 25)]), "batch-c")?;
    let report = store.write(&february_batch(), "batch-a")?;

    let january = dir
        .path()
        .join("parquet/star_schema/trip_fact/year=2025/month=1/part-0.parquet");
    let remaining = ParquetReader::new(fs::File::open(&january)?).finish()?;
    assert_eq!(str_values(&remaining, SOURCE_BATCH), vec![Some("batch-c".to_string())]);
    assert!(report.files.iter().any(|write| write.path == january));

    let fact = read_parquet_table(dir.path(), TRIP_FACT)?;
    let batches = str_values(&fact, SOURCE_BATCH);
    assert_eq!(fact.height(), 4);
    assert_eq!(
        batches.iter().filter(|b| b.as_deref() == Some("batch-a")).count(),
        3
    );
    Ok(())
}

#[test]
fn rerun_into_a_new_month_leaves_an_empty_old_partition() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let store = ParquetStore::new(dir.path(), ParquetCodec::Snappy);

    store.write(&schema_for(&[trip("2025-01-15 08:00:00", 10)]), "same")?;
    store.write(&schema_for(&[trip("2025-02-15 08:00:00", 10)]), "same")?;

    let root = dir.path().join("parquet/star_schema/trip_fact");
    let january = ParquetReader::new(fs::File::open(root.join("year=2025/month=1/part-0.parquet"))?)
        .finish()?;
    assert_eq!(january.height(), 0);

    let fact = read_parquet_table(dir.path(), TRIP_FACT)?;
    assert_eq!(fact.height(), 1);
    assert_eq!(str_values(&fact, SOURCE_BATCH), vec![Some("same".to_string())]);
    Ok(())
}

#[test]
fn csv_round_trip_keeps_rows_and_columns() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let store = CsvStore::new(dir.path());
    let schema = january_batch();

    store.write(&schema, "batch-a")?;

    for table in schema.tables() {
        let stored = read_csv_table(dir.path(), table.name)?;
        assert_eq!(stored.height(), table.data.height(), "{}", table.name);

        let mut expected: Vec<String> = table
            .data
            .get_column_names()
            .iter()
            .map(|n| n.to_string())
            .collect();
        if table.kind == TableKind::Append {
            expected.push(SOURCE_BATCH.to_string());
        }
        let actual: Vec<String> = stored
            .get_column_names()
            .iter()
            .map(|n| n.to_string())
            .collect();
        assert_eq!(actual, expected, "{}", table.name);
    }
    Ok(())
}

#[test]
fn static_tables_are_overwritten() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let store = CsvStore::new(dir.path());

    store.write(&january_batch(), "batch-a")?;
    store.write(&february_batch(), "batch-b")?;

    let locations = read_csv_table(dir.path(), "location_dim")?;
    assert_eq!(locations.height(), zones_frame().height());
    Ok(())
}

#[test]
fn column_drift_is_rejected_without_touching_the_file() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let store = CsvStore::new(dir.path());
    let path = store.table_path("distance_dim");
    fs::create_dir_all(store.root())?;
    fs::write(&path, "distance_key,trip_distance,source_batch\n1,2.0,old\n")?;

    let result = store.write(&january_batch(), "batch-a");

    match result {
        Err(StorageError::SchemaDrift { table, .. }) => assert_eq!(table, "distance_dim"),
        other => panic!("expected schema drift, got {other:?}"),
    }
    assert_eq!(
        fs::read_to_string(&path)?,
        "distance_key,trip_distance,source_batch\n1,2.0,old\n"
    );
    Ok(())
}

#[test]
fn inspect_counts_rows_per_table_and_partition() -> anyhow::Result<()> {
    let dir = tempdir()?;
    ParquetStore::new(dir.path(), ParquetCodec::Snappy).write(&january_batch(), "batch-a")?;
    ParquetStore::new(dir.path(), ParquetCodec::Snappy).write(&february_batch(), "batch-b")?;
    CsvStore::new(dir.path()).write(&january_batch(), "batch-a")?;

    let summaries = inspect(dir.path())?;

    let fact_partitions: Vec<(Option<String>, usize)> = summaries
        .iter()
        .filter(|s| s.format == "parquet" && s.table == TRIP_FACT)
        .map(|s| (s.partition.clone(), s.rows))
        .collect();
    assert_eq!(
        fact_partitions,
        vec![
            (Some("year=2025/month=1".to_string()), 2),
            (Some("year=2025/month=2".to_string()), 3),
        ]
    );
    let csv_fact = summaries
        .iter()
        .find(|s| s.format == "csv" && s.table == TRIP_FACT)
        .expect("csv fact summary");
    assert_eq!(csv_fact.rows, 2);
    assert_eq!(summaries.iter().filter(|s| s.format == "csv").count(), 7);
    Ok(())
}
