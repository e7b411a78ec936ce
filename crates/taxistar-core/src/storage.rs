use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike};
use polars::io::parquet::write::{ParquetCompression, ParquetWriter, StatisticsOptions};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::columns::datetime_micros;
use crate::dimensions::{DimensionTables, PAYMENT, RATECODE, VENDOR};

/// Trailing column on append tables naming the source that produced each row.
pub const SOURCE_BATCH: &str = "source_batch";

pub const TRIP_FACT: &str = "trip_fact";
pub const DATETIME_DIM: &str = "datetime_dim";
pub const DISTANCE_DIM: &str = "distance_dim";
pub const LOCATION_DIM: &str = "location_dim";

const PARTITION_FILE: &str = "part-0.parquet";
const NULL_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    /// Rows accumulate across batches; a batch id replaces its own earlier rows.
    Append,
    /// Rewritten in full by every batch.
    Static,
}

pub const TABLES: [(&str, TableKind); 7] = [
    (TRIP_FACT, TableKind::Append),
    (VENDOR.table, TableKind::Static),
    (RATECODE.table, TableKind::Static),
    (PAYMENT.table, TableKind::Static),
    (DATETIME_DIM, TableKind::Append),
    (DISTANCE_DIM, TableKind::Append),
    (LOCATION_DIM, TableKind::Static),
];

#[derive(Debug, Clone)]
pub struct StarSchema {
    pub trip_fact: DataFrame,
    pub dimensions: DimensionTables,
}

#[derive(Debug, Clone, Copy)]
pub struct StoredTable<'a> {
    pub name: &'static str,
    pub kind: TableKind,
    pub data: &'a DataFrame,
}

impl StarSchema {
    pub fn tables(&self) -> Vec<StoredTable<'_>> {
        TABLES
            .iter()
            .map(|(name, kind)| StoredTable {
                name: *name,
                kind: *kind,
                data: self.table(name),
            })
            .collect()
    }

    fn table(&self, name: &str) -> &DataFrame {
        let dims = &self.dimensions;
        match name {
            n if n == VENDOR.table => &dims.vendor,
            n if n == RATECODE.table => &dims.ratecode,
            n if n == PAYMENT.table => &dims.payment,
            DATETIME_DIM => &dims.datetime,
            DISTANCE_DIM => &dims.distance,
            LOCATION_DIM => &dims.location,
            _ => &self.trip_fact,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCodec {
    #[default]
    Snappy,
    Zstd,
}

impl ParquetCodec {
    fn compression(self) -> ParquetCompression {
        match self {
            ParquetCodec::Snappy => ParquetCompression::Snappy,
            ParquetCodec::Zstd => ParquetCompression::Zstd(None),
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{table}: I/O failure at {}: {source}", .path.display())]
    Io {
        table: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{table}: polars operation failed: {source}")]
    Polars {
        table: String,
        #[source]
        source: PolarsError,
    },
    #[error("{table}: csv failure at {}: {source}", .path.display())]
    Csv {
        table: String,
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error(
        "{table}: stored file {} has columns [{existing}] but incoming rows have [{incoming}]",
        .path.display()
    )]
    SchemaDrift {
        table: String,
        path: PathBuf,
        existing: String,
        incoming: String,
    },
}

impl StorageError {
    pub fn table(&self) -> &str {
        match self {
            StorageError::Io { table, .. }
            | StorageError::Polars { table, .. }
            | StorageError::Csv { table, .. }
            | StorageError::SchemaDrift { table, .. } => table,
        }
    }

    fn io(table: &str, path: &Path, source: std::io::Error) -> Self {
        StorageError::Io {
            table: table.to_string(),
            path: path.to_path_buf(),
            source,
        }
    }

    fn polars(table: &str, source: PolarsError) -> Self {
        StorageError::Polars {
            table: table.to_string(),
            source,
        }
    }

    fn csv(table: &str, path: &Path, source: csv::Error) -> Self {
        StorageError::Csv {
            table: table.to_string(),
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableWrite {
    pub table: String,
    pub path: PathBuf,
    pub rows_written: usize,
    pub rows_stored: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WriteReport {
    pub format: &'static str,
    pub files: Vec<TableWrite>,
}

impl WriteReport {
    fn new(format: &'static str) -> Self {
        Self {
            format,
            files: Vec::new(),
        }
    }

    fn push(&mut self, table: &str, path: PathBuf, rows_written: usize, rows_stored: usize) {
        debug!(
            format = self.format,
            table,
            path = %path.display(),
            rows_written,
            rows_stored,
            "table written"
        );
        self.files.push(TableWrite {
            table: table.to_string(),
            path,
            rows_written,
            rows_stored,
        });
    }

    pub fn rows_written(&self, table: &str) -> usize {
        self.files
            .iter()
            .filter(|file| file.table == table)
            .map(|file| file.rows_written)
            .sum()
    }
}

fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect()
}

fn with_batch_column(df: &DataFrame, batch_id: &str, table: &str) -> Result<DataFrame, StorageError> {
    let mut output = df.clone();
    output
        .with_column(Series::new(SOURCE_BATCH.into(), vec![batch_id; df.height()]))
        .map_err(|source| StorageError::polars(table, source))?;
    Ok(output)
}

fn ensure_same_columns(
    table: &str,
    path: &Path,
    existing: Vec<String>,
    incoming: Vec<String>,
) -> Result<(), StorageError> {
    if existing == incoming {
        return Ok(());
    }
    Err(StorageError::SchemaDrift {
        table: table.to_string(),
        path: path.to_path_buf(),
        existing: existing.join(", "),
        incoming: incoming.join(", "),
    })
}

/// Writes `path` through a sibling temporary file that is renamed into place
/// once `write` succeeds. A failed write leaves the previous file untouched.
fn commit<F>(path: &Path, table: &str, write: F) -> Result<(), StorageError>
where
    F: FnOnce(&mut File) -> Result<(), StorageError>,
{
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|source| StorageError::io(table, parent, source))?;

    let mut temp =
        NamedTempFile::new_in(parent).map_err(|source| StorageError::io(table, parent, source))?;
    write(temp.as_file_mut())?;
    temp.as_file_mut()
        .flush()
        .map_err(|source| StorageError::io(table, path, source))?;
    temp.persist(path)
        .map_err(|err| StorageError::io(table, path, err.error))?;
    Ok(())
}

/// Parquet layout: one file per table, with the trip fact split into
/// `trip_fact/year=<Y>/month=<M>/part-0.parquet` by pickup month.
#[derive(Debug, Clone)]
pub struct ParquetStore {
    root: PathBuf,
    codec: ParquetCodec,
}

impl ParquetStore {
    pub fn new(data_root: impl AsRef<Path>, codec: ParquetCodec) -> Self {
        Self {
            root: parquet_root(data_root.as_ref()),
            codec,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn table_path(&self, table: &str) -> PathBuf {
        self.root.join(format!("{table}.parquet"))
    }

    pub fn partition_path(&self, partition: &Partition) -> PathBuf {
        self.root
            .join(TRIP_FACT)
            .join(partition.directory())
            .join(PARTITION_FILE)
    }

    #[instrument(skip(self, schema), fields(root = %self.root.display()))]
    pub fn write(&self, schema: &StarSchema, batch_id: &str) -> Result<WriteReport, StorageError> {
        let mut report = WriteReport::new("parquet");

        for table in schema.tables() {
            if table.name == TRIP_FACT {
                self.write_fact(table.data, &schema.dimensions.datetime, batch_id, &mut report)?;
                continue;
            }

            let path = self.table_path(table.name);
            match table.kind {
                TableKind::Static => {
                    let mut df = table.data.clone();
                    self.write_file(&path, table.name, &mut df)?;
                    report.push(table.name, path, df.height(), df.height());
                }
                TableKind::Append => {
                    let incoming = with_batch_column(table.data, batch_id, table.name)?;
                    let stored = self.append_file(&path, table.name, &incoming, batch_id)?;
                    report.push(table.name, path, incoming.height(), stored);
                }
            }
        }

        info!(files = report.files.len(), batch_id, "parquet write complete");
        Ok(report)
    }

    fn write_fact(
        &self,
        fact: &DataFrame,
        datetime_dim: &DataFrame,
        batch_id: &str,
        report: &mut WriteReport,
    ) -> Result<(), StorageError> {
        let incoming = with_batch_column(fact, batch_id, TRIP_FACT)?;
        let partitions = partition_rows(&incoming, datetime_dim)?;

        for (partition, rows) in &partitions {
            let indices = IdxCa::from_vec("rows".into(), rows.clone());
            let slice = incoming
                .take(&indices)
                .map_err(|source| StorageError::polars(TRIP_FACT, source))?;
            let path = self.partition_path(partition);
            let stored = self.append_file(&path, TRIP_FACT, &slice, batch_id)?;
            report.push(TRIP_FACT, path, slice.height(), stored);
        }

        // A rerun whose rows moved partitions must not leave its old rows behind.
        let touched: BTreeSet<PathBuf> = partitions
            .keys()
            .map(|partition| self.partition_path(partition))
            .collect();
        for path in fact_partition_files(&self.root)? {
            if touched.contains(&path) {
                continue;
            }
            let Some(existing) = read_parquet_file(&path, TRIP_FACT)? else {
                continue;
            };
            let mut retained = drop_batch(&existing, batch_id, TRIP_FACT)?;
            if retained.height() != existing.height() {
                self.write_file(&path, TRIP_FACT, &mut retained)?;
                report.push(TRIP_FACT, path, 0, retained.height());
            }
        }

        Ok(())
    }

    fn append_file(
        &self,
        path: &Path,
        table: &str,
        incoming: &DataFrame,
        batch_id: &str,
    ) -> Result<usize, StorageError> {
        let mut merged = match read_parquet_file(path, table)? {
            Some(existing) => {
                ensure_same_columns(table, path, column_names(&existing), column_names(incoming))?;
                let retained = drop_batch(&existing, batch_id, table)?;
                let mut merged = align_dtypes(&retained, incoming, table)?;
                merged
                    .vstack_mut(incoming)
                    .map_err(|source| StorageError::polars(table, source))?;
                merged
            }
            None => incoming.clone(),
        };
        self.write_file(path, table, &mut merged)?;
        Ok(merged.height())
    }

    fn write_file(&self, path: &Path, table: &str, df: &mut DataFrame) -> Result<(), StorageError> {
        commit(path, table, |file| {
            ParquetWriter::new(file)
                .with_compression(self.codec.compression())
                .with_statistics(StatisticsOptions::default())
                .finish(df)
                .map(|_| ())
                .map_err(|source| StorageError::polars(table, source))
        })
    }
}

/// Year and month of a pickup; rows without a resolvable pickup share a null partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Partition {
    pub year: Option<i32>,
    pub month: Option<u32>,
}

impl Partition {
    fn directory(&self) -> PathBuf {
        let year = self
            .year
            .map_or_else(|| NULL_PARTITION.to_string(), |y| y.to_string());
        let month = self
            .month
            .map_or_else(|| NULL_PARTITION.to_string(), |m| m.to_string());
        PathBuf::from(format!("year={year}")).join(format!("month={month}"))
    }
}

/// Groups fact rows by the pickup month of their datetime dimension row.
pub fn partition_rows(
    fact: &DataFrame,
    datetime_dim: &DataFrame,
) -> Result<BTreeMap<Partition, Vec<IdxSize>>, StorageError> {
    let pickups: HashMap<i64, i64> = datetime_dim
        .column("datetime_key")
        .and_then(|column| column.i64().cloned())
        .and_then(|keys| {
            let pickups = datetime_micros(datetime_dim, "pickup_datetime")?;
            Ok(keys
                .into_iter()
                .zip(pickups)
                .filter_map(|(key, pickup)| Some((key?, pickup?)))
                .collect())
        })
        .map_err(|source| StorageError::polars(DATETIME_DIM, source))?;
    let keys = fact
        .column("datetime_key")
        .and_then(|column| column.i64().cloned())
        .map_err(|source| StorageError::polars(TRIP_FACT, source))?;

    let mut partitions: BTreeMap<Partition, Vec<IdxSize>> = BTreeMap::new();
    for (idx, key) in keys.into_iter().enumerate() {
        let moment = key
            .and_then(|key| pickups.get(&key).copied())
            .and_then(DateTime::from_timestamp_micros);
        let partition = Partition {
            year: moment.map(|dt| dt.year()),
            month: moment.map(|dt| dt.month()),
        };
        partitions.entry(partition).or_default().push(idx as IdxSize);
    }
    Ok(partitions)
}

fn drop_batch(existing: &DataFrame, batch_id: &str, table: &str) -> Result<DataFrame, StorageError> {
    let batches = existing
        .column(SOURCE_BATCH)
        .and_then(|column| column.str().cloned())
        .map_err(|source| StorageError::polars(table, source))?;
    let keep: BooleanChunked = batches
        .into_iter()
        .map(|batch| batch != Some(batch_id))
        .collect();
    existing
        .filter(&keep)
        .map_err(|source| StorageError::polars(table, source))
}

fn align_dtypes(
    existing: &DataFrame,
    incoming: &DataFrame,
    table: &str,
) -> Result<DataFrame, StorageError> {
    let mut columns = Vec::with_capacity(existing.width());
    for column in existing.get_columns() {
        let target = incoming
            .column(column.name().as_str())
            .map_err(|source| StorageError::polars(table, source))?
            .dtype();
        if column.dtype() == target {
            columns.push(column.clone());
        } else {
            let cast = column
                .cast(target)
                .map_err(|source| StorageError::polars(table, source))?;
            columns.push(cast);
        }
    }
    DataFrame::new(columns).map_err(|source| StorageError::polars(table, source))
}

fn read_parquet_file(path: &Path, table: &str) -> Result<Option<DataFrame>, StorageError> {
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path).map_err(|source| StorageError::io(table, path, source))?;
    ParquetReader::new(file)
        .finish()
        .map(Some)
        .map_err(|source| StorageError::polars(table, source))
}

fn fact_partition_files(root: &Path) -> Result<Vec<PathBuf>, StorageError> {
    let fact_root = root.join(TRIP_FACT);
    let mut files = Vec::new();
    if !fact_root.is_dir() {
        return Ok(files);
    }
    let read_dir =
        |dir: &Path| fs::read_dir(dir).map_err(|source| StorageError::io(TRIP_FACT, dir, source));
    for year in read_dir(&fact_root)? {
        let year = year.map_err(|source| StorageError::io(TRIP_FACT, &fact_root, source))?;
        if !year.path().is_dir() {
            continue;
        }
        for month in read_dir(&year.path())? {
            let month = month.map_err(|source| StorageError::io(TRIP_FACT, &year.path(), source))?;
            let file = month.path().join(PARTITION_FILE);
            if file.is_file() {
                files.push(file);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// CSV layout: one file per table with a header row. Append tables keep rows
/// of other batches verbatim and add the incoming rows at the end.
#[derive(Debug, Clone)]
pub struct CsvStore {
    root: PathBuf,
}

impl CsvStore {
    pub fn new(data_root: impl AsRef<Path>) -> Self {
        Self {
            root: csv_root(data_root.as_ref()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn table_path(&self, table: &str) -> PathBuf {
        self.root.join(format!("{table}.csv"))
    }

    #[instrument(skip(self, schema), fields(root = %self.root.display()))]
    pub fn write(&self, schema: &StarSchema, batch_id: &str) -> Result<WriteReport, StorageError> {
        let mut report = WriteReport::new("csv");

        for table in schema.tables() {
            let path = self.table_path(table.name);
            match table.kind {
                TableKind::Static => {
                    let mut df = table.data.clone();
                    write_csv(&path, table.name, &mut df)?;
                    report.push(table.name, path, df.height(), df.height());
                }
                TableKind::Append => {
                    let mut incoming = with_batch_column(table.data, batch_id, table.name)?;
                    let stored = append_csv(&path, table.name, &mut incoming, batch_id)?;
                    report.push(table.name, path, incoming.height(), stored);
                }
            }
        }

        info!(files = report.files.len(), batch_id, "csv write complete");
        Ok(report)
    }
}

fn write_csv(path: &Path, table: &str, df: &mut DataFrame) -> Result<(), StorageError> {
    commit(path, table, |file| {
        CsvWriter::new(file)
            .include_header(true)
            .finish(df)
            .map_err(|source| StorageError::polars(table, source))
    })
}

fn append_csv(
    path: &Path,
    table: &str,
    incoming: &mut DataFrame,
    batch_id: &str,
) -> Result<usize, StorageError> {
    if !path.exists() {
        write_csv(path, table, incoming)?;
        return Ok(incoming.height());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|source| StorageError::csv(table, path, source))?;
    let header: Vec<String> = reader
        .headers()
        .map_err(|source| StorageError::csv(table, path, source))?
        .iter()
        .map(String::from)
        .collect();
    ensure_same_columns(table, path, header.clone(), column_names(incoming))?;
    let batch_idx = header
        .iter()
        .position(|name| name == SOURCE_BATCH)
        .unwrap_or(header.len());

    let mut retained = 0usize;
    commit(path, table, |file| {
        let mut writer = csv::Writer::from_writer(&mut *file);
        writer
            .write_record(&header)
            .map_err(|source| StorageError::csv(table, path, source))?;
        for record in reader.records() {
            let record = record.map_err(|source| StorageError::csv(table, path, source))?;
            if record.get(batch_idx) == Some(batch_id) {
                continue;
            }
            writer
                .write_record(&record)
                .map_err(|source| StorageError::csv(table, path, source))?;
            retained += 1;
        }
        writer
            .flush()
            .map_err(|source| StorageError::io(table, path, source))?;
        drop(writer);

        CsvWriter::new(&mut *file)
            .include_header(false)
            .finish(&mut *incoming)
            .map_err(|source| StorageError::polars(table, source))
    })?;

    Ok(retained + incoming.height())
}

pub fn parquet_root(data_root: &Path) -> PathBuf {
    data_root.join("parquet").join("star_schema")
}

pub fn csv_root(data_root: &Path) -> PathBuf {
    data_root.join("csv").join("star_schema")
}

/// Reads a stored parquet table back. The partitioned trip fact is
/// concatenated in partition order.
pub fn read_parquet_table(data_root: &Path, table: &str) -> Result<DataFrame, StorageError> {
    let root = parquet_root(data_root);
    let files = if table == TRIP_FACT {
        fact_partition_files(&root)?
    } else {
        vec![root.join(format!("{table}.parquet"))]
    };

    let mut combined: Option<DataFrame> = None;
    for path in files {
        let df = read_parquet_file(&path, table)?.ok_or_else(|| {
            StorageError::io(
                table,
                &path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "table has not been written"),
            )
        })?;
        match combined.as_mut() {
            Some(acc) => {
                acc.vstack_mut(&df)
                    .map_err(|source| StorageError::polars(table, source))?;
            }
            None => combined = Some(df),
        }
    }

    combined.ok_or_else(|| {
        StorageError::io(
            table,
            &root.join(table),
            std::io::Error::new(std::io::ErrorKind::NotFound, "table has not been written"),
        )
    })
}

pub fn read_csv_table(data_root: &Path, table: &str) -> Result<DataFrame, StorageError> {
    let path = csv_root(data_root).join(format!("{table}.csv"));
    if !path.exists() {
        return Err(StorageError::io(
            table,
            &path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "table has not been written"),
        ));
    }
    CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path))
        .and_then(|reader| reader.finish())
        .map_err(|source| StorageError::polars(table, source))
}

#[derive(Debug, Clone, Serialize)]
pub struct TableSummary {
    pub format: &'static str,
    pub table: String,
    pub partition: Option<String>,
    pub rows: usize,
    pub path: PathBuf,
}

/// Row counts of every stored table under `data_root`, per trip fact partition
/// for parquet. Tables that were never written are skipped.
pub fn inspect(data_root: &Path) -> Result<Vec<TableSummary>, StorageError> {
    let parquet = parquet_root(data_root);
    let csv = csv_root(data_root);
    let mut summaries = Vec::new();

    for (table, _) in TABLES {
        if table == TRIP_FACT {
            for path in fact_partition_files(&parquet)? {
                let partition = path
                    .parent()
                    .and_then(|month| month.strip_prefix(parquet.join(TRIP_FACT)).ok())
                    .map(|relative| relative.display().to_string());
                summaries.push(TableSummary {
                    format: "parquet",
                    table: table.to_string(),
                    partition,
                    rows: parquet_row_count(&path, table)?,
                    path,
                });
            }
        } else {
            let path = parquet.join(format!("{table}.parquet"));
            if path.is_file() {
                summaries.push(TableSummary {
                    format: "parquet",
                    table: table.to_string(),
                    partition: None,
                    rows: parquet_row_count(&path, table)?,
                    path,
                });
            }
        }
    }

    for (table, _) in TABLES {
        let path = csv.join(format!("{table}.csv"));
        if !path.is_file() {
            continue;
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&path)
            .map_err(|source| StorageError::csv(table, &path, source))?;
        let mut rows = 0usize;
        for record in reader.records() {
            record.map_err(|source| StorageError::csv(table, &path, source))?;
            rows += 1;
        }
        summaries.push(TableSummary {
            format: "csv",
            table: table.to_string(),
            partition: None,
            rows,
            path,
        });
    }

    Ok(summaries)
}

fn parquet_row_count(path: &Path, table: &str) -> Result<usize, StorageError> {
    let file = File::open(path).map_err(|source| StorageError::io(table, path, source))?;
    ParquetReader::new(file)
        .num_rows()
        .map_err(|source| StorageError::polars(table, source))
}
