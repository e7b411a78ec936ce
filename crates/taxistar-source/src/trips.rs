use std::io::Cursor;

use polars::prelude::*;

use crate::errors::LoadError;
use crate::project::project_columns;
use crate::schema::TRIP_COLUMNS;

pub const TRIPS_TABLE: &str = "trip records";

/// Decodes a monthly trip parquet file into the canonical trip records table.
///
/// Raw TLC column names are renamed, every column is cast strictly, and extra
/// columns in the file are discarded. An empty file yields an empty table.
pub fn load_trips(bytes: &[u8]) -> Result<DataFrame, LoadError> {
    let raw = ParquetReader::new(Cursor::new(bytes))
        .finish()
        .map_err(|source| LoadError::Decode {
            table: TRIPS_TABLE,
            source,
        })?;

    project_columns(&raw, TRIP_COLUMNS, TRIPS_TABLE)
}
