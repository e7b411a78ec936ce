use std::io::Cursor;

use polars::prelude::*;

use crate::errors::LoadError;
use crate::project::project_columns;
use crate::schema::ZONE_COLUMNS;

pub const ZONES_TABLE: &str = "zone lookup";

/// Decodes the taxi zone lookup CSV. A lookup with no rows is rejected since
/// every location key would otherwise resolve to nothing.
pub fn load_zones(bytes: &[u8]) -> Result<DataFrame, LoadError> {
    let raw = CsvReadOptions::default()
        .with_has_header(true)
        .into_reader_with_file_handle(Cursor::new(bytes))
        .finish()
        .map_err(|source| LoadError::Decode {
            table: ZONES_TABLE,
            source,
        })?;

    let zones = project_columns(&raw, ZONE_COLUMNS, ZONES_TABLE)?;
    if zones.height() == 0 {
        return Err(LoadError::EmptyData { table: ZONES_TABLE });
    }
    Ok(zones)
}
