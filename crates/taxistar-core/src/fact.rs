use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;

use polars::prelude::*;
use taxistar_source::MEASURE_COLUMNS;
use thiserror::Error;
use tracing::{info, instrument};

use crate::columns::sequence;
use crate::dimensions::{DimensionTables, DistanceKeyMode, PAYMENT, RATECODE, VENDOR};

pub const TRIP_ID: &str = "trip_id";

#[derive(Debug, Error)]
pub enum FactError {
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
    #[error("{table} contains natural key {key} more than once")]
    DuplicateDimensionKey { table: &'static str, key: String },
    #[error("records already carry a trip_id column")]
    TripIdsAlreadyAssigned,
}

/// Appends `trip_id` = 1..N in record order.
pub fn assign_trip_ids(records: &DataFrame) -> Result<DataFrame, FactError> {
    if records.column(TRIP_ID).is_ok() {
        return Err(FactError::TripIdsAlreadyAssigned);
    }
    let mut output = records.clone();
    output.with_column(sequence(TRIP_ID, records.height()))?;
    Ok(output)
}

/// Builds a natural key to surrogate key index, rejecting a dimension that
/// lists the same natural key twice.
fn index_dimension<K, I>(
    table: &'static str,
    natural: I,
    surrogate: &Int64Chunked,
    describe: impl Fn(&K) -> String,
) -> Result<HashMap<K, i64>, FactError>
where
    K: Eq + Hash,
    I: IntoIterator<Item = K>,
{
    let mut index = HashMap::new();
    for (key, value) in natural.into_iter().zip(surrogate.into_iter()) {
        let Some(value) = value else {
            continue;
        };
        match index.entry(key) {
            Entry::Occupied(entry) => {
                return Err(FactError::DuplicateDimensionKey {
                    table,
                    key: describe(entry.key()),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
        }
    }
    Ok(index)
}

fn describe_code(code: &Option<i64>) -> String {
    code.map_or_else(|| "null".to_string(), |value| value.to_string())
}

fn code_index(
    dimension: &DataFrame,
    table: &'static str,
    natural_key: &str,
    surrogate_key: &str,
) -> Result<HashMap<Option<i64>, i64>, FactError> {
    let natural = dimension.column(natural_key)?.i64()?;
    let surrogate = dimension.column(surrogate_key)?.i64()?;
    index_dimension(table, natural.into_iter(), surrogate, describe_code)
}

fn lookup_codes(
    records: &DataFrame,
    column: &str,
    index: &HashMap<Option<i64>, i64>,
    output: &str,
) -> PolarsResult<Series> {
    let values = records.column(column)?.i64()?;
    let keys: Vec<Option<i64>> = values
        .into_iter()
        .map(|code| index.get(&code).copied())
        .collect();
    Ok(Series::new(output.into(), keys))
}

/// Assembles the trip fact table: one row per record, surrogate keys resolved
/// against each dimension and measures carried over. Keys that do not resolve
/// are left null; no row is ever dropped.
#[instrument(skip_all, fields(rows = records.height()))]
pub fn build_fact(
    records: &DataFrame,
    dimensions: &DimensionTables,
    mode: DistanceKeyMode,
) -> Result<DataFrame, FactError> {
    let len = records.height();

    let trip_ids: Vec<Option<i64>> = match records.column(TRIP_ID) {
        Ok(column) => column.i64()?.into_iter().collect(),
        Err(_) => (1..=len as i64).map(Some).collect(),
    };

    let datetime_index = {
        let dim = &dimensions.datetime;
        let trip_id = dim.column(TRIP_ID)?.i64()?;
        let key = dim.column("datetime_key")?.i64()?;
        index_dimension("datetime_dim", trip_id.into_iter(), key, describe_code)?
    };
    let datetime_keys: Vec<Option<i64>> = trip_ids
        .iter()
        .map(|id| datetime_index.get(id).copied())
        .collect();

    let vendor = code_index(
        &dimensions.vendor,
        VENDOR.table,
        VENDOR.natural_key,
        VENDOR.surrogate_key,
    )?;
    let ratecode = code_index(
        &dimensions.ratecode,
        RATECODE.table,
        RATECODE.natural_key,
        RATECODE.surrogate_key,
    )?;
    let payment = code_index(
        &dimensions.payment,
        PAYMENT.table,
        PAYMENT.natural_key,
        PAYMENT.surrogate_key,
    )?;

    let distance_index = {
        let dim = &dimensions.distance;
        let distances = dim.column("trip_distance")?.f64()?;
        let key = dim.column("distance_key")?.i64()?;
        index_dimension(
            "distance_dim",
            distances.into_iter().map(|d| mode.key(d)),
            key,
            |bits: &Option<u64>| bits.map_or_else(|| "null".to_string(), |b| f64::from_bits(b).to_string()),
        )?
    };
    let distance_keys: Vec<Option<i64>> = records
        .column("trip_distance")?
        .f64()?
        .into_iter()
        .map(|d| distance_index.get(&mode.key(d)).copied())
        .collect();

    let location = code_index(
        &dimensions.location,
        "location_dim",
        "location_id",
        "location_key",
    )?;

    let mut columns: Vec<Column> = vec![
        Series::new(TRIP_ID.into(), trip_ids).into(),
        Series::new("datetime_key".into(), datetime_keys).into(),
        lookup_codes(records, VENDOR.natural_key, &vendor, VENDOR.surrogate_key)?.into(),
        lookup_codes(records, RATECODE.natural_key, &ratecode, RATECODE.surrogate_key)?.into(),
        lookup_codes(records, PAYMENT.natural_key, &payment, PAYMENT.surrogate_key)?.into(),
        Series::new("distance_key".into(), distance_keys).into(),
        lookup_codes(records, "pickup_location_id", &location, "pickup_location_key")?.into(),
        lookup_codes(records, "dropoff_location_id", &location, "dropoff_location_key")?.into(),
        records.column("passenger_count")?.clone(),
        records.column("store_and_fwd")?.clone(),
    ];
    for name in MEASURE_COLUMNS {
        columns.push(records.column(name)?.clone());
    }

    let fact = DataFrame::new(columns)?;
    info!(rows = fact.height(), "trip fact assembled");
    Ok(fact)
}
