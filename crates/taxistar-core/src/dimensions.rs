use std::collections::HashSet;

use chrono::{DateTime, Datelike, Timelike};
use polars::prelude::*;
use tracing::{info, instrument};

use crate::columns::{datetime_micros, datetime_series, sequence};
use crate::holidays::HolidayCalendar;

pub const UNKNOWN_LABEL: &str = "Unknown";

/// Describes a dimension built from a small integer code column and a fixed
/// label table.
#[derive(Debug, Clone, Copy)]
pub struct CodeDimension {
    pub table: &'static str,
    pub natural_key: &'static str,
    pub surrogate_key: &'static str,
    pub label: &'static str,
    pub codes: &'static [(i64, &'static str)],
}

impl CodeDimension {
    pub fn label_for(&self, code: Option<i64>) -> &'static str {
        code.and_then(|code| {
            self.codes
                .iter()
                .find(|(known, _)| *known == code)
                .map(|(_, label)| *label)
        })
        .unwrap_or(UNKNOWN_LABEL)
    }
}

pub const VENDOR: CodeDimension = CodeDimension {
    table: "vendor_dim",
    natural_key: "vendor_id",
    surrogate_key: "vendor_key",
    label: "vendor_name",
    codes: &[
        (1, "Creative Mobile Technologies LLC"),
        (2, "Curb Mobility LLC"),
        (6, "Myle Technologies Inc"),
        (7, "Helix"),
    ],
};

pub const RATECODE: CodeDimension = CodeDimension {
    table: "ratecode_dim",
    natural_key: "ratecode_id",
    surrogate_key: "ratecode_key",
    label: "ratecode_name",
    codes: &[
        (1, "Standard Rate"),
        (2, "JFK"),
        (3, "Newark"),
        (4, "Nassau or Westchester"),
        (5, "Negotiated Fare"),
        (6, "Group Ride"),
        (99, "Unknown"),
    ],
};

pub const PAYMENT: CodeDimension = CodeDimension {
    table: "payment_dim",
    natural_key: "payment_id",
    surrogate_key: "payment_key",
    label: "payment_type",
    codes: &[
        (0, "Flex Fare trip"),
        (1, "Credit card"),
        (2, "Cash"),
        (3, "No charge"),
        (4, "Dispute"),
        (5, "Unknown"),
        (6, "Voided trip"),
    ],
};

/// How trip distances are turned into distance dimension keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceKeyMode {
    #[default]
    Exact,
    Rounded { decimals: u32 },
}

impl DistanceKeyMode {
    /// The value stored in the dimension for a raw distance.
    pub fn normalize(&self, distance: f64) -> f64 {
        let value = match self {
            DistanceKeyMode::Exact => distance,
            DistanceKeyMode::Rounded { decimals } => {
                let scale = 10_f64.powi(*decimals as i32);
                (distance * scale).round() / scale
            }
        };
        // Fold -0.0 into 0.0 so both land on the same key.
        if value == 0.0 {
            0.0
        } else {
            value
        }
    }

    /// A hashable key for a raw distance; equal for values that share a dimension row.
    pub fn key(&self, distance: Option<f64>) -> Option<u64> {
        distance.map(|value| self.normalize(value).to_bits())
    }
}

/// Anything that is not at most 6 miles, missing and NaN included, is "Long".
pub fn distance_category(distance: Option<f64>) -> &'static str {
    match distance {
        Some(value) if value <= 2.0 => "Short",
        Some(value) if value <= 6.0 => "Medium",
        _ => "Long",
    }
}

/// Every dimension of one batch, built from the same cleaned records.
#[derive(Debug, Clone)]
pub struct DimensionTables {
    pub vendor: DataFrame,
    pub ratecode: DataFrame,
    pub payment: DataFrame,
    pub datetime: DataFrame,
    pub distance: DataFrame,
    pub location: DataFrame,
}

pub fn build_dimensions(
    records: &DataFrame,
    zones: &DataFrame,
    calendar: &dyn HolidayCalendar,
    mode: DistanceKeyMode,
) -> PolarsResult<DimensionTables> {
    Ok(DimensionTables {
        vendor: build_vendor_dim(records)?,
        ratecode: build_ratecode_dim(records)?,
        payment: build_payment_dim(records)?,
        datetime: build_datetime_dim(records, calendar)?,
        distance: build_distance_dim(records, mode)?,
        location: build_location_dim(zones)?,
    })
}

pub fn build_vendor_dim(records: &DataFrame) -> PolarsResult<DataFrame> {
    build_code_dim(records, &VENDOR)
}

pub fn build_ratecode_dim(records: &DataFrame) -> PolarsResult<DataFrame> {
    build_code_dim(records, &RATECODE)
}

pub fn build_payment_dim(records: &DataFrame) -> PolarsResult<DataFrame> {
    build_code_dim(records, &PAYMENT)
}

/// Distinct codes in first-seen order with a dense surrogate key and a label.
/// A missing code is its own member and is labelled "Unknown".
#[instrument(skip_all, fields(table = dimension.table))]
pub fn build_code_dim(records: &DataFrame, dimension: &CodeDimension) -> PolarsResult<DataFrame> {
    let codes = records.column(dimension.natural_key)?.i64()?;

    let mut seen: HashSet<Option<i64>> = HashSet::new();
    let mut distinct: Vec<Option<i64>> = Vec::new();
    for code in codes.into_iter() {
        if seen.insert(code) {
            distinct.push(code);
        }
    }

    let labels: Vec<&str> = distinct
        .iter()
        .map(|code| dimension.label_for(*code))
        .collect();

    let df = DataFrame::new(vec![
        Series::new(dimension.natural_key.into(), distinct).into(),
        sequence(dimension.surrogate_key, labels.len()).into(),
        Series::new(dimension.label.into(), labels).into(),
    ])?;
    info!(rows = df.height(), "dimension built");
    Ok(df)
}

/// One row per trip in record order, keyed by position and carrying the
/// trip's `trip_id` so the fact table can join on it.
#[instrument(skip_all, fields(rows = records.height(), calendar = calendar.version()))]
pub fn build_datetime_dim(
    records: &DataFrame,
    calendar: &dyn HolidayCalendar,
) -> PolarsResult<DataFrame> {
    let trip_ids = records.column("trip_id")?.i64()?;
    let pickup = datetime_micros(records, "pickup_datetime")?;
    let dropoff = datetime_micros(records, "dropoff_datetime")?;

    let len = records.height();
    let mut hours: Vec<Option<i32>> = Vec::with_capacity(len);
    let mut days: Vec<Option<i32>> = Vec::with_capacity(len);
    let mut weekdays: Vec<Option<i32>> = Vec::with_capacity(len);
    let mut months: Vec<Option<i32>> = Vec::with_capacity(len);
    let mut holidays: Vec<Option<bool>> = Vec::with_capacity(len);

    for micros in &pickup {
        let moment = micros
            .and_then(DateTime::from_timestamp_micros)
            .map(|dt| dt.naive_utc());
        hours.push(moment.map(|dt| dt.hour() as i32));
        days.push(moment.map(|dt| dt.day() as i32));
        weekdays.push(moment.map(|dt| dt.weekday().num_days_from_monday() as i32));
        months.push(moment.map(|dt| dt.month() as i32));
        holidays.push(moment.map(|dt| calendar.is_holiday(dt.date())));
    }

    let mut trip_id = trip_ids.clone().into_series();
    trip_id.rename("trip_id".into());

    DataFrame::new(vec![
        sequence("datetime_key", len).into(),
        trip_id.into(),
        datetime_series("pickup_datetime", pickup)?.into(),
        datetime_series("dropoff_datetime", dropoff)?.into(),
        Series::new("pickup_hour".into(), hours).into(),
        Series::new("pickup_day".into(), days).into(),
        Series::new("pickup_weekday".into(), weekdays).into(),
        Series::new("pickup_month".into(), months).into(),
        Series::new("is_holiday".into(), holidays).into(),
    ])
}

/// Distinct trip distances (under `mode`) in first-seen order with a category.
#[instrument(skip(records), fields(rows = records.height()))]
pub fn build_distance_dim(records: &DataFrame, mode: DistanceKeyMode) -> PolarsResult<DataFrame> {
    let distances = records.column("trip_distance")?.f64()?;

    let mut seen: HashSet<Option<u64>> = HashSet::new();
    let mut distinct: Vec<Option<f64>> = Vec::new();
    for distance in distances.into_iter() {
        if seen.insert(mode.key(distance)) {
            distinct.push(distance.map(|value| mode.normalize(value)));
        }
    }

    let categories: Vec<&str> = distinct.iter().map(|d| distance_category(*d)).collect();

    let df = DataFrame::new(vec![
        sequence("distance_key", distinct.len()).into(),
        Series::new("trip_distance".into(), distinct).into(),
        Series::new("distance_category".into(), categories).into(),
    ])?;
    info!(rows = df.height(), "distance dimension built");
    Ok(df)
}

/// Location dimension straight from the zone lookup, keyed by position.
pub fn build_location_dim(zones: &DataFrame) -> PolarsResult<DataFrame> {
    let mut columns: Vec<Column> = vec![sequence("location_key", zones.height()).into()];
    for name in ["location_id", "zone", "borough", "service_zone"] {
        columns.push(zones.column(name)?.clone());
    }
    DataFrame::new(columns)
}
