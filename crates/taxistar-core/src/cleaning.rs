use polars::prelude::*;
use serde::Serialize;
use taxistar_source::FEE_COLUMNS;
use tracing::{info, instrument};

use crate::columns::datetime_micros;

const MICROS_PER_MINUTE: f64 = 60.0 * 1_000_000.0;
const MIN_DURATION_MINUTES: f64 = 2.0;
const MAX_DURATION_MINUTES: f64 = 180.0;

/// The records a filter kept together with how many it let through and removed.
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub dataframe: DataFrame,
    pub kept: usize,
    pub dropped: usize,
}

impl FilterOutcome {
    fn from_mask(records: &DataFrame, keep: Vec<bool>) -> PolarsResult<Self> {
        let kept = keep.iter().filter(|flag| **flag).count();
        let dropped = keep.len() - kept;
        let mask: BooleanChunked = keep.into_iter().collect();
        let dataframe = records.filter(&mask)?;
        Ok(Self {
            dataframe,
            kept,
            dropped,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleaningReport {
    pub input_rows: usize,
    pub invalid_fees: usize,
    pub invalid_duration: usize,
    pub duplicates: usize,
    pub output_rows: usize,
}

impl CleaningReport {
    pub fn dropped(&self) -> usize {
        self.invalid_fees + self.invalid_duration + self.duplicates
    }
}

#[derive(Debug, Clone)]
pub struct CleanedTrips {
    pub dataframe: DataFrame,
    pub report: CleaningReport,
}

/// Drops every trip where any fee or surcharge is negative. Missing values
/// are not negative and survive.
#[instrument(skip_all, fields(rows = records.height()))]
pub fn remove_invalid_fees(records: &DataFrame) -> PolarsResult<FilterOutcome> {
    let len = records.height();
    let mut keep = vec![true; len];

    for name in FEE_COLUMNS {
        let values = records.column(name)?.f64()?;
        for (idx, flag) in keep.iter_mut().enumerate() {
            if matches!(values.get(idx), Some(value) if value < 0.0) {
                *flag = false;
            }
        }
    }

    let outcome = FilterOutcome::from_mask(records, keep)?;
    info!(
        valid = outcome.kept,
        invalid = outcome.dropped,
        "fee validation complete"
    );
    Ok(outcome)
}

/// Keeps trips lasting strictly between 2 and 180 whole minutes. Durations are
/// rounded half-to-even before comparison; trips without both timestamps are dropped.
#[instrument(skip_all, fields(rows = records.height()))]
pub fn remove_invalid_duration(records: &DataFrame) -> PolarsResult<FilterOutcome> {
    let pickup = datetime_micros(records, "pickup_datetime")?;
    let dropoff = datetime_micros(records, "dropoff_datetime")?;

    let keep = pickup
        .iter()
        .zip(dropoff.iter())
        .map(|pair| match pair {
            (Some(start), Some(end)) => {
                let minutes = duration_minutes(*start, *end);
                minutes > MIN_DURATION_MINUTES && minutes < MAX_DURATION_MINUTES
            }
            _ => false,
        })
        .collect();

    let outcome = FilterOutcome::from_mask(records, keep)?;
    info!(
        valid = outcome.kept,
        invalid = outcome.dropped,
        "duration validation complete"
    );
    Ok(outcome)
}

pub fn duration_minutes(pickup_micros: i64, dropoff_micros: i64) -> f64 {
    ((dropoff_micros - pickup_micros) as f64 / MICROS_PER_MINUTE).round_ties_even()
}

/// Removes rows that repeat an earlier row in every column. The first
/// occurrence is kept and row order is preserved.
#[instrument(skip_all, fields(rows = records.height()))]
pub fn remove_duplicates(records: &DataFrame) -> PolarsResult<FilterOutcome> {
    let dataframe = records
        .clone()
        .lazy()
        .unique_stable(None, UniqueKeepStrategy::First)
        .collect()?;

    let kept = dataframe.height();
    let dropped = records.height() - kept;
    info!(kept, duplicates = dropped, "duplicate removal complete");
    Ok(FilterOutcome {
        dataframe,
        kept,
        dropped,
    })
}

/// Runs the fee, duration and duplicate filters in that order.
pub fn clean_trips(records: &DataFrame) -> PolarsResult<CleanedTrips> {
    let input_rows = records.height();

    let fees = remove_invalid_fees(records)?;
    let duration = remove_invalid_duration(&fees.dataframe)?;
    let unique = remove_duplicates(&duration.dataframe)?;

    let report = CleaningReport {
        input_rows,
        invalid_fees: fees.dropped,
        invalid_duration: duration.dropped,
        duplicates: unique.dropped,
        output_rows: unique.kept,
    };
    info!(
        input_rows,
        output_rows = report.output_rows,
        dropped = report.dropped(),
        "trip cleaning complete"
    );

    Ok(CleanedTrips {
        dataframe: unique.dataframe,
        report,
    })
}
