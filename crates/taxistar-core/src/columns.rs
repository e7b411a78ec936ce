use polars::prelude::*;

/// Reads a datetime column as microseconds since the epoch regardless of the
/// unit it is stored in.
pub(crate) fn datetime_micros(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<i64>>> {
    let values = df.column(name)?.datetime()?;
    let scale: fn(i64) -> i64 = match values.time_unit() {
        TimeUnit::Nanoseconds => |v| v.div_euclid(1_000),
        TimeUnit::Microseconds => |v| v,
        TimeUnit::Milliseconds => |v| v * 1_000,
    };
    Ok((0..df.height())
        .map(|idx| values.get(idx).map(scale))
        .collect())
}

pub(crate) fn datetime_series(name: &str, micros: Vec<Option<i64>>) -> PolarsResult<Series> {
    Series::new(name.into(), micros).cast(&DataType::Datetime(TimeUnit::Microseconds, None))
}

/// Builds a 1-based Int64 sequence, used for surrogate keys and trip ids.
pub(crate) fn sequence(name: &str, len: usize) -> Series {
    Series::new(name.into(), (1..=len as i64).collect::<Vec<i64>>())
}
