use polars::prelude::{DataType, TimeUnit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Text,
    Timestamp,
}

impl ColumnKind {
    pub fn data_type(&self) -> DataType {
        match self {
            ColumnKind::Integer => DataType::Int64,
            ColumnKind::Float => DataType::Float64,
            ColumnKind::Text => DataType::String,
            ColumnKind::Timestamp => DataType::Datetime(TimeUnit::Microseconds, None),
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            ColumnKind::Integer => "int64",
            ColumnKind::Float => "float64",
            ColumnKind::Text => "string",
            ColumnKind::Timestamp => "datetime[us]",
        }
    }
}

/// A canonical column and the names it may carry in a source file. The canonical
/// name is always accepted, so already-renamed extracts load unchanged.
#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub kind: ColumnKind,
}

impl ColumnSpec {
    const fn new(name: &'static str, aliases: &'static [&'static str], kind: ColumnKind) -> Self {
        Self {
            name,
            aliases,
            kind,
        }
    }

    pub fn accepted_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        std::iter::once(self.name).chain(self.aliases.iter().copied())
    }
}

pub const TRIP_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::new("vendor_id", &["VendorID"], ColumnKind::Integer),
    ColumnSpec::new("pickup_datetime", &["tpep_pickup_datetime"], ColumnKind::Timestamp),
    ColumnSpec::new("dropoff_datetime", &["tpep_dropoff_datetime"], ColumnKind::Timestamp),
    ColumnSpec::new("passenger_count", &[], ColumnKind::Integer),
    ColumnSpec::new("trip_distance", &[], ColumnKind::Float),
    ColumnSpec::new("ratecode_id", &["RatecodeID"], ColumnKind::Integer),
    ColumnSpec::new("store_and_fwd", &["store_and_fwd_flag"], ColumnKind::Text),
    ColumnSpec::new("pickup_location_id", &["PULocationID"], ColumnKind::Integer),
    ColumnSpec::new("dropoff_location_id", &["DOLocationID"], ColumnKind::Integer),
    ColumnSpec::new("payment_id", &["payment_type"], ColumnKind::Integer),
    ColumnSpec::new("fare_amount", &[], ColumnKind::Float),
    ColumnSpec::new("extra", &[], ColumnKind::Float),
    ColumnSpec::new("mta_tax", &[], ColumnKind::Float),
    ColumnSpec::new("tip_amount", &[], ColumnKind::Float),
    ColumnSpec::new("tolls_amount", &[], ColumnKind::Float),
    ColumnSpec::new("improvement_surcharge", &[], ColumnKind::Float),
    ColumnSpec::new("total_amount", &[], ColumnKind::Float),
    ColumnSpec::new("congestion_surcharge", &[], ColumnKind::Float),
    ColumnSpec::new("airport_fee", &["Airport_fee"], ColumnKind::Float),
    ColumnSpec::new("cbd_congestion_fee", &[], ColumnKind::Float),
];

pub const ZONE_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::new("location_id", &["LocationID"], ColumnKind::Integer),
    ColumnSpec::new("borough", &["Borough"], ColumnKind::Text),
    ColumnSpec::new("zone", &["Zone"], ColumnKind::Text),
    ColumnSpec::new("service_zone", &[], ColumnKind::Text),
];

/// Surcharge and fee columns that must never be negative on a valid trip.
/// `total_amount` is derived from these and is not checked on its own.
pub const FEE_COLUMNS: [&str; 9] = [
    "fare_amount",
    "extra",
    "mta_tax",
    "tip_amount",
    "tolls_amount",
    "improvement_surcharge",
    "airport_fee",
    "cbd_congestion_fee",
    "congestion_surcharge",
];

/// Monetary measures carried onto the fact table, in output order.
pub const MEASURE_COLUMNS: [&str; 10] = [
    "fare_amount",
    "extra",
    "mta_tax",
    "tip_amount",
    "tolls_amount",
    "improvement_surcharge",
    "total_amount",
    "congestion_surcharge",
    "airport_fee",
    "cbd_congestion_fee",
];
