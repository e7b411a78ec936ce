pub mod errors;
pub mod schema;
mod project;
mod trips;
mod zones;

pub use errors::LoadError;
pub use schema::{
    ColumnKind, ColumnSpec, FEE_COLUMNS, MEASURE_COLUMNS, TRIP_COLUMNS, ZONE_COLUMNS,
};
pub use trips::{load_trips, TRIPS_TABLE};
pub use zones::{load_zones, ZONES_TABLE};
