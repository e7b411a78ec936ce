pub mod cleaning;
pub mod config;
pub mod dimensions;
pub mod fact;
pub mod fetch;
pub mod holidays;
pub mod pipeline;
pub mod registry;
pub mod sources;
pub mod storage;
pub mod validation;

mod columns;

pub use taxistar_source::{load_trips, load_zones, LoadError};
