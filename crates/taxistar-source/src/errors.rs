use polars::prelude::PolarsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{table} could not be decoded: {source}")]
    Decode {
        table: &'static str,
        #[source]
        source: PolarsError,
    },

    #[error("{table} is missing required column '{column}' (accepted names: {accepted})")]
    MissingColumn {
        table: &'static str,
        column: &'static str,
        accepted: String,
    },

    #[error("{table} column '{column}' could not be read as {expected}: {source}")]
    InvalidColumn {
        table: &'static str,
        column: &'static str,
        expected: &'static str,
        #[source]
        source: PolarsError,
    },

    #[error("{table} did not contain any rows")]
    EmptyData { table: &'static str },

    #[error(transparent)]
    Polars(#[from] PolarsError),
}
