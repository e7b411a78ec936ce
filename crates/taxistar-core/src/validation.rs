use polars::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

/// Foreign keys checked on the trip fact, in report order.
pub const KEY_COLUMNS: [&str; 7] = [
    "vendor_key",
    "ratecode_key",
    "payment_key",
    "distance_key",
    "pickup_location_key",
    "dropoff_location_key",
    "datetime_key",
];

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("trip fact is missing key column '{0}'")]
    MissingKeyColumn(&'static str),
    #[error("trip fact has {total} unresolved keys ({detail})")]
    UnresolvedKeys { total: usize, detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyCount {
    pub column: &'static str,
    pub missing: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KeyReport {
    pub counts: Vec<KeyCount>,
}

impl KeyReport {
    pub fn missing(&self, column: &str) -> Option<usize> {
        self.counts
            .iter()
            .find(|count| count.column == column)
            .map(|count| count.missing)
    }

    pub fn total_missing(&self) -> usize {
        self.counts.iter().map(|count| count.missing).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.total_missing() == 0
    }

    pub fn ensure_complete(&self) -> Result<(), ValidationError> {
        if self.is_complete() {
            return Ok(());
        }
        let detail = self
            .counts
            .iter()
            .filter(|count| count.missing > 0)
            .map(|count| format!("{}={}", count.column, count.missing))
            .collect::<Vec<_>>()
            .join(", ");
        Err(ValidationError::UnresolvedKeys {
            total: self.total_missing(),
            detail,
        })
    }
}

/// Counts null foreign keys on the trip fact.
pub fn validate_keys(fact: &DataFrame) -> Result<KeyReport, ValidationError> {
    let mut counts = Vec::with_capacity(KEY_COLUMNS.len());
    for column in KEY_COLUMNS {
        let values = fact
            .column(column)
            .map_err(|_| ValidationError::MissingKeyColumn(column))?;
        let missing = values.null_count();
        if missing > 0 {
            warn!(column, missing, "unresolved foreign keys");
        } else {
            info!(column, missing, "foreign key check");
        }
        counts.push(KeyCount { column, missing });
    }
    Ok(KeyReport { counts })
}
