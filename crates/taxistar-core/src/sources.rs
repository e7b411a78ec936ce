use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::registry::SourceRegistry;

pub const DEFAULT_TRIP_URL_TEMPLATE: &str =
    "https://d37ci6vzurychx.cloudfront.net/trip-data/yellow_tripdata_{year}-{month}.parquet";
pub const DEFAULT_ZONE_LOOKUP_URL: &str =
    "https://d37ci6vzurychx.cloudfront.net/misc/taxi_zone_lookup.csv";
pub const DEFAULT_START_YEAR: i32 = 2025;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} responded with status {status}")]
    Unavailable { url: String, status: u16 },
    #[error("{loader} cannot fetch {location}")]
    Unsupported {
        loader: &'static str,
        location: String,
    },
}

/// Where a source's bytes live: a remote URL or a file on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SourceLocation {
    Url(String),
    Path(PathBuf),
}

impl SourceLocation {
    /// Anything with an http(s) scheme is a URL; everything else is a path.
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with("http://") || raw.starts_with("https://") {
            SourceLocation::Url(raw.to_string())
        } else {
            SourceLocation::Path(PathBuf::from(raw))
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocation::Url(url) => f.write_str(url),
            SourceLocation::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRef {
    pub id: String,
    pub location: SourceLocation,
}

/// Where monthly trip files and the zone lookup are published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceCatalog {
    /// `{year}` and `{month}` (zero padded) are substituted per month.
    pub trip_url_template: String,
    pub zone_lookup_url: String,
    pub start_year: i32,
}

impl Default for SourceCatalog {
    fn default() -> Self {
        Self {
            trip_url_template: DEFAULT_TRIP_URL_TEMPLATE.to_string(),
            zone_lookup_url: DEFAULT_ZONE_LOOKUP_URL.to_string(),
            start_year: DEFAULT_START_YEAR,
        }
    }
}

impl SourceCatalog {
    pub fn trip_source(&self, year: i32, month: u32) -> SourceRef {
        let location = self
            .trip_url_template
            .replace("{year}", &year.to_string())
            .replace("{month}", &format!("{month:02}"));
        SourceRef {
            id: trip_source_id(year, month),
            location: SourceLocation::parse(&location),
        }
    }

    pub fn zone_location(&self) -> SourceLocation {
        SourceLocation::parse(&self.zone_lookup_url)
    }
}

pub fn trip_source_id(year: i32, month: u32) -> String {
    format!("yellow_tripdata_{year}-{month:02}.parquet")
}

/// Every monthly trip file from January of the start year up to and including
/// the month of `today`.
pub fn candidate_sources(catalog: &SourceCatalog, today: NaiveDate) -> Vec<SourceRef> {
    let mut sources = Vec::new();
    for year in catalog.start_year..=today.year() {
        let last_month = if year == today.year() { today.month() } else { 12 };
        for month in 1..=last_month {
            sources.push(catalog.trip_source(year, month));
        }
    }
    sources
}

/// Fetches raw source bytes.
pub trait SourceLoader {
    fn name(&self) -> &'static str;

    fn fetch(&self, location: &SourceLocation) -> Result<Vec<u8>, SourceError>;

    /// Cheap availability probe. Failures count as unavailable.
    fn is_available(&self, location: &SourceLocation) -> bool;
}

/// Reads sources from the local filesystem only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFiles;

impl SourceLoader for LocalFiles {
    fn name(&self) -> &'static str {
        "local-files"
    }

    fn fetch(&self, location: &SourceLocation) -> Result<Vec<u8>, SourceError> {
        match location {
            SourceLocation::Path(path) => read_local(path),
            SourceLocation::Url(_) => Err(SourceError::Unsupported {
                loader: self.name(),
                location: location.to_string(),
            }),
        }
    }

    fn is_available(&self, location: &SourceLocation) -> bool {
        matches!(location, SourceLocation::Path(path) if path.is_file())
    }
}

pub(crate) fn read_local(path: &Path) -> Result<Vec<u8>, SourceError> {
    fs::read(path).map_err(|source| SourceError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Candidates that have not been recorded yet and are currently available.
pub fn pending_sources(
    candidates: Vec<SourceRef>,
    registry: &SourceRegistry,
    loader: &dyn SourceLoader,
) -> Vec<SourceRef> {
    candidates
        .into_iter()
        .filter(|source| {
            if registry.contains(&source.id) {
                debug!(source_id = %source.id, "already processed");
                return false;
            }
            let available = loader.is_available(&source.location);
            if !available {
                debug!(source_id = %source.id, location = %source.location, "not available");
            }
            available
        })
        .collect()
}
