use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use polars::prelude::DataFrame;
use serde::Serialize;
use taxistar_source::{load_trips, load_zones};
use tracing::{error, info, info_span, warn};

use crate::cleaning::{clean_trips, CleaningReport};
use crate::columns::datetime_micros;
use crate::config::PipelineConfig;
use crate::dimensions::{build_dimensions, DistanceKeyMode};
use crate::fact::{assign_trip_ids, build_fact};
use crate::holidays::{HolidayCalendar, HolidayTable};
use crate::registry::{content_hash, RegistryEntry, SourceRegistry};
use crate::sources::{candidate_sources, pending_sources, SourceLoader, SourceLocation, SourceRef};
use crate::storage::{CsvStore, ParquetStore, StarSchema, WriteReport};
use crate::validation::{validate_keys, KeyReport};

#[derive(Debug, Clone, Serialize)]
pub struct StageTiming {
    pub stage: &'static str,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct StageClock {
    timings: Vec<StageTiming>,
}

impl StageClock {
    /// Runs one stage inside its own span and records how long it took.
    fn run<T>(&mut self, stage: &'static str, work: impl FnOnce() -> Result<T>) -> Result<T> {
        let span = info_span!("stage", stage);
        let _entered = span.enter();
        let started = Instant::now();
        let outcome = work();
        let elapsed = started.elapsed();
        self.timings.push(StageTiming { stage, elapsed });
        match &outcome {
            Ok(_) => info!(elapsed_ms = elapsed.as_millis() as u64, "stage complete"),
            Err(err) => error!(elapsed_ms = elapsed.as_millis() as u64, error = %format!("{err:#}"), "stage failed"),
        }
        outcome
    }
}

/// A star schema built in memory, not yet validated or stored.
#[derive(Debug, Clone)]
pub struct StarSchemaBuild {
    pub schema: StarSchema,
    pub cleaning: CleaningReport,
    pub holiday_calendar: String,
    pub timings: Vec<StageTiming>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub source_id: String,
    pub cleaning: CleaningReport,
    pub fact_rows: usize,
    pub keys: KeyReport,
    pub holiday_calendar: String,
    pub parquet: WriteReport,
    pub csv: WriteReport,
    pub timings: Vec<StageTiming>,
}

impl BatchSummary {
    pub fn total_elapsed(&self) -> Duration {
        self.timings.iter().map(|timing| timing.elapsed).sum()
    }
}

/// Holiday table covering every pickup year in `records`.
pub fn holiday_calendar_for(records: &DataFrame) -> Result<HolidayTable> {
    let pickups = datetime_micros(records, "pickup_datetime")?;
    let years = pickups
        .into_iter()
        .flatten()
        .filter_map(DateTime::from_timestamp_micros)
        .map(|dt| dt.year());
    let (first, last) = years.fold((i32::MAX, i32::MIN), |(lo, hi), year| {
        (lo.min(year), hi.max(year))
    });
    Ok(HolidayTable::us_ny(first..=last))
}

/// Cleans raw trip records and reshapes them into the fact and dimension tables.
pub fn build_star_schema(
    trips: &DataFrame,
    zones: &DataFrame,
    mode: DistanceKeyMode,
) -> Result<StarSchemaBuild> {
    let mut clock = StageClock::default();

    let cleaned = clock.run("clean", || {
        clean_trips(trips)
            .with_context(|| format!("failed to clean {} trip records", trips.height()))
    })?;
    let records = clock.run("assign_trip_ids", || {
        assign_trip_ids(&cleaned.dataframe).context("failed to assign trip ids")
    })?;

    let calendar = holiday_calendar_for(&records)?;
    let dimensions = clock.run("dimensions", || {
        build_dimensions(&records, zones, &calendar, mode).with_context(|| {
            format!("failed to build dimensions from {} cleaned trips", records.height())
        })
    })?;
    let trip_fact = clock.run("fact", || {
        build_fact(&records, &dimensions, mode).with_context(|| {
            format!("failed to assemble trip fact from {} cleaned trips", records.height())
        })
    })?;

    Ok(StarSchemaBuild {
        schema: StarSchema {
            trip_fact,
            dimensions,
        },
        cleaning: cleaned.report,
        holiday_calendar: calendar.version().to_string(),
        timings: clock.timings,
    })
}

/// Builds, validates and stores one batch under `source_id`. Both stores are
/// attempted; the batch fails if either of them fails.
pub fn process_batch(
    source_id: &str,
    trips: &DataFrame,
    zones: &DataFrame,
    config: &PipelineConfig,
) -> Result<BatchSummary> {
    let span = info_span!("batch", source_id);
    let _entered = span.enter();
    info!(rows = trips.height(), "processing batch");

    let build = build_star_schema(trips, zones, config.distance_mode())?;
    let mut clock = StageClock {
        timings: build.timings,
    };
    let schema = build.schema;
    let fact_rows = schema.trip_fact.height();

    let keys = clock.run("validate", || {
        let report = validate_keys(&schema.trip_fact)
            .with_context(|| format!("failed to validate {fact_rows} fact rows"))?;
        if config.fail_on_missing_keys {
            report
                .ensure_complete()
                .with_context(|| format!("batch {source_id} has unresolved keys"))?;
        } else if !report.is_complete() {
            warn!(missing = report.total_missing(), "storing batch with unresolved keys");
        }
        Ok(report)
    })?;

    let parquet_store = ParquetStore::new(&config.data_root, config.parquet_compression);
    let csv_store = CsvStore::new(&config.data_root);
    let parquet = clock.run("store_parquet", || {
        parquet_store
            .write(&schema, source_id)
            .with_context(|| format!("failed to store {fact_rows} fact rows as parquet"))
    });
    let csv = clock.run("store_csv", || {
        csv_store
            .write(&schema, source_id)
            .with_context(|| format!("failed to store {fact_rows} fact rows as csv"))
    });

    let summary = BatchSummary {
        source_id: source_id.to_string(),
        cleaning: build.cleaning,
        fact_rows,
        keys,
        holiday_calendar: build.holiday_calendar,
        parquet: parquet?,
        csv: csv?,
        timings: clock.timings,
    };
    info!(
        fact_rows,
        elapsed_ms = summary.total_elapsed().as_millis() as u64,
        "batch stored"
    );
    Ok(summary)
}

pub fn fetch_zones(location: &SourceLocation, loader: &dyn SourceLoader) -> Result<DataFrame> {
    let bytes = loader
        .fetch(location)
        .with_context(|| format!("failed to fetch zone lookup from {location}"))?;
    load_zones(&bytes).with_context(|| format!("failed to load zone lookup from {location}"))
}

/// Fetches, loads and processes a single trip source. The returned entry has
/// not been recorded in any registry yet.
pub fn ingest_source(
    source: &SourceRef,
    zones: &DataFrame,
    config: &PipelineConfig,
    loader: &dyn SourceLoader,
) -> Result<(BatchSummary, RegistryEntry)> {
    let bytes = loader
        .fetch(&source.location)
        .with_context(|| format!("failed to fetch {}", source.id))?;
    let content_hash = content_hash(&bytes);
    let trips = load_trips(&bytes).with_context(|| format!("failed to load {}", source.id))?;
    drop(bytes);

    let summary = process_batch(&source.id, &trips, zones, config)?;
    let entry = RegistryEntry {
        source_id: source.id.clone(),
        processed_at: Some(Utc::now()),
        content_hash: Some(content_hash),
        fact_rows: Some(summary.fact_rows),
    };
    Ok((summary, entry))
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedSource {
    pub source_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub processed: Vec<BatchSummary>,
    pub failed: Vec<FailedSource>,
}

/// Processes every available source not yet in `registry`. A failing source
/// is logged and skipped; the remaining sources still run.
pub fn run_pending(
    config: &PipelineConfig,
    loader: &dyn SourceLoader,
    registry: &mut SourceRegistry,
    today: NaiveDate,
) -> Result<RunSummary> {
    let candidates = candidate_sources(&config.sources, today);
    let pending = pending_sources(candidates, registry, loader);
    let mut summary = RunSummary::default();
    if pending.is_empty() {
        info!("no new trip sources");
        return Ok(summary);
    }
    info!(pending = pending.len(), loader = loader.name(), "processing pending sources");

    let mut zones: Option<DataFrame> = None;
    for source in &pending {
        let span = info_span!("source", source_id = %source.id);
        let _entered = span.enter();

        let outcome = process_pending(source, &mut zones, config, loader, registry);
        match outcome {
            Ok(batch) => summary.processed.push(batch),
            Err(err) => {
                error!(error = %format!("{err:#}"), "source failed; continuing");
                summary.failed.push(FailedSource {
                    source_id: source.id.clone(),
                    error: format!("{err:#}"),
                });
            }
        }
    }

    info!(
        processed = summary.processed.len(),
        failed = summary.failed.len(),
        "run complete"
    );
    Ok(summary)
}

fn process_pending(
    source: &SourceRef,
    zones: &mut Option<DataFrame>,
    config: &PipelineConfig,
    loader: &dyn SourceLoader,
    registry: &mut SourceRegistry,
) -> Result<BatchSummary> {
    let lookup = match zones {
        Some(lookup) => lookup,
        None => zones.insert(fetch_zones(&config.sources.zone_location(), loader)?),
    };

    let (batch, entry) = ingest_source(source, lookup, config, loader)?;
    registry.record(entry);
    registry
        .save()
        .with_context(|| format!("failed to record {} in the registry", source.id))?;
    Ok(batch)
}
