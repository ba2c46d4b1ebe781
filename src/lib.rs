//! # merra2station
//!
//! A Rust library for attaching daily MERRA-2 reanalysis statistics to station
//! observation tables.
//!
//! ## Features
//!
//! - **Grid matching**: station coordinates are snapped to the nearest MERRA-2 grid cell
//! - **OPeNDAP subsetting**: only the hourly samples of one grid cell are requested
//! - **On-disk cache**: granules already present locally are never downloaded again
//! - **Configurable reduction**: any daily statistic plus a unit conversion
//! - **Typed row outcomes**: every row reports a value, a skip or a failure cause
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use merra2station::config::{Credentials, JobConfig};
//! use merra2station::process_station_table;
//! use merra2station::reader::NetCdfReader;
//! use merra2station::storage::HttpDownloader;
//! use std::path::Path;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = JobConfig::default();
//!     let credentials = Credentials::from_env_file(".env")?;
//!     let downloader = HttpDownloader::new(credentials, config.connections, Duration::from_secs(300))?;
//!
//!     let report = process_station_table(&config, Path::new("stations.csv"), &downloader, &NetCdfReader).await?;
//!     println!("{} values written to {}", report.computed(), report.output_path.display());
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod cache;
pub mod cli;
pub mod config;
pub mod grid;
pub mod log;
pub mod reader;
pub mod request;
pub mod storage;
pub mod table;


use crate::aggregate::{AggregateError, aggregate_for_date};
use crate::cache::{CacheError, GranuleCache};
use crate::config::{ConfigError, JobConfig};
use crate::reader::DatasetReader;
use crate::request::{RequestError, build_request};
use crate::storage::Downloader;
use crate::table::{StationRow, StationTable, TableError, output_path};
use ::log::debug;
use chrono::{Datelike, NaiveDate};
use indicatif::ProgressBar;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Fatal errors that abort a batch.
#[derive(Error, Debug)]
pub enum Merra2Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Table(#[from] TableError),
}

/// Why a single row produced no value.
#[derive(Error, Debug)]
pub enum RowError {
    #[error("Invalid row: {0}")]
    InvalidRow(String),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

/// Result of processing one row.
#[derive(Debug)]
pub enum RowOutcome {
    /// Aggregated and converted value written to the row
    Value(f64),
    /// Date before the dataset coverage; nothing was fetched
    Skipped,
    Failed(RowError),
}

impl RowOutcome {
    pub fn value(&self) -> Option<f64> {
        match self {
            RowOutcome::Value(v) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct RowReport {
    pub station: String,
    pub date: Option<NaiveDate>,
    pub outcome: RowOutcome,
}

/// Summary of a processed station table.
#[derive(Debug)]
pub struct BatchReport {
    pub rows: Vec<RowReport>,
    pub output_path: PathBuf,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn computed(&self) -> usize {
        self.rows.iter().filter(|r| matches!(r.outcome, RowOutcome::Value(_))).count()
    }

    pub fn skipped(&self) -> usize {
        self.rows.iter().filter(|r| matches!(r.outcome, RowOutcome::Skipped)).count()
    }

    pub fn failed(&self) -> usize {
        self.rows.iter().filter(|r| matches!(r.outcome, RowOutcome::Failed(_))).count()
    }
}

/// Parses `YYYY-MM-DD`, ignoring a trailing time component.
pub fn parse_collection_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| raw.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
}

struct RowContext<'a> {
    config: &'a JobConfig,
    cache: GranuleCache,
    downloader: &'a dyn Downloader,
    reader: &'a dyn DatasetReader,
    progress: ProgressBar,
}

impl RowContext<'_> {
    async fn process(&self, row: &StationRow) -> RowReport {
        let station = row.station.clone().unwrap_or_default();
        let date = row.collected_at.as_deref().and_then(parse_collection_date);

        let outcome = match self.run(&station, row, date).await {
            Ok(outcome) => outcome,
            Err(e) => RowOutcome::Failed(e),
        };

        RowReport {
            station,
            date,
            outcome,
        }
    }

    async fn run(
        &self,
        station: &str,
        row: &StationRow,
        date: Option<NaiveDate>,
    ) -> Result<RowOutcome, RowError> {
        let config = self.config;
        let date = date.ok_or_else(|| {
            RowError::InvalidRow(format!(
                "station '{}' has no valid collection date ({:?})",
                station, row.collected_at
            ))
        })?;

        if date.year() < config.coverage_start_year {
            debug!("Skipping {} @ {}: before dataset coverage", station, date);
            return Ok(RowOutcome::Skipped);
        }

        if station.is_empty() {
            return Err(RowError::InvalidRow(format!("row dated {} has no station name", date)));
        }
        let (latitude, longitude) = match (row.latitude, row.longitude) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => {
                return Err(RowError::InvalidRow(format!(
                    "station '{}' has no coordinates",
                    station
                )));
            }
        };

        let grid_index = grid::translate(latitude, longitude);
        debug!(
            "{} ({}, {}) -> grid {:?} centred at {:?}",
            station,
            latitude,
            longitude,
            grid_index,
            grid_index.to_degrees()
        );

        let request = build_request(config, &config.dataset_label, grid_index, date)?;
        debug!("Request URL: {}", request.url);

        let cached = match self
            .cache
            .ensure_local_with(station, &request.file_name, &request.url, self.downloader, || {
                log::downloading(&self.progress, &config.field_name, station, date)
            })
            .await
        {
            Ok(cached) => cached,
            Err(e) => {
                log::download_error(&self.progress, &config.field_name, station, date, &e);
                return Err(e.into());
            }
        };
        if cached.is_hit() {
            log::already_downloaded(&self.progress, &config.field_name, station, date);
        }

        match aggregate_for_date(
            self.reader,
            cached.path(),
            &config.field_id,
            config.statistic,
            config.conversion,
            date,
        ) {
            Ok(daily) => Ok(RowOutcome::Value(daily.value)),
            Err(e) => {
                log::read_error(&self.progress, &config.field_name, station, date, &e);
                Err(e.into())
            }
        }
    }
}

/// Processes a station table end to end.
///
/// Rows are handled one at a time: snap to the grid, build the request,
/// make the granule available locally, aggregate. A failing row leaves its
/// cell empty and the batch continues. The augmented table is written to
/// `<input>_<dataset_label>_processed.csv`.
///
/// # Errors
///
/// Only table-level problems are fatal: an unreadable input, missing
/// required columns or an unwritable output.
pub async fn process_station_table(
    config: &JobConfig,
    input: &Path,
    downloader: &dyn Downloader,
    reader: &dyn DatasetReader,
) -> Result<BatchReport, Merra2Error> {
    config.validate()?;
    let table = StationTable::from_csv(input)?;
    let progress = log::row_progress(table.height() as u64);
    process_table(config, input, table, downloader, reader, progress).await
}

async fn process_table(
    config: &JobConfig,
    input: &Path,
    mut table: StationTable,
    downloader: &dyn Downloader,
    reader: &dyn DatasetReader,
    progress: ProgressBar,
) -> Result<BatchReport, Merra2Error> {
    let start = Instant::now();
    let rows = table.rows()?;

    let context = RowContext {
        config,
        cache: GranuleCache::new(&config.cache_root, &config.field_name),
        downloader,
        reader,
        progress,
    };

    let mut reports = Vec::with_capacity(rows.len());
    for row in &rows {
        let report = context.process(row).await;
        context.progress.inc(1);
        reports.push(report);
    }
    context.progress.finish_and_clear();

    let values: Vec<Option<f64>> = reports.iter().map(|r| r.outcome.value()).collect();
    table.set_column(&config.field_name, &values)?;

    let output_path = output_path(input, &config.dataset_label);
    table.write_csv(&output_path)?;

    Ok(BatchReport {
        rows: reports,
        output_path,
        elapsed: start.elapsed(),
    })
}

/// Runs the driver with a caller-supplied progress bar.
#[cfg(test)]
pub(crate) async fn process_station_table_with_progress(
    config: &JobConfig,
    input: &Path,
    downloader: &dyn Downloader,
    reader: &dyn DatasetReader,
    progress: ProgressBar,
) -> Result<BatchReport, Merra2Error> {
    config.validate()?;
    let table = StationTable::from_csv(input)?;
    process_table(config, input, table, downloader, reader, progress).await
}
