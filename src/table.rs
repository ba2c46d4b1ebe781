//! # Station Table Module
//!
//! Reads the station-observation CSV, exposes its rows to the batch driver and
//! writes the table back with the computed column appended.
//!
//! Required columns: `station_name`, `latitude`, `longitude`, `collected_at`.
//! Any other columns are carried through untouched.

use log::debug;
use polars::prelude::*;
use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const STATION_COLUMN: &str = "station_name";
pub const LATITUDE_COLUMN: &str = "latitude";
pub const LONGITUDE_COLUMN: &str = "longitude";
pub const DATE_COLUMN: &str = "collected_at";

pub const REQUIRED_COLUMNS: [&str; 4] = [STATION_COLUMN, LATITUDE_COLUMN, LONGITUDE_COLUMN, DATE_COLUMN];

#[derive(Error, Debug)]
pub enum TableError {
    #[error("Failed to read station table '{0}'")]
    Read(PathBuf, #[source] PolarsError),

    #[error("Station table is missing required column '{0}'")]
    MissingColumn(String),

    #[error("Failed to create output file '{0}'")]
    Create(PathBuf, #[source] std::io::Error),

    #[error("Failed to write station table '{0}'")]
    Write(PathBuf, #[source] PolarsError),

    #[error("Expected {expected} values for the new column, got {found}")]
    LengthMismatch { expected: usize, found: usize },

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),
}

pub type TableResult<T> = Result<T, TableError>;

/// One observation as read from the table. Cells may be empty.
#[derive(Debug, Clone, PartialEq)]
pub struct StationRow {
    pub station: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub collected_at: Option<String>,
}

/// In-memory station table.
#[derive(Debug, Clone)]
pub struct StationTable {
    df: DataFrame,
}

impl StationTable {
    /// Wraps an existing DataFrame after checking the required columns.
    pub fn new(df: DataFrame) -> TableResult<Self> {
        let names: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        for required in REQUIRED_COLUMNS {
            if !names.iter().any(|n| n == required) {
                return Err(TableError::MissingColumn(required.to_string()));
            }
        }
        Ok(Self { df })
    }

    pub fn from_csv<P: AsRef<Path>>(path: P) -> TableResult<Self> {
        let path = path.as_ref();
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))
            .and_then(|reader| reader.finish())
            .map_err(|e| TableError::Read(path.to_path_buf(), e))?;

        debug!("Loaded station table {} with shape {:?}", path.display(), df.shape());
        Self::new(df)
    }

    pub fn height(&self) -> usize {
        self.df.height()
    }

    pub fn dataframe(&self) -> &DataFrame {
        &self.df
    }

    /// Extracts the fields the driver needs from every row.
    pub fn rows(&self) -> TableResult<Vec<StationRow>> {
        let stations = self.df.column(STATION_COLUMN)?.cast(&DataType::String)?;
        let latitudes = self.df.column(LATITUDE_COLUMN)?.cast(&DataType::Float64)?;
        let longitudes = self.df.column(LONGITUDE_COLUMN)?.cast(&DataType::Float64)?;
        let dates = self.df.column(DATE_COLUMN)?.cast(&DataType::String)?;

        let rows = stations
            .str()?
            .into_iter()
            .zip(latitudes.f64()?.into_iter())
            .zip(longitudes.f64()?.into_iter())
            .zip(dates.str()?.into_iter())
            .map(|(((station, latitude), longitude), collected_at)| StationRow {
                station: station.map(str::to_string),
                latitude,
                longitude,
                collected_at: collected_at.map(str::to_string),
            })
            .collect();
        Ok(rows)
    }

    /// Sets `name` to `values`, replacing an existing column of that name.
    pub fn set_column(&mut self, name: &str, values: &[Option<f64>]) -> TableResult<()> {
        if values.len() != self.df.height() {
            return Err(TableError::LengthMismatch {
                expected: self.df.height(),
                found: values.len(),
            });
        }
        self.df.with_column(Series::new(name.into(), values.to_vec()))?;
        Ok(())
    }

    pub fn write_csv<P: AsRef<Path>>(&mut self, path: P) -> TableResult<()> {
        let path = path.as_ref();
        let mut file = File::create(path).map_err(|e| TableError::Create(path.to_path_buf(), e))?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .finish(&mut self.df)
            .map_err(|e| TableError::Write(path.to_path_buf(), e))?;

        debug!("Wrote station table {} with shape {:?}", path.display(), self.df.shape());
        Ok(())
    }
}

/// Output location for an input table: `<input>_<label>_processed.csv`.
pub fn output_path(input: &Path, dataset_label: &str) -> PathBuf {
    let mut name = OsString::from(input.as_os_str());
    name.push(format!("_{}_processed.csv", dataset_label));
    PathBuf::from(name)
}
