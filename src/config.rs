//! # Job Configuration Module
//!
//! This module provides the configuration consumed by the batch driver and the
//! URL builder: which MERRA-2 field to fetch, from which collection, how to
//! reduce the hourly samples and how to convert the result.
//!
//! Every setting has a default matching the classic two-metre temperature
//! workflow (`T2M` from `M2I1NXASM`, daily mean, Kelvin to Celsius), so a
//! configuration file is optional. When `--config` or the `MERRA2STATION_CONFIG`
//! environment variable points to a JSON or YAML file, its values override the
//! defaults.
//!
//! ## Example Usage
//!
//! ```rust
//! use merra2station::config::{JobConfig, Statistic};
//!
//! let json = r#"
//! {
//!   "field_id": "QV2M",
//!   "field_name": "humidity_MERRA",
//!   "statistic": "max",
//!   "conversion": { "kind": "identity" }
//! }"#;
//! let config = JobConfig::from_json(json)?;
//! assert_eq!(config.statistic, Statistic::Max);
//! assert_eq!(config.database_id, "inst1_2d_asm_Nx");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming an optional configuration file.
pub const CONFIG_ENV_VAR: &str = "MERRA2STATION_CONFIG";

/// Errors raised while loading configuration or credentials.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{0}'")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to load credentials from '{0}'")]
    CredentialsFile(PathBuf, #[source] dotenvy::Error),

    #[error("Missing credential entry '{0}' in environment file")]
    MissingCredential(&'static str),
}

/// Statistic used to reduce the hourly samples of one day to a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    #[default]
    Mean,
    Median,
    Sum,
    Min,
    Max,
    Std,
    First,
    Last,
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Statistic::Mean => "mean",
            Statistic::Median => "median",
            Statistic::Sum => "sum",
            Statistic::Min => "min",
            Statistic::Max => "max",
            Statistic::Std => "std",
            Statistic::First => "first",
            Statistic::Last => "last",
        };
        f.write_str(name)
    }
}

/// Scalar conversion applied to the reduced value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitConversion {
    #[default]
    KelvinToCelsius,
    CelsiusToKelvin,
    KelvinToFahrenheit,
    Identity,
    /// `value * scale + offset`
    Linear { scale: f64, offset: f64 },
}

impl UnitConversion {
    pub fn apply(&self, value: f64) -> f64 {
        match self {
            UnitConversion::KelvinToCelsius => value - 273.15,
            UnitConversion::CelsiusToKelvin => value + 273.15,
            UnitConversion::KelvinToFahrenheit => (value - 273.15) * 9.0 / 5.0 + 32.0,
            UnitConversion::Identity => value,
            UnitConversion::Linear { scale, offset } => value * scale + offset,
        }
    }
}

impl fmt::Display for UnitConversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitConversion::KelvinToCelsius => f.write_str("kelvin -> celsius"),
            UnitConversion::CelsiusToKelvin => f.write_str("celsius -> kelvin"),
            UnitConversion::KelvinToFahrenheit => f.write_str("kelvin -> fahrenheit"),
            UnitConversion::Identity => f.write_str("identity"),
            UnitConversion::Linear { scale, offset } => write!(f, "x * {} + {}", scale, offset),
        }
    }
}

/// Main configuration structure for a station-table job.
///
/// Field and collection identifiers can be looked up in the MERRA-2 file
/// specification (GMAO Office Note No. 9).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobConfig {
    /// Variable name inside the MERRA-2 granule, e.g. `T2M`
    pub field_id: String,
    /// Name of the appended column and of the cache directory
    pub field_name: String,
    /// Collection short name, e.g. `M2I1NXASM`
    pub database_name: String,
    /// Collection file identifier, e.g. `inst1_2d_asm_Nx`
    pub database_id: String,
    /// OPeNDAP root holding the MERRA-2 collections
    pub opendap_root: String,
    /// Label used in granule names and in the output file suffix
    pub dataset_label: String,
    /// Hourly samples requested per day
    pub time_steps: usize,
    pub statistic: Statistic,
    pub conversion: UnitConversion,
    /// Maximum concurrent connections used by the downloader
    pub connections: usize,
    /// Request timeout for the downloader, in seconds
    pub timeout_secs: u64,
    /// First year covered by the dataset; earlier rows are skipped
    pub coverage_start_year: i32,
    /// Directory under which `<field_name>/<station>/` cache folders live
    pub cache_root: PathBuf,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            field_id: "T2M".to_string(),
            field_name: "temperature_MERRA".to_string(),
            database_name: "M2I1NXASM".to_string(),
            database_id: "inst1_2d_asm_Nx".to_string(),
            opendap_root: "https://goldsmr4.gesdisc.eosdis.nasa.gov/opendap/MERRA2/".to_string(),
            dataset_label: "MERRA2".to_string(),
            time_steps: 24,
            statistic: Statistic::default(),
            conversion: UnitConversion::default(),
            connections: 5,
            timeout_secs: 300,
            coverage_start_year: 1980,
            cache_root: PathBuf::from("."),
        }
    }
}

impl JobConfig {
    /// Loads a configuration from a JSON or YAML file, chosen by extension.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;

        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content)?,
            _ => Self::from_json(&content)?,
        };
        Ok(config)
    }

    pub fn from_json(json_str: &str) -> Result<Self, ConfigError> {
        let config: JobConfig = serde_json::from_str(json_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(yaml_str: &str) -> Result<Self, ConfigError> {
        let config: JobConfig = serde_yaml::from_str(yaml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let identifiers = [
            ("field_id", &self.field_id),
            ("field_name", &self.field_name),
            ("database_name", &self.database_name),
            ("database_id", &self.database_id),
            ("opendap_root", &self.opendap_root),
            ("dataset_label", &self.dataset_label),
        ];
        for (name, value) in identifiers {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("'{}' must not be empty", name)));
            }
        }
        if self.connections == 0 {
            return Err(ConfigError::Invalid("'connections' must be at least 1".to_string()));
        }
        if self.time_steps == 0 {
            return Err(ConfigError::Invalid("'time_steps' must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Collection base URL, e.g. `.../MERRA2/M2I1NXASM.5.12.4/`.
    pub fn database_url(&self) -> String {
        let root = self.opendap_root.trim_end_matches('/');
        format!("{}/{}.5.12.4/", root, self.database_name)
    }
}

/// Earthdata account used by the downloader.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("key", &"***")
            .finish()
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            key: key.into(),
        }
    }

    /// Reads the `username` and `key` entries of an environment file without
    /// touching the process environment.
    pub fn from_env_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let entries = dotenvy::from_path_iter(path)
            .map_err(|e| ConfigError::CredentialsFile(path.to_path_buf(), e))?;

        let mut username = None;
        let mut key = None;
        for entry in entries {
            let (name, value) =
                entry.map_err(|e| ConfigError::CredentialsFile(path.to_path_buf(), e))?;
            match name.as_str() {
                "username" => username = Some(value),
                "key" => key = Some(value),
                _ => {}
            }
        }

        Ok(Self {
            username: username.ok_or(ConfigError::MissingCredential("username"))?,
            key: key.ok_or(ConfigError::MissingCredential("key"))?,
        })
    }
}
