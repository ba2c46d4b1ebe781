//! # CLI Module
//!
//! Command-line interface for merra2station: one positional station table,
//! a logging level switch and an optional configuration file.

use crate::config::{CONFIG_ENV_VAR, ConfigError, JobConfig};
use clap::Parser;
use clap::error::ErrorKind;
use std::path::PathBuf;

pub const USAGE_HINT: &str = "Please provide file name as argument.";

/// Attach daily MERRA-2 statistics to a station observation table
#[derive(Parser, Debug)]
#[command(name = "merra2station")]
#[command(about = "Attach daily MERRA-2 reanalysis statistics to station observation tables")]
#[command(version)]
#[command(long_about = "
merra2station reads a CSV of station observations, snaps every station to the
nearest MERRA-2 grid cell, downloads the single-cell subset of the matching
daily granule through OPeNDAP and writes the daily statistic into a new column.

The input needs the columns station_name, latitude, longitude and collected_at
(YYYY-MM-DD). Results go to <INPUT>_<dataset_label>_processed.csv, where
dataset_label comes from the job configuration (MERRA2 by default).
Earthdata credentials are read from the 'username' and 'key' entries of a
.env file in the working directory. Downloads are cached under <field_name>/<station>/.

EXAMPLES:
  # Default job: daily mean 2 m temperature in Celsius
  merra2station stations.csv

  # Custom job definition
  merra2station stations.csv --config humidity.yaml
")]
pub struct Cli {
    /// Station table (CSV)
    #[arg(value_name = "INPUT")]
    pub input: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Only print warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Job configuration file (JSON or YAML)
    #[arg(short, long, env = CONFIG_ENV_VAR)]
    pub config: Option<PathBuf>,
}

impl Cli {
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }

    /// Job configuration from `--config`, or the defaults.
    pub fn job_config(&self) -> Result<JobConfig, ConfigError> {
        match &self.config {
            Some(path) => JobConfig::from_file(path),
            None => Ok(JobConfig::default()),
        }
    }
}

/// Exit status for a failed parse: 0 for `--help`/`--version`, 1 otherwise.
pub fn exit_code(error: &clap::Error) -> i32 {
    match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}
