use crate::BatchReport;
use crate::config::JobConfig;
use ::log::Level;
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use std::error::Error;

pub fn show_greeting(input_path: &str) {
    println!("=== MERRA-2 Station Scraper ===");
    println!("Processing station table: {}", input_path);
}

pub fn config_echo(config: &JobConfig) {
    println!("\nConfiguration:");
    println!("  Field: {} -> column '{}'", config.field_id, config.field_name);
    println!("  Database: {} ({})", config.database_name, config.database_id);
    println!("  Statistic: {}", config.statistic);
    println!("  Conversion: {}", config.conversion);
    println!("  Coverage starts: {}", config.coverage_start_year);
    println!("  Cache root: {}", config.cache_root.display());
}

/// Progress bar over table rows. Hidden automatically when stderr is not a terminal.
pub fn row_progress(rows: u64) -> ProgressBar {
    let style = ProgressStyle::with_template("[{eta_precise}] {bar:40.cyan/blue} {pos:>6}/{len:6} rows")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");
    ProgressBar::new(rows).with_style(style)
}

/// Prints above a visible bar. A hidden bar swallows `println`, so the line
/// goes to the logger instead.
fn emit(progress: &ProgressBar, level: Level, message: String) {
    if progress.is_hidden() {
        ::log::log!(level, "{}", message);
    } else {
        progress.println(message);
    }
}

fn with_causes(error: &dyn Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(&format!(": {}", cause));
        source = cause.source();
    }
    message
}

pub fn downloading(progress: &ProgressBar, field_name: &str, station: &str, date: NaiveDate) {
    emit(
        progress,
        Level::Info,
        format!("Downloading file: {} of {} @ {}", field_name, station, date),
    );
}

pub fn already_downloaded(progress: &ProgressBar, field_name: &str, station: &str, date: NaiveDate) {
    emit(
        progress,
        Level::Info,
        format!("File already downloaded: {} of {} @ {}", field_name, station, date),
    );
}

pub fn download_error(
    progress: &ProgressBar,
    field_name: &str,
    station: &str,
    date: NaiveDate,
    error: &dyn Error,
) {
    emit(
        progress,
        Level::Warn,
        format!(
            "Error while downloading file: {} of {} @ {}: {}",
            field_name,
            station,
            date,
            with_causes(error)
        ),
    );
}

pub fn read_error(
    progress: &ProgressBar,
    field_name: &str,
    station: &str,
    date: NaiveDate,
    error: &dyn Error,
) {
    emit(
        progress,
        Level::Warn,
        format!(
            "Error while reading file: {} of {} @ {}: {}",
            field_name,
            station,
            date,
            with_causes(error)
        ),
    );
}

pub fn show_farewell_with_timing(report: &BatchReport) {
    println!("\nSummary:");
    println!("  Rows computed: {}", report.computed());
    println!("  Rows skipped: {}", report.skipped());
    println!("  Rows failed: {}", report.failed());
    println!("  Output: {}", report.output_path.display());
    println!("Time elapsed: {:.2} seconds", report.elapsed.as_secs_f64());
}
