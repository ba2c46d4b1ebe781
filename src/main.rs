use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use merra2station::cli::{Cli, USAGE_HINT, exit_code};
use merra2station::config::Credentials;
use merra2station::log::{config_echo, show_farewell_with_timing, show_greeting};
use merra2station::process_station_table;
use merra2station::reader::NetCdfReader;
use merra2station::storage::HttpDownloader;
use std::path::Path;
use std::process;
use std::time::Duration;

const CREDENTIALS_FILE: &str = ".env";

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            process::exit(exit_code(&e));
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_level()))
        .init();

    let Some(input) = cli.input.clone() else {
        eprintln!("{}", USAGE_HINT);
        eprintln!("{}", Cli::command().render_usage());
        process::exit(1);
    };

    if let Err(e) = run(&cli, &input).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: &Cli, input: &Path) -> Result<()> {
    show_greeting(&input.display().to_string());

    let config = cli
        .job_config()
        .context("Failed to load job configuration")?;
    if !cli.quiet {
        config_echo(&config);
    }

    let credentials = Credentials::from_env_file(CREDENTIALS_FILE)
        .with_context(|| format!("Failed to load Earthdata credentials from {}", CREDENTIALS_FILE))?;
    let downloader = HttpDownloader::new(
        credentials,
        config.connections,
        Duration::from_secs(config.timeout_secs),
    )
    .context("Failed to build HTTP client")?;

    let report = process_station_table(&config, input, &downloader, &NetCdfReader)
        .await
        .with_context(|| format!("Failed to process station table {}", input.display()))?;

    show_farewell_with_timing(&report);
    Ok(())
}
