//! # Request Building
//!
//! Builds the OPeNDAP subset URL for one station-day and the name of the
//! granule file it produces.
//!
//! MERRA-2 granule names carry a stream number that depends on the year the
//! data was produced for: `100` for 1980 to 1991, `200` for 1992 to 2000,
//! `300` for 2001 to 2010 and `400` from 2011 onwards.
//!
//! ```text
//! <base>/2015/06/MERRA2_400.inst1_2d_asm_Nx.20150601.nc4.nc4?T2M[0:1:23][260:1:260][120:1:120]
//! ```

use crate::config::JobConfig;
use crate::grid::GridIndex;
use chrono::{Datelike, NaiveDate};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("The specified year is out of range: {0}")]
    UnsupportedYear(i32),
}

/// Maps a year to the stream number used in granule names.
pub fn file_number(year: i32) -> Result<&'static str, RequestError> {
    match year {
        1980..=1991 => Ok("100"),
        1992..=2000 => Ok("200"),
        2001..=2010 => Ok("300"),
        y if y >= 2011 => Ok("400"),
        y => Err(RequestError::UnsupportedYear(y)),
    }
}

/// Builds the granule file name, e.g. `MERRA2_400.inst1_2d_asm_Nx.20150601.nc4`.
pub fn file_name(location: &str, date: NaiveDate, dataset_id: &str) -> Result<String, RequestError> {
    let number = file_number(date.year())?;
    Ok(format!(
        "{}_{}.{}.{}.nc4",
        location,
        number,
        dataset_id,
        date.format("%Y%m%d")
    ))
}

/// OPeNDAP `[start:stride:stop]` subscript.
fn subscript(start: usize, stop: usize) -> String {
    format!("[{}:1:{}]", start, stop)
}

/// Builds the constraint expression for `fields` at one grid point.
///
/// Each field receives the time, latitude and longitude subscripts in that
/// order; fields are separated by commas.
pub fn query_params(fields: &[&str], time_steps: usize, index: GridIndex) -> String {
    let time = subscript(0, time_steps.saturating_sub(1));
    let lat = subscript(index.lat_index, index.lat_index);
    let lon = subscript(index.lon_index, index.lon_index);

    fields
        .iter()
        .map(|field| format!("{}{}{}{}", field, time, lat, lon))
        .collect::<Vec<_>>()
        .join(",")
}

/// A fully resolved download request for one station-day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRequest {
    pub url: String,
    pub file_name: String,
    pub grid_index: GridIndex,
    pub date: NaiveDate,
}

/// Assembles the download URL and expected file name.
pub fn build_request(
    config: &JobConfig,
    location: &str,
    grid_index: GridIndex,
    date: NaiveDate,
) -> Result<DatasetRequest, RequestError> {
    let file_name = file_name(location, date, &config.database_id)?;
    let params = query_params(&[config.field_id.as_str()], config.time_steps, grid_index);
    let url = format!(
        "{}{}/{:02}/{}.nc4?{}",
        config.database_url(),
        date.year(),
        date.month(),
        file_name,
        params
    );

    Ok(DatasetRequest {
        url,
        file_name,
        grid_index,
        date,
    })
}
