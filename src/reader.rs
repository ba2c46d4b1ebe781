//! # Granule Reader
//!
//! Opens downloaded MERRA-2 subsets and pulls out a single field together with
//! the metadata needed to reduce it.
//!
//! The [`DatasetReader`] trait keeps the NetCDF library out of the batch
//! driver; [`NetCdfReader`] is the production implementation.

use chrono::NaiveDate;
use log::debug;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Global attributes that may carry the original granule name.
pub const FILENAME_ATTRIBUTES: [&str; 2] = ["HDF5_GLOBAL.Filename", "Filename"];

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("Failed to open dataset '{0}'")]
    Open(PathBuf, #[source] netcdf::Error),

    #[error("Variable '{field}' not found in '{path}'")]
    MissingField { path: PathBuf, field: String },

    #[error("Failed to read variable '{field}' from '{path}'")]
    Read {
        path: PathBuf,
        field: String,
        #[source]
        source: netcdf::Error,
    },

    #[error("Unexpected attribute layout: {0}")]
    AttributeLayout(String),
}

pub type ReaderResult<T> = Result<T, ReaderError>;

/// One field read from a granule, flattened in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldData {
    /// Dimension names and lengths, outermost first
    pub dimensions: Vec<(String, usize)>,
    pub values: Vec<f64>,
    /// Sentinel marking missing samples, from `_FillValue` or `missing_value`
    pub fill_value: Option<f64>,
    /// Date encoded in the granule's file name attribute, when present
    pub granule_date: Option<NaiveDate>,
}

impl FieldData {
    /// Wraps a plain hourly series, as returned for a single grid point.
    pub fn hourly(values: Vec<f64>) -> Self {
        let steps = values.len();
        FieldData {
            dimensions: vec![
                ("time".to_string(), steps),
                ("lat".to_string(), 1),
                ("lon".to_string(), 1),
            ],
            values,
            fill_value: None,
            granule_date: None,
        }
    }
}

/// Capability to open a cached file and read one field.
pub trait DatasetReader: Send + Sync {
    fn read_field(&self, path: &Path, field_id: &str) -> ReaderResult<FieldData>;
}

/// Extracts the date from a granule name such as
/// `MERRA2_400.inst1_2d_asm_Nx.20150601.nc4`.
///
/// The date is the dot-delimited segment right before `.nc4`.
pub fn granule_date(file_name: &str) -> ReaderResult<NaiveDate> {
    let layout_error = || ReaderError::AttributeLayout(format!("no date in '{}'", file_name));

    let end = file_name.find(".nc4").ok_or_else(layout_error)?;
    let prefix = &file_name[..end];
    let start = prefix.rfind('.').ok_or_else(layout_error)? + 1;
    let segment = prefix[start..].get(0..8).ok_or_else(layout_error)?;

    NaiveDate::parse_from_str(segment, "%Y%m%d").map_err(|_| layout_error())
}

fn attribute_as_f64(value: &netcdf::AttributeValue) -> Option<f64> {
    use netcdf::AttributeValue::*;
    match value {
        Double(v) => Some(*v),
        Float(v) => Some(*v as f64),
        Int(v) => Some(*v as f64),
        Short(v) => Some(*v as f64),
        Longlong(v) => Some(*v as f64),
        Doubles(v) => v.first().copied(),
        Floats(v) => v.first().map(|x| *x as f64),
        _ => None,
    }
}

fn attribute_as_string(value: &netcdf::AttributeValue) -> Option<String> {
    match value {
        netcdf::AttributeValue::Str(s) => Some(s.clone()),
        netcdf::AttributeValue::Strs(v) => v.first().cloned(),
        _ => None,
    }
}

/// Reads fields from NetCDF-4 granules.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetCdfReader;

impl NetCdfReader {
    fn read_granule_date(file: &netcdf::File) -> ReaderResult<Option<NaiveDate>> {
        for name in FILENAME_ATTRIBUTES {
            if let Some(attr) = file.attribute(name) {
                let value = attr.value().map_err(|_| {
                    ReaderError::AttributeLayout(format!("unreadable attribute '{}'", name))
                })?;
                let file_name = attribute_as_string(&value).ok_or_else(|| {
                    ReaderError::AttributeLayout(format!("attribute '{}' is not text", name))
                })?;
                return granule_date(&file_name).map(Some);
            }
        }
        Ok(None)
    }
}

impl DatasetReader for NetCdfReader {
    fn read_field(&self, path: &Path, field_id: &str) -> ReaderResult<FieldData> {
        let file = netcdf::open(path).map_err(|e| ReaderError::Open(path.to_path_buf(), e))?;

        let var = file
            .variable(field_id)
            .ok_or_else(|| ReaderError::MissingField {
                path: path.to_path_buf(),
                field: field_id.to_string(),
            })?;

        let dimensions: Vec<(String, usize)> = var
            .dimensions()
            .iter()
            .map(|d| (d.name().to_string(), d.len()))
            .collect();

        let values = var
            .get_values::<f64, _>(..)
            .map_err(|e| ReaderError::Read {
                path: path.to_path_buf(),
                field: field_id.to_string(),
                source: e,
            })?;

        let fill_value = ["_FillValue", "missing_value"]
            .iter()
            .filter_map(|name| var.attribute(name))
            .filter_map(|attr| attr.value().ok())
            .find_map(|value| attribute_as_f64(&value));

        let granule_date = Self::read_granule_date(&file)?;

        debug!(
            "Read {} values of '{}' from {} (dims: {:?})",
            values.len(),
            field_id,
            path.display(),
            dimensions
        );

        Ok(FieldData {
            dimensions,
            values,
            fill_value,
            granule_date,
        })
    }
}
