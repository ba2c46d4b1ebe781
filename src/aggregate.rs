//! # Daily Aggregation
//!
//! This module turns a field read from a granule into one daily figure.
//!
//! ## Key Components
//!
//! - [`field_to_dataframe`]: tabular view of a field, one row per sample
//! - [`reduce_field`]: reduction of the field column with a [`Statistic`]
//! - [`aggregate`]: read, reduce and convert in one call

use crate::config::{Statistic, UnitConversion};
use crate::reader::{DatasetReader, FieldData, ReaderError};
use chrono::NaiveDate;
use log::{debug, warn};
use polars::prelude::*;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AggregateError {
    #[error(transparent)]
    Reader(#[from] ReaderError),

    #[error("Field '{0}' has no valid samples")]
    EmptyField(String),

    #[error("Field '{field}' holds {found} values but its dimensions describe {expected}")]
    ShapeMismatch {
        field: String,
        expected: usize,
        found: usize,
    },

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),
}

pub type AggregateResult<T> = Result<T, AggregateError>;

/// Result of reducing one granule.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyValue {
    /// Reduced and converted value
    pub value: f64,
    /// Number of valid samples that went into the reduction
    pub samples: usize,
    pub granule_date: Option<NaiveDate>,
}

/// Builds a DataFrame with one index column per dimension and the field values.
///
/// Fill values and non-finite samples become nulls so that reductions skip them.
pub fn field_to_dataframe(field: &FieldData, field_id: &str) -> AggregateResult<DataFrame> {
    let expected: usize = field.dimensions.iter().map(|(_, len)| *len).product();
    if expected != field.values.len() {
        return Err(AggregateError::ShapeMismatch {
            field: field_id.to_string(),
            expected,
            found: field.values.len(),
        });
    }

    let mut columns: Vec<Column> = Vec::with_capacity(field.dimensions.len() + 1);

    // Row-major unravel: the stride of a dimension is the product of the
    // lengths of all dimensions after it.
    let mut stride = 1usize;
    let mut index_columns: Vec<Column> = Vec::with_capacity(field.dimensions.len());
    for (name, len) in field.dimensions.iter().rev() {
        let len = (*len).max(1);
        let indices: Vec<u32> = (0..expected)
            .map(|flat| ((flat / stride) % len) as u32)
            .collect();
        index_columns.push(Series::new(name.as_str().into(), indices).into());
        stride *= len;
    }
    index_columns.reverse();
    columns.extend(index_columns);

    let values: Vec<Option<f64>> = field
        .values
        .iter()
        .map(|&v| {
            let is_fill = field.fill_value.is_some_and(|fill| v == fill);
            if is_fill || !v.is_finite() { None } else { Some(v) }
        })
        .collect();
    columns.push(Series::new(field_id.into(), values).into());

    let df = DataFrame::new(columns)?;
    Ok(df)
}

fn statistic_expr(field_id: &str, statistic: Statistic) -> Expr {
    let column = col(field_id).drop_nulls();
    match statistic {
        Statistic::Mean => column.mean(),
        Statistic::Median => column.median(),
        Statistic::Sum => column.sum(),
        Statistic::Min => column.min(),
        Statistic::Max => column.max(),
        Statistic::Std => column.std(1),
        Statistic::First => column.first(),
        Statistic::Last => column.last(),
    }
}

/// Reduces the field column of `df` to a single value.
pub fn reduce_field(df: &DataFrame, field_id: &str, statistic: Statistic) -> AggregateResult<f64> {
    let field = df.column(field_id)?;
    if field.len() == field.null_count() {
        return Err(AggregateError::EmptyField(field_id.to_string()));
    }

    let reduced = df
        .clone()
        .lazy()
        .select([statistic_expr(field_id, statistic)
            .cast(DataType::Float64)
            .alias(field_id)])
        .collect()?;

    reduced
        .column(field_id)?
        .f64()?
        .get(0)
        .ok_or_else(|| AggregateError::EmptyField(field_id.to_string()))
}

/// Reads `field_id` from `path`, reduces it and applies `conversion`.
pub fn aggregate(
    reader: &dyn DatasetReader,
    path: &Path,
    field_id: &str,
    statistic: Statistic,
    conversion: UnitConversion,
) -> AggregateResult<DailyValue> {
    let field = reader.read_field(path, field_id)?;
    let df = field_to_dataframe(&field, field_id)?;
    debug!("Tabular view of {}: shape {:?}", path.display(), df.shape());

    let samples = df.height() - df.column(field_id)?.null_count();
    let reduced = reduce_field(&df, field_id, statistic)?;

    Ok(DailyValue {
        value: conversion.apply(reduced),
        samples,
        granule_date: field.granule_date,
    })
}

/// Like [`aggregate`], warning when the granule belongs to another day.
pub fn aggregate_for_date(
    reader: &dyn DatasetReader,
    path: &Path,
    field_id: &str,
    statistic: Statistic,
    conversion: UnitConversion,
    date: NaiveDate,
) -> AggregateResult<DailyValue> {
    let daily = aggregate(reader, path, field_id, statistic, conversion)?;
    if let Some(found) = daily.granule_date
        && found != date
    {
        warn!(
            "Granule {} is dated {} but was requested for {}",
            path.display(),
            found,
            date
        );
    }
    Ok(daily)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::ReaderResult;

    struct FixedReader(FieldData);

    impl DatasetReader for FixedReader {
        fn read_field(&self, path: &Path, field_id: &str) -> ReaderResult<FieldData> {
            if field_id == "T2M" {
                Ok(self.0.clone())
            } else {
                Err(ReaderError::MissingField {
                    path: path.to_path_buf(),
                    field: field_id.to_string(),
                })
            }
        }
    }

    fn hourly_series() -> Vec<f64> {
        (0..24).map(|h| 270.0 + h as f64).collect()
    }

    #[test]
    fn test_field_to_dataframe_unravels_indices() {
        let field = FieldData {
            dimensions: vec![("time".to_string(), 2), ("lat".to_string(), 1), ("lon".to_string(), 3)],
            values: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            fill_value: None,
            granule_date: None,
        };
        let df = field_to_dataframe(&field, "T2M").unwrap();
        assert_eq!(df.shape(), (6, 4));

        let time: Vec<u32> = df.column("time").unwrap().u32().unwrap().into_no_null_iter().collect();
        let lon: Vec<u32> = df.column("lon").unwrap().u32().unwrap().into_no_null_iter().collect();
        assert_eq!(time, vec![0, 0, 0, 1, 1, 1]);
        assert_eq!(lon, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_field_to_dataframe_rejects_shape_mismatch() {
        let field = FieldData {
            dimensions: vec![("time".to_string(), 24)],
            values: vec![1.0; 23],
            fill_value: None,
            granule_date: None,
        };
        assert!(matches!(
            field_to_dataframe(&field, "T2M"),
            Err(AggregateError::ShapeMismatch { expected: 24, found: 23, .. })
        ));
    }

    #[test]
    fn test_reduce_statistics() {
        let df = field_to_dataframe(&FieldData::hourly(vec![1.0, 2.0, 3.0, 10.0]), "T2M").unwrap();
        let reduce = |s| reduce_field(&df, "T2M", s).unwrap();

        assert!((reduce(Statistic::Mean) - 4.0).abs() < 1e-10);
        assert!((reduce(Statistic::Median) - 2.5).abs() < 1e-10);
        assert!((reduce(Statistic::Sum) - 16.0).abs() < 1e-10);
        assert_eq!(reduce(Statistic::Min), 1.0);
        assert_eq!(reduce(Statistic::Max), 10.0);
        assert_eq!(reduce(Statistic::First), 1.0);
        assert_eq!(reduce(Statistic::Last), 10.0);
        assert!((reduce(Statistic::Std) - 4.0826).abs() < 1e-3);
    }

    #[test]
    fn test_fill_values_are_ignored() {
        let mut field = FieldData::hourly(vec![280.0, 1.0e15, 290.0, f64::NAN]);
        field.fill_value = Some(1.0e15);
        let df = field_to_dataframe(&field, "T2M").unwrap();

        assert!((reduce_field(&df, "T2M", Statistic::Mean).unwrap() - 285.0).abs() < 1e-10);
        assert_eq!(reduce_field(&df, "T2M", Statistic::Last).unwrap(), 290.0);
    }

    #[test]
    fn test_all_missing_is_empty_field() {
        let mut field = FieldData::hourly(vec![1.0e15; 24]);
        field.fill_value = Some(1.0e15);
        let df = field_to_dataframe(&field, "T2M").unwrap();
        assert!(matches!(
            reduce_field(&df, "T2M", Statistic::Sum),
            Err(AggregateError::EmptyField(_))
        ));
    }

    #[test]
    fn test_aggregate_mean_kelvin_to_celsius() {
        let series = hourly_series();
        let expected = series.iter().sum::<f64>() / 24.0 - 273.15;
        let reader = FixedReader(FieldData::hourly(series));

        let daily = aggregate(
            &reader,
            Path::new("unused.nc4"),
            "T2M",
            Statistic::Mean,
            UnitConversion::KelvinToCelsius,
        )
        .unwrap();

        assert!((daily.value - expected).abs() < 1e-9);
        assert_eq!(daily.samples, 24);
    }

    #[test]
    fn test_aggregate_missing_field() {
        let reader = FixedReader(FieldData::hourly(hourly_series()));
        let result = aggregate(
            &reader,
            Path::new("unused.nc4"),
            "QV2M",
            Statistic::Mean,
            UnitConversion::Identity,
        );
        assert!(matches!(
            result,
            Err(AggregateError::Reader(ReaderError::MissingField { .. }))
        ));
    }

    #[test]
    fn test_aggregate_for_date_tolerates_mismatch() {
        let mut field = FieldData::hourly(hourly_series());
        field.granule_date = NaiveDate::from_ymd_opt(2015, 6, 2);
        let reader = FixedReader(field);

        let daily = aggregate_for_date(
            &reader,
            Path::new("unused.nc4"),
            "T2M",
            Statistic::Max,
            UnitConversion::Identity,
            NaiveDate::from_ymd_opt(2015, 6, 1).unwrap(),
        )
        .unwrap();
        assert_eq!(daily.value, 293.0);
    }
}
