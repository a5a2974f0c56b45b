//! Column access helpers shared by the pipeline stages.

use polars::prelude::*;

use crate::config::AnalysisConfig;
use crate::error::{HydroError, Result};

/// Read a column as `f64`, casting if needed. Nulls stay `None`.
pub fn numeric_column(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let column = df
        .column(name)
        .map_err(|_| HydroError::MissingColumn(name.to_string()))?
        .cast(&DataType::Float64)?;
    Ok(column.f64()?.into_iter().collect())
}

pub fn string_column(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let column = df
        .column(name)
        .map_err(|_| HydroError::MissingColumn(name.to_string()))?
        .cast(&DataType::String)?;
    Ok(column
        .str()?
        .into_iter()
        .map(|v| v.map(|s| s.to_string()))
        .collect())
}

/// Sample ids, which the merge stage guarantees are present.
pub fn sample_ids(df: &DataFrame, config: &AnalysisConfig) -> Result<Vec<String>> {
    string_column(df, &config.schema.sample_id)?
        .into_iter()
        .enumerate()
        .map(|(row, id)| {
            id.ok_or_else(|| HydroError::InvalidData(format!("Null sample id at row {row}")))
        })
        .collect()
}

/// Rows whose type is one of the configured groundwater types.
pub fn groundwater_subset(df: &DataFrame, config: &AnalysisConfig) -> Result<DataFrame> {
    let types = string_column(df, &config.schema.sample_type)?;
    let mask: BooleanChunked = types
        .iter()
        .map(|t| t.as_deref().map(|t| config.is_groundwater(t)).unwrap_or(false))
        .collect();
    Ok(df.filter(&mask)?)
}
