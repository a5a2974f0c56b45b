//! Log transform and z-score standardization of the variable catalog over
//! the groundwater samples.

use nalgebra::DMatrix;
use polars::prelude::*;
use tracing::info;

use crate::config::AnalysisConfig;
use crate::error::{HydroError, Result};
use crate::schema::derived::LOG_SUFFIX;
use crate::table;

/// Standardized log-space matrix, one row per groundwater sample.
#[derive(Debug, Clone)]
pub struct TransformedMatrix {
    pub sample_ids: Vec<String>,
    /// Source catalog names, in column order.
    pub variables: Vec<String>,
    /// Output names: `"<variable> log"`, exempt variables keep their name.
    pub columns: Vec<String>,
    pub values: DMatrix<f64>,
    /// Per-column statistics in log space, before standardization.
    pub means: Vec<f64>,
    pub std_devs: Vec<f64>,
}

impl TransformedMatrix {
    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    pub fn to_frame(&self, sample_id_column: &str) -> Result<DataFrame> {
        let mut columns = Vec::with_capacity(self.ncols() + 1);
        columns.push(Column::new(sample_id_column.into(), &self.sample_ids));
        for (j, name) in self.columns.iter().enumerate() {
            let values: Vec<Option<f64>> = self
                .values
                .column(j)
                .iter()
                .map(|v| if v.is_nan() { None } else { Some(*v) })
                .collect();
            columns.push(Column::new(name.as_str().into(), &values));
        }
        Ok(DataFrame::new(columns)?)
    }
}

pub struct Transformer<'a> {
    config: &'a AnalysisConfig,
}

impl<'a> Transformer<'a> {
    pub fn new(config: &'a AnalysisConfig) -> Self {
        Self { config }
    }

    /// Missing values become NaN and are skipped by the column statistics;
    /// the factor stage rejects them.
    pub fn transform(&self, merged: &DataFrame) -> Result<TransformedMatrix> {
        let gw = table::groundwater_subset(merged, self.config)?;
        let sample_ids = table::sample_ids(&gw, self.config)?;
        let variables = self.config.effective_catalog();

        let n = gw.height();
        let mut values = DMatrix::from_element(n, variables.len(), f64::NAN);
        let mut columns = Vec::with_capacity(variables.len());

        for (j, variable) in variables.iter().enumerate() {
            let exempt = self.config.log_exempt.contains(variable);
            let raw = table::numeric_column(&gw, variable)?;
            for (i, value) in raw.into_iter().enumerate() {
                let Some(v) = value.filter(|v| !v.is_nan()) else {
                    continue;
                };
                values[(i, j)] = if exempt {
                    v
                } else if v <= 0.0 {
                    return Err(HydroError::NonPositiveValue {
                        sample_id: sample_ids[i].clone(),
                        column: variable.clone(),
                        value: v,
                    });
                } else {
                    v.ln()
                };
            }
            columns.push(if exempt {
                variable.clone()
            } else {
                format!("{variable}{LOG_SUFFIX}")
            });
        }

        let (means, std_devs) = standardize(&mut values);
        if let Some(j) = std_devs.iter().position(|sd| *sd == 0.0) {
            return Err(HydroError::FactorFit(format!(
                "zero variance in '{}' over the groundwater samples",
                columns[j]
            )));
        }

        info!(
            stage = "transform",
            samples = n,
            variables = columns.len(),
            "log-transformed and standardized"
        );
        Ok(TransformedMatrix {
            sample_ids,
            variables,
            columns,
            values,
            means,
            std_devs,
        })
    }
}

/// In-place `(x - mean) / std` per column, sample std (n - 1), NaN skipped.
/// Returns the statistics used.
pub fn standardize(values: &mut DMatrix<f64>) -> (Vec<f64>, Vec<f64>) {
    let mut means = Vec::with_capacity(values.ncols());
    let mut std_devs = Vec::with_capacity(values.ncols());
    for mut column in values.column_iter_mut() {
        let (mean, sd) = mean_and_sample_std(column.iter().copied());
        for v in column.iter_mut() {
            *v = (*v - mean) / sd;
        }
        means.push(mean);
        std_devs.push(sd);
    }
    (means, std_devs)
}

pub(crate) fn mean_and_sample_std(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let present: Vec<f64> = values.filter(|v| !v.is_nan()).collect();
    let n = present.len();
    if n == 0 {
        return (f64::NAN, f64::NAN);
    }
    let mean = present.iter().sum::<f64>() / n as f64;
    if n < 2 {
        return (mean, f64::NAN);
    }
    let ss: f64 = present.iter().map(|v| (v - mean).powi(2)).sum();
    (mean, (ss / (n - 1) as f64).sqrt())
}
