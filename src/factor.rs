//! Principal-axis factor extraction with varimax rotation.
//!
//! # Algorithm
//!
//! 1. Pearson correlation matrix R of the standardized input
//! 2. Top-K eigenpairs of R; unrotated loadings = eigenvector × √eigenvalue
//! 3. Kaiser-normalized varimax by pairwise planar rotations (max 500
//!    sweeps, angle tolerance 1e-5)
//! 4. Sign convention: each factor's loading column sums to a non-negative value
//! 5. Scores: Z · R⁺ · L, with Z the input rescaled by population std
//!
//! Factors keep their extraction order after rotation; they are not
//! re-sorted by rotated variance.

use nalgebra::{DMatrix, SymmetricEigen};
use polars::prelude::*;
use tracing::{debug, info};

use crate::error::{HydroError, Result};
use crate::schema::factor;
use crate::transform::TransformedMatrix;

/// Relative eigenvalue floor below which a factor counts as rank deficient.
const RANK_TOLERANCE: f64 = 1e-10;

/// Sum of squared loadings and its proportions, per factor.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorVariance {
    pub sum_squared_loadings: Vec<f64>,
    pub proportional: Vec<f64>,
    pub cumulative: Vec<f64>,
}

/// Fitted model, read-only after [`FactorExtractor::fit`].
#[derive(Debug, Clone)]
pub struct FactorModel {
    pub sample_ids: Vec<String>,
    pub variables: Vec<String>,
    /// variables × factors
    pub loadings: DMatrix<f64>,
    /// samples × factors
    pub scores: DMatrix<f64>,
    /// Orthogonal factors × factors matrix applied to the unrotated loadings.
    pub rotation: DMatrix<f64>,
    /// All eigenvalues of the correlation matrix, descending.
    pub eigenvalues: Vec<f64>,
}

impl FactorModel {
    pub fn n_factors(&self) -> usize {
        self.loadings.ncols()
    }

    pub fn factor_names(&self) -> Vec<String> {
        (0..self.n_factors()).map(factor::name).collect()
    }

    pub fn variance(&self) -> FactorVariance {
        let n_vars = self.loadings.nrows() as f64;
        let sum_squared_loadings: Vec<f64> = self
            .loadings
            .column_iter()
            .map(|c| c.iter().map(|v| v * v).sum())
            .collect();
        let proportional: Vec<f64> = sum_squared_loadings.iter().map(|v| v / n_vars).collect();
        let cumulative = proportional
            .iter()
            .scan(0.0, |acc, v| {
                *acc += v;
                Some(*acc)
            })
            .collect();
        FactorVariance {
            sum_squared_loadings,
            proportional,
            cumulative,
        }
    }

    pub fn loadings_frame(&self) -> Result<DataFrame> {
        let mut columns = vec![Column::new(factor::VARIABLE.into(), &self.variables)];
        for (j, name) in self.factor_names().iter().enumerate() {
            let values: Vec<f64> = self.loadings.column(j).iter().copied().collect();
            columns.push(Column::new(name.as_str().into(), &values));
        }
        Ok(DataFrame::new(columns)?)
    }

    pub fn variance_frame(&self) -> Result<DataFrame> {
        let variance = self.variance();
        let mut columns = vec![Column::new(
            factor::STATISTIC.into(),
            &[
                factor::SUM_SQUARED_LOADINGS,
                factor::PROPORTIONAL_VARIANCE,
                factor::CUMULATIVE_VARIANCE,
            ],
        )];
        for (j, name) in self.factor_names().iter().enumerate() {
            let values = [
                variance.sum_squared_loadings[j],
                variance.proportional[j],
                variance.cumulative[j],
            ];
            columns.push(Column::new(name.as_str().into(), &values));
        }
        Ok(DataFrame::new(columns)?)
    }

    pub fn scores_frame(&self, sample_id_column: &str) -> Result<DataFrame> {
        let mut columns = vec![Column::new(sample_id_column.into(), &self.sample_ids)];
        for (j, name) in self.factor_names().iter().enumerate() {
            let values: Vec<f64> = self.scores.column(j).iter().copied().collect();
            columns.push(Column::new(name.as_str().into(), &values));
        }
        Ok(DataFrame::new(columns)?)
    }
}

#[derive(Debug, Clone)]
pub struct FactorExtractor {
    pub n_factors: usize,
    pub max_iter: usize,
    pub tolerance: f64,
}

impl FactorExtractor {
    pub fn new(n_factors: usize) -> Self {
        Self {
            n_factors,
            max_iter: 500,
            tolerance: 1e-5,
        }
    }

    pub fn fit(&self, input: &TransformedMatrix) -> Result<FactorModel> {
        let x = &input.values;
        let (n, p) = x.shape();
        let k = self.n_factors;

        if k == 0 {
            return Err(HydroError::FactorFit("number of factors must be at least 1".into()));
        }
        if k > p {
            return Err(HydroError::FactorFit(format!(
                "{k} factors requested from {p} variables"
            )));
        }
        if n < 2 {
            return Err(HydroError::FactorFit(format!(
                "at least 2 samples required, got {n}"
            )));
        }
        for ((i, j), v) in x.iter().enumerate().map(|(idx, v)| ((idx % n, idx / n), v)) {
            if !v.is_finite() {
                return Err(HydroError::FactorFit(format!(
                    "missing or non-finite value in '{}' for sample '{}'",
                    input.columns[j], input.sample_ids[i]
                )));
            }
        }

        let z = population_standardized(x, &input.columns)?;
        let corr = z.transpose() * &z / n as f64;

        let eigen = SymmetricEigen::try_new(corr.clone(), f64::EPSILON, 10_000).ok_or_else(|| {
            HydroError::FactorFit(
                "eigendecomposition of the correlation matrix did not converge".into(),
            )
        })?;
        let mut order: Vec<usize> = (0..p).collect();
        order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));
        let eigenvalues: Vec<f64> = order.iter().map(|&i| eigen.eigenvalues[i]).collect();

        let floor = RANK_TOLERANCE * eigenvalues[0].max(1.0);
        if eigenvalues[k - 1] <= floor {
            return Err(HydroError::FactorFit(format!(
                "correlation matrix has rank below {k} (eigenvalue {} = {:.3e})",
                k, eigenvalues[k - 1]
            )));
        }

        let mut unrotated = DMatrix::zeros(p, k);
        for (j, &src) in order.iter().take(k).enumerate() {
            let scale = eigenvalues[j].sqrt();
            unrotated.set_column(j, &(eigen.eigenvectors.column(src) * scale));
        }

        let (mut loadings, mut rotation) = varimax(&unrotated, self.max_iter, self.tolerance)?;
        for j in 0..k {
            if loadings.column(j).sum() < 0.0 {
                loadings.column_mut(j).neg_mut();
                rotation.column_mut(j).neg_mut();
            }
        }

        let svd = corr.svd(true, true);
        let eps = RANK_TOLERANCE * svd.singular_values.max().max(1.0);
        let weights = svd
            .solve(&loadings, eps)
            .map_err(|e| HydroError::FactorFit(format!("score weights: {e}")))?;
        let scores = &z * weights;

        info!(
            stage = "factor",
            samples = n,
            variables = p,
            factors = k,
            "fitted varimax factor model"
        );
        Ok(FactorModel {
            sample_ids: input.sample_ids.clone(),
            variables: input.columns.clone(),
            loadings,
            scores,
            rotation,
            eigenvalues,
        })
    }
}

/// `(x - mean) / std` with population std (n), as used for the correlation
/// matrix and for scoring.
fn population_standardized(x: &DMatrix<f64>, names: &[String]) -> Result<DMatrix<f64>> {
    let n = x.nrows() as f64;
    let mut z = x.clone();
    for (j, mut column) in z.column_iter_mut().enumerate() {
        let mean = column.sum() / n;
        let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let sd = var.sqrt();
        if !(sd > 0.0) {
            return Err(HydroError::FactorFit(format!(
                "variable '{}' has zero variance",
                names[j]
            )));
        }
        for v in column.iter_mut() {
            *v = (*v - mean) / sd;
        }
    }
    Ok(z)
}

/// Kaiser-normalized varimax by pairwise planar rotations. Returns rotated
/// loadings and the rotation matrix, `rotated = loadings · rotation`.
///
/// Each factor pair is turned by the angle that maximizes the pair's
/// varimax criterion in closed form, so no sweep lowers the criterion.
/// Sweeps stop once every angle in a sweep is below `tolerance` radians.
pub fn varimax(
    loadings: &DMatrix<f64>,
    max_iter: usize,
    tolerance: f64,
) -> Result<(DMatrix<f64>, DMatrix<f64>)> {
    let (p, k) = loadings.shape();
    if k < 2 {
        return Ok((loadings.clone(), DMatrix::identity(k, k)));
    }

    let norms: Vec<f64> = loadings
        .row_iter()
        .map(|r| {
            let h = r.norm();
            if h > 0.0 {
                h
            } else {
                1.0
            }
        })
        .collect();
    let mut x = loadings.clone();
    for (i, mut row) in x.row_iter_mut().enumerate() {
        row /= norms[i];
    }

    let mut rotation = DMatrix::<f64>::identity(k, k);
    let mut sweeps = 0;
    let mut converged = false;
    while sweeps < max_iter && !converged {
        sweeps += 1;
        converged = true;
        for j in 0..k - 1 {
            for l in j + 1..k {
                let phi = planar_angle(&x, j, l);
                if !phi.is_finite() {
                    return Err(HydroError::FactorFit(format!(
                        "varimax angle for factors {} and {} is not finite",
                        j + 1,
                        l + 1
                    )));
                }
                if phi.abs() > tolerance {
                    converged = false;
                }
                rotate_columns(&mut x, j, l, phi);
                rotate_columns(&mut rotation, j, l, phi);
            }
        }
    }
    debug!(
        sweeps,
        converged,
        criterion = varimax_criterion(&x),
        "varimax rotation"
    );

    for (i, mut row) in x.row_iter_mut().enumerate() {
        row *= norms[i];
    }
    Ok((x, rotation))
}

/// Optimal rotation angle for columns `j` and `l` (Kaiser 1958).
fn planar_angle(x: &DMatrix<f64>, j: usize, l: usize) -> f64 {
    let p = x.nrows() as f64;
    let (mut a, mut b, mut c, mut d) = (0.0, 0.0, 0.0, 0.0);
    for row in x.row_iter() {
        let u = row[j] * row[j] - row[l] * row[l];
        let v = 2.0 * row[j] * row[l];
        a += u;
        b += v;
        c += u * u - v * v;
        d += 2.0 * u * v;
    }
    let numerator = d - 2.0 * a * b / p;
    let denominator = c - (a * a - b * b) / p;
    numerator.atan2(denominator) / 4.0
}

fn rotate_columns(m: &mut DMatrix<f64>, j: usize, l: usize, phi: f64) {
    let (sin, cos) = phi.sin_cos();
    for mut row in m.row_iter_mut() {
        let (a, b) = (row[j], row[l]);
        row[j] = a * cos + b * sin;
        row[l] = b * cos - a * sin;
    }
}

/// Sum over factors of the variance of squared loadings.
pub fn varimax_criterion(loadings: &DMatrix<f64>) -> f64 {
    let p = loadings.nrows() as f64;
    loadings
        .column_iter()
        .map(|column| {
            let mean = column.iter().map(|v| v * v).sum::<f64>() / p;
            column.iter().map(|v| (v * v - mean).powi(2)).sum::<f64>() / p
        })
        .sum()
}
