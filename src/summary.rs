//! Descriptive tables over the analysed dataset: per-cluster means, the
//! groundwater univariate overview and the correlation matrix.
//!
//! All statistics skip missing values per column (per pair for
//! correlations).

use std::collections::BTreeSet;

use polars::prelude::*;

use crate::cluster::{ClusterLabel, ClusterLabels};
use crate::config::AnalysisConfig;
use crate::error::{HydroError, Result};
use crate::schema::{derived, summary};
use crate::table;

/// Variables as rows, one column per cluster label.
#[derive(Debug, Clone)]
pub struct ClusterMeans {
    pub variables: Vec<String>,
    pub clusters: Vec<ClusterLabel>,
    /// `means[v][c]`
    pub means: Vec<Vec<f64>>,
}

impl ClusterMeans {
    pub fn to_frame(&self) -> Result<DataFrame> {
        frame_by_cluster(&self.variables, &self.clusters, &self.means)
    }

    /// Cluster means as z-scores against the groundwater mean and sample std.
    pub fn standardized(&self, merged: &DataFrame, config: &AnalysisConfig) -> Result<DataFrame> {
        let gw = table::groundwater_subset(merged, config)?;
        let means = column_stat(&gw, &self.variables, |c| c.mean())?;
        let std_devs = column_stat(&gw, &self.variables, |c| c.std(1))?;

        let values: Vec<Vec<f64>> = self
            .means
            .iter()
            .zip(means.iter().zip(&std_devs))
            .map(|(row, (mean, sd))| {
                let mean = mean.unwrap_or(f64::NAN);
                let sd = sd.unwrap_or(f64::NAN);
                row.iter().map(|m| (m - mean) / sd).collect()
            })
            .collect();
        frame_by_cluster(&self.variables, &self.clusters, &values)
    }
}

fn frame_by_cluster(
    variables: &[String],
    clusters: &[ClusterLabel],
    values: &[Vec<f64>],
) -> Result<DataFrame> {
    let mut columns = vec![Column::new(summary::VARIABLE.into(), variables)];
    for (c, label) in clusters.iter().enumerate() {
        let column: Vec<Option<f64>> = values.iter().map(|row| finite(row[c])).collect();
        columns.push(Column::new(label.to_string().as_str().into(), &column));
    }
    Ok(DataFrame::new(columns)?)
}

/// Mean of each column per cluster label; clusters ordered numeric first,
/// then categorical. Rows without a label are ignored.
///
/// `labels` must follow the row order of `analysed`.
pub fn cluster_means(
    analysed: &DataFrame,
    labels: &ClusterLabels,
    columns: &[String],
    config: &AnalysisConfig,
) -> Result<ClusterMeans> {
    if table::sample_ids(analysed, config)? != labels.sample_ids {
        return Err(HydroError::InvalidData(
            "cluster labels do not follow the table's sample order".into(),
        ));
    }
    let mut labelled = analysed.clone();
    labelled.with_column(labels.to_column())?;

    let grouped = labelled
        .lazy()
        .filter(col(derived::CLUSTER).is_not_null())
        .group_by([col(derived::CLUSTER)])
        .agg(
            columns
                .iter()
                .map(|c| col(c.as_str()).cast(DataType::Float64).mean())
                .collect::<Vec<_>>(),
        )
        .collect()?;

    let keys = table::string_column(&grouped, derived::CLUSTER)?;
    let clusters: Vec<ClusterLabel> = labels
        .labels
        .iter()
        .flatten()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .cloned()
        .collect();
    let rows: Vec<usize> = clusters
        .iter()
        .map(|label| {
            let rendered = label.to_string();
            keys.iter()
                .position(|k| k.as_deref() == Some(rendered.as_str()))
                .ok_or_else(|| HydroError::InvalidData(format!("no rows for cluster '{label}'")))
        })
        .collect::<Result<_>>()?;

    let mut means = Vec::with_capacity(columns.len());
    for name in columns {
        let values = table::numeric_column(&grouped, name)?;
        means.push(
            rows.iter()
                .map(|&r| values[r].unwrap_or(f64::NAN))
                .collect(),
        );
    }

    Ok(ClusterMeans {
        variables: columns.to_vec(),
        clusters,
        means,
    })
}

/// count, mean, std, min, quartiles and max per column over groundwater rows.
/// Quartiles interpolate linearly between closest ranks.
pub fn univariate_overview(
    merged: &DataFrame,
    columns: &[String],
    config: &AnalysisConfig,
) -> Result<DataFrame> {
    let gw = table::groundwater_subset(merged, config)?;
    let quantile = |q: f64| move |c: Expr| c.quantile(lit(q), QuantileMethod::Linear);

    let stats = [
        (summary::COUNT, column_stat(&gw, columns, |c| c.count())?),
        (summary::MEAN, column_stat(&gw, columns, |c| c.mean())?),
        (summary::STD, column_stat(&gw, columns, |c| c.std(1))?),
        (summary::MIN, column_stat(&gw, columns, |c| c.min())?),
        (summary::Q25, column_stat(&gw, columns, quantile(0.25))?),
        (summary::MEDIAN, column_stat(&gw, columns, quantile(0.5))?),
        (summary::Q75, column_stat(&gw, columns, quantile(0.75))?),
        (summary::MAX, column_stat(&gw, columns, |c| c.max())?),
    ];

    let mut out = vec![Column::new(summary::VARIABLE.into(), columns)];
    for (name, values) in &stats {
        let values: Vec<Option<f64>> = values.iter().map(|v| v.and_then(finite)).collect();
        out.push(Column::new((*name).into(), &values));
    }
    Ok(DataFrame::new(out)?)
}

/// Pairwise-complete Pearson correlation over groundwater rows.
pub fn correlation_matrix(
    merged: &DataFrame,
    columns: &[String],
    config: &AnalysisConfig,
) -> Result<DataFrame> {
    let gw = table::groundwater_subset(merged, config)?;
    let p = columns.len();
    let mut matrix = vec![vec![None; p]; p];
    for i in 0..p {
        for j in i..p {
            let r = pairwise_pearson(&gw, &columns[i], &columns[j])?;
            matrix[i][j] = r;
            matrix[j][i] = r;
        }
    }

    let mut out = vec![Column::new(summary::VARIABLE.into(), columns)];
    for (j, name) in columns.iter().enumerate() {
        let values: Vec<Option<f64>> = matrix.iter().map(|row| row[j]).collect();
        out.push(Column::new(name.as_str().into(), &values));
    }
    Ok(DataFrame::new(out)?)
}

fn pairwise_pearson(df: &DataFrame, a: &str, b: &str) -> Result<Option<f64>> {
    let r = df
        .clone()
        .lazy()
        .select([
            col(a).cast(DataType::Float64).alias("a"),
            col(b).cast(DataType::Float64).alias("b"),
        ])
        .filter(col("a").is_not_null().and(col("b").is_not_null()))
        .select([pearson_corr(col("a"), col("b")).alias("r")])
        .collect()?;
    Ok(table::numeric_column(&r, "r")?
        .first()
        .copied()
        .flatten()
        .and_then(finite))
}

/// One aggregate per column, evaluated as a single lazy select.
fn column_stat(
    df: &DataFrame,
    columns: &[String],
    stat: impl Fn(Expr) -> Expr,
) -> Result<Vec<Option<f64>>> {
    let exprs: Vec<Expr> = columns
        .iter()
        .map(|c| {
            stat(col(c.as_str()).cast(DataType::Float64))
                .cast(DataType::Float64)
                .alias(c.as_str())
        })
        .collect();
    let row = df.clone().lazy().select(exprs).collect()?;
    columns
        .iter()
        .map(|c| Ok(table::numeric_column(&row, c)?.first().copied().flatten()))
        .collect()
}

fn finite(v: f64) -> Option<f64> {
    Some(v).filter(|v| v.is_finite())
}
