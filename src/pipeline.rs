//! End-to-end run: merge, transform, factor analysis, clustering, ion
//! balance, then the descriptive tables over the analysed dataset.
//!
//! Every stage consumes the previous stage's output and nothing else. A
//! failing stage is logged with its name and aborts the run; there are no
//! partial results.

use std::path::{Path, PathBuf};

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::cluster::{ClusterAssigner, ClusterAssignment};
use crate::config::AnalysisConfig;
use crate::error::{HydroError, Result};
use crate::factor::{FactorExtractor, FactorModel};
use crate::io::{self, TableFormat};
use crate::ion_balance::{IonBalance, IonBalanceChecker};
use crate::isotopes::MeteoricWaterLine;
use crate::merge::{CensoringReport, DatasetMerger, SourceTables};
use crate::summary::{self, ClusterMeans};
use crate::transform::{TransformedMatrix, Transformer};

/// Locations and formats of the three source tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFiles {
    pub metadata: PathBuf,
    pub hydrochemistry: PathBuf,
    pub isotopes: PathBuf,
    pub metadata_format: TableFormat,
    pub hydrochemistry_format: TableFormat,
    pub isotopes_format: TableFormat,
}

impl SourceFiles {
    /// Reference layout: `;`-separated, laboratory tables in Latin-1.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            metadata: dir.join("Metadata_samples_vanBroekhoven_v1.csv"),
            hydrochemistry: dir.join("Hydrochemical_analysis_NIH_v1.csv"),
            isotopes: dir.join("Isotope_analysis_NIH_v1.csv"),
            metadata_format: TableFormat::default(),
            hydrochemistry_format: TableFormat::latin1(b';'),
            isotopes_format: TableFormat::latin1(b';'),
        }
    }

    pub fn read(&self) -> Result<SourceTables> {
        Ok(SourceTables {
            metadata: io::read_table(&self.metadata, &self.metadata_format)?,
            hydrochemistry: io::read_table(&self.hydrochemistry, &self.hydrochemistry_format)?,
            isotopes: io::read_table(&self.isotopes, &self.isotopes_format)?,
        })
    }
}

/// Named outputs of a run, each retrievable as a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Artifact {
    Merged,
    Censoring,
    Transformed,
    Loadings,
    FactorVariance,
    FactorScores,
    Linkage,
    ClusterLabels,
    IonBalance,
    Analysed,
    ClusterMeans,
    StandardizedClusterMeans,
    Overview,
    Correlation,
}

impl Artifact {
    pub const ALL: [Artifact; 14] = [
        Artifact::Merged,
        Artifact::Censoring,
        Artifact::Transformed,
        Artifact::Loadings,
        Artifact::FactorVariance,
        Artifact::FactorScores,
        Artifact::Linkage,
        Artifact::ClusterLabels,
        Artifact::IonBalance,
        Artifact::Analysed,
        Artifact::ClusterMeans,
        Artifact::StandardizedClusterMeans,
        Artifact::Overview,
        Artifact::Correlation,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Artifact::Merged => "merged",
            Artifact::Censoring => "censoring",
            Artifact::Transformed => "transformed",
            Artifact::Loadings => "loadings",
            Artifact::FactorVariance => "factor_variance",
            Artifact::FactorScores => "factor_scores",
            Artifact::Linkage => "linkage",
            Artifact::ClusterLabels => "cluster_labels",
            Artifact::IonBalance => "ion_balance",
            Artifact::Analysed => "analysed_dataset",
            Artifact::ClusterMeans => "cluster_means",
            Artifact::StandardizedClusterMeans => "standardized_cluster_means",
            Artifact::Overview => "groundwater_overview",
            Artifact::Correlation => "correlation",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.name() == name)
            .ok_or_else(|| HydroError::Config(format!("unknown artifact '{name}'")))
    }
}

#[derive(Debug, Clone)]
pub struct SummaryTables {
    pub cluster_means: ClusterMeans,
    pub standardized_cluster_means: DataFrame,
    pub overview: DataFrame,
    pub correlation: DataFrame,
}

#[derive(Debug, Clone)]
pub struct AnalysisResults {
    pub merged: DataFrame,
    pub censoring: CensoringReport,
    pub transformed: TransformedMatrix,
    pub factor_model: FactorModel,
    pub clusters: ClusterAssignment,
    pub ion_balance: IonBalance,
    /// Merged table plus cluster label, ion sums and LMWL deviation.
    pub analysed: DataFrame,
    pub summaries: SummaryTables,
    sample_id_column: String,
}

impl AnalysisResults {
    pub fn table(&self, artifact: Artifact) -> Result<DataFrame> {
        let id = self.sample_id_column.as_str();
        match artifact {
            Artifact::Merged => Ok(self.merged.clone()),
            Artifact::Censoring => self.censoring.to_frame(),
            Artifact::Transformed => self.transformed.to_frame(id),
            Artifact::Loadings => self.factor_model.loadings_frame(),
            Artifact::FactorVariance => self.factor_model.variance_frame(),
            Artifact::FactorScores => self.factor_model.scores_frame(id),
            Artifact::Linkage => self.clusters.dendrogram.to_frame(),
            Artifact::ClusterLabels => self.clusters.labels.to_frame(id),
            Artifact::IonBalance => self.ion_balance.to_frame(id),
            Artifact::Analysed => Ok(self.analysed.clone()),
            Artifact::ClusterMeans => self.summaries.cluster_means.to_frame(),
            Artifact::StandardizedClusterMeans => {
                Ok(self.summaries.standardized_cluster_means.clone())
            }
            Artifact::Overview => Ok(self.summaries.overview.clone()),
            Artifact::Correlation => Ok(self.summaries.correlation.clone()),
        }
    }

    /// Write every artifact as `<name>.csv` into `dir`.
    pub fn write_all(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let mut written = Vec::with_capacity(Artifact::ALL.len());
        for artifact in Artifact::ALL {
            let path = dir.join(format!("{}.csv", artifact.name()));
            io::write_table(&self.table(artifact)?, &path)?;
            written.push(path);
        }
        info!(dir = %dir.display(), files = written.len(), "wrote analysis artifacts");
        Ok(written)
    }
}

pub struct Pipeline {
    config: AnalysisConfig,
}

impl Pipeline {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn run_files(&self, files: &SourceFiles) -> Result<AnalysisResults> {
        let tables = stage("load", || files.read())?;
        self.run(&tables)
    }

    pub fn run(&self, tables: &SourceTables) -> Result<AnalysisResults> {
        let config = &self.config;
        stage("config", || config.validate())?;

        let merger = DatasetMerger::new(config);
        let censoring = stage("censoring", || merger.censoring_report(&tables.hydrochemistry))?;
        let merged = stage("merge", || merger.merge(tables))?;
        let transformed = stage("transform", || Transformer::new(config).transform(&merged))?;
        let factor_model = stage("factor", || {
            FactorExtractor::new(config.n_factors).fit(&transformed)
        })?;
        let clusters = stage("cluster", || {
            ClusterAssigner::new(config).assign(&factor_model, &merged)
        })?;
        let ion_balance = stage("ion_balance", || IonBalanceChecker::new(config).check(&merged))?;
        let analysed = stage("assemble", || {
            self.analysed_table(&merged, &clusters, &ion_balance)
        })?;
        let summaries = stage("summary", || self.summaries(&merged, &analysed, &clusters))?;

        info!(
            samples = merged.height(),
            groundwater = transformed.nrows(),
            factors = factor_model.n_factors(),
            clusters = config.n_clusters,
            "analysis complete"
        );
        Ok(AnalysisResults {
            merged,
            censoring,
            transformed,
            factor_model,
            clusters,
            ion_balance,
            analysed,
            summaries,
            sample_id_column: config.schema.sample_id.clone(),
        })
    }

    fn analysed_table(
        &self,
        merged: &DataFrame,
        clusters: &ClusterAssignment,
        balance: &IonBalance,
    ) -> Result<DataFrame> {
        let mut df = merged.clone();
        df.with_column(clusters.labels.to_column())?;
        for column in balance.columns() {
            df.with_column(column)?;
        }
        let line = MeteoricWaterLine::from(self.config.meteoric_water_line);
        match line.deviation_column(merged)? {
            Some(column) => {
                df.with_column(column)?;
            }
            None => debug!("isotope columns absent, skipping LMWL deviation"),
        }
        Ok(df)
    }

    fn summaries(
        &self,
        merged: &DataFrame,
        analysed: &DataFrame,
        clusters: &ClusterAssignment,
    ) -> Result<SummaryTables> {
        let config = &self.config;
        let catalog = config.effective_catalog();
        let cluster_means = summary::cluster_means(analysed, &clusters.labels, &catalog, config)?;
        let standardized_cluster_means = cluster_means.standardized(merged, config)?;
        let overview = summary::univariate_overview(
            analysed,
            &present_columns(analysed, &config.summary_columns),
            config,
        )?;
        let correlation = summary::correlation_matrix(
            analysed,
            &present_columns(analysed, &config.correlation_columns),
            config,
        )?;
        Ok(SummaryTables {
            cluster_means,
            standardized_cluster_means,
            overview,
            correlation,
        })
    }
}

fn stage<T>(name: &'static str, run: impl FnOnce() -> Result<T>) -> Result<T> {
    run().inspect_err(|e| error!(stage = name, error = %e, "pipeline stage failed"))
}

/// Requested summary columns that exist in the table; the rest are skipped.
fn present_columns(df: &DataFrame, requested: &[String]) -> Vec<String> {
    let schema = df.schema();
    requested
        .iter()
        .filter(|c| {
            let present = schema.contains(c.as_str());
            if !present {
                debug!(column = %c, "summary column absent, skipped");
            }
            present
        })
        .cloned()
        .collect()
}
