use std::path::PathBuf;

use polars::prelude::*;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3_polars::PyDataFrame;

use crate::config::AnalysisConfig;
use crate::error::HydroError;
use crate::io::{self, SourceEncoding, TableFormat};
use crate::merge::SourceTables;
use crate::pipeline::{AnalysisResults, Artifact, Pipeline};

#[pyclass]
pub struct HydroModel {
    base_path: PathBuf,
    config: AnalysisConfig,
    metadata: Option<DataFrame>,
    hydrochemistry: Option<DataFrame>,
    isotopes: Option<DataFrame>,
    results: Option<AnalysisResults>,
}

#[pymethods]
impl HydroModel {
    #[new]
    #[pyo3(signature = (base_path, config_path=None))]
    fn new(base_path: String, config_path: Option<&str>) -> PyResult<Self> {
        let base_path = PathBuf::from(base_path);
        let config = match config_path {
            Some(path) => AnalysisConfig::from_json_file(base_path.join(path))?,
            None => AnalysisConfig::default(),
        };
        Ok(Self {
            base_path,
            config,
            metadata: None,
            hydrochemistry: None,
            isotopes: None,
            results: None,
        })
    }

    // ── Data loading ────────────────────────────────────────────────────────

    /// Load any delimited file with all columns as strings.
    #[pyo3(signature = (filename, separator=";", encoding="utf-8"))]
    fn load_csv(&self, filename: &str, separator: &str, encoding: &str) -> PyResult<PyDataFrame> {
        let format = Self::table_format(separator, encoding)?;
        Ok(PyDataFrame(self.read(filename, &format)?))
    }

    /// Sample metadata: `Sample ID`, `Type` and site descriptors.
    #[pyo3(signature = (
        filename = "Metadata_samples_vanBroekhoven_v1.csv",
        separator = ";",
        encoding = "utf-8",
    ))]
    fn load_metadata(
        &mut self,
        filename: &str,
        separator: &str,
        encoding: &str,
    ) -> PyResult<PyDataFrame> {
        let format = Self::table_format(separator, encoding)?;
        let df = self.read(filename, &format)?;
        self.metadata = Some(df.clone());
        self.results = None;
        Ok(PyDataFrame(df))
    }

    /// Laboratory hydrochemistry, one row per sample. Detection-limit markers
    /// are kept as read; they are resolved when the model runs.
    #[pyo3(signature = (
        filename = "Hydrochemical_analysis_NIH_v1.csv",
        separator = ";",
        encoding = "latin-1",
    ))]
    fn load_hydrochemistry(
        &mut self,
        filename: &str,
        separator: &str,
        encoding: &str,
    ) -> PyResult<PyDataFrame> {
        let format = Self::table_format(separator, encoding)?;
        let df = self.read(filename, &format)?;
        self.hydrochemistry = Some(df.clone());
        self.results = None;
        Ok(PyDataFrame(df))
    }

    #[pyo3(signature = (
        filename = "Isotope_analysis_NIH_v1.csv",
        separator = ";",
        encoding = "latin-1",
    ))]
    fn load_isotopes(
        &mut self,
        filename: &str,
        separator: &str,
        encoding: &str,
    ) -> PyResult<PyDataFrame> {
        let format = Self::table_format(separator, encoding)?;
        let df = self.read(filename, &format)?;
        self.isotopes = Some(df.clone());
        self.results = None;
        Ok(PyDataFrame(df))
    }

    // ── Analysis ────────────────────────────────────────────────────────────

    /// Run every stage and return the analysed dataset.
    fn run(&mut self) -> PyResult<PyDataFrame> {
        let tables = SourceTables {
            metadata: Self::loaded(&self.metadata, "metadata")?,
            hydrochemistry: Self::loaded(&self.hydrochemistry, "hydrochemistry")?,
            isotopes: Self::loaded(&self.isotopes, "isotopes")?,
        };
        let results = Pipeline::new(self.config.clone()).run(&tables)?;
        let analysed = results.analysed.clone();
        self.results = Some(results);
        Ok(PyDataFrame(analysed))
    }

    /// Any named result table, e.g. `"loadings"` or `"cluster_means"`.
    fn artifact(&self, name: &str) -> PyResult<PyDataFrame> {
        let artifact = Artifact::parse(name)?;
        Ok(PyDataFrame(self.results()?.table(artifact)?))
    }

    fn write_artifacts(&self, directory: &str) -> PyResult<Vec<String>> {
        let written = self.results()?.write_all(self.base_path.join(directory))?;
        Ok(written
            .into_iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect())
    }

    // ── Properties ──────────────────────────────────────────────────────────

    #[getter]
    fn config_json(&self) -> PyResult<String> {
        serde_json::to_string_pretty(&self.config)
            .map_err(|e| PyValueError::new_err(e.to_string()))
    }

    #[getter]
    fn merged_df(&self) -> PyResult<Option<PyDataFrame>> {
        self.optional(Artifact::Merged)
    }

    #[getter]
    fn analysed_df(&self) -> PyResult<Option<PyDataFrame>> {
        self.optional(Artifact::Analysed)
    }

    #[getter]
    fn loadings_df(&self) -> PyResult<Option<PyDataFrame>> {
        self.optional(Artifact::Loadings)
    }

    #[getter]
    fn variance_df(&self) -> PyResult<Option<PyDataFrame>> {
        self.optional(Artifact::FactorVariance)
    }

    #[getter]
    fn scores_df(&self) -> PyResult<Option<PyDataFrame>> {
        self.optional(Artifact::FactorScores)
    }

    #[getter]
    fn linkage_df(&self) -> PyResult<Option<PyDataFrame>> {
        self.optional(Artifact::Linkage)
    }

    #[getter]
    fn clusters_df(&self) -> PyResult<Option<PyDataFrame>> {
        self.optional(Artifact::ClusterLabels)
    }

    #[getter]
    fn ion_balance_df(&self) -> PyResult<Option<PyDataFrame>> {
        self.optional(Artifact::IonBalance)
    }
}

impl HydroModel {
    fn read(&self, filename: &str, format: &TableFormat) -> Result<DataFrame, HydroError> {
        io::read_table(self.base_path.join(filename), format)
    }

    fn table_format(separator: &str, encoding: &str) -> Result<TableFormat, HydroError> {
        let separator = match separator.as_bytes() {
            [b] => *b,
            _ => {
                return Err(HydroError::Config(format!(
                    "separator must be a single byte, got '{separator}'"
                )))
            }
        };
        Ok(TableFormat {
            separator,
            encoding: SourceEncoding::parse(encoding)?,
        })
    }

    fn loaded(table: &Option<DataFrame>, name: &str) -> Result<DataFrame, HydroError> {
        table
            .clone()
            .ok_or_else(|| HydroError::NotLoaded(name.to_string()))
    }

    fn results(&self) -> Result<&AnalysisResults, HydroError> {
        self.results
            .as_ref()
            .ok_or_else(|| HydroError::NotLoaded("results; call run() first".into()))
    }

    fn optional(&self, artifact: Artifact) -> PyResult<Option<PyDataFrame>> {
        match &self.results {
            Some(results) => Ok(Some(PyDataFrame(results.table(artifact)?))),
            None => Ok(None),
        }
    }
}
