//! Hydrochemical analysis of groundwater samples: dataset merging,
//! log-standardization, principal factor extraction with varimax, Ward
//! clustering of factor scores and charge-balance checking.

pub mod cluster;
pub mod config;
pub mod error;
pub mod factor;
pub mod io;
pub mod ion_balance;
pub mod isotopes;
pub mod merge;
pub mod pipeline;
pub mod schema;
pub mod summary;
pub mod table;
pub mod transform;

#[cfg(feature = "python")]
mod python;

pub use cluster::{ClusterAssigner, ClusterAssignment, ClusterLabel, ClusterLabels, Dendrogram};
pub use config::AnalysisConfig;
pub use error::{HydroError, MergeError, Result};
pub use factor::{FactorExtractor, FactorModel, FactorVariance};
pub use ion_balance::{IonBalance, IonBalanceChecker};
pub use isotopes::MeteoricWaterLine;
pub use merge::{CensoringReport, DatasetMerger, SourceTables};
pub use pipeline::{AnalysisResults, Artifact, Pipeline, SourceFiles};
pub use transform::{TransformedMatrix, Transformer};

#[cfg(feature = "python")]
use pyo3::prelude::*;
#[cfg(feature = "python")]
use pyo3::types::PyModule;

/// Export schema constants as Python submodules
#[cfg(feature = "python")]
fn add_schema_exports(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Sample
    let sample = PyModule::new(m.py(), "sample")?;
    sample.add("SAMPLE_ID", schema::sample::SAMPLE_ID)?;
    sample.add("TYPE", schema::sample::TYPE)?;
    m.add_submodule(&sample)?;

    // Sample types
    let sample_type = PyModule::new(m.py(), "sample_type")?;
    sample_type.add("DEEP_TUBEWELL", schema::sample_type::DEEP_TUBEWELL)?;
    sample_type.add("SHALLOW_TUBEWELL", schema::sample_type::SHALLOW_TUBEWELL)?;
    sample_type.add("VILLAGE_POND", schema::sample_type::VILLAGE_POND)?;
    sample_type.add("IRRIGATION_CANAL", schema::sample_type::IRRIGATION_CANAL)?;
    m.add_submodule(&sample_type)?;

    // Derived
    let derived = PyModule::new(m.py(), "derived")?;
    derived.add("CLUSTER", schema::derived::CLUSTER)?;
    derived.add("SUM_ANIONS", schema::derived::SUM_ANIONS)?;
    derived.add("SUM_CATIONS", schema::derived::SUM_CATIONS)?;
    derived.add("BALANCE_DIFF", schema::derived::BALANCE_DIFF)?;
    derived.add("LMWL_DEVIATION", schema::derived::LMWL_DEVIATION)?;
    m.add_submodule(&derived)?;

    // Isotopes
    let isotope = PyModule::new(m.py(), "isotope")?;
    isotope.add("D_O18", schema::isotope::D_O18)?;
    isotope.add("D_D", schema::isotope::D_D)?;
    m.add_submodule(&isotope)?;

    // Factor tables
    let factor = PyModule::new(m.py(), "factor")?;
    factor.add("VARIABLE", schema::factor::VARIABLE)?;
    factor.add("STATISTIC", schema::factor::STATISTIC)?;
    factor.add(
        "SUM_SQUARED_LOADINGS",
        schema::factor::SUM_SQUARED_LOADINGS,
    )?;
    factor.add(
        "PROPORTIONAL_VARIANCE",
        schema::factor::PROPORTIONAL_VARIANCE,
    )?;
    factor.add("CUMULATIVE_VARIANCE", schema::factor::CUMULATIVE_VARIANCE)?;
    m.add_submodule(&factor)?;

    // Linkage
    let linkage = PyModule::new(m.py(), "linkage")?;
    linkage.add("LEFT", schema::linkage::LEFT)?;
    linkage.add("RIGHT", schema::linkage::RIGHT)?;
    linkage.add("DISTANCE", schema::linkage::DISTANCE)?;
    linkage.add("SIZE", schema::linkage::SIZE)?;
    m.add_submodule(&linkage)?;

    Ok(())
}

#[cfg(feature = "python")]
#[pymodule]
fn hydrochem(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<python::HydroModel>()?;
    add_schema_exports(m)?;
    Ok(())
}
