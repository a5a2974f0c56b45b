//! Injectable analysis configuration.
//!
//! Every list and lookup table the analysis depends on lives here, so a
//! different study can swap them without touching the pipeline stages.
//! [`AnalysisConfig::default`] reproduces the Hindon-subbasin reference
//! study; JSON files only need to name the fields they change.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HydroError, Result};
use crate::schema::{isotope, sample, sample_type};

/// Marker used by the lab to report a below-detection-limit measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sentinel {
    /// Literal text such as `ND` or `<0.000`.
    Text(String),
    /// Numeric marker, typically `0`.
    Value(f64),
}

impl Sentinel {
    /// Does a raw cell match this sentinel?
    pub fn matches(&self, raw: &str) -> bool {
        let raw = raw.trim();
        match self {
            Sentinel::Text(text) => raw == text.trim(),
            Sentinel::Value(v) => raw.parse::<f64>().map(|x| x == *v).unwrap_or(false),
        }
    }
}

/// One row of the detection-limit table: `column` cells equal to
/// `sentinel` are replaced with half of `detection_limit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionLimit {
    pub column: String,
    pub sentinel: Sentinel,
    pub detection_limit: f64,
}

impl DetectionLimit {
    pub fn new(column: &str, sentinel: Sentinel, detection_limit: f64) -> Self {
        Self {
            column: column.to_string(),
            sentinel,
            detection_limit,
        }
    }

    pub fn substitute(&self) -> f64 {
        self.detection_limit / 2.0
    }
}

/// Manual instrument correction: `target[sample_id] = source[sample_id]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldOverride {
    pub sample_id: String,
    pub target: String,
    pub source: String,
}

impl FieldOverride {
    pub fn new(sample_id: &str, target: &str, source: &str) -> Self {
        Self {
            sample_id: sample_id.to_string(),
            target: target.to_string(),
            source: source.to_string(),
        }
    }
}

/// mg/L → mEq/L conversion factor (valence / molar mass) for one ion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IonFactor {
    pub column: String,
    pub factor: f64,
}

impl IonFactor {
    pub fn new(column: &str, factor: f64) -> Self {
        Self {
            column: column.to_string(),
            factor,
        }
    }
}

/// Key columns shared by all three source tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub sample_id: String,
    pub sample_type: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            sample_id: sample::SAMPLE_ID.to_string(),
            sample_type: sample::TYPE.to_string(),
        }
    }
}

/// Local meteoric water line, `dD = slope * dO18 + intercept`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeteoricWaterLineConfig {
    pub slope: f64,
    pub intercept: f64,
}

impl Default for MeteoricWaterLineConfig {
    /// Delhi LMWL (Pang et al., 2004).
    fn default() -> Self {
        Self {
            slope: 7.15,
            intercept: 2.60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub schema: SchemaConfig,
    pub groundwater_types: Vec<String>,
    pub excluded_types: Vec<String>,
    pub detection_limits: Vec<DetectionLimit>,
    /// Analytes dropped for exceeding `censoring_threshold`, fixed once per study.
    pub pruned_columns: Vec<String>,
    pub censoring_threshold: f64,
    pub overrides: Vec<FieldOverride>,
    /// Ordered variable catalog used for transformation and factor analysis.
    pub catalog: Vec<String>,
    /// Variables already on a log scale; passed through untransformed.
    pub log_exempt: Vec<String>,
    pub n_factors: usize,
    pub n_clusters: usize,
    pub anions: Vec<IonFactor>,
    pub cations: Vec<IonFactor>,
    pub meteoric_water_line: MeteoricWaterLineConfig,
    pub summary_columns: Vec<String>,
    pub correlation_columns: Vec<String>,
}

const REFERENCE_CATALOG: [&str; 33] = [
    "EC value [microS/cm]",
    "pH",
    "Hard [mg/L]",
    "Alk [mg/L]",
    "Cl [mg/L]",
    "NO3 [mg/L]",
    "SO4 [mg/L]",
    "F [mg/L]",
    "NO2 [mg/L]",
    "Na [mg/L]",
    "K [mg/L]",
    "Ca [mg/L]",
    "Mg [mg/L]",
    "NH4 [mg/L]",
    "Silica [mg/L]",
    "COD [mg/L]",
    "B  [µg/L]",
    "Al [µg/L]",
    "V [µg/L]",
    "Cr [µg/L]",
    "Mn [µg/L]",
    "Fe [µg/L]",
    "Co [µg/L]",
    "Ni [µg/L]",
    "Cu [µg/L]",
    "Zn [µg/L]",
    "As [µg/L]",
    "Se [µg/L]",
    "Sr [µg/L]",
    "Cd [µg/L]",
    "Ba [µg/L]",
    "Pb [µg/L]",
    "U [µg/L]",
];

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let catalog = strings(&REFERENCE_CATALOG);

        let mut summary_columns = catalog.clone();
        summary_columns.push(isotope::D_O18.to_string());
        summary_columns.push(isotope::D_D.to_string());

        let mut correlation_columns = summary_columns.clone();
        correlation_columns.push("depth [m]".to_string());

        Self {
            schema: SchemaConfig::default(),
            groundwater_types: strings(&sample_type::GROUNDWATER),
            excluded_types: strings(&sample_type::EXCLUDED),
            detection_limits: vec![
                DetectionLimit::new("NO2 [mg/L]", Sentinel::Text("ND".into()), 0.01),
                DetectionLimit::new("NH4 [mg/L]", Sentinel::Text("ND".into()), 0.05),
                DetectionLimit::new("Ni [µg/L]", Sentinel::Text("<0.000".into()), 0.01),
                DetectionLimit::new("Se [µg/L]", Sentinel::Text("<0.000".into()), 0.01),
                DetectionLimit::new("NO3 [mg/L]", Sentinel::Value(0.0), 0.001),
            ],
            pruned_columns: strings(&["PO4 [mg/L]", "Li [mg/L]", "BOD [mg/L]"]),
            censoring_threshold: 0.25,
            // Field and lab EC disagreed for these samples; chloride decided which one to trust.
            overrides: vec![
                FieldOverride::new("F 4.1", "EC value [microS/cm]", "EC [µS/cm]"),
                FieldOverride::new("F 9.1", "EC [µS/cm]", "EC value [microS/cm]"),
                FieldOverride::new("F 2.1", "EC [µS/cm]", "EC value [microS/cm]"),
            ],
            catalog,
            log_exempt: strings(&["pH"]),
            n_factors: 3,
            n_clusters: 4,
            anions: vec![
                IonFactor::new("Alk [mg/L]", 0.02),
                IonFactor::new("SO4 [mg/L]", 0.02082),
                IonFactor::new("Cl [mg/L]", 0.02821),
                IonFactor::new("F [mg/L]", 0.05264),
                IonFactor::new("NO2 [mg/L]", 0.02174),
                IonFactor::new("NO3 [mg/L]", 0.01613),
            ],
            cations: vec![
                IonFactor::new("Ca [mg/L]", 0.04990),
                IonFactor::new("Mg [mg/L]", 0.08229),
                IonFactor::new("Na [mg/L]", 0.04350),
                IonFactor::new("K [mg/L]", 0.02558),
                IonFactor::new("NH4 [mg/L]", 0.05544),
            ],
            meteoric_water_line: MeteoricWaterLineConfig::default(),
            summary_columns,
            correlation_columns,
        }
    }
}

impl AnalysisConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Catalog with the pruned analytes removed.
    pub fn effective_catalog(&self) -> Vec<String> {
        self.catalog
            .iter()
            .filter(|c| !self.pruned_columns.contains(c))
            .cloned()
            .collect()
    }

    pub fn is_groundwater(&self, sample_type: &str) -> bool {
        self.groundwater_types.iter().any(|t| t == sample_type)
    }

    pub fn is_excluded(&self, sample_type: &str) -> bool {
        self.excluded_types.iter().any(|t| t == sample_type)
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_factors == 0 {
            return Err(HydroError::Config("n_factors must be at least 1".into()));
        }
        if self.n_clusters == 0 {
            return Err(HydroError::Config("n_clusters must be at least 1".into()));
        }
        if !(self.censoring_threshold > 0.0 && self.censoring_threshold <= 1.0) {
            return Err(HydroError::Config(format!(
                "censoring_threshold must be in (0, 1], got {}",
                self.censoring_threshold
            )));
        }
        for dl in &self.detection_limits {
            if !(dl.detection_limit > 0.0) {
                return Err(HydroError::Config(format!(
                    "detection limit for '{}' must be positive, got {}",
                    dl.column, dl.detection_limit
                )));
            }
            if let Sentinel::Value(v) = dl.sentinel {
                if v == dl.substitute() {
                    return Err(HydroError::Config(format!(
                        "sentinel for '{}' equals its substitution value",
                        dl.column
                    )));
                }
            }
        }
        if self.groundwater_types.is_empty() {
            return Err(HydroError::Config("groundwater_types is empty".into()));
        }
        if let Some(t) = self
            .groundwater_types
            .iter()
            .find(|t| self.excluded_types.contains(t))
        {
            return Err(HydroError::Config(format!(
                "type '{t}' is both groundwater and excluded"
            )));
        }
        if self.effective_catalog().is_empty() {
            return Err(HydroError::Config("variable catalog is empty".into()));
        }
        Ok(())
    }
}
