//! Combine metadata, hydrochemistry and isotope tables into one
//! sample-indexed table and clean it.
//!
//! Order of operations:
//! 1. key validation (present, non-null, unique) on all three inputs
//! 2. left joins onto the metadata table, metadata row order preserved
//! 3. detection-limit substitution, table driven
//! 4. numeric coercion of every fully-numeric column
//! 5. manual `(sample, field)` overrides
//! 6. pruning of high-censoring analytes
//! 7. catalog check

use std::borrow::Cow;
use std::collections::HashSet;

use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{AnalysisConfig, DetectionLimit, Sentinel};
use crate::error::{HydroError, MergeError, Result};
use crate::schema::censoring;

const ROW_INDEX: &str = "__row_index";

/// The three raw source tables, every column as read from disk.
#[derive(Debug, Clone)]
pub struct SourceTables {
    pub metadata: DataFrame,
    pub hydrochemistry: DataFrame,
    pub isotopes: DataFrame,
}

/// Per-analyte count of below-detection-limit values in the raw hydrochemistry.
#[derive(Debug, Clone, PartialEq)]
pub struct CensoringEntry {
    pub column: String,
    pub censored: usize,
    pub observed: usize,
}

impl CensoringEntry {
    pub fn fraction(&self) -> f64 {
        if self.observed == 0 {
            0.0
        } else {
            self.censored as f64 / self.observed as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CensoringReport {
    pub entries: Vec<CensoringEntry>,
    pub threshold: f64,
}

impl CensoringReport {
    /// Analytes above the threshold that are not in `pruned`.
    pub fn retained_breaches(&self, pruned: &[String]) -> Vec<&CensoringEntry> {
        self.entries
            .iter()
            .filter(|e| e.fraction() > self.threshold && !pruned.contains(&e.column))
            .collect()
    }

    pub fn to_frame(&self) -> Result<DataFrame> {
        let names: Vec<&str> = self.entries.iter().map(|e| e.column.as_str()).collect();
        let censored: Vec<u64> = self.entries.iter().map(|e| e.censored as u64).collect();
        let observed: Vec<u64> = self.entries.iter().map(|e| e.observed as u64).collect();
        let fraction: Vec<f64> = self.entries.iter().map(|e| e.fraction()).collect();
        Ok(DataFrame::new(vec![
            Column::new(censoring::COLUMN.into(), &names),
            Column::new(censoring::CENSORED.into(), &censored),
            Column::new(censoring::OBSERVED.into(), &observed),
            Column::new(censoring::FRACTION.into(), &fraction),
        ])?)
    }
}

pub struct DatasetMerger<'a> {
    config: &'a AnalysisConfig,
}

impl<'a> DatasetMerger<'a> {
    pub fn new(config: &'a AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn merge(&self, tables: &SourceTables) -> Result<DataFrame> {
        let id = self.config.schema.sample_id.as_str();

        let metadata = self.validated_keys(&tables.metadata, "metadata")?;
        let hydrochem = self.validated_keys(&tables.hydrochemistry, "hydrochemistry")?;
        let isotopes = self.validated_keys(&tables.isotopes, "isotopes")?;

        let joined = metadata
            .with_row_index(ROW_INDEX.into(), None)?
            .lazy()
            .join(
                hydrochem.lazy(),
                [col(id)],
                [col(id)],
                JoinArgs::new(JoinType::Left),
            )
            .join(
                isotopes.lazy(),
                [col(id)],
                [col(id)],
                JoinArgs::new(JoinType::Left),
            )
            .sort([ROW_INDEX], SortMultipleOptions::default())
            .collect()?
            .drop(ROW_INDEX)?;

        let df = self.substitute_detection_limits(joined)?;
        let df = self.coerce_numeric(df)?;
        let df = self.apply_overrides(df)?;
        let df = self.prune(df)?;
        self.check_catalog(&df)?;

        info!(
            stage = "merge",
            rows = df.height(),
            columns = df.width(),
            "merged source tables"
        );
        Ok(df)
    }

    /// Count censored values per detection-limit analyte in a raw table.
    /// Analytes absent from the table are skipped.
    pub fn censoring_report(&self, raw: &DataFrame) -> Result<CensoringReport> {
        let mut entries = Vec::new();
        for dl in &self.config.detection_limits {
            let Ok(column) = raw.column(&dl.column) else {
                continue;
            };
            let values = column.cast(&DataType::String)?;
            let values = values.str()?;
            let mut censored = 0;
            let mut observed = 0;
            for raw_value in values.into_iter().flatten() {
                observed += 1;
                if dl.sentinel.matches(raw_value) {
                    censored += 1;
                }
            }
            entries.push(CensoringEntry {
                column: dl.column.clone(),
                censored,
                observed,
            });
        }

        let report = CensoringReport {
            entries,
            threshold: self.config.censoring_threshold,
        };
        for breach in report.retained_breaches(&self.config.pruned_columns) {
            warn!(
                column = %breach.column,
                fraction = breach.fraction(),
                threshold = report.threshold,
                "analyte exceeds censoring threshold but is not pruned"
            );
        }
        Ok(report)
    }

    fn validated_keys(&self, df: &DataFrame, table: &str) -> Result<DataFrame> {
        let id = self.config.schema.sample_id.as_str();
        let key = df
            .column(id)
            .map_err(|_| MergeError::MissingKeyColumn {
                table: table.to_string(),
                column: id.to_string(),
            })?
            .cast(&DataType::String)?;

        let mut seen = HashSet::new();
        for (row, value) in key.str()?.into_iter().enumerate() {
            let Some(sample_id) = value else {
                return Err(MergeError::NullSampleId {
                    table: table.to_string(),
                    row,
                }
                .into());
            };
            if !seen.insert(sample_id) {
                return Err(MergeError::DuplicateSampleId {
                    table: table.to_string(),
                    sample_id: sample_id.to_string(),
                }
                .into());
            }
        }

        let mut out = df.clone();
        out.with_column(key)?;
        Ok(out)
    }

    fn substitute_detection_limits(&self, df: DataFrame) -> Result<DataFrame> {
        let mut exprs = Vec::with_capacity(self.config.detection_limits.len());
        for dl in &self.config.detection_limits {
            self.check_substitutable(&df, dl)?;
            exprs.push(substitution_expr(dl));
        }
        if exprs.is_empty() {
            return Ok(df);
        }
        Ok(df.lazy().with_columns(exprs).collect()?)
    }

    /// Every non-null cell must be either the sentinel or a number.
    fn check_substitutable(&self, df: &DataFrame, dl: &DetectionLimit) -> Result<()> {
        let column = df
            .column(&dl.column)
            .map_err(|_| HydroError::MissingColumn(dl.column.clone()))?
            .cast(&DataType::String)?;
        let ids = df.column(&self.config.schema.sample_id)?.str()?;

        let mut substituted = 0usize;
        for (i, value) in column.str()?.into_iter().enumerate() {
            let Some(raw) = value else { continue };
            if dl.sentinel.matches(raw) {
                substituted += 1;
            } else if raw.trim().parse::<f64>().is_err() {
                return Err(HydroError::InvalidData(format!(
                    "'{}' for sample '{}' is neither a number nor the detection-limit marker",
                    dl.column,
                    ids.get(i).unwrap_or("?")
                )));
            }
        }
        debug!(
            column = %dl.column,
            substituted,
            value = dl.substitute(),
            "detection-limit substitution"
        );
        Ok(())
    }

    /// Cast every String column whose non-null cells all parse as numbers.
    fn coerce_numeric(&self, mut df: DataFrame) -> Result<DataFrame> {
        let id = self.config.schema.sample_id.as_str();
        let names: Vec<String> = df
            .get_column_names_str()
            .iter()
            .map(|s| s.to_string())
            .collect();

        for name in names {
            if name == id {
                continue;
            }
            let column = df.column(&name)?;
            if column.dtype() != &DataType::String {
                continue;
            }
            let stripped = column
                .str()?
                .apply_values(|s| Cow::Borrowed(s.trim()))
                .into_series();
            let numeric = stripped.cast(&DataType::Float64)?;
            if numeric.null_count() == column.null_count() {
                df.with_column(numeric)?;
            }
        }
        Ok(df)
    }

    fn apply_overrides(&self, df: DataFrame) -> Result<DataFrame> {
        if self.config.overrides.is_empty() {
            return Ok(df);
        }
        let id = self.config.schema.sample_id.as_str();
        let present: HashSet<&str> = df.column(id)?.str()?.into_iter().flatten().collect();

        let mut exprs = Vec::new();
        for ov in &self.config.overrides {
            for name in [&ov.target, &ov.source] {
                if df.column(name).is_err() {
                    return Err(MergeError::UnknownOverrideColumn(name.clone()).into());
                }
            }
            if !present.contains(ov.sample_id.as_str()) {
                warn!(
                    sample = %ov.sample_id,
                    target = %ov.target,
                    "override for unknown sample skipped"
                );
                continue;
            }
            debug!(
                sample = %ov.sample_id,
                target = %ov.target,
                source = %ov.source,
                "applying field override"
            );
            exprs.push(ov);
        }

        // Applied one at a time so overrides see the previous ones' results.
        let mut lazy = df.lazy();
        for ov in exprs {
            lazy = lazy.with_columns([when(col(id).eq(lit(ov.sample_id.as_str())))
                .then(col(ov.source.as_str()))
                .otherwise(col(ov.target.as_str()))
                .alias(ov.target.as_str())]);
        }
        Ok(lazy.collect()?)
    }

    fn prune(&self, mut df: DataFrame) -> Result<DataFrame> {
        for name in &self.config.pruned_columns {
            if df.column(name).is_ok() {
                df = df.drop(name)?;
                debug!(column = %name, "pruned high-censoring analyte");
            }
        }
        Ok(df)
    }

    fn check_catalog(&self, df: &DataFrame) -> Result<()> {
        for name in self.config.effective_catalog() {
            if df.column(&name).is_err() {
                return Err(MergeError::MissingCatalogColumn(name).into());
            }
        }
        Ok(())
    }
}

/// `sentinel → detection_limit / 2`, then cast to Float64.
/// Already-substituted columns pass through unchanged.
fn substitution_expr(dl: &DetectionLimit) -> Expr {
    let raw = col(dl.column.as_str())
        .cast(DataType::String)
        .str()
        .strip_chars(lit(" \t\r\n"));
    let parsed = raw.clone().cast(DataType::Float64);
    let is_sentinel = match &dl.sentinel {
        Sentinel::Text(text) => raw.eq(lit(text.trim())),
        Sentinel::Value(v) => parsed.clone().eq(lit(*v)),
    };
    when(is_sentinel)
        .then(lit(dl.substitute()))
        .otherwise(parsed)
        .alias(dl.column.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldOverride;

    fn config() -> AnalysisConfig {
        AnalysisConfig {
            detection_limits: vec![
                DetectionLimit::new("NO2 [mg/L]", Sentinel::Text("ND".into()), 0.01),
                DetectionLimit::new("NO3 [mg/L]", Sentinel::Value(0.0), 0.001),
            ],
            pruned_columns: vec!["PO4 [mg/L]".into()],
            overrides: vec![FieldOverride::new(
                "F 2",
                "EC value [microS/cm]",
                "EC [µS/cm]",
            )],
            catalog: vec!["NO2 [mg/L]".into(), "NO3 [mg/L]".into()],
            ..Default::default()
        }
    }

    fn tables() -> SourceTables {
        let metadata = DataFrame::new(vec![
            Column::new("Sample ID".into(), &["F 3", "F 1", "F 2"]),
            Column::new("Type".into(), &["village pond", "deep tubewell", "deep tubewell"]),
        ])
        .unwrap();
        let hydrochemistry = DataFrame::new(vec![
            Column::new("Sample ID".into(), &["F 1", "F 2", "F 3"]),
            Column::new("NO2 [mg/L]".into(), &["ND", "0.2", "0.4"]),
            Column::new("NO3 [mg/L]".into(), &["1.5", "0.000", "3"]),
            Column::new("PO4 [mg/L]".into(), &["ND", "ND", "0.1"]),
            Column::new("EC value [microS/cm]".into(), &["500", "9999", "700"]),
            Column::new("EC [µS/cm]".into(), &["510", "610", "705"]),
        ])
        .unwrap();
        let isotopes = DataFrame::new(vec![
            Column::new("Sample ID".into(), &["F 1", "F 3"]),
            Column::new("dO18".into(), &["-5.1", "-2.0"]),
        ])
        .unwrap();
        SourceTables {
            metadata,
            hydrochemistry,
            isotopes,
        }
    }

    fn f64_values(df: &DataFrame, name: &str) -> Vec<Option<f64>> {
        df.column(name).unwrap().f64().unwrap().into_iter().collect()
    }

    #[test]
    fn preserves_metadata_rows_and_order() {
        let config = config();
        let df = DatasetMerger::new(&config).merge(&tables()).unwrap();
        let ids: Vec<&str> = df
            .column("Sample ID")
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .flatten()
            .collect();
        assert_eq!(ids, vec!["F 3", "F 1", "F 2"]);
    }

    #[test]
    fn missing_isotope_rows_stay_missing() {
        let config = config();
        let df = DatasetMerger::new(&config).merge(&tables()).unwrap();
        assert_eq!(
            f64_values(&df, "dO18"),
            vec![Some(-2.0), Some(-5.1), None]
        );
    }

    #[test]
    fn substitutes_half_detection_limit() {
        let config = config();
        let df = DatasetMerger::new(&config).merge(&tables()).unwrap();
        assert_eq!(
            f64_values(&df, "NO2 [mg/L]"),
            vec![Some(0.4), Some(0.005), Some(0.2)]
        );
        assert_eq!(
            f64_values(&df, "NO3 [mg/L]"),
            vec![Some(3.0), Some(1.5), Some(0.0005)]
        );
    }

    #[test]
    fn substitution_is_idempotent() {
        let config = config();
        let merger = DatasetMerger::new(&config);
        let once = merger.merge(&tables()).unwrap();
        let again = merger.substitute_detection_limits(once.clone()).unwrap();
        for dl in &config.detection_limits {
            assert_eq!(f64_values(&once, &dl.column), f64_values(&again, &dl.column));
        }
    }

    #[test]
    fn applies_override_and_prunes() {
        let config = config();
        let df = DatasetMerger::new(&config).merge(&tables()).unwrap();
        assert_eq!(
            f64_values(&df, "EC value [microS/cm]"),
            vec![Some(700.0), Some(500.0), Some(610.0)]
        );
        assert!(df.column("PO4 [mg/L]").is_err());
        // text columns are left alone
        assert_eq!(df.column("Type").unwrap().dtype(), &DataType::String);
    }

    #[test]
    fn duplicate_id_is_fatal() {
        let config = config();
        let mut t = tables();
        t.isotopes = DataFrame::new(vec![
            Column::new("Sample ID".into(), &["F 1", "F 1"]),
            Column::new("dO18".into(), &["-5.1", "-2.0"]),
        ])
        .unwrap();
        let err = DatasetMerger::new(&config).merge(&t).unwrap_err();
        assert!(matches!(
            err,
            HydroError::Merge(MergeError::DuplicateSampleId { ref table, ref sample_id })
                if table == "isotopes" && sample_id == "F 1"
        ));
    }

    #[test]
    fn missing_key_column_is_fatal() {
        let config = config();
        let mut t = tables();
        t.hydrochemistry = t.hydrochemistry.drop("Sample ID").unwrap();
        let err = DatasetMerger::new(&config).merge(&t).unwrap_err();
        assert!(matches!(
            err,
            HydroError::Merge(MergeError::MissingKeyColumn { ref table, .. })
                if table == "hydrochemistry"
        ));
    }

    #[test]
    fn missing_catalog_column_is_fatal() {
        let mut config = config();
        config.catalog.push("U [µg/L]".into());
        let err = DatasetMerger::new(&config).merge(&tables()).unwrap_err();
        assert!(matches!(
            err,
            HydroError::Merge(MergeError::MissingCatalogColumn(ref c)) if c == "U [µg/L]"
        ));
    }

    #[test]
    fn unparseable_value_is_rejected() {
        let config = config();
        let mut t = tables();
        t.hydrochemistry
            .with_column(Column::new("NO2 [mg/L]".into(), &["ND", "n/a", "0.4"]))
            .unwrap();
        let err = DatasetMerger::new(&config).merge(&t).unwrap_err();
        assert!(matches!(err, HydroError::InvalidData(ref m) if m.contains("F 2")));
    }

    #[test]
    fn censoring_report_flags_unpruned_breaches() {
        let mut config = config();
        config.detection_limits.push(DetectionLimit::new(
            "PO4 [mg/L]",
            Sentinel::Text("ND".into()),
            0.02,
        ));
        let report = DatasetMerger::new(&config)
            .censoring_report(&tables().hydrochemistry)
            .unwrap();
        let po4 = report
            .entries
            .iter()
            .find(|e| e.column == "PO4 [mg/L]")
            .unwrap();
        assert_eq!((po4.censored, po4.observed), (2, 3));
        // NO2 and NO3 are each 1/3 censored and not pruned
        let breaches: Vec<&str> = report
            .retained_breaches(&config.pruned_columns)
            .iter()
            .map(|e| e.column.as_str())
            .collect();
        assert_eq!(breaches, vec!["NO2 [mg/L]", "NO3 [mg/L]"]);
        // once pruned, nothing retained exceeds the threshold
        config.pruned_columns.push("NO2 [mg/L]".into());
        config.pruned_columns.push("NO3 [mg/L]".into());
        assert!(report.retained_breaches(&config.pruned_columns).is_empty());
        assert_eq!(report.to_frame().unwrap().height(), 3);
    }
}
