//! Electro-neutrality check: charge-equivalent anion and cation sums and
//! their percentage difference, for every sample regardless of type.

use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{AnalysisConfig, IonFactor};
use crate::error::{HydroError, Result};
use crate::schema::derived;
use crate::table;

/// A sample whose balance could not be completed. Not fatal: the sums for
/// that sample are missing instead.
#[derive(Debug, Clone, PartialEq)]
pub struct IncompleteBalanceWarning {
    pub sample_id: String,
    pub missing: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct IonBalance {
    pub sample_ids: Vec<String>,
    pub sum_anions: Vec<Option<f64>>,
    pub sum_cations: Vec<Option<f64>>,
    /// `(cations - anions) / (cations + anions) * 100`
    pub difference_pct: Vec<Option<f64>>,
    pub warnings: Vec<IncompleteBalanceWarning>,
}

impl IonBalance {
    pub fn columns(&self) -> Vec<Column> {
        vec![
            Column::new(derived::SUM_ANIONS.into(), &self.sum_anions),
            Column::new(derived::SUM_CATIONS.into(), &self.sum_cations),
            Column::new(derived::BALANCE_DIFF.into(), &self.difference_pct),
        ]
    }

    pub fn to_frame(&self, sample_id_column: &str) -> Result<DataFrame> {
        let mut columns = vec![Column::new(sample_id_column.into(), &self.sample_ids)];
        columns.extend(self.columns());
        Ok(DataFrame::new(columns)?)
    }
}

pub struct IonBalanceChecker<'a> {
    config: &'a AnalysisConfig,
}

impl<'a> IonBalanceChecker<'a> {
    pub fn new(config: &'a AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn check(&self, merged: &DataFrame) -> Result<IonBalance> {
        let id = self.config.schema.sample_id.as_str();
        let schema = merged.schema();
        let anions = charge_sum(&self.config.anions, schema, "anion")?;
        let cations = charge_sum(&self.config.cations, schema, "cation")?;

        let sums = merged
            .clone()
            .lazy()
            .select([
                col(id),
                anions.alias(derived::SUM_ANIONS),
                cations.alias(derived::SUM_CATIONS),
            ])
            .with_columns([((col(derived::SUM_CATIONS) - col(derived::SUM_ANIONS))
                / (col(derived::SUM_CATIONS) + col(derived::SUM_ANIONS))
                * lit(100.0))
            .alias(derived::BALANCE_DIFF)])
            .collect()?;

        let sample_ids = table::sample_ids(&sums, self.config)?;
        let warnings = self.incomplete_rows(merged, &sample_ids)?;
        for w in &warnings {
            warn!(sample = %w.sample_id, missing = ?w.missing, "incomplete ion balance");
        }

        let balance = IonBalance {
            sum_anions: table::numeric_column(&sums, derived::SUM_ANIONS)?,
            sum_cations: table::numeric_column(&sums, derived::SUM_CATIONS)?,
            difference_pct: table::numeric_column(&sums, derived::BALANCE_DIFF)?,
            sample_ids,
            warnings,
        };
        info!(
            stage = "ion_balance",
            samples = balance.sample_ids.len(),
            incomplete = balance.warnings.len(),
            "computed charge balance"
        );
        Ok(balance)
    }

    fn incomplete_rows(
        &self,
        merged: &DataFrame,
        sample_ids: &[String],
    ) -> Result<Vec<IncompleteBalanceWarning>> {
        let ions: Vec<&IonFactor> = self
            .config
            .anions
            .iter()
            .chain(&self.config.cations)
            .collect();
        let mut values = Vec::with_capacity(ions.len());
        for ion in &ions {
            if merged.schema().contains(&ion.column) {
                values.push(table::numeric_column(merged, &ion.column)?);
            } else {
                debug!(column = %ion.column, "ion column absent, treated as missing");
                values.push(vec![None; sample_ids.len()]);
            }
        }

        let mut warnings = Vec::new();
        for (row, sample_id) in sample_ids.iter().enumerate() {
            let missing: Vec<String> = ions
                .iter()
                .zip(&values)
                .filter(|(_, v)| v[row].map(|x| x.is_nan()).unwrap_or(true))
                .map(|(ion, _)| ion.column.clone())
                .collect();
            if !missing.is_empty() {
                warnings.push(IncompleteBalanceWarning {
                    sample_id: sample_id.clone(),
                    missing,
                });
            }
        }
        Ok(warnings)
    }
}

/// `Σ concentration × factor`; a missing concentration makes the sum missing.
/// Ion columns absent from the table count as missing for every sample.
fn charge_sum(ions: &[IonFactor], schema: &Schema, kind: &str) -> Result<Expr> {
    ions.iter()
        .map(|ion| {
            let concentration = if schema.contains(&ion.column) {
                col(ion.column.as_str())
            } else {
                lit(NULL)
            };
            concentration.cast(DataType::Float64) * lit(ion.factor)
        })
        .reduce(|acc, term| acc + term)
        .ok_or_else(|| HydroError::InvalidData(format!("no {kind} conversion factors configured")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame(ca: Option<f64>, cl: Option<f64>, others: Option<f64>) -> DataFrame {
        let config = AnalysisConfig::default();
        let mut columns = vec![
            Column::new("Sample ID".into(), &["F 1"]),
            Column::new("Type".into(), &["village pond"]),
        ];
        for ion in config.anions.iter().chain(&config.cations) {
            let value = match ion.column.as_str() {
                "Ca [mg/L]" => ca,
                "Cl [mg/L]" => cl,
                _ => others,
            };
            columns.push(Column::new(ion.column.as_str().into(), &[value]));
        }
        DataFrame::new(columns).unwrap()
    }

    #[test]
    fn calcium_chloride_reference_sample() {
        let config = AnalysisConfig::default();
        let df = sample_frame(Some(40.0), Some(35.45), Some(0.0));
        let balance = IonBalanceChecker::new(&config).check(&df).unwrap();

        let cations = balance.sum_cations[0].unwrap();
        let anions = balance.sum_anions[0].unwrap();
        assert!((cations - 1.996).abs() < 1e-9);
        assert!((anions - 35.45 * 0.02821).abs() < 1e-9);
        assert!((anions - 1.0).abs() < 1e-3);
        let diff = balance.difference_pct[0].unwrap();
        assert!((diff - 33.2).abs() < 0.1, "diff {diff}");
        assert!(balance.warnings.is_empty());
    }

    #[test]
    fn missing_input_propagates_as_missing() {
        let config = AnalysisConfig::default();
        let df = sample_frame(Some(40.0), Some(35.45), None);
        let balance = IonBalanceChecker::new(&config).check(&df).unwrap();
        assert_eq!(balance.sum_anions[0], None);
        assert_eq!(balance.sum_cations[0], None);
        assert_eq!(balance.difference_pct[0], None);
        assert_eq!(balance.warnings.len(), 1);
        assert_eq!(balance.warnings[0].sample_id, "F 1");
        assert_eq!(balance.warnings[0].missing.len(), 9);
        assert!(!balance.warnings[0].missing.contains(&"Ca [mg/L]".to_string()));
    }

    #[test]
    fn applies_to_every_sample_type() {
        let config = AnalysisConfig::default();
        let df = sample_frame(Some(20.0), Some(10.0), Some(1.0));
        let frame = IonBalanceChecker::new(&config)
            .check(&df)
            .unwrap()
            .to_frame("Sample ID")
            .unwrap();
        assert_eq!(frame.height(), 1);
        assert_eq!(
            frame.get_column_names_str(),
            vec![
                "Sample ID",
                "sum anions [mEq/L]",
                "sum cations [mEq/L]",
                "an/cat_diff%"
            ]
        );
    }

    #[test]
    fn absent_ion_columns_count_as_missing() {
        let config = AnalysisConfig::default();
        let df = DataFrame::new(vec![
            Column::new("Sample ID".into(), &["F 1"]),
            Column::new("Ca [mg/L]".into(), &[40.0]),
            Column::new("Cl [mg/L]".into(), &[35.45]),
        ])
        .unwrap();
        let balance = IonBalanceChecker::new(&config).check(&df).unwrap();
        assert_eq!(balance.sum_anions[0], None);
        assert_eq!(balance.sum_cations[0], None);
        assert_eq!(balance.difference_pct[0], None);
        assert_eq!(balance.warnings.len(), 1);
        let missing = &balance.warnings[0].missing;
        assert_eq!(missing.len(), 9);
        assert!(missing.contains(&"Alk [mg/L]".to_string()));
        assert!(!missing.contains(&"Cl [mg/L]".to_string()));
    }

    #[test]
    fn only_calcium_and_chloride_with_zero_elsewhere() {
        let config = AnalysisConfig::default();
        let df = sample_frame(Some(40.0), Some(35.45), Some(0.0))
            .drop("K [mg/L]")
            .unwrap();
        let balance = IonBalanceChecker::new(&config).check(&df).unwrap();
        assert_eq!(balance.sum_cations[0], None);
        assert!((balance.sum_anions[0].unwrap() - 35.45 * 0.02821).abs() < 1e-9);
        assert_eq!(balance.warnings[0].missing, vec!["K [mg/L]".to_string()]);
    }
}
