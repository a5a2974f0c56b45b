//! Local meteoric water line and the deuterium deviation from it.

use polars::prelude::*;

use crate::config::MeteoricWaterLineConfig;
use crate::error::Result;
use crate::schema::{derived, isotope};
use crate::table;

/// `δ²H = slope · δ¹⁸O + intercept`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeteoricWaterLine {
    pub slope: f64,
    pub intercept: f64,
}

impl From<MeteoricWaterLineConfig> for MeteoricWaterLine {
    fn from(config: MeteoricWaterLineConfig) -> Self {
        Self {
            slope: config.slope,
            intercept: config.intercept,
        }
    }
}

impl MeteoricWaterLine {
    pub fn d2h(&self, d18o: f64) -> f64 {
        self.slope * d18o + self.intercept
    }

    /// Measured δ²H minus the line's prediction. Positive above the line.
    pub fn deviation(&self, d18o: f64, d2h: f64) -> f64 {
        d2h - self.d2h(d18o)
    }

    /// Deviation column for a table carrying both isotope columns, `None`
    /// when either column is absent.
    pub fn deviation_column(&self, df: &DataFrame) -> Result<Option<Column>> {
        let schema = df.schema();
        if !schema.contains(isotope::D_O18) || !schema.contains(isotope::D_D) {
            return Ok(None);
        }
        let o18 = table::numeric_column(df, isotope::D_O18)?;
        let dd = table::numeric_column(df, isotope::D_D)?;
        let values: Vec<Option<f64>> = o18
            .iter()
            .zip(&dd)
            .map(|(o, d)| match (o, d) {
                (Some(o), Some(d)) => Some(self.deviation(*o, *d)),
                _ => None,
            })
            .collect();
        Ok(Some(Column::new(derived::LMWL_DEVIATION.into(), &values)))
    }
}
