//! Column-name constants for the hydrochemical dataset.
//! Single source of truth - exported to Python via PyO3.

// ── Sample keys ─────────────────────────────────────────────────────────────
pub mod sample {
    pub const SAMPLE_ID: &str = "Sample ID";
    pub const TYPE: &str = "Type";
}

// ── Sample types ────────────────────────────────────────────────────────────
pub mod sample_type {
    pub const DEEP_TUBEWELL: &str = "deep tubewell";
    pub const SHALLOW_TUBEWELL: &str = "shallow tubewell";
    pub const VILLAGE_POND: &str = "village pond";
    pub const IRRIGATION_CANAL: &str = "irrigation canal";

    pub const GROUNDWATER: [&str; 2] = [DEEP_TUBEWELL, SHALLOW_TUBEWELL];
    pub const EXCLUDED: [&str; 2] = [VILLAGE_POND, IRRIGATION_CANAL];
}

// ── Derived columns ─────────────────────────────────────────────────────────
pub mod derived {
    pub const CLUSTER: &str = "cluster";
    pub const SUM_ANIONS: &str = "sum anions [mEq/L]";
    pub const SUM_CATIONS: &str = "sum cations [mEq/L]";
    pub const BALANCE_DIFF: &str = "an/cat_diff%";
    pub const LMWL_DEVIATION: &str = "dD LMWL deviation";

    /// Suffix appended to log-transformed variable names.
    pub const LOG_SUFFIX: &str = " log";
}

// ── Isotopes ────────────────────────────────────────────────────────────────
pub mod isotope {
    pub const D_O18: &str = "dO18";
    pub const D_D: &str = "dD";
}

// ── Factor analysis output tables ───────────────────────────────────────────
pub mod factor {
    pub const VARIABLE: &str = "variable";
    pub const STATISTIC: &str = "statistic";
    pub const SUM_SQUARED_LOADINGS: &str = "sum squared loadings";
    pub const PROPORTIONAL_VARIANCE: &str = "proportional variance";
    pub const CUMULATIVE_VARIANCE: &str = "cumulative variance";

    /// Factor column name, 1-based: `F1`, `F2`, ...
    pub fn name(index: usize) -> String {
        format!("F{}", index + 1)
    }
}

// ── Dendrogram linkage columns ──────────────────────────────────────────────
pub mod linkage {
    pub const LEFT: &str = "left";
    pub const RIGHT: &str = "right";
    pub const DISTANCE: &str = "distance";
    pub const SIZE: &str = "size";
}

// ── Summary tables ──────────────────────────────────────────────────────────
pub mod summary {
    pub const VARIABLE: &str = "variable";
    pub const COUNT: &str = "count";
    pub const MEAN: &str = "mean";
    pub const STD: &str = "std";
    pub const MIN: &str = "min";
    pub const Q25: &str = "25%";
    pub const MEDIAN: &str = "50%";
    pub const Q75: &str = "75%";
    pub const MAX: &str = "max";
}

// ── Censoring report ────────────────────────────────────────────────────────
pub mod censoring {
    pub const COLUMN: &str = "column";
    pub const CENSORED: &str = "censored";
    pub const OBSERVED: &str = "observed";
    pub const FRACTION: &str = "fraction";
}
