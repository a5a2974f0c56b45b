use std::collections::HashSet;

use hydrochem::config::{DetectionLimit, IonFactor, Sentinel};
use hydrochem::io::{self, TableFormat};
use hydrochem::{AnalysisConfig, Artifact, HydroError, Pipeline, SourceFiles, SourceTables};
use polars::prelude::*;

const METADATA: &str = "\
Sample ID;Type;depth [m]
F 1.1;deep tubewell;120
F 1.2;deep tubewell;95
F 2.1;shallow tubewell;30
F 2.2;shallow tubewell;25
F 3.1;deep tubewell;110
F 3.2;shallow tubewell;18
F 4.1;village pond;1
F 5.1;irrigation canal;2
F 6.1;village pond;1
";

const HYDROCHEMISTRY: &str = "\
Sample ID;pH;Cl [mg/L];Na [mg/L];Ca [mg/L];NO2 [mg/L];Ni [µg/L];Li [mg/L]
F 1.1;7.2;12.5;20.1;35.0;ND;1.2;ND
F 1.2;7.4;18.0;25.3;40.2;0.02;<0.000;ND
F 2.1;6.9;150.0;88.0;95.5;0.15;4.8;0.3
F 2.2;7.0;120.4;70.2;80.1;0.11;3.9;ND
F 3.1;7.6;9.8;30.5;28.3;ND;0.8;ND
F 3.2;6.8;210.0;95.0;120.0;0.25;6.1;0.2
F 4.1;8.1;45.0;30.0;50.0;0.05;2.0;ND
F 5.1;7.9;22.0;18.0;33.0;ND;<0.000;ND
";

const ISOTOPES: &str = "\
Sample ID;dO18;dD
F 1.1;-5.1;-33.0
F 1.2;-4.8;-31.2
F 2.1;-3.9;-27.5
F 2.2;-4.2;-29.0
F 3.1;-5.5;-36.1
F 4.1;-1.2;-12.0
";

fn study_config(n_factors: usize, n_clusters: usize) -> AnalysisConfig {
    AnalysisConfig {
        detection_limits: vec![
            DetectionLimit::new("NO2 [mg/L]", Sentinel::Text("ND".into()), 0.01),
            DetectionLimit::new("Ni [µg/L]", Sentinel::Text("<0.000".into()), 0.01),
        ],
        pruned_columns: vec!["Li [mg/L]".into()],
        overrides: vec![],
        catalog: [
            "pH",
            "Cl [mg/L]",
            "Na [mg/L]",
            "Ca [mg/L]",
            "NO2 [mg/L]",
            "Ni [µg/L]",
            "Li [mg/L]",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
        anions: vec![
            IonFactor::new("Cl [mg/L]", 0.02821),
            IonFactor::new("NO2 [mg/L]", 0.02174),
        ],
        cations: vec![
            IonFactor::new("Ca [mg/L]", 0.04990),
            IonFactor::new("Na [mg/L]", 0.04350),
        ],
        n_factors,
        n_clusters,
        ..Default::default()
    }
}

fn latin1(text: &str) -> Vec<u8> {
    text.chars().map(|c| c as u32 as u8).collect()
}

fn tables(metadata: &str, hydrochemistry: &str, isotopes: &str) -> SourceTables {
    SourceTables {
        metadata: io::parse_table(metadata.as_bytes().to_vec(), &TableFormat::default()).unwrap(),
        hydrochemistry: io::parse_table(latin1(hydrochemistry), &TableFormat::latin1(b';'))
            .unwrap(),
        isotopes: io::parse_table(latin1(isotopes), &TableFormat::latin1(b';')).unwrap(),
    }
}

fn study_tables() -> SourceTables {
    tables(METADATA, HYDROCHEMISTRY, ISOTOPES)
}

fn strings(df: &DataFrame, name: &str) -> Vec<Option<String>> {
    df.column(name)
        .unwrap()
        .str()
        .unwrap()
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect()
}

#[test]
fn pond_and_two_tubewells_single_factor_single_cluster() {
    let metadata = "Sample ID;Type\nP 1;village pond\nT 1;deep tubewell\nT 2;deep tubewell\n";
    let hydrochemistry = "\
Sample ID;pH;Cl [mg/L];Na [mg/L];Ca [mg/L];NO2 [mg/L];Ni [µg/L]
P 1;8.0;40.0;30.0;45.0;0.05;2.0
T 1;7.1;12.0;20.0;35.0;ND;1.1
T 2;7.5;30.0;45.0;60.0;0.04;<0.000
";
    let isotopes = "Sample ID;dO18;dD\nT 1;-5.0;-33.0\n";

    let mut config = study_config(1, 1);
    config.pruned_columns.clear();
    config.catalog.retain(|c| c != "Li [mg/L]");

    let results = Pipeline::new(config)
        .run(&tables(metadata, hydrochemistry, isotopes))
        .unwrap();
    let clusters = strings(&results.analysed, "cluster");
    assert_eq!(
        clusters,
        vec![
            Some("village pond".to_string()),
            Some("1".to_string()),
            Some("1".to_string())
        ]
    );
}

#[test]
fn every_metadata_sample_appears_once_in_order() {
    let results = Pipeline::new(study_config(2, 2))
        .run(&study_tables())
        .unwrap();
    let ids = strings(&results.merged, "Sample ID");
    let expected: Vec<Option<String>> = METADATA
        .lines()
        .skip(1)
        .map(|l| l.split(';').next().map(str::to_string))
        .collect();
    assert_eq!(ids, expected);
    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), ids.len());

    // F 6.1 has no laboratory row, F 3.2 no isotope row
    let na = results.merged.column("Na [mg/L]").unwrap().f64().unwrap();
    assert_eq!(na.get(8), None);
    let o18 = results.merged.column("dO18").unwrap().f64().unwrap();
    assert_eq!(o18.get(5), None);
    assert_eq!(o18.get(0), Some(-5.1));
}

#[test]
fn censored_values_are_substituted_and_pruned_columns_dropped() {
    let results = Pipeline::new(study_config(2, 2))
        .run(&study_tables())
        .unwrap();
    let no2 = results.merged.column("NO2 [mg/L]").unwrap().f64().unwrap();
    assert_eq!(no2.get(0), Some(0.005));
    assert_eq!(no2.get(1), Some(0.02));
    let ni = results.merged.column("Ni [µg/L]").unwrap().f64().unwrap();
    assert_eq!(ni.get(1), Some(0.005));
    assert!(results.merged.column("Li [mg/L]").is_err());

    let entry = results
        .censoring
        .entries
        .iter()
        .find(|e| e.column == "NO2 [mg/L]")
        .unwrap();
    assert_eq!(entry.censored, 3);
    assert_eq!(entry.observed, 8);
}

#[test]
fn transformed_matrix_is_standardized_over_groundwater() {
    let results = Pipeline::new(study_config(2, 2))
        .run(&study_tables())
        .unwrap();
    let m = &results.transformed;
    assert_eq!(
        m.sample_ids,
        vec!["F 1.1", "F 1.2", "F 2.1", "F 2.2", "F 3.1", "F 3.2"]
    );
    assert_eq!(m.columns[0], "pH");
    assert_eq!(m.columns[1], "Cl [mg/L] log");
    let n = m.nrows() as f64;
    for j in 0..m.ncols() {
        let column = m.values.column(j);
        let mean = column.sum() / n;
        let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        assert!(mean.abs() < 1e-6, "{} mean {mean}", m.columns[j]);
        assert!((var.sqrt() - 1.0).abs() < 1e-6, "{} std", m.columns[j]);
    }
}

#[test]
fn cumulative_variance_is_monotone_and_bounded() {
    let results = Pipeline::new(study_config(2, 2))
        .run(&study_tables())
        .unwrap();
    let variance = results.factor_model.variance();
    assert_eq!(variance.cumulative.len(), 2);
    assert!(variance.cumulative[0] <= variance.cumulative[1]);
    assert!(variance.cumulative[1] <= 1.0 + 1e-9);
}

#[test]
fn cluster_labels_are_complete() {
    let results = Pipeline::new(study_config(2, 2))
        .run(&study_tables())
        .unwrap();
    let types = strings(&results.analysed, "Type");
    let clusters = strings(&results.analysed, "cluster");
    for (t, c) in types.iter().zip(&clusters) {
        let t = t.as_deref().unwrap();
        let c = c.as_deref().unwrap();
        match t {
            "deep tubewell" | "shallow tubewell" => assert!(c == "1" || c == "2", "{c}"),
            _ => assert_eq!(c, t),
        }
    }
    assert_eq!(results.clusters.dendrogram.leaf_count(), 6);
    assert_eq!(results.clusters.dendrogram.merges().len(), 5);
}

#[test]
fn ion_balance_and_isotope_columns_join_the_analysed_table() {
    let results = Pipeline::new(study_config(2, 2))
        .run(&study_tables())
        .unwrap();
    let analysed = &results.analysed;
    let diff = analysed.column("an/cat_diff%").unwrap().f64().unwrap();
    assert!(diff.get(0).unwrap().is_finite());
    assert_eq!(diff.get(8), None);
    assert_eq!(results.ion_balance.warnings.len(), 1);
    assert_eq!(results.ion_balance.warnings[0].sample_id, "F 6.1");

    let deviation = analysed.column("dD LMWL deviation").unwrap().f64().unwrap();
    let expected = -33.0 - (7.15 * -5.1 + 2.60);
    assert!((deviation.get(0).unwrap() - expected).abs() < 1e-9);
    assert_eq!(deviation.get(5), None);
}

#[test]
fn summary_tables_cover_clusters_and_groundwater() {
    let results = Pipeline::new(study_config(2, 2))
        .run(&study_tables())
        .unwrap();
    let means = results.table(Artifact::ClusterMeans).unwrap();
    assert_eq!(
        means.get_column_names_str(),
        vec!["variable", "1", "2", "irrigation canal", "village pond"]
    );
    let overview = results.table(Artifact::Overview).unwrap();
    let variables = strings(&overview, "variable");
    assert!(variables.contains(&Some("dO18".to_string())));
    let count = overview.column("count").unwrap().f64().unwrap();
    let cl_row = variables
        .iter()
        .position(|v| v.as_deref() == Some("Cl [mg/L]"))
        .unwrap();
    assert_eq!(count.get(cl_row), Some(6.0));

    let corr = results.table(Artifact::Correlation).unwrap();
    assert!(corr.column("depth [m]").is_ok());
}

#[test]
fn non_positive_groundwater_value_aborts_the_run() {
    let hydrochemistry = HYDROCHEMISTRY.replace("F 1.1;7.2;12.5", "F 1.1;7.2;0");
    let err = Pipeline::new(study_config(2, 2))
        .run(&tables(METADATA, &hydrochemistry, ISOTOPES))
        .unwrap_err();
    assert!(matches!(
        err,
        HydroError::NonPositiveValue { ref sample_id, ref column, .. }
            if sample_id == "F 1.1" && column == "Cl [mg/L]"
    ));
}

#[test]
fn too_many_clusters_is_rejected() {
    let err = Pipeline::new(study_config(2, 7))
        .run(&study_tables())
        .unwrap_err();
    assert!(matches!(
        err,
        HydroError::ClusterConfig {
            requested: 7,
            available: 6
        }
    ));
}

#[test]
fn reads_source_files_and_writes_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let files = SourceFiles::in_dir(dir.path());
    std::fs::write(&files.metadata, METADATA).unwrap();
    std::fs::write(&files.hydrochemistry, latin1(HYDROCHEMISTRY)).unwrap();
    std::fs::write(&files.isotopes, latin1(ISOTOPES)).unwrap();

    let results = Pipeline::new(study_config(2, 2)).run_files(&files).unwrap();
    assert!(results.merged.column("Ni [µg/L]").is_ok());

    let out = dir.path().join("out");
    let written = results.write_all(&out).unwrap();
    assert_eq!(written.len(), Artifact::ALL.len());
    let analysed = io::read_written_table(out.join("analysed_dataset.csv")).unwrap();
    assert_eq!(analysed.height(), 9);
    assert_eq!(
        strings(&analysed, "cluster")[6].as_deref(),
        Some("village pond")
    );
}
