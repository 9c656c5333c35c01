mod common;

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};

use common::MemoryBackend;
use lvis_grid::canopy::{annotate, AnnotateOptions, CC_FIELD, LVIS_L2B_HEADER};
use lvis_grid::pipeline::{GridConfig, GridMode, Pipeline};
use lvis_grid::report::Reporter;
use lvis_grid::table::{read_shot_table, FieldValue};

fn l2b_line(shot: u32, lon: f64, lat: f64, rh: &[f64; 23]) -> String {
    let mut fields = vec![
        "1001".to_string(),
        shot.to_string(),
        "53712.25".to_string(),
        lon.to_string(),
        lat.to_string(),
        "410.2".to_string(),
        lon.to_string(),
        lat.to_string(),
        "432.7".to_string(),
    ];
    fields.extend(rh.iter().map(|h| format!("{h:.2}")));
    fields.extend(["88.1", "2.4", "10123.5", "0.41", "2", "2", "2"].map(String::from));
    fields.join(" ")
}

fn l2b_file() -> String {
    let mut low = [0.2; 23];
    low[22] = 0.5;
    let mut tall = [12.0; 23];
    tall[..4].copy_from_slice(&[0.1, 0.4, 0.8, 1.2]);

    format!(
        "# LVIS L2B version 2.0.2\n{LVIS_L2B_HEADER}\n{}\n{}\n",
        l2b_line(1, 240.015, 45.085, &tall),
        l2b_line(2, 240.030, 45.085, &low),
    )
}

#[test]
fn annotated_file_reads_back_as_table() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("LVIS2_sample.TXT");
    let output = dir.path().join("LVIS2_sample_cc.TXT");
    fs::write(&input, l2b_file()).unwrap();

    let mut reporter = Reporter::new("LVIS2_sample");
    let summary = annotate(
        BufReader::new(File::open(&input).unwrap()),
        BufWriter::new(File::create(&output).unwrap()),
        &AnnotateOptions::default(),
        &mut reporter,
    )
    .unwrap();
    assert_eq!(summary.records, 2);
    assert!(reporter.warnings().is_empty());

    let table = read_shot_table(BufReader::new(File::open(&output).unwrap()), None).unwrap();
    let cc = table.column_index(CC_FIELD).unwrap();
    assert_eq!(cc, table.columns.len() - 1);
    // Tall shot crosses at RH30, the low one never does.
    assert_eq!(table.records[0][cc], FieldValue::Real(70.0));
    assert_eq!(table.records[1][cc], FieldValue::Real(1.0));
}

#[test]
fn canopy_cover_can_be_gridded() {
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("LVIS2_sample.TXT");
    let annotated = dir.path().join("LVIS2_sample_cc.TXT");
    fs::write(&raw, l2b_file()).unwrap();

    let mut reporter = Reporter::new("LVIS2_sample");
    annotate(
        BufReader::new(File::open(&raw).unwrap()),
        BufWriter::new(File::create(&annotated).unwrap()),
        &AnnotateOptions::default(),
        &mut reporter,
    )
    .unwrap();

    let config = GridConfig::new(
        annotated,
        dir.path().join("cc_grid.gpkg"),
        GridMode::Template {
            path: dir.path().join("template.tif"),
        },
        vec![CC_FIELD.into()],
    );
    let backend = MemoryBackend::with_template();
    let outcome = Pipeline::standard()
        .run(&config, &backend, &mut reporter)
        .unwrap();
    assert_eq!(outcome.cells, 2);

    let layer = backend.vector(&config.output).unwrap();
    let value = |i: usize| layer.features[i].values.last().and_then(FieldValue::as_f64).unwrap();
    assert!((value(0) - 35.5).abs() < 1e-9);
    assert!((value(1) - 1.0).abs() < 1e-9);
}
