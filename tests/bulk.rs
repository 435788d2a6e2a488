//! Bulk generation: per-row outcomes, files on disk, manifest.

use certiforge_core::{
    data::rows_from_file, hashing::sha256_hex, BulkReport, DataRow, DirFontResolver,
    DirTemplateStore, Generator, PipelineError, RenderError, RowOutcome,
};
use serde_json::{json, Value};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

fn bundled_fonts() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fonts")
}

fn row(pairs: &[(&str, &str)]) -> DataRow {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn layout() -> Value {
    json!({"fields": {
        "name": {"x": 320, "y": 60, "size": 40, "font": "DejaVuSans.ttf", "color": "#1a2b3c", "align": "center", "max_width": 500},
        "course": {"x": 320, "y": 140, "size": 24, "font": "DejaVuSans.ttf", "color": "#555", "align": "center"}
    }})
}

fn setup(layout: &Value) -> (tempfile::TempDir, Generator) {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("uploads/templates/course_completion");
    fs::create_dir_all(&folder).unwrap();
    image::RgbaImage::from_pixel(640, 240, image::Rgba([250, 248, 240, 255]))
        .save(folder.join("template.png"))
        .unwrap();
    fs::write(folder.join("default_layout.json"), layout.to_string()).unwrap();

    let generator = Generator::new(
        Arc::new(DirTemplateStore::new(
            dir.path().join("uploads/templates"),
            dir.path().join("templates_store"),
        )),
        Arc::new(DirFontResolver::new(dir.path().join("uploads/fonts"), bundled_fonts())),
        bundled_fonts().join("DejaVuSans.ttf"),
    );
    (dir, generator)
}

#[test]
fn bulk_mixes_rendered_and_rejected_rows() {
    let (dir, generator) = setup(&layout());
    let out = dir.path().join("output");
    let rows = vec![
        row(&[("name", "Alice"), ("course", "Rust 101")]),
        row(&[("name", "  "), ("course", "Rust 101")]),
        row(&[("name", "Bob")]),
        row(&[("name", "Carol"), ("course", "Systems"), ("unused", "x")]),
    ];

    let report = generator.generate_bulk("course_completion", &rows, &out).unwrap();
    assert_eq!(report.template_id, "course_completion");
    assert_eq!((report.rendered, report.rejected), (2, 2));
    assert_eq!(report.rows.iter().map(RowOutcome::row).collect::<Vec<_>>(), [1, 2, 3, 4]);

    match &report.rows[0] {
        RowOutcome::Rendered { file, sha256, .. } => {
            assert_eq!(file, "certificate_1.png");
            let bytes = fs::read(out.join(file)).unwrap();
            assert_eq!(&sha256_hex(&bytes), sha256);
            let decoded = image::load_from_memory(&bytes).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (640, 240));
        }
        other => panic!("row 1 should render, got {other:?}"),
    }
    assert_eq!(
        report.rows[1],
        RowOutcome::Rejected { row: 2, errors: vec!["Field 'name' is empty".to_string()] }
    );
    assert_eq!(
        report.rows[2],
        RowOutcome::Rejected { row: 3, errors: vec!["Missing field 'course' in data row".to_string()] }
    );
    assert!(!out.join("certificate_2.png").exists());
    assert!(out.join("certificate_4.png").exists());

    let manifest: Value = serde_json::from_str(&fs::read_to_string(out.join("results.json")).unwrap()).unwrap();
    assert_eq!(manifest["manifest_hash"], json!(report.manifest_hash));
    assert_eq!(manifest["rows"][1]["errors"][0], "Field 'name' is empty");
    assert_eq!(report.manifest_hash.len(), 64);
}

#[test]
fn bulk_manifest_verifies_after_reload() {
    let (dir, generator) = setup(&layout());
    let out = dir.path().join("output");
    let rows = vec![row(&[("name", "Alice"), ("course", "Rust 101")]), row(&[("name", "Bob")])];
    let report = generator.generate_bulk("course_completion", &rows, &out).unwrap();
    assert!(report.verify());

    let stored: BulkReport = serde_json::from_str(&fs::read_to_string(out.join("results.json")).unwrap()).unwrap();
    assert_eq!(stored.manifest_hash, report.manifest_hash);
    assert!(stored.verify());

    let mut tampered = stored.clone();
    tampered.rejected = 0;
    assert!(!tampered.verify());

    let mut tampered = stored;
    if let RowOutcome::Rejected { errors, .. } = &mut tampered.rows[1] {
        errors.clear();
    }
    assert!(!tampered.verify());
}

#[test]
fn bulk_from_semicolon_sheet() {
    let (dir, generator) = setup(&layout());
    let sheet = dir.path().join("attendees.csv");
    fs::write(
        &sheet,
        "\u{FEFF}Name ; Course\n Alice ; Rust 101\n ; \nBob;\n\"O'Neil; Dana\";Systems\n",
    )
    .unwrap();

    let rows = rows_from_file(&sheet).unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2]["name"], "O'Neil; Dana");

    let report = generator
        .generate_bulk("course_completion", &rows, &dir.path().join("output"))
        .unwrap();
    assert_eq!((report.rendered, report.rejected), (2, 1));
    assert_eq!(
        report.rows[1],
        RowOutcome::Rejected { row: 2, errors: vec!["Field 'course' is empty".to_string()] }
    );
}

#[test]
fn bulk_rows_match_single_validation() {
    let mut bad = layout();
    bad["fields"]["course"]["align"] = json!("justify");
    let (dir, generator) = setup(&bad);
    let rows = vec![row(&[("name", "Alice")]), row(&[("name", "Bob"), ("course", "Go")])];

    let report = generator
        .generate_bulk("course_completion", &rows, &dir.path().join("output"))
        .unwrap();
    assert_eq!(report.rendered, 0);
    for (outcome, data) in report.rows.iter().zip(&rows) {
        let single = generator.validate("course_completion", data).unwrap();
        match outcome {
            RowOutcome::Rejected { errors, .. } => assert_eq!(errors, &single),
            other => panic!("expected rejection, got {other:?}"),
        }
    }
}

#[test]
fn bulk_same_rows_same_job_hash() {
    let (dir, generator) = setup(&layout());
    let rows = vec![row(&[("name", "Alice"), ("course", "Rust 101")])];
    let first = generator.generate_bulk("course_completion", &rows, &dir.path().join("a")).unwrap();
    let second = generator.generate_bulk("course_completion", &rows, &dir.path().join("b")).unwrap();

    let job = |r: &RowOutcome| match r {
        RowOutcome::Rendered { job_hash, sha256, .. } => (job_hash.clone(), sha256.clone()),
        other => panic!("expected render, got {other:?}"),
    };
    assert_eq!(job(&first.rows[0]), job(&second.rows[0]));
    assert_ne!(first.batch_id, second.batch_id);
}

#[test]
fn bulk_without_background_fails_whole_batch() {
    let (dir, generator) = setup(&layout());
    fs::remove_file(dir.path().join("uploads/templates/course_completion/template.png")).unwrap();
    let result = generator.generate_bulk("course_completion", &[row(&[("name", "A")])], &dir.path().join("out"));
    assert!(matches!(result, Err(PipelineError::Render(RenderError::TemplateMissing(_)))));
}

#[test]
fn blank_layout_when_none_stored() {
    let (dir, generator) = setup(&layout());
    fs::remove_file(dir.path().join("uploads/templates/course_completion/default_layout.json")).unwrap();
    assert_eq!(generator.layout("course_completion").unwrap(), json!({"fields": {}}));
    let out = generator
        .generate_single("course_completion", &row(&[("name", "Alice")]))
        .unwrap();
    assert!(out.placements.is_empty());
}
