//! End-to-end export with a fake renderer: mapping, finishing, and cleanup.

mod common;

use std::sync::Arc;

use common::FakeRenderer;
use nbpdf::inspect::inspect_pdf_bytes;
use nbpdf::{
    ExportConfig, ExportError, HeadingLevel, HeadingRecord, NotebookSource, OutlineStyle,
    PdfExporter, Resources,
};

const SCALE: f64 = 0.75;

/// 250 inches of content.
const TALL_DOCUMENT_PX: f64 = 250.0 * 72.0 / SCALE;

const NOTEBOOK_JSON: &str = r##"{"cells": [{"cell_type": "markdown", "source": ["# Intro"]}], "nbformat": 4}"##;

fn exporter(renderer: FakeRenderer, config: ExportConfig) -> PdfExporter {
    PdfExporter::with_renderer(config, Arc::new(renderer))
}

fn notebook() -> NotebookSource {
    NotebookSource::new("analysis", NOTEBOOK_JSON)
}

fn two_headings() -> Vec<HeadingRecord> {
    vec![
        HeadingRecord::new("Intro", HeadingLevel::Primary, 0.0),
        HeadingRecord::new("Details", HeadingLevel::Secondary, 220.0 * 72.0 / SCALE),
    ]
}

#[test]
fn tall_document_splits_and_bookmarks_land_on_both_pages() {
    let output = exporter(
        FakeRenderer::new(TALL_DOCUMENT_PX, two_headings()),
        ExportConfig::default(),
    )
    .from_notebook("<html></html>", &notebook(), Resources::default())
    .unwrap();

    let report = inspect_pdf_bytes(&output.bytes).unwrap();
    assert_eq!(report.page_count, 2);
    assert_eq!(report.page_heights, vec![14_400.0, 14_400.0]);

    assert_eq!(report.outline.len(), 2);
    assert_eq!(report.outline[0].title, "Intro");
    assert_eq!(report.outline[0].page_index, Some(0));
    // 14400 - 0 + 20, clamped to the page height
    assert_eq!(report.outline[0].y, Some(14_400.0));

    assert_eq!(report.outline[1].title, "∙ Details");
    assert_eq!(report.outline[1].page_index, Some(1));
    assert_eq!(report.outline[1].y, Some(14_400.0 - 20.0 * 72.0 + 20.0));

    assert_eq!(output.summary.pages, 2);
    assert_eq!(output.summary.outline_entries, 2);
    assert_eq!(output.summary.clamped_headings, 0);
}

#[test]
fn page_count_follows_content_height() {
    for inches in [10.0, 199.0, 201.0, 450.0] {
        let height_px = inches * 72.0 / SCALE;
        let output = exporter(FakeRenderer::new(height_px, Vec::new()), ExportConfig::default())
            .from_notebook("<html></html>", &notebook(), Resources::default())
            .unwrap();
        let report = inspect_pdf_bytes(&output.bytes).unwrap();
        let expected = ((inches * 72.0) / 14_400.0_f64).ceil() as usize;
        assert_eq!(report.page_count, expected, "{inches} in");
    }
}

#[test]
fn document_without_headings_has_empty_outline_and_one_attachment() {
    let output = exporter(FakeRenderer::new(800.0, Vec::new()), ExportConfig::default())
        .from_notebook("<html></html>", &notebook(), Resources::default())
        .unwrap();

    let report = inspect_pdf_bytes(&output.bytes).unwrap();
    assert!(report.outline.is_empty());
    assert_eq!(report.attachments.len(), 1);
    assert_eq!(output.summary.outline_entries, 0);
}

#[test]
fn attachment_is_byte_identical() {
    let output = exporter(
        FakeRenderer::new(TALL_DOCUMENT_PX, two_headings()),
        ExportConfig::default(),
    )
    .from_notebook("<html></html>", &notebook(), Resources::default())
    .unwrap();

    let report = inspect_pdf_bytes(&output.bytes).unwrap();
    assert_eq!(report.attachments[0].name, "analysis.ipynb");
    assert_eq!(report.attachments[0].contents, NOTEBOOK_JSON.as_bytes());
}

#[test]
fn output_carries_mimetype_and_resources() {
    let output = exporter(FakeRenderer::new(800.0, Vec::new()), ExportConfig::default())
        .from_notebook("<html></html>", &notebook(), Resources::default())
        .unwrap();

    assert_eq!(output.mimetype, "application/pdf");
    assert_eq!(output.resources.output_extension.as_deref(), Some(".pdf"));
    assert_eq!(
        output.resources.ipywidgets_base_url.as_deref(),
        Some("https://unpkg.com/")
    );
    assert!(output.bytes.starts_with(b"%PDF-"));
}

#[test]
fn bookmarks_keep_document_order() {
    let headings = vec![
        HeadingRecord::new("Third", HeadingLevel::Primary, 3000.0),
        HeadingRecord::new("First", HeadingLevel::Primary, 100.0),
        HeadingRecord::new("Second", HeadingLevel::Secondary, 1500.0),
    ];
    let output = exporter(FakeRenderer::new(4000.0, headings), ExportConfig::default())
        .from_notebook("<html></html>", &notebook(), Resources::default())
        .unwrap();

    let titles: Vec<String> = inspect_pdf_bytes(&output.bytes)
        .unwrap()
        .outline
        .into_iter()
        .map(|e| e.title)
        .collect();
    assert_eq!(titles, vec!["First", "∙ Second", "Third"]);
}

#[test]
fn missing_pages_clamp_to_last_page() {
    // Geometry predicts two pages; the engine only produced one
    let renderer = FakeRenderer::new(TALL_DOCUMENT_PX, two_headings()).with_pages(vec![14_400.0]);
    let output = exporter(renderer, ExportConfig::default())
        .from_notebook("<html></html>", &notebook(), Resources::default())
        .unwrap();

    let report = inspect_pdf_bytes(&output.bytes).unwrap();
    assert_eq!(report.page_count, 1);
    assert_eq!(output.summary.clamped_headings, 1);
    for entry in &report.outline {
        assert_eq!(entry.page_index, Some(0));
        let y = entry.y.unwrap();
        assert!((0.0..=14_400.0).contains(&y));
    }
}

#[test]
fn bookmark_height_follows_the_page_the_engine_wrote() {
    // 800 px predicts 601.5 pt paper; the engine printed a 612 pt page
    let headings = vec![HeadingRecord::new("Intro", HeadingLevel::Primary, 100.0)];
    let renderer = FakeRenderer::new(800.0, headings).with_pages(vec![612.0]);
    let output = exporter(renderer, ExportConfig::default())
        .from_notebook("<html></html>", &notebook(), Resources::default())
        .unwrap();

    let report = inspect_pdf_bytes(&output.bytes).unwrap();
    assert_eq!(report.page_heights, vec![612.0]);
    assert_eq!(report.outline[0].page_index, Some(0));
    assert_eq!(report.outline[0].y, Some(612.0 - 100.0 * SCALE + 20.0));
    assert_eq!(output.summary.clamped_headings, 0);
}

#[test]
fn nested_outline_puts_secondary_under_primary() {
    let config = ExportConfig {
        outline: OutlineStyle::Nested,
        ..ExportConfig::default()
    };
    let output = exporter(FakeRenderer::new(TALL_DOCUMENT_PX, two_headings()), config)
        .from_notebook("<html></html>", &notebook(), Resources::default())
        .unwrap();

    let outline = inspect_pdf_bytes(&output.bytes).unwrap().outline;
    assert_eq!(outline.len(), 2);
    assert_eq!((outline[0].title.as_str(), outline[0].depth), ("Intro", 0));
    assert_eq!((outline[1].title.as_str(), outline[1].depth), ("Details", 1));
}

#[test]
fn render_failure_propagates_and_cleans_up() {
    let scratch = tempfile::tempdir().unwrap();
    let config = ExportConfig {
        temp_dir: Some(scratch.path().to_path_buf()),
        ..ExportConfig::default()
    };
    let err = exporter(FakeRenderer::failing(), config)
        .from_notebook("<html></html>", &notebook(), Resources::default())
        .unwrap_err();

    assert!(matches!(err, ExportError::Render(_)));
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[test]
fn successful_export_cleans_up() {
    let scratch = tempfile::tempdir().unwrap();
    let config = ExportConfig {
        temp_dir: Some(scratch.path().to_path_buf()),
        ..ExportConfig::default()
    };
    exporter(FakeRenderer::new(800.0, two_headings()), config)
        .from_notebook("<html></html>", &notebook(), Resources::default())
        .unwrap();

    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[test]
fn concurrent_exports_do_not_interfere() {
    let handles: Vec<_> = (0..4)
        .map(|i| {
            std::thread::spawn(move || {
                let name = format!("nb{i}");
                let source = NotebookSource::new(name.clone(), format!("{{\"id\": {i}}}"));
                let output = exporter(FakeRenderer::new(800.0, Vec::new()), ExportConfig::default())
                    .from_notebook("<html></html>", &source, Resources::default())
                    .unwrap();
                let report = inspect_pdf_bytes(&output.bytes).unwrap();
                (name, report.attachments[0].name.clone(), report.attachments[0].contents.clone())
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let (name, attachment, contents) = handle.join().unwrap();
        assert_eq!(attachment, format!("{name}.ipynb"));
        assert_eq!(contents, format!("{{\"id\": {i}}}").into_bytes());
    }
}
