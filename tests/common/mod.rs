//! Shared fixtures: synthetic PDFs and a renderer that never starts a browser.

#![allow(dead_code)]

use std::path::Path;

use async_trait::async_trait;
use lopdf::{dictionary, Document, Object, Stream};
use nbpdf::browser::{DocumentRenderer, RenderOutput, RenderRequest};
use nbpdf::error::{ExportError, Result};
use nbpdf::mapping::paper_dimension_pt;
use nbpdf::HeadingRecord;

/// A PDF with one blank page per entry of `heights`, 612 pt wide.
pub fn pdf_with_pages(heights: &[f64]) -> Document {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
    let kids: Vec<Object> = heights
        .iter()
        .map(|h| {
            doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), Object::Real(*h as f32)],
                "Contents" => content_id,
                "Resources" => dictionary! {},
            })
            .into()
        })
        .collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => heights.len() as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc
}

pub fn write_pdf(path: &Path, heights: &[f64]) {
    pdf_with_pages(heights).save(path).expect("write test PDF");
}

/// What the fake renderer prints.
#[derive(Debug, Clone)]
pub enum FakePages {
    /// The pages a real engine would emit for the reported scroll height.
    Predicted,
    /// Exactly these page heights.
    Explicit(Vec<f64>),
}

/// Stands in for the browser: writes a blank PDF and reports fixed headings.
#[derive(Debug, Clone)]
pub struct FakeRenderer {
    pub scroll_height_px: f64,
    pub headings: Vec<HeadingRecord>,
    pub pages: FakePages,
    pub fail: bool,
}

impl FakeRenderer {
    pub fn new(scroll_height_px: f64, headings: Vec<HeadingRecord>) -> Self {
        Self {
            scroll_height_px,
            headings,
            pages: FakePages::Predicted,
            fail: false,
        }
    }

    pub fn with_pages(mut self, heights: Vec<f64>) -> Self {
        self.pages = FakePages::Explicit(heights);
        self
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(0.0, Vec::new())
        }
    }
}

#[async_trait]
impl DocumentRenderer for FakeRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderOutput> {
        assert!(request.html_path.exists(), "HTML is written before rendering");
        if self.fail {
            return Err(ExportError::Render("engine crashed".to_string()));
        }

        let paper_height_pt =
            paper_dimension_pt(self.scroll_height_px, request.pixel_scale, request.page_ceiling_pt);
        let heights = match &self.pages {
            FakePages::Predicted => {
                let content_pt = self.scroll_height_px * request.pixel_scale;
                let count = ((content_pt / paper_height_pt).ceil() as usize).max(1);
                vec![paper_height_pt; count]
            }
            FakePages::Explicit(heights) => heights.clone(),
        };
        write_pdf(&request.pdf_path, &heights);

        Ok(RenderOutput {
            headings: self.headings.clone(),
            scroll_width_px: 994.0,
            scroll_height_px: self.scroll_height_px,
            paper_width_pt: 994.0 * request.pixel_scale,
            paper_height_pt,
        })
    }
}
