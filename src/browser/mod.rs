//! Renderer Adapter
//!
//! Turns an HTML file into a PDF whose single virtual page spans the whole
//! document, and measures the headings on the live page before it closes.
//!
//! [`DocumentRenderer`] is the seam: [`chrome::ChromeRenderer`] drives a
//! headless Chromium over the DevTools protocol, and tests substitute
//! renderers that synthesize PDFs.

pub mod cdp;
pub mod chrome;
pub mod detect;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::ExportConfig;
use crate::error::Result;
use crate::heading::HeadingRecord;

pub use chrome::ChromeRenderer;

/// Stylesheet injected before printing.
///
/// Drops the notebook container chrome and asks the engine not to split cells
/// or outputs across pages. The break hints are advisory; an element taller
/// than a page still splits.
pub const PRINT_OVERRIDE_CSS: &str = r"
#notebook-container {
    box-shadow: none;
    padding: unset
}
div.cell {
    page-break-inside: avoid;
}
div.output_wrapper {
    page-break-inside: avoid;
}
div.output {
    page-break-inside: avoid;
}
.jp-Cell-inputWrapper {
    page-break-inside: avoid;
}
.jp-Cell-outputWrapper {
    page-break-inside: avoid;
}
.jp-Notebook {
    margin: 0px;
}
#MathJax_Message {
    display: none;
}
";

/// Everything a renderer needs for one document.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    /// Absolute path of the HTML to load.
    pub html_path: PathBuf,
    /// Where the raw PDF is written.
    pub pdf_path: PathBuf,
    pub launch_args: Vec<String>,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub page_ceiling_pt: f64,
    pub pixel_scale: f64,
    pub navigation_timeout: Duration,
    pub launch_timeout: Duration,
}

impl RenderRequest {
    pub fn new(html_path: PathBuf, pdf_path: PathBuf, config: &ExportConfig) -> Self {
        Self {
            html_path,
            pdf_path,
            launch_args: config.launch_args(),
            viewport_width: config.viewport_width,
            viewport_height: config.viewport_height,
            page_ceiling_pt: config.page_ceiling_pt,
            pixel_scale: config.pixel_scale,
            navigation_timeout: config.navigation_timeout(),
            launch_timeout: config.launch_timeout(),
        }
    }
}

/// What a render reports back once the PDF is on disk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderOutput {
    /// In document order, as the page listed them.
    pub headings: Vec<HeadingRecord>,
    pub scroll_width_px: f64,
    pub scroll_height_px: f64,
    /// Paper size sent to the engine, in points.
    pub paper_width_pt: f64,
    pub paper_height_pt: f64,
}

/// Something that can print HTML to PDF and measure headings on the way.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// Render `request.html_path` into `request.pdf_path`.
    ///
    /// Any launch, navigation, or print failure is an
    /// [`ExportError::Render`](crate::error::ExportError::Render); nothing is
    /// retried.
    async fn render(&self, request: &RenderRequest) -> Result<RenderOutput>;
}
