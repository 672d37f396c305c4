//! Export Orchestrator
//!
//! ```text
//! HTML ─→ render (worker pool) ─→ raw PDF + headings
//!      ─→ map_headings ─→ finish ─→ PDF bytes + resources
//! ```
//!
//! Everything written to disk lives in one scratch directory per export,
//! removed when the export returns, whether or not it succeeded.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::browser::{ChromeRenderer, DocumentRenderer, RenderOutput, RenderRequest};
use crate::config::ExportConfig;
use crate::error::Result;
use crate::finish::{finish_loaded, load_raw, page_heights, FinishSummary, SourceAttachment};
use crate::heading::sort_by_offset;
use crate::mapping::{map_headings, PageLayout};
use crate::worker;

pub const PDF_MIMETYPE: &str = "application/pdf";

const HTML_FILE: &str = "notebook.html";
const RAW_PDF_FILE: &str = "notebook.pdf";
const FINISHED_PDF_FILE: &str = "output-with-attachment.pdf";

/// Paper height drift tolerated before it is worth a warning.
const PAPER_TOLERANCE_PT: f64 = 1.0;

/// The notebook being exported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotebookSource {
    /// Logical name, without extension. Names the attachment.
    pub name: String,
    /// Serialized notebook, embedded byte for byte.
    pub contents: Vec<u8>,
}

impl NotebookSource {
    pub fn new(name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            contents: contents.into(),
        }
    }
}

/// Metadata passed alongside an export, as the host conversion framework
/// sees it. Unknown keys are carried through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_extension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipywidgets_base_url: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportOutput {
    pub bytes: Vec<u8>,
    pub mimetype: &'static str,
    pub resources: Resources,
    pub summary: FinishSummary,
}

/// Converts notebook HTML into a bookmarked PDF with the notebook attached.
pub struct PdfExporter {
    config: ExportConfig,
    renderer: Arc<dyn DocumentRenderer>,
}

impl PdfExporter {
    /// Exporter backed by a headless Chromium.
    pub fn new(config: ExportConfig) -> Self {
        let renderer = Arc::new(ChromeRenderer::from_config(&config));
        Self { config, renderer }
    }

    pub fn with_renderer(config: ExportConfig, renderer: Arc<dyn DocumentRenderer>) -> Self {
        Self { config, renderer }
    }

    /// Fill in the resource keys every export sets.
    pub fn prepare_resources(&self, mut resources: Resources) -> Resources {
        if resources
            .ipywidgets_base_url
            .as_deref()
            .map_or(true, str::is_empty)
        {
            resources.ipywidgets_base_url = Some(self.config.ipywidgets_base_url.clone());
        }
        resources.output_extension = Some(".pdf".to_string());
        resources
    }

    /// Export `html`, the rendered form of `notebook`.
    ///
    /// Blocks until done. Safe to call from inside an async runtime; the
    /// browser work runs on the shared render pool.
    #[instrument(skip_all, fields(notebook = %notebook.name))]
    pub fn from_notebook(
        &self,
        html: &str,
        notebook: &NotebookSource,
        resources: Resources,
    ) -> Result<ExportOutput> {
        self.config.validate()?;
        let resources = self.prepare_resources(resources);

        let mut scratch = tempfile::Builder::new();
        scratch.prefix("nbpdf-").suffix("nb-as-pdf");
        let scratch = match &self.config.temp_dir {
            Some(parent) => scratch.tempdir_in(parent)?,
            None => scratch.tempdir()?,
        };
        debug!("Scratch directory {}", scratch.path().display());

        let html_path = scratch.path().join(HTML_FILE);
        std::fs::write(&html_path, html)?;

        let request = RenderRequest::new(html_path, scratch.path().join(RAW_PDF_FILE), &self.config);
        let renderer = Arc::clone(&self.renderer);
        let task_request = request.clone();
        let rendered = worker::global()?
            .submit_and_wait(async move { renderer.render(&task_request).await })?;

        let raw = load_raw(&request.pdf_path)?;
        let layout = reconcile_layout(&rendered, page_heights(&raw), &self.config);
        let mut headings = rendered.headings;
        sort_by_offset(&mut headings);
        let mapped = map_headings(&headings, &layout);
        debug!("Mapped {} headings onto {} pages", mapped.len(), layout.page_count());

        let attachment = SourceAttachment {
            file_name: format!("{}{}", notebook.name, self.config.attachment_extension),
            contents: notebook.contents.clone(),
        };
        let finished = scratch.path().join(FINISHED_PDF_FILE);
        let summary = finish_loaded(raw, &finished, &attachment, &mapped, self.config.outline)?;
        let bytes = std::fs::read(&finished)?;

        info!(
            "Exported {} ({} bytes, {} pages, {} bookmarks)",
            notebook.name,
            bytes.len(),
            summary.pages,
            summary.outline_entries
        );
        Ok(ExportOutput {
            bytes,
            mimetype: PDF_MIMETYPE,
            resources,
            summary,
        })
    }
}

/// Layout of the pages the engine actually wrote.
///
/// Bookmarks are measured against `real_heights`; the geometry the renderer
/// reported only serves as a cross-check.
fn reconcile_layout(rendered: &RenderOutput, real_heights: Vec<f64>, config: &ExportConfig) -> PageLayout {
    let predicted = PageLayout::from_content_height(
        rendered.scroll_height_px,
        config.pixel_scale,
        config.page_ceiling_pt,
        config.bookmark_leeway_pt,
    );
    if predicted.page_count() != real_heights.len() {
        warn!(
            "Expected {} pages for a {} px document, the engine wrote {}",
            predicted.page_count(),
            rendered.scroll_height_px,
            real_heights.len()
        );
    }
    if let Some(first) = real_heights.first() {
        if (first - rendered.paper_height_pt).abs() > PAPER_TOLERANCE_PT {
            warn!(
                "Requested {:.1} pt paper, first page is {:.1} pt tall",
                rendered.paper_height_pt, first
            );
        }
    }
    debug!(
        "Rendered {}x{} px on {:.1}x{:.1} pt paper",
        rendered.scroll_width_px,
        rendered.scroll_height_px,
        rendered.paper_width_pt,
        rendered.paper_height_pt
    );
    PageLayout::with_page_heights(
        real_heights,
        config.pixel_scale,
        config.page_ceiling_pt,
        config.bookmark_leeway_pt,
    )
}

impl std::fmt::Debug for PdfExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfExporter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resources_get_extension_and_widget_url() {
        let exporter = PdfExporter::new(ExportConfig::default());
        let prepared = exporter.prepare_resources(Resources::default());
        assert_eq!(prepared.output_extension.as_deref(), Some(".pdf"));
        assert_eq!(prepared.ipywidgets_base_url.as_deref(), Some("https://unpkg.com/"));
    }

    #[test]
    fn caller_widget_url_is_kept_unless_empty() {
        let exporter = PdfExporter::new(ExportConfig::default());
        let custom = Resources {
            ipywidgets_base_url: Some("https://cdn.example/".to_string()),
            ..Resources::default()
        };
        assert_eq!(
            exporter.prepare_resources(custom).ipywidgets_base_url.as_deref(),
            Some("https://cdn.example/")
        );

        let empty = Resources {
            ipywidgets_base_url: Some(String::new()),
            ..Resources::default()
        };
        assert_eq!(
            exporter.prepare_resources(empty).ipywidgets_base_url.as_deref(),
            Some("https://unpkg.com/")
        );
    }

    #[test]
    fn unknown_resource_keys_round_trip() {
        let resources: Resources = serde_json::from_value(json!({
            "metadata": {"name": "nb"},
            "output_extension": ".html",
        }))
        .unwrap();
        assert_eq!(resources.output_extension.as_deref(), Some(".html"));
        assert_eq!(resources.extra["metadata"], json!({"name": "nb"}));
        let back = serde_json::to_value(&resources).unwrap();
        assert_eq!(back["metadata"]["name"], "nb");
        assert!(back.get("ipywidgets_base_url").is_none());
    }

    #[test]
    fn layout_uses_real_page_heights() {
        let rendered = RenderOutput {
            headings: Vec::new(),
            scroll_width_px: 994.0,
            scroll_height_px: 800.0,
            paper_width_pt: 745.5,
            paper_height_pt: 601.5,
        };
        let layout = reconcile_layout(&rendered, vec![612.0], &ExportConfig::default());
        assert_eq!(layout.page_heights(), &[612.0]);
        assert_eq!(layout.leeway_pt, 20.0);
    }

    #[test]
    fn invalid_config_fails_before_rendering() {
        let config = ExportConfig {
            pixel_scale: 0.0,
            ..ExportConfig::default()
        };
        let err = PdfExporter::new(config)
            .from_notebook("<html></html>", &NotebookSource::new("nb", "{}"), Resources::default())
            .unwrap_err();
        assert!(matches!(err, crate::error::ExportError::Config(_)));
    }
}
