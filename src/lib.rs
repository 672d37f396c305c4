//! `nbpdf` - Notebook HTML to bookmarked PDF
//!
//! # Features
//!
//! - **Single tall page**: the notebook prints as one continuous page, cut
//!   only where viewers demand it (200 inches)
//! - **Bookmarks**: `h1`/`h2` headings become outline entries pointing at the
//!   exact spot on the right page
//! - **Round trip**: the source notebook travels inside the PDF as an
//!   embedded file
//!
//! # Example
//!
//! ```rust,no_run
//! use nbpdf::{ExportConfig, NotebookSource, PdfExporter, Resources};
//!
//! fn main() -> anyhow::Result<()> {
//!     let html = std::fs::read_to_string("analysis.html")?;
//!     let notebook = NotebookSource::new("analysis", std::fs::read("analysis.ipynb")?);
//!     let exporter = PdfExporter::new(ExportConfig::load()?);
//!     let output = exporter.from_notebook(&html, &notebook, Resources::default())?;
//!     std::fs::write("analysis.pdf", &output.bytes)?;
//!     Ok(())
//! }
//! ```

pub mod browser;
pub mod config;
pub mod error;
pub mod export;
pub mod finish;
pub mod heading;
pub mod inspect;
pub mod mapping;
pub mod worker;

pub use browser::{ChromeRenderer, DocumentRenderer, RenderOutput, RenderRequest};
pub use config::ExportConfig;
pub use error::{ExportError, Result};
pub use export::{ExportOutput, NotebookSource, PdfExporter, Resources};
pub use finish::{finish, FinishSummary, OutlineStyle, SourceAttachment};
pub use heading::{HeadingLevel, HeadingRecord};
pub use inspect::{inspect_pdf_bytes, inspect_pdf_path, PdfReport};
pub use mapping::{map_headings, MappedHeading, PageLayout};

/// Version of nbpdf
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
