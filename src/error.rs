//! Export error taxonomy.

use thiserror::Error;

/// Errors that abort an export.
///
/// Recoverable conditions (a bookmark whose page index overshoots the rendered
/// document, a notebook without headings) never surface here; the finisher
/// handles them and reports them through [`crate::finish::FinishSummary`].
#[derive(Error, Debug)]
pub enum ExportError {
    /// The browser failed to launch, navigate, evaluate, or print.
    #[error("render failed: {0}")]
    Render(String),

    /// The raw PDF could not be parsed, assembled, or written.
    #[error("PDF assembly failed: {0}")]
    Assembly(String),

    #[error("no usable browser found: {0}")]
    BrowserNotFound(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// The render pool was shut down before or while the task ran.
    #[error("render worker is shut down")]
    WorkerShutdown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<lopdf::Error> for ExportError {
    fn from(err: lopdf::Error) -> Self {
        ExportError::Assembly(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ExportError>;

/// Shorthand for building an [`ExportError::Render`].
pub(crate) fn render_err(message: impl Into<String>) -> ExportError {
    ExportError::Render(message.into())
}
