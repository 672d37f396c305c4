use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use nbpdf::{ExportConfig, NotebookSource, OutlineStyle, PdfExporter, Resources};

pub struct ConvertArgs {
    pub html: PathBuf,
    pub notebook: PathBuf,
    pub output: Option<PathBuf>,
    pub name: Option<String>,
    pub sandbox: bool,
    pub chrome: Option<PathBuf>,
    pub nested: bool,
    pub config: Option<PathBuf>,
}

pub fn cmd_convert(args: &ConvertArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => ExportConfig::from_path(path)?,
        None => ExportConfig::load()?,
    };
    if args.sandbox {
        config.no_sandbox = false;
    }
    if let Some(chrome) = &args.chrome {
        config.chrome_executable = Some(chrome.clone());
    }
    if args.nested {
        config.outline = OutlineStyle::Nested;
    }

    let html = std::fs::read_to_string(&args.html)
        .with_context(|| format!("failed to read {}", args.html.display()))?;
    let contents = std::fs::read(&args.notebook)
        .with_context(|| format!("failed to read {}", args.notebook.display()))?;
    let name = args
        .name
        .clone()
        .unwrap_or_else(|| notebook_name(&args.notebook));
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("{name}.pdf")));

    let exporter = PdfExporter::new(config);
    let result = exporter
        .from_notebook(&html, &NotebookSource::new(name, contents), Resources::default())
        .with_context(|| format!("failed to export {}", args.html.display()))?;

    std::fs::write(&output, &result.bytes)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!(
        "💾 Saved {} bytes to {} ({} pages, {} bookmarks)",
        result.bytes.len(),
        output.display(),
        result.summary.pages,
        result.summary.outline_entries
    );
    if result.summary.clamped_headings > 0 {
        println!(
            "⚠️  {} bookmarks pointed past the last page and were moved onto it",
            result.summary.clamped_headings
        );
    }
    Ok(())
}

fn notebook_name(path: &Path) -> String {
    path.file_stem()
        .map_or_else(|| "notebook".to_string(), |s| s.to_string_lossy().into_owned())
}
