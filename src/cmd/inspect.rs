use std::path::Path;

use anyhow::{Context, Result};

use nbpdf::inspect::inspect_pdf_path;

pub fn cmd_inspect(path: &Path, json: bool) -> Result<()> {
    let report =
        inspect_pdf_path(path).with_context(|| format!("failed to inspect {}", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("📄 {} (PDF {})", path.display(), report.pdf_version);
    println!("   Pages: {}", report.page_count);
    for (i, height) in report.page_heights.iter().enumerate() {
        println!("   Page {}: {height:.1} pt tall", i + 1);
    }

    println!("\n🔖 Bookmarks: {}", report.outline.len());
    for entry in &report.outline {
        let indent = "   ".repeat(entry.depth + 1);
        match (entry.page_index, entry.y) {
            (Some(page), Some(y)) => println!("{indent}{} → page {}, y {y:.1}", entry.title, page + 1),
            (Some(page), None) => println!("{indent}{} → page {}", entry.title, page + 1),
            _ => println!("{indent}{}", entry.title),
        }
    }

    println!("\n📎 Attachments: {}", report.attachments.len());
    for attachment in &report.attachments {
        println!("   {} ({} bytes)", attachment.name, attachment.size);
    }
    Ok(())
}
