//! Read a finished PDF back: page geometry, bookmarks, attachments.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use lopdf::{Dictionary, Document as LoDocument, Object as LoObject, ObjectId as LoObjectId};
use serde::Serialize;

use crate::error::{ExportError, Result};
use crate::finish::{decode_text_string, number, page_heights, resolve};

/// Name trees and outline chains deeper than this are treated as corrupt.
const MAX_TREE_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutlineEntry {
    pub title: String,
    /// 0 for top-level entries.
    pub depth: usize,
    pub page_index: Option<usize>,
    /// Destination `y` in default user space.
    pub y: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachmentEntry {
    pub name: String,
    pub size: usize,
    #[serde(skip)]
    pub contents: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PdfReport {
    pub pdf_version: String,
    pub page_count: usize,
    pub page_heights: Vec<f64>,
    /// Depth-first, in viewer order.
    pub outline: Vec<OutlineEntry>,
    pub attachments: Vec<AttachmentEntry>,
}

pub fn inspect_pdf_bytes(bytes: &[u8]) -> Result<PdfReport> {
    let doc = LoDocument::load_mem(bytes)
        .map_err(|e| ExportError::Assembly(format!("cannot parse PDF: {e}")))?;
    inspect_document(&doc)
}

pub fn inspect_pdf_path(path: &Path) -> Result<PdfReport> {
    let data = std::fs::read(path)?;
    inspect_pdf_bytes(&data)
}

pub fn inspect_document(doc: &LoDocument) -> Result<PdfReport> {
    let page_ids: Vec<LoObjectId> = doc.get_pages().values().copied().collect();
    let page_index: BTreeMap<LoObjectId, usize> =
        page_ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let catalog = catalog(doc)?;

    Ok(PdfReport {
        pdf_version: doc.version.clone(),
        page_count: page_ids.len(),
        page_heights: page_heights(doc),
        outline: read_outline(doc, catalog, &page_index),
        attachments: read_attachments(doc, catalog),
    })
}

fn catalog(doc: &LoDocument) -> Result<&Dictionary> {
    let root = doc
        .trailer
        .get(b"Root")
        .and_then(LoObject::as_reference)
        .map_err(|e| ExportError::Assembly(format!("PDF has no catalog: {e}")))?;
    Ok(doc.get_object(root).and_then(LoObject::as_dict)?)
}

fn read_outline(
    doc: &LoDocument,
    catalog: &Dictionary,
    page_index: &BTreeMap<LoObjectId, usize>,
) -> Vec<OutlineEntry> {
    let mut entries = Vec::new();
    let Ok(outlines) = catalog.get(b"Outlines").map(|o| resolve(doc, o)) else {
        return entries;
    };
    let Ok(outlines) = outlines.as_dict() else {
        return entries;
    };
    if let Ok(first) = outlines.get(b"First").and_then(LoObject::as_reference) {
        let mut visited = HashSet::new();
        walk_outline(doc, first, 0, page_index, &mut visited, &mut entries);
    }
    entries
}

fn walk_outline(
    doc: &LoDocument,
    first: LoObjectId,
    depth: usize,
    page_index: &BTreeMap<LoObjectId, usize>,
    visited: &mut HashSet<LoObjectId>,
    entries: &mut Vec<OutlineEntry>,
) {
    if depth > MAX_TREE_DEPTH {
        return;
    }
    let mut current = Some(first);
    while let Some(id) = current {
        if !visited.insert(id) {
            break;
        }
        let Ok(item) = doc.get_object(id).and_then(LoObject::as_dict) else {
            break;
        };
        let title = match item.get(b"Title").map(|o| resolve(doc, o)) {
            Ok(LoObject::String(bytes, _)) => decode_text_string(bytes),
            _ => String::new(),
        };
        let (page, y) = destination(doc, item, page_index);
        entries.push(OutlineEntry {
            title,
            depth,
            page_index: page,
            y,
        });
        if let Ok(child) = item.get(b"First").and_then(LoObject::as_reference) {
            walk_outline(doc, child, depth + 1, page_index, visited, entries);
        }
        current = item.get(b"Next").and_then(LoObject::as_reference).ok();
    }
}

/// Page index and `y` of an item's `/Dest` (or `/A /D` for `GoTo` actions).
fn destination(
    doc: &LoDocument,
    item: &Dictionary,
    page_index: &BTreeMap<LoObjectId, usize>,
) -> (Option<usize>, Option<f64>) {
    let dest = item.get(b"Dest").map(|o| resolve(doc, o)).or_else(|_| {
        item.get(b"A")
            .map(|a| resolve(doc, a))
            .and_then(LoObject::as_dict)
            .and_then(|action| action.get(b"D"))
            .map(|d| resolve(doc, d))
    });
    let Ok(LoObject::Array(parts)) = dest else {
        return (None, None);
    };
    let page = parts
        .first()
        .and_then(|p| p.as_reference().ok())
        .and_then(|id| page_index.get(&id).copied());
    let y = match parts.get(1).map(LoObject::as_name) {
        Some(Ok(b"XYZ")) => parts.get(3).and_then(number),
        _ => None,
    };
    (page, y)
}

fn read_attachments(doc: &LoDocument, catalog: &Dictionary) -> Vec<AttachmentEntry> {
    let mut attachments = Vec::new();
    let tree = catalog
        .get(b"Names")
        .map(|n| resolve(doc, n))
        .and_then(LoObject::as_dict)
        .and_then(|names| names.get(b"EmbeddedFiles"))
        .map(|e| resolve(doc, e))
        .and_then(LoObject::as_dict);
    if let Ok(tree) = tree {
        walk_name_tree(doc, tree, 0, &mut attachments);
    }
    attachments
}

fn walk_name_tree(
    doc: &LoDocument,
    node: &Dictionary,
    depth: usize,
    out: &mut Vec<AttachmentEntry>,
) {
    if depth > MAX_TREE_DEPTH {
        return;
    }
    if let Ok(pairs) = node.get(b"Names").map(|n| resolve(doc, n)).and_then(LoObject::as_array) {
        for pair in pairs.chunks_exact(2) {
            let Ok(filespec) = resolve(doc, &pair[1]).as_dict() else {
                continue;
            };
            if let Some(entry) = read_filespec(doc, &pair[0], filespec) {
                out.push(entry);
            }
        }
    }
    if let Ok(kids) = node.get(b"Kids").map(|k| resolve(doc, k)).and_then(LoObject::as_array) {
        for kid in kids {
            if let Ok(kid) = resolve(doc, kid).as_dict() {
                walk_name_tree(doc, kid, depth + 1, out);
            }
        }
    }
}

fn read_filespec(doc: &LoDocument, key: &LoObject, filespec: &Dictionary) -> Option<AttachmentEntry> {
    let name = [b"UF".as_slice(), b"F".as_slice()]
        .iter()
        .find_map(|k| match filespec.get(k).map(|o| resolve(doc, o)) {
            Ok(LoObject::String(bytes, _)) => Some(decode_text_string(bytes)),
            _ => None,
        })
        .or_else(|| match resolve(doc, key) {
            LoObject::String(bytes, _) => Some(decode_text_string(bytes)),
            _ => None,
        })?;
    let stream = filespec
        .get(b"EF")
        .map(|ef| resolve(doc, ef))
        .and_then(LoObject::as_dict)
        .and_then(|ef| ef.get(b"F"))
        .map(|f| resolve(doc, f))
        .and_then(LoObject::as_stream)
        .ok()?;
    let contents = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());
    Some(AttachmentEntry {
        name,
        size: contents.len(),
        contents,
    })
}
