//! Document Finisher
//!
//! Turns the browser's raw PDF into the deliverable:
//!
//! ```text
//! raw PDF ─→ pages re-parented into a fresh document
//!        ─→ source notebook embedded as a document-level attachment
//!        ─→ one outline entry per heading, in reading order
//! ```

use std::path::Path;

use lopdf::{dictionary, Document as LoDocument, Object as LoObject, ObjectId as LoObjectId, StringFormat, Stream as LoStream};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ExportError, Result};
use crate::heading::HeadingLevel;
use crate::mapping::MappedHeading;

/// Attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE_PAGE_KEYS: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

/// Page trees deeper than this are treated as corrupt.
const MAX_TREE_DEPTH: usize = 64;

/// US Letter, used when a page declares no box at all.
const FALLBACK_PAGE_BOX: (f64, f64) = (0.0, 792.0);

/// Shape of the bookmark outline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutlineStyle {
    /// One level; secondary headings carry a bullet prefix.
    #[default]
    Flat,
    /// Secondary headings nest under the preceding primary heading.
    Nested,
}

/// The original notebook, embedded verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAttachment {
    pub file_name: String,
    pub contents: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FinishSummary {
    pub pages: usize,
    pub outline_entries: usize,
    /// Headings whose page index overshot the document and were moved to the
    /// last page.
    pub clamped_headings: usize,
}

/// Finish `raw_pdf` into `out_pdf`.
///
/// Fails without writing `out_pdf` when the raw PDF cannot be parsed.
pub fn finish(
    raw_pdf: &Path,
    out_pdf: &Path,
    attachment: &SourceAttachment,
    headings: &[MappedHeading],
    style: OutlineStyle,
) -> Result<FinishSummary> {
    finish_loaded(load_raw(raw_pdf)?, out_pdf, attachment, headings, style)
}

/// Parse the engine's output.
pub fn load_raw(raw_pdf: &Path) -> Result<LoDocument> {
    LoDocument::load(raw_pdf)
        .map_err(|e| ExportError::Assembly(format!("cannot parse {}: {e}", raw_pdf.display())))
}

/// Visible height of every page, in page order.
pub fn page_heights(doc: &LoDocument) -> Vec<f64> {
    doc.get_pages().values().map(|id| page_box(doc, *id).1).collect()
}

/// [`finish`] for a raw PDF that is already parsed.
pub fn finish_loaded(
    src: LoDocument,
    out_pdf: &Path,
    attachment: &SourceAttachment,
    headings: &[MappedHeading],
    style: OutlineStyle,
) -> Result<FinishSummary> {
    let (mut doc, summary) = finish_document(src, attachment, headings, style)?;
    doc.save(out_pdf).map_err(|e| {
        ExportError::Assembly(format!("cannot write {}: {e}", out_pdf.display()))
    })?;
    info!(
        "Finished PDF: {} pages, {} bookmarks, attachment {}",
        summary.pages, summary.outline_entries, attachment.file_name
    );
    Ok(summary)
}

/// In-memory variant of [`finish`].
pub fn finish_document(
    src: LoDocument,
    attachment: &SourceAttachment,
    headings: &[MappedHeading],
    style: OutlineStyle,
) -> Result<(LoDocument, FinishSummary)> {
    if src.is_encrypted() {
        return Err(ExportError::Assembly("raw PDF is encrypted".to_string()));
    }

    let mut doc = LoDocument::with_version(src.version.clone());
    let page_ids = append_pages(&mut doc, src)?;
    if page_ids.is_empty() {
        return Err(ExportError::Assembly("raw PDF has no pages".to_string()));
    }

    let pages_id = doc.new_object_id();
    for page_id in &page_ids {
        doc.get_object_mut(*page_id)
            .and_then(LoObject::as_dict_mut)?
            .set("Parent", pages_id);
    }
    let kids: Vec<LoObject> = page_ids.iter().map(|id| LoObject::Reference(*id)).collect();
    doc.objects.insert(
        pages_id,
        LoObject::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_ids.len() as i64,
        }),
    );

    let names = embed_attachment(&mut doc, attachment);

    let boxes: Vec<(f64, f64)> = page_ids.iter().map(|id| page_box(&doc, *id)).collect();
    let (nodes, clamped_headings) = outline_nodes(headings, &page_ids, &boxes, style);
    let outline_entries = count_nodes(&nodes);
    let outlines_id = write_outline(&mut doc, &nodes);

    let mut catalog = dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
        "Names" => names,
    };
    if let Some(outlines_id) = outlines_id {
        catalog.set("Outlines", outlines_id);
        catalog.set("PageMode", "UseOutlines");
    }
    let catalog_id = doc.add_object(catalog);
    let info_id = doc.add_object(dictionary! {
        "Producer" => LoObject::string_literal(format!("nbpdf {}", crate::VERSION)),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);

    doc.prune_objects();
    doc.renumber_objects();

    let summary = FinishSummary {
        pages: page_ids.len(),
        outline_entries,
        clamped_headings,
    };
    Ok((doc, summary))
}

/// Move every page of `src` into `dst`, in order. Returns the page ids as
/// numbered in `dst`.
///
/// Inherited attributes are copied onto each page first, because the source
/// page tree is discarded once the pages are re-parented.
fn append_pages(dst: &mut LoDocument, mut src: LoDocument) -> Result<Vec<LoObjectId>> {
    let start_id = dst.max_id + 1;
    src.renumber_objects_with(start_id);
    let page_ids: Vec<LoObjectId> = src.get_pages().values().copied().collect();

    for page_id in &page_ids {
        let inherited = inherited_attributes(&src, *page_id);
        if inherited.is_empty() {
            continue;
        }
        let page = src.get_object_mut(*page_id).and_then(LoObject::as_dict_mut)?;
        for (key, value) in inherited {
            page.set(key, value);
        }
    }

    if src.max_id > dst.max_id {
        dst.max_id = src.max_id;
    }
    dst.objects.extend(src.objects);
    debug!("Appended {} pages", page_ids.len());
    Ok(page_ids)
}

fn inherited_attributes(doc: &LoDocument, page_id: LoObjectId) -> Vec<(Vec<u8>, LoObject)> {
    let Ok(page) = doc.get_object(page_id).and_then(LoObject::as_dict) else {
        return Vec::new();
    };
    let mut missing: Vec<&[u8]> = INHERITABLE_PAGE_KEYS
        .iter()
        .copied()
        .filter(|key| !page.has(key))
        .collect();
    let mut found = Vec::new();
    let mut parent = page.get(b"Parent").and_then(LoObject::as_reference).ok();
    let mut depth = 0;

    while let Some(parent_id) = parent {
        if missing.is_empty() || depth > MAX_TREE_DEPTH {
            break;
        }
        depth += 1;
        let Ok(node) = doc.get_object(parent_id).and_then(LoObject::as_dict) else {
            break;
        };
        missing.retain(|key| match node.get(key) {
            Ok(value) => {
                found.push((key.to_vec(), value.clone()));
                false
            }
            Err(_) => true,
        });
        parent = node.get(b"Parent").and_then(LoObject::as_reference).ok();
    }
    found
}

fn embed_attachment(doc: &mut LoDocument, attachment: &SourceAttachment) -> lopdf::Dictionary {
    let size = i64::try_from(attachment.contents.len()).unwrap_or(i64::MAX);
    let file_id = doc.add_object(LoStream::new(
        dictionary! {
            "Type" => "EmbeddedFile",
            "Params" => dictionary! { "Size" => size },
        },
        attachment.contents.clone(),
    ));
    let filespec_id = doc.add_object(dictionary! {
        "Type" => "Filespec",
        "F" => text_string(&attachment.file_name),
        "UF" => text_string(&attachment.file_name),
        "EF" => dictionary! { "F" => file_id },
    });
    dictionary! {
        "EmbeddedFiles" => dictionary! {
            "Names" => vec![text_string(&attachment.file_name), filespec_id.into()],
        },
    }
}

/// Lower edge and height of a page's visible box (`CropBox`, else `MediaBox`),
/// inherited from the page tree when the page itself has none.
pub(crate) fn page_box(doc: &LoDocument, page_id: LoObjectId) -> (f64, f64) {
    for key in [b"CropBox".as_slice(), b"MediaBox".as_slice()] {
        let Some(value) = inherited_value(doc, page_id, key) else { continue };
        let Ok(rect) = value.as_array() else { continue };
        let coords: Vec<f64> = rect.iter().filter_map(|o| number(resolve(doc, o))).collect();
        if let [_, lly, _, ury] = coords[..] {
            return (lly.min(ury), (ury - lly).abs());
        }
    }
    FALLBACK_PAGE_BOX
}

fn inherited_value<'a>(doc: &'a LoDocument, page_id: LoObjectId, key: &[u8]) -> Option<&'a LoObject> {
    let mut node = doc.get_object(page_id).and_then(LoObject::as_dict).ok()?;
    for _ in 0..=MAX_TREE_DEPTH {
        if let Ok(value) = node.get(key) {
            return Some(resolve(doc, value));
        }
        let parent = node.get(b"Parent").and_then(LoObject::as_reference).ok()?;
        node = doc.get_object(parent).and_then(LoObject::as_dict).ok()?;
    }
    None
}

pub(crate) fn resolve<'a>(doc: &'a LoDocument, obj: &'a LoObject) -> &'a LoObject {
    match obj {
        LoObject::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

pub(crate) fn number(obj: &LoObject) -> Option<f64> {
    match obj {
        LoObject::Integer(i) => Some(*i as f64),
        LoObject::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

/// PDF text string: ASCII stays literal, anything else becomes UTF-16BE.
pub(crate) fn text_string(text: &str) -> LoObject {
    if text.is_ascii() {
        return LoObject::string_literal(text);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    LoObject::String(bytes, StringFormat::Hexadecimal)
}

pub(crate) fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|&b| char::from(b)).collect()
}

#[derive(Debug)]
struct OutlineNode {
    title: String,
    page_id: LoObjectId,
    y: f64,
    children: Vec<OutlineNode>,
}

/// Resolve headings against the real pages, in reading order.
fn outline_nodes(
    headings: &[MappedHeading],
    page_ids: &[LoObjectId],
    boxes: &[(f64, f64)],
    style: OutlineStyle,
) -> (Vec<OutlineNode>, usize) {
    let mut ordered: Vec<&MappedHeading> = headings.iter().collect();
    ordered.sort_by(|a, b| a.top_offset_px.total_cmp(&b.top_offset_px));

    let last_page = page_ids.len() - 1;
    let mut clamped = 0;
    let mut nodes: Vec<OutlineNode> = Vec::with_capacity(ordered.len());
    let mut seen_primary = false;

    for heading in ordered {
        let page_index = if heading.page_index > last_page {
            warn!(
                "Heading '{}' maps to page {} but the PDF has {} pages; using the last page",
                heading.text,
                heading.page_index,
                page_ids.len()
            );
            clamped += 1;
            last_page
        } else {
            heading.page_index
        };
        let (bottom, height) = boxes[page_index];
        let y = bottom + heading.y_from_page_bottom.clamp(0.0, height);

        let title = match style {
            OutlineStyle::Flat => heading.flat_title(),
            OutlineStyle::Nested => heading.text.clone(),
        };
        let node = OutlineNode {
            title,
            page_id: page_ids[page_index],
            y,
            children: Vec::new(),
        };

        match (style, heading.level) {
            (OutlineStyle::Nested, HeadingLevel::Secondary) if seen_primary => {
                if let Some(parent) = nodes.last_mut() {
                    parent.children.push(node);
                }
            }
            (_, level) => {
                seen_primary |= level == HeadingLevel::Primary;
                nodes.push(node);
            }
        }
    }
    (nodes, clamped)
}

fn count_nodes(nodes: &[OutlineNode]) -> usize {
    nodes.iter().map(|n| 1 + count_nodes(&n.children)).sum()
}

/// Write the outline tree. Returns the `/Outlines` root, or `None` when
/// there is nothing to bookmark.
fn write_outline(doc: &mut LoDocument, nodes: &[OutlineNode]) -> Option<LoObjectId> {
    if nodes.is_empty() {
        return None;
    }
    let root_id = doc.new_object_id();
    let (first, last, count) = write_outline_level(doc, nodes, root_id);
    doc.objects.insert(
        root_id,
        LoObject::Dictionary(dictionary! {
            "Type" => "Outlines",
            "First" => first,
            "Last" => last,
            "Count" => count,
        }),
    );
    Some(root_id)
}

/// Write one sibling chain under `parent`. Returns first id, last id, and the
/// number of visible descendants (every level is open).
fn write_outline_level(
    doc: &mut LoDocument,
    nodes: &[OutlineNode],
    parent: LoObjectId,
) -> (LoObjectId, LoObjectId, i64) {
    let ids: Vec<LoObjectId> = nodes.iter().map(|_| doc.new_object_id()).collect();
    let mut visible = 0;

    for (i, node) in nodes.iter().enumerate() {
        let mut item = dictionary! {
            "Title" => text_string(&node.title),
            "Parent" => parent,
            "Dest" => vec![
                LoObject::Reference(node.page_id),
                LoObject::Name(b"XYZ".to_vec()),
                LoObject::Integer(0),
                LoObject::Real(node.y as f32),
                LoObject::Null,
            ],
        };
        if i > 0 {
            item.set("Prev", ids[i - 1]);
        }
        if i + 1 < ids.len() {
            item.set("Next", ids[i + 1]);
        }
        let mut descendants = 0;
        if !node.children.is_empty() {
            let (first, last, count) = write_outline_level(doc, &node.children, ids[i]);
            item.set("First", first);
            item.set("Last", last);
            item.set("Count", count);
            descendants = count;
        }
        visible += 1 + descendants;
        doc.objects.insert(ids[i], LoObject::Dictionary(item));
    }

    (ids[0], ids[ids.len() - 1], visible)
}
