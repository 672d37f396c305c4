//! Heading Locator
//!
//! The locator runs inside the rendered page: it collects every `h1` and `h2`
//! element in document order and reports its absolute top offset, found by
//! walking the `offsetParent` chain and summing `offsetTop - scrollTop`.
//!
//! The script is an opaque expression handed to the renderer's evaluation
//! capability; only the decoded [`HeadingRecord`]s cross back into Rust.

use serde::{Deserialize, Serialize};

use crate::error::{render_err, Result};

/// Prefix for secondary headings in a flat outline.
///
/// A flat bookmark list with a textual hint stands in for real nesting; see
/// [`crate::finish::OutlineStyle`] for the nested alternative.
pub const SECONDARY_MARKER: &str = "∙ ";

/// Expression evaluated in the page. Yields `[{level, top, text}]`.
pub const LOCATOR_SCRIPT: &str = r#"(() => {
    function absoluteTop(el) {
        let y = 0;
        while (el && !isNaN(el.offsetLeft) && !isNaN(el.offsetTop)) {
            y += el.offsetTop - el.scrollTop;
            el = el.offsetParent;
        }
        return y;
    }
    const headings = [];
    for (const el of document.querySelectorAll("h1, h2")) {
        headings.push({
            level: el.tagName === "H1" ? 1 : 2,
            top: absoluteTop(el),
            text: el.innerText,
        });
    }
    return headings;
})()"#;

/// Heading tier. Only two tiers take part in the outline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeadingLevel {
    Primary,
    Secondary,
}

impl HeadingLevel {
    fn from_tag_level(level: u8) -> Result<Self> {
        match level {
            1 => Ok(Self::Primary),
            2 => Ok(Self::Secondary),
            other => Err(render_err(format!("unexpected heading level {other}"))),
        }
    }
}

/// One heading measured in the rendered page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadingRecord {
    pub text: String,
    pub level: HeadingLevel,
    /// Pixels from the top of the full document to the heading's top edge.
    pub top_offset_px: f64,
}

impl HeadingRecord {
    pub fn new(text: impl Into<String>, level: HeadingLevel, top_offset_px: f64) -> Self {
        Self {
            text: text.into(),
            level,
            top_offset_px,
        }
    }

    /// Bookmark title in a flat outline.
    pub fn flat_title(&self) -> String {
        match self.level {
            HeadingLevel::Primary => self.text.clone(),
            HeadingLevel::Secondary => format!("{SECONDARY_MARKER}{}", self.text),
        }
    }
}

#[derive(Deserialize)]
struct LocatedHeading {
    level: u8,
    top: f64,
    #[serde(default)]
    text: String,
}

/// Decode the value returned by [`LOCATOR_SCRIPT`].
///
/// `null` (nothing returned) decodes to an empty list: a notebook without
/// headings is valid.
pub fn decode_located(value: serde_json::Value) -> Result<Vec<HeadingRecord>> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    let located: Vec<LocatedHeading> = serde_json::from_value(value)
        .map_err(|e| render_err(format!("malformed heading locator result: {e}")))?;

    located
        .into_iter()
        .map(|h| {
            if !h.top.is_finite() {
                return Err(render_err(format!("heading '{}' has no finite offset", h.text)));
            }
            Ok(HeadingRecord {
                text: h.text.trim().to_string(),
                level: HeadingLevel::from_tag_level(h.level)?,
                top_offset_px: h.top,
            })
        })
        .collect()
}

/// Stable sort by document offset. Equal offsets keep encounter order.
pub fn sort_by_offset(headings: &mut [HeadingRecord]) {
    headings.sort_by(|a, b| a.top_offset_px.total_cmp(&b.top_offset_px));
}
