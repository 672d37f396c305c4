//! Page Splitter / Coordinate Mapper
//!
//! The browser prints the notebook as one tall virtual page. Whenever that
//! page is taller than the ceiling the engine cuts it into consecutive
//! ceiling-tall slabs, so an absolute offset folds into a page index by
//! integer division and into an on-page offset by the remainder.
//!
//! PDF destinations measure `y` from the bottom of the page, browser offsets
//! measure from the top; [`map_headings`] converts between the two.

use serde::Serialize;

use crate::heading::{HeadingLevel, HeadingRecord};

/// Page size (one axis, in points) requested from the engine for a document
/// that scrolls `scroll_px` pixels on that axis.
///
/// Two pixels of slack keep the engine from spilling a blank page.
pub fn paper_dimension_pt(scroll_px: f64, scale: f64, ceiling_pt: f64) -> f64 {
    ((scroll_px + 2.0) * scale).min(ceiling_pt)
}

/// Geometry of the physical pages a render produced (or is expected to).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageLayout {
    /// Points per CSS pixel.
    pub scale: f64,
    /// Maximum physical page height in points.
    pub ceiling_pt: f64,
    /// Added below the top edge so a jump does not land flush on the border.
    pub leeway_pt: f64,
    page_heights: Vec<f64>,
}

impl PageLayout {
    /// Predict the pages the engine emits for a document `height_px` tall.
    ///
    /// Every page carries the requested paper height, including the last one.
    pub fn from_content_height(height_px: f64, scale: f64, ceiling_pt: f64, leeway_pt: f64) -> Self {
        let height_px = height_px.max(0.0);
        let paper = paper_dimension_pt(height_px, scale, ceiling_pt);
        let content_pt = height_px * scale;
        let pages = ((content_pt / paper).ceil() as usize).max(1);
        Self {
            scale,
            ceiling_pt,
            leeway_pt,
            page_heights: vec![paper; pages],
        }
    }

    /// Layout from measured page heights.
    pub fn with_page_heights(page_heights: Vec<f64>, scale: f64, ceiling_pt: f64, leeway_pt: f64) -> Self {
        Self {
            scale,
            ceiling_pt,
            leeway_pt,
            page_heights,
        }
    }

    pub fn page_count(&self) -> usize {
        self.page_heights.len()
    }

    pub fn page_heights(&self) -> &[f64] {
        &self.page_heights
    }

    /// Height of page `index`.
    ///
    /// Indices past the end reuse the last page's height; an empty layout
    /// falls back to the ceiling.
    pub fn page_height(&self, index: usize) -> f64 {
        self.page_heights
            .get(index)
            .or_else(|| self.page_heights.last())
            .copied()
            .unwrap_or(self.ceiling_pt)
    }

    fn locate(&self, heading: &HeadingRecord) -> MappedHeading {
        let top_pt = (heading.top_offset_px * self.scale).max(0.0);
        let page_index = (top_pt / self.ceiling_pt).floor() as usize;
        let offset_within_page = top_pt.rem_euclid(self.ceiling_pt);
        let page_height = self.page_height(page_index);
        let y = (page_height - offset_within_page + self.leeway_pt).clamp(0.0, page_height);

        MappedHeading {
            text: heading.text.clone(),
            level: heading.level,
            page_index,
            y_from_page_bottom: y,
            top_offset_px: heading.top_offset_px,
        }
    }
}

/// A heading resolved to a physical page and a bottom-up `y`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappedHeading {
    pub text: String,
    pub level: HeadingLevel,
    pub page_index: usize,
    pub y_from_page_bottom: f64,
    /// Original offset, kept for ordering.
    pub top_offset_px: f64,
}

impl MappedHeading {
    /// Bookmark title in a flat outline.
    pub fn flat_title(&self) -> String {
        HeadingRecord::new(self.text.clone(), self.level, self.top_offset_px).flat_title()
    }
}

/// Map every heading onto `layout`, preserving input order.
///
/// Pure: identical inputs give identical output. Callers that need reading
/// order sort by offset first (see [`crate::heading::sort_by_offset`]).
pub fn map_headings(headings: &[HeadingRecord], layout: &PageLayout) -> Vec<MappedHeading> {
    headings.iter().map(|h| layout.locate(h)).collect()
}
