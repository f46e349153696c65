//! Viewport-aware render priority assignment
//!
//! Pages are prioritized as follows:
//! 1. Visible pages (currently on screen) - highest priority
//! 2. Nearby pages (adjacent to the visible range, or in the preload set)
//! 3. Everything else - thumbnail priority

use std::collections::BTreeSet;
use std::ops::RangeInclusive;

use crate::priority::RenderPriority;

/// Visible page range within a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    /// First page at least partly on screen
    pub first_visible: usize,

    /// Last page at least partly on screen
    pub last_visible: usize,

    /// Total pages in the document
    pub page_count: usize,

    /// Pages on either side of the visible range that count as nearby
    pub nearby_margin: usize,
}

impl Viewport {
    /// Create a viewport; the range is clamped into the document and
    /// normalized so that `first_visible <= last_visible`
    pub fn new(first_visible: usize, last_visible: usize, page_count: usize) -> Self {
        let last_page = page_count.saturating_sub(1);
        let first = first_visible.min(last_visible).min(last_page);
        let last = first_visible.max(last_visible).min(last_page);
        Self {
            first_visible: first,
            last_visible: last,
            page_count,
            nearby_margin: 1,
        }
    }

    /// Viewport showing a single page
    pub fn single(page: usize, page_count: usize) -> Self {
        Self::new(page, page, page_count)
    }

    /// Set how many pages around the visible range are nearby
    pub fn with_nearby_margin(mut self, margin: usize) -> Self {
        self.nearby_margin = margin;
        self
    }

    /// Visible page indices, empty for an empty document
    pub fn visible_pages(&self) -> RangeInclusive<usize> {
        if self.page_count == 0 {
            return 1..=0;
        }
        self.first_visible..=self.last_visible
    }

    pub fn is_visible(&self, page: usize) -> bool {
        self.visible_pages().contains(&page)
    }

    /// Priority for rendering `page`
    pub fn priority_for(&self, page: usize) -> RenderPriority {
        if page >= self.page_count {
            return RenderPriority::Thumbnail;
        }
        if self.is_visible(page) {
            return RenderPriority::VisiblePage;
        }

        let near_start = self.first_visible.saturating_sub(self.nearby_margin);
        let near_end = self.last_visible.saturating_add(self.nearby_margin);
        if (near_start..=near_end).contains(&page) {
            RenderPriority::NearbyPage
        } else {
            RenderPriority::Thumbnail
        }
    }

    /// Priority for rendering `page`, treating every page in `preload` as nearby
    pub fn priority_with_preload(&self, page: usize, preload: &BTreeSet<usize>) -> RenderPriority {
        match self.priority_for(page) {
            RenderPriority::Thumbnail if page < self.page_count && preload.contains(&page) => {
                RenderPriority::NearbyPage
            }
            priority => priority,
        }
    }
}
