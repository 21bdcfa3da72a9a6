//! Page distribution: single-pass bin packing of measured elements onto pages.
//!
//! # Rules (applied per element, in traversal order, no backtracking)
//! - A header that fits but would leave less than `0.3 × next.effective_height`
//!   (50px with no next element) after itself starts a new page. The index is
//!   recorded as both a break point and an orphaned header.
//! - An element that does not fit the remaining space starts a new page.
//! - Elements are never split. An element taller than the usable height is
//!   handled by the [`OverflowPolicy`].
//! - A page is only closed when it holds at least one element, so no empty page
//!   is ever emitted.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::layout::measurement::Measurement;
use crate::layout::LayoutError;

/// Share of the next element that must fit under a header.
pub const ORPHAN_NEXT_FRACTION: f64 = 0.3;
/// Space required under a header that has no following element.
pub const ORPHAN_FLOOR_PX: f64 = 50.0;

/// What to do with an element taller than the usable page height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Place it alone on its page and let it overflow.
    #[default]
    Overflow,
    /// Place it alone, counting only the usable height.
    Clip,
    /// Fail the pass.
    Error,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "overflow" => Ok(Self::Overflow),
            "clip" => Ok(Self::Clip),
            "error" => Ok(Self::Error),
            other => Err(format!(
                "unknown overflow policy '{other}' (expected overflow, clip or error)"
            )),
        }
    }
}

/// One page of the distribution. `elements` are indices into the measurement slice.
///
/// `used_height + remaining_height == usable_height` always holds; `remaining_height`
/// goes negative only on an overflowing page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub elements: Vec<usize>,
    pub used_height: f64,
    pub remaining_height: f64,
}

impl Page {
    fn empty(usable_height: f64) -> Self {
        Self {
            elements: Vec::new(),
            used_height: 0.0,
            remaining_height: usable_height,
        }
    }

    fn push(&mut self, index: usize, height: f64) {
        self.elements.push(index);
        self.used_height += height;
        self.remaining_height -= height;
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Distribution {
    pub pages: Vec<Page>,
    /// Indices of elements that start a new page (the first page excluded).
    pub break_points: Vec<usize>,
    pub orphaned_headers: Vec<usize>,
    /// Indices of elements taller than the usable height.
    pub oversized: Vec<usize>,
    pub page_count: usize,
}

/// Distributes `measurements` over pages of `usable_height`.
pub fn distribute(
    measurements: &[Measurement],
    usable_height: f64,
    policy: OverflowPolicy,
) -> Result<Distribution, LayoutError> {
    let mut distribution = Distribution::default();
    let mut current = Page::empty(usable_height);

    for (index, element) in measurements.iter().enumerate() {
        let mut height = element.effective_height;

        if height > usable_height {
            match policy {
                OverflowPolicy::Error => {
                    return Err(LayoutError::OversizedElement {
                        index,
                        height,
                        usable: usable_height,
                    });
                }
                OverflowPolicy::Clip => height = usable_height,
                OverflowPolicy::Overflow => {}
            }
            warn!(index, height = element.effective_height, usable_height, ?policy, "element taller than page");
            distribution.oversized.push(index);
        }

        if height <= current.remaining_height {
            if element.is_header() && !current.is_empty() {
                let trailing = measurements
                    .get(index + 1)
                    .map(|next| next.effective_height * ORPHAN_NEXT_FRACTION)
                    .unwrap_or(ORPHAN_FLOOR_PX);

                if height + trailing > current.remaining_height {
                    debug!(index, "orphan header; forcing page break");
                    distribution.orphaned_headers.push(index);
                    distribution.break_points.push(index);
                    distribution
                        .pages
                        .push(std::mem::replace(&mut current, Page::empty(usable_height)));
                }
            }
            current.push(index, height);
        } else {
            if !current.is_empty() {
                distribution.break_points.push(index);
                distribution
                    .pages
                    .push(std::mem::replace(&mut current, Page::empty(usable_height)));
            }
            current.push(index, height);
        }
    }

    if !current.is_empty() {
        distribution.pages.push(current);
    }
    distribution.page_count = distribution.pages.len();

    debug!(
        pages = distribution.page_count,
        breaks = distribution.break_points.len(),
        orphans = distribution.orphaned_headers.len(),
        "distribution calculated"
    );
    Ok(distribution)
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
