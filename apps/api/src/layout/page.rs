//! Page geometry presets. All values are CSS pixels at 96 dpi.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Portrait,
    Landscape,
}

/// Page size, margins and the derived usable area.
///
/// Built through the constructors so `usable_*` always matches the margins.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetrics {
    pub width: f64,
    pub height: f64,
    pub margin_top: f64,
    pub margin_bottom: f64,
    pub margin_left: f64,
    pub margin_right: f64,
    pub usable_width: f64,
    pub usable_height: f64,
}

impl PageMetrics {
    pub fn new(
        width: f64,
        height: f64,
        margin_top: f64,
        margin_bottom: f64,
        margin_left: f64,
        margin_right: f64,
    ) -> Self {
        Self {
            width,
            height,
            margin_top,
            margin_bottom,
            margin_left,
            margin_right,
            usable_width: width - margin_left - margin_right,
            usable_height: height - margin_top - margin_bottom,
        }
    }

    /// A4 portrait: 210mm × 297mm, 18mm/20mm top/bottom, 16mm sides.
    pub fn a4_portrait() -> Self {
        Self::new(794.0, 1122.0, 68.0, 76.0, 60.0, 60.0)
    }

    /// A4 landscape preset with its own margin set.
    pub fn a4_landscape() -> Self {
        Self::new(1122.0, 794.0, 60.0, 60.0, 76.0, 76.0)
    }

    pub fn for_orientation(orientation: Orientation) -> Self {
        match orientation {
            Orientation::Portrait => Self::a4_portrait(),
            Orientation::Landscape => Self::a4_landscape(),
        }
    }

    /// Swaps width and height, keeping the margins.
    ///
    /// This is a dimension transpose, not a relayout: content reflow at the new
    /// width is not modelled.
    pub fn transposed(&self) -> Self {
        Self::new(
            self.height,
            self.width,
            self.margin_top,
            self.margin_bottom,
            self.margin_left,
            self.margin_right,
        )
    }

    pub fn orientation(&self) -> Orientation {
        if self.width > self.height {
            Orientation::Landscape
        } else {
            Orientation::Portrait
        }
    }
}

impl Default for PageMetrics {
    fn default() -> Self {
        Self::a4_portrait()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_a4_portrait_usable_area() {
        let page = PageMetrics::a4_portrait();
        assert_eq!(page.usable_height, 978.0);
        assert_eq!(page.usable_width, 674.0);
        assert_eq!(page.orientation(), Orientation::Portrait);
    }

    #[test]
    fn test_a4_landscape_usable_area() {
        let page = PageMetrics::a4_landscape();
        assert_eq!(page.usable_height, 674.0);
        assert_eq!(page.usable_width, 970.0);
        assert_eq!(page.orientation(), Orientation::Landscape);
    }

    #[test]
    fn test_transpose_recomputes_usable_area() {
        let page = PageMetrics::a4_portrait().transposed();
        assert_eq!(page.width, 1122.0);
        assert_eq!(page.height, 794.0);
        // Same margins as portrait: 794 - 68 - 76.
        assert_eq!(page.usable_height, 650.0);
        assert_eq!(page.usable_width, 1002.0);
        assert_eq!(page.orientation(), Orientation::Landscape);
    }

    #[test]
    fn test_for_orientation_matches_presets() {
        assert_eq!(
            PageMetrics::for_orientation(Orientation::Landscape),
            PageMetrics::a4_landscape()
        );
    }
}
