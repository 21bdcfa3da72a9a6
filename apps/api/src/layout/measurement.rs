//! Per-element geometry as reported by a layout probe, and the measurement record
//! the distribution algorithm consumes.

use serde::{Deserialize, Serialize};

use crate::measurement::database::StandardMeasurement;

/// Complexity above which an element is hinted as keep-together.
pub const HIGH_COMPLEXITY: f64 = 7.0;

/// Rendered box of one element plus the content counts used for complexity scoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BoxGeometry {
    pub width: f64,
    pub height: f64,
    pub margin_top: f64,
    pub margin_bottom: f64,
    pub padding_top: f64,
    pub padding_bottom: f64,
    /// Computed `break-inside` (or legacy `page-break-inside`) value.
    pub break_inside: Option<String>,
    pub text_length: usize,
    pub child_count: usize,
    pub image_count: usize,
    pub table_count: usize,
    pub list_count: usize,
}

impl BoxGeometry {
    /// 0–10 score: descendants, text volume, and the presence of images, tables and lists.
    pub fn complexity(&self) -> f64 {
        let mut score = (self.child_count as f64 * 0.1).min(3.0);
        score += (self.text_length as f64 / 1000.0).min(3.0);
        if self.image_count > 0 {
            score += 2.0;
        }
        if self.table_count > 0 {
            score += 2.0;
        }
        if self.list_count > 0 {
            score += 1.0;
        }
        score.min(10.0)
    }

    pub fn avoids_break_inside(&self) -> bool {
        matches!(self.break_inside.as_deref(), Some("avoid") | Some("avoid-page"))
    }
}

/// One measured element. Created once per element per pass and replaced, never
/// patched, when re-measured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    pub id: String,
    /// Space-separated class list, e.g. `module-title`, `experience-item`, `module cover-page`.
    pub type_name: String,
    pub module_index: Option<usize>,
    pub section_index: Option<usize>,
    pub item_index: Option<usize>,
    pub width: f64,
    pub height: f64,
    pub margin_top: f64,
    pub margin_bottom: f64,
    pub padding_top: f64,
    pub padding_bottom: f64,
    /// `height + margin_top + margin_bottom`.
    pub effective_height: f64,
    pub breakable: bool,
    pub complexity: f64,
    pub content_length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl Measurement {
    pub fn from_geometry(id: impl Into<String>, type_name: impl Into<String>, geometry: &BoxGeometry) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            module_index: None,
            section_index: None,
            item_index: None,
            width: geometry.width,
            height: geometry.height,
            margin_top: geometry.margin_top,
            margin_bottom: geometry.margin_bottom,
            padding_top: geometry.padding_top,
            padding_bottom: geometry.padding_bottom,
            effective_height: geometry.height + geometry.margin_top + geometry.margin_bottom,
            breakable: !geometry.avoids_break_inside(),
            complexity: geometry.complexity(),
            content_length: geometry.text_length,
            standard_height: None,
            variance: None,
            confidence: None,
        }
    }

    pub fn at(mut self, module: Option<usize>, section: Option<usize>, item: Option<usize>) -> Self {
        self.module_index = module;
        self.section_index = section;
        self.item_index = item;
        self
    }

    /// Attaches the catalogue band for this element's type.
    pub fn enriched(mut self, standard: &StandardMeasurement) -> Self {
        self.standard_height = Some(standard.avg);
        self.variance = Some((self.height - standard.avg).abs());
        self.confidence = Some(standard.confidence());
        self
    }

    /// Headings and bare module wrappers must not be stranded at the bottom of a page.
    pub fn is_header(&self) -> bool {
        let t = self.type_name.as_str();
        t.contains("title")
            || t.contains("header")
            || (self.item_index.is_none() && t.split_whitespace().any(|class| class == "module"))
    }

    pub fn is_high_complexity(&self) -> bool {
        self.complexity > HIGH_COMPLEXITY
    }
}

/// Values stored in the shared measurement cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum CachedLayout {
    /// A full phantom pass, keyed by document fingerprint.
    Pass(Vec<Measurement>),
    /// A single rendered element, keyed by id and markup length.
    Element(Measurement),
}

#[cfg(test)]
pub(crate) fn fixture(id: &str, type_name: &str, effective_height: f64) -> Measurement {
    Measurement::from_geometry(
        id,
        type_name,
        &BoxGeometry {
            height: effective_height,
            ..BoxGeometry::default()
        },
    )
}
