//! Standard measurement catalogue for report elements.
//!
//! Heights are CSS pixels observed on A4 at 96 dpi. The static table gives a
//! min/avg/max band per element type so layouts can be estimated without a real
//! render. Real observations are folded into a learned table keyed by
//! `"category.type"`, which is consulted only when the static table has no row.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::layout::page::PageMetrics;

/// Retained observations per learned key. Older samples age out first.
pub const MAX_SAMPLES: usize = 100;

/// Process-wide handle shared by the phantom renderer, the measurement service and the routes.
pub type SharedDatabase = Arc<RwLock<MeasurementDatabase>>;

// ────────────────────────────────────────────────────────────────────────────
// Types
// ────────────────────────────────────────────────────────────────────────────

/// Which value of a standard band to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Metric {
    Min,
    #[default]
    Avg,
    Max,
    MarginBottom,
}

/// One row of the static catalogue.
struct StaticEntry {
    category: &'static str,
    kind: &'static str,
    min: f64,
    avg: f64,
    max: f64,
    margin_bottom: f64,
    description: &'static str,
}

/// A min/avg/max band, either from the static catalogue or learned from real renders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandardMeasurement {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
    #[serde(default)]
    pub margin_bottom: f64,
    /// Retained observations. Not part of any snapshot.
    #[serde(skip)]
    history: VecDeque<f64>,
    /// Number of retained observations (or the imported count for imported rows).
    #[serde(default)]
    pub sample_count: usize,
    #[serde(default)]
    pub description: Option<String>,
}

impl StandardMeasurement {
    pub fn new(min: f64, avg: f64, max: f64, margin_bottom: f64) -> Self {
        Self {
            min,
            avg,
            max,
            margin_bottom,
            history: VecDeque::new(),
            sample_count: 0,
            description: None,
        }
    }

    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Min => self.min,
            Metric::Avg => self.avg,
            Metric::Max => self.max,
            Metric::MarginBottom => self.margin_bottom,
        }
    }

    /// Narrow bands are trusted more: `1 - (max - min) / max`, clamped to `[0, 1]`.
    pub fn confidence(&self) -> f64 {
        if self.max <= 0.0 {
            return 0.0;
        }
        (1.0 - (self.max - self.min) / self.max).clamp(0.0, 1.0)
    }

    fn from_static(entry: &StaticEntry) -> Self {
        Self {
            description: Some(entry.description.to_string()),
            ..Self::new(entry.min, entry.avg, entry.max, entry.margin_bottom)
        }
    }

    fn first_observation(value: f64) -> Self {
        Self::new(value, value, value, 0.0)
    }
}

/// Snapshot row of a learned measurement. Raw samples are not exported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedSummary {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
    pub samples: usize,
}

/// One input row of `estimate_total_height`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimateRequest {
    pub category: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default)]
    pub metric: Metric,
}

fn default_count() -> u32 {
    1
}

// ────────────────────────────────────────────────────────────────────────────
// Static catalogue
// ────────────────────────────────────────────────────────────────────────────

#[rustfmt::skip]
static STANDARD_TABLE: &[StaticEntry] = &[
    // Whole modules
    StaticEntry { category: "module", kind: "cover-page", min: 800.0, avg: 1000.0, max: 1122.0, margin_bottom: 0.0, description: "Full report cover page" },
    StaticEntry { category: "module", kind: "presentacion", min: 200.0, avg: 350.0, max: 500.0, margin_bottom: 0.0, description: "Candidate presentation module" },
    StaticEntry { category: "module", kind: "experiencia", min: 300.0, avg: 600.0, max: 1200.0, margin_bottom: 0.0, description: "Work experience module" },
    StaticEntry { category: "module", kind: "formacion", min: 150.0, avg: 300.0, max: 500.0, margin_bottom: 0.0, description: "Education module" },
    StaticEntry { category: "module", kind: "competencias", min: 200.0, avg: 400.0, max: 600.0, margin_bottom: 0.0, description: "Competencies and skills module" },
    StaticEntry { category: "module", kind: "conclusiones", min: 250.0, avg: 450.0, max: 700.0, margin_bottom: 0.0, description: "Conclusions and assessment module" },
    // Headers
    StaticEntry { category: "headers", kind: "module-title", min: 40.0, avg: 48.0, max: 56.0, margin_bottom: 16.0, description: "Module title (h2)" },
    StaticEntry { category: "headers", kind: "section-title", min: 28.0, avg: 32.0, max: 40.0, margin_bottom: 12.0, description: "Section title (h3)" },
    StaticEntry { category: "headers", kind: "subsection-title", min: 20.0, avg: 24.0, max: 28.0, margin_bottom: 8.0, description: "Subsection title (h4)" },
    // Content
    StaticEntry { category: "content", kind: "experience-item", min: 80.0, avg: 120.0, max: 200.0, margin_bottom: 16.0, description: "Work experience item" },
    StaticEntry { category: "content", kind: "education-item", min: 60.0, avg: 90.0, max: 120.0, margin_bottom: 12.0, description: "Education item" },
    StaticEntry { category: "content", kind: "competency-card", min: 50.0, avg: 70.0, max: 90.0, margin_bottom: 8.0, description: "Competency card" },
    StaticEntry { category: "content", kind: "reference-item", min: 40.0, avg: 60.0, max: 80.0, margin_bottom: 8.0, description: "Reference item" },
    StaticEntry { category: "content", kind: "paragraph", min: 40.0, avg: 60.0, max: 100.0, margin_bottom: 12.0, description: "Standard text paragraph" },
    StaticEntry { category: "content", kind: "bullet-point", min: 20.0, avg: 30.0, max: 50.0, margin_bottom: 4.0, description: "List bullet" },
    // Special blocks
    StaticEntry { category: "special", kind: "candidate-header", min: 100.0, avg: 120.0, max: 150.0, margin_bottom: 20.0, description: "Candidate header with photo and details" },
    StaticEntry { category: "special", kind: "evaluation-box", min: 150.0, avg: 200.0, max: 300.0, margin_bottom: 16.0, description: "Evaluation box with score" },
    StaticEntry { category: "special", kind: "chart", min: 200.0, avg: 250.0, max: 350.0, margin_bottom: 16.0, description: "Chart or visualization" },
    StaticEntry { category: "special", kind: "table-row", min: 24.0, avg: 32.0, max: 48.0, margin_bottom: 0.0, description: "Table row" },
];

static SPACING: &[(&str, f64)] = &[
    ("module-gap", 32.0),
    ("section-gap", 24.0),
    ("item-gap", 16.0),
    ("paragraph-gap", 12.0),
    ("line-gap", 8.0),
];

fn static_entry(category: &str, kind: &str) -> Option<&'static StaticEntry> {
    STANDARD_TABLE
        .iter()
        .find(|e| e.category == category && e.kind == kind)
}

/// Maps a rendered element type (see the measurement service) to a catalogue row.
fn catalogue_key(element_type: &str) -> Option<(&'static str, &'static str)> {
    match element_type {
        "h1" => Some(("special", "candidate-header")),
        "h2" => Some(("headers", "module-title")),
        "h3" => Some(("headers", "section-title")),
        "paragraph" => Some(("content", "paragraph")),
        "experience-item" => Some(("content", "experience-item")),
        "education-item" => Some(("content", "education-item")),
        "competency-card" => Some(("content", "competency-card")),
        _ => None,
    }
}

/// Category under which learned rows for arbitrary element types are stored.
pub const ELEMENT_CATEGORY: &str = "element";

fn custom_key(category: &str, kind: &str) -> String {
    format!("{category}.{kind}")
}

// ────────────────────────────────────────────────────────────────────────────
// Database
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MeasurementDatabase {
    custom: HashMap<String, StandardMeasurement>,
}

impl MeasurementDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedDatabase {
        Arc::new(RwLock::new(self))
    }

    /// Reads one metric for `category`/`kind`. Static rows win; learned rows are the fallback.
    pub fn measurement(&self, category: &str, kind: &str, metric: Metric) -> Option<f64> {
        match static_entry(category, kind) {
            Some(entry) => Some(StandardMeasurement::from_static(entry).get(metric)),
            None => self.custom_measurement(category, kind, metric),
        }
    }

    pub fn custom_measurement(&self, category: &str, kind: &str, metric: Metric) -> Option<f64> {
        self.custom
            .get(&custom_key(category, kind))
            .map(|m| m.get(metric))
    }

    fn margin_bottom(&self, category: &str, kind: &str) -> f64 {
        static_entry(category, kind)
            .map(|e| e.margin_bottom)
            .or_else(|| {
                self.custom
                    .get(&custom_key(category, kind))
                    .map(|m| m.margin_bottom)
            })
            .unwrap_or(0.0)
    }

    /// Sums `(measurement + marginBottom) * count`.
    ///
    /// Rows without a known measurement contribute zero; the result is an
    /// approximation, never an error.
    pub fn estimate_total_height(&self, elements: &[EstimateRequest]) -> f64 {
        elements
            .iter()
            .filter_map(|e| {
                let value = self.measurement(&e.category, &e.kind, e.metric)?;
                let margin = self.margin_bottom(&e.category, &e.kind);
                Some((value + margin) * f64::from(e.count))
            })
            .sum()
    }

    pub fn fits_in_space(&self, elements: &[EstimateRequest], available_space: f64) -> bool {
        self.estimate_total_height(elements) <= available_space
    }

    pub fn page_metrics(&self, landscape: bool) -> PageMetrics {
        if landscape {
            PageMetrics::a4_landscape()
        } else {
            PageMetrics::a4_portrait()
        }
    }

    pub fn spacing(&self, name: &str) -> Option<f64> {
        SPACING.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
    }

    pub fn register_custom_measurement(&mut self, key: impl Into<String>, entry: StandardMeasurement) {
        let key = key.into();
        debug!(key = %key, "custom measurement registered");
        self.custom.insert(key, entry);
    }

    /// Folds one real observation into the learned row for `category.kind`.
    ///
    /// `min`/`max` only ever widen, even after the sample window drops the
    /// observation that set them. `avg` is the mean of the retained window.
    pub fn learn_from_measurement(&mut self, category: &str, kind: &str, value: f64) {
        let key = custom_key(category, kind);
        let entry = self
            .custom
            .entry(key.clone())
            .or_insert_with(|| StandardMeasurement::first_observation(value));

        entry.history.push_back(value);
        while entry.history.len() > MAX_SAMPLES {
            entry.history.pop_front();
        }
        entry.min = entry.min.min(value);
        entry.max = entry.max.max(value);
        entry.avg = entry.history.iter().sum::<f64>() / entry.history.len() as f64;
        entry.sample_count = entry.history.len();

        debug!(key = %key, value, samples = entry.sample_count, "learned measurement");
    }

    pub fn export_learned_measurements(&self) -> BTreeMap<String, LearnedSummary> {
        self.custom
            .iter()
            .map(|(key, m)| {
                (
                    key.clone(),
                    LearnedSummary {
                        min: m.min,
                        avg: m.avg.round(),
                        max: m.max,
                        samples: m.sample_count,
                    },
                )
            })
            .collect()
    }

    /// Restores learned rows. Raw samples are not part of the snapshot, so the
    /// next observation starts a fresh window while keeping the imported band.
    pub fn import_learned_measurements(&mut self, learned: BTreeMap<String, LearnedSummary>) {
        let count = learned.len();
        for (key, summary) in learned {
            let mut entry = StandardMeasurement::new(summary.min, summary.avg, summary.max, 0.0);
            entry.sample_count = summary.samples;
            self.custom.insert(key, entry);
        }
        info!(count, "imported learned measurements");
    }

    /// Band used to enrich a measurement of a rendered element type.
    pub fn standard_for(&self, element_type: &str) -> Option<StandardMeasurement> {
        if let Some((category, kind)) = catalogue_key(element_type) {
            if let Some(entry) = static_entry(category, kind) {
                return Some(StandardMeasurement::from_static(entry));
            }
        }
        self.custom
            .get(&custom_key(ELEMENT_CATEGORY, element_type))
            .cloned()
    }

    pub fn confidence(&self, element_type: &str) -> Option<f64> {
        self.standard_for(element_type).map(|m| m.confidence())
    }

    /// Catalogue row for a synthesized phantom box type.
    pub fn standard_for_box(&self, category: &str, kind: &str) -> Option<StandardMeasurement> {
        static_entry(category, kind)
            .map(StandardMeasurement::from_static)
            .or_else(|| self.custom.get(&custom_key(category, kind)).cloned())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
