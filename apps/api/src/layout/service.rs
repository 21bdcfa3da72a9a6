//! Measurement service: post-render supervision of the real document.
//!
//! The PDF engine's in-page script posts a [`RenderedSnapshot`] of the rendered
//! DOM once the real template has been rendered. The service
//! 1. derives the CSS density side channel (`--content-density`, `--total-elements`,
//!    `--grid-scale`),
//! 2. measures `.module` elements, then `.no-break` elements,
//! 3. builds a break plan with the shared distribution routine,
//! 4. decides the orientation and, for landscape, recomputes the plan on the
//!    transposed page after the recalculation delay,
//! 5. arms the document's readiness flag.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::layout::distribution::Distribution;
use crate::layout::engine::CalculationEngine;
use crate::layout::measurement::{BoxGeometry, CachedLayout, Measurement};
use crate::layout::page::{Orientation, PageMetrics};
use crate::layout::readiness::ReadinessBoard;
use crate::layout::LayoutError;
use crate::measurement::database::ELEMENT_CATEGORY;
use crate::measurement::{MeasurementCache, SharedDatabase, SharedMeasurementCache};

/// Elements wider than this share of the page width count as wide.
const WIDE_ELEMENT_RATIO: f64 = 0.8;
const MAX_WIDE_ELEMENTS: usize = 5;
const MAX_TABLES: usize = 2;
const LANDSCAPE_DENSITY: f64 = 150.0;
const DENSE: f64 = 100.0;
const SPARSE: f64 = 50.0;

// ────────────────────────────────────────────────────────────────────────────
// Input
// ────────────────────────────────────────────────────────────────────────────

/// One element of the rendered document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedElement {
    /// Lowercase tag name.
    pub tag: String,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub outer_html_length: usize,
    #[serde(default)]
    pub breadcrumb: Option<String>,
    #[serde(flatten)]
    pub geometry: BoxGeometry,
}

impl RenderedElement {
    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    /// Catalogue type used for enrichment and learning.
    pub fn element_type(&self) -> &'static str {
        if self.has_class("module") {
            return "module";
        }
        if self.has_class("section") {
            return "section";
        }
        match self.tag.as_str() {
            "h1" => return "h1",
            "h2" => return "h2",
            "h3" => return "h3",
            "p" => return "paragraph",
            "table" => return "table",
            "ul" | "ol" => return "list",
            _ => {}
        }
        if self.has_class("competency-card") {
            "competency-card"
        } else if self.has_class("experience-item") {
            "experience-item"
        } else {
            "generic"
        }
    }

    fn type_name(&self) -> String {
        if self.classes.is_empty() {
            self.tag.clone()
        } else {
            self.classes.join(" ")
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedSnapshot {
    pub document_id: String,
    /// Elements in document order.
    #[serde(default)]
    pub elements: Vec<RenderedElement>,
}

// ────────────────────────────────────────────────────────────────────────────
// Output
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CssProperties {
    #[serde(rename = "--content-density")]
    pub content_density: f64,
    #[serde(rename = "--total-elements")]
    pub total_elements: usize,
    #[serde(rename = "--grid-scale")]
    pub grid_scale: f64,
}

/// Average text length of `p`, `li` and `td` elements and the derived grid scale.
pub fn css_properties(snapshot: &RenderedSnapshot) -> CssProperties {
    let (count, total_text) = snapshot
        .elements
        .iter()
        .filter(|e| matches!(e.tag.as_str(), "p" | "li" | "td"))
        .fold((0usize, 0usize), |(n, text), e| (n + 1, text + e.geometry.text_length));

    let content_density = if count == 0 {
        0.0
    } else {
        total_text as f64 / count as f64
    };
    let grid_scale = if content_density > DENSE {
        0.8
    } else if content_density < SPARSE {
        1.2
    } else {
        1.0
    };

    CssProperties {
        content_density,
        total_elements: count,
        grid_scale,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrientationDecision {
    pub orientation: Orientation,
    pub total_content: usize,
    pub wide_elements: usize,
    pub tables: usize,
    pub density: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakPlan {
    #[serde(flatten)]
    pub distribution: Distribution,
    /// Elements with complexity above the keep-together threshold.
    pub keep_together: Vec<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeReport {
    pub document_id: String,
    pub css: CssProperties,
    pub orientation: OrientationDecision,
    pub page_metrics: PageMetrics,
    pub measurements: Vec<Measurement>,
    pub plan: BreakPlan,
    /// True when the plan was recomputed for landscape.
    pub recalculated: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// Service
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct ServiceConfig {
    /// Total text length above which landscape is chosen.
    pub landscape_threshold: usize,
    pub recalc_delay: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            landscape_threshold: 8000,
            recalc_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Clone)]
pub struct MeasurementService {
    engine: CalculationEngine,
    cache: SharedMeasurementCache<CachedLayout>,
    database: SharedDatabase,
    readiness: ReadinessBoard,
    config: ServiceConfig,
}

impl MeasurementService {
    pub fn new(
        engine: CalculationEngine,
        cache: SharedMeasurementCache<CachedLayout>,
        database: SharedDatabase,
        readiness: ReadinessBoard,
        config: ServiceConfig,
    ) -> Self {
        Self {
            engine,
            cache,
            database,
            readiness,
            config,
        }
    }

    pub fn readiness(&self) -> &ReadinessBoard {
        &self.readiness
    }

    /// Supervises one rendered document. The readiness flag is armed whether or
    /// not the pass succeeds, so the PDF capture never waits forever.
    pub async fn finalize(&self, snapshot: &RenderedSnapshot) -> Result<FinalizeReport, LayoutError> {
        let result = self.supervise(snapshot).await;
        self.readiness.arm(&snapshot.document_id).await;
        result
    }

    async fn supervise(&self, snapshot: &RenderedSnapshot) -> Result<FinalizeReport, LayoutError> {
        let css = css_properties(snapshot);
        let mut page = PageMetrics::a4_portrait();

        let (measurements, keys) = self.measure_elements(snapshot).await;
        let mut plan = self.break_plan(&measurements, &page).await?;

        let orientation = self.decide_orientation(snapshot, &measurements, &page, css.content_density);
        let mut recalculated = false;
        if orientation.orientation == Orientation::Landscape {
            tokio::time::sleep(self.config.recalc_delay).await;
            page = page.transposed();
            // Portrait geometry is stale once the document reflows.
            for key in &keys {
                self.cache.delete(key).await;
            }
            plan = self.break_plan(&measurements, &page).await?;
            recalculated = true;
            info!(document_id = %snapshot.document_id, pages = plan.distribution.page_count, "recalculated for landscape");
        }

        info!(
            document_id = %snapshot.document_id,
            elements = measurements.len(),
            pages = plan.distribution.page_count,
            density = css.content_density,
            "document finalized"
        );

        Ok(FinalizeReport {
            document_id: snapshot.document_id.clone(),
            css,
            orientation,
            page_metrics: page,
            measurements,
            plan,
            recalculated,
        })
    }

    /// `.module` elements first, then `.no-break` elements (never breakable).
    /// Also returns the cache keys used, in the same order.
    async fn measure_elements(&self, snapshot: &RenderedSnapshot) -> (Vec<Measurement>, Vec<String>) {
        let modules = snapshot.elements.iter().filter(|e| e.has_class("module"));
        let no_break = snapshot.elements.iter().filter(|e| e.has_class("no-break"));
        let ids = modules
            .enumerate()
            .map(|(i, e)| (format!("module-{i}"), e))
            .chain(no_break.enumerate().map(|(i, e)| (format!("no-break-{i}"), e)));

        let mut measurements = Vec::new();
        let mut keys = Vec::new();
        for (id, element) in ids {
            let key = element_key(&snapshot.document_id, &id, element);
            measurements.push(self.measure_element(element, &id, &key).await);
            keys.push(key);
        }
        (measurements, keys)
    }

    async fn measure_element(&self, element: &RenderedElement, id: &str, key: &str) -> Measurement {
        if let Some(CachedLayout::Element(cached)) = self.cache.get(key).await {
            debug!(key, "measurement served from shared cache");
            return cached;
        }

        let element_type = element.element_type();
        let mut measurement = Measurement::from_geometry(id, element.type_name(), &element.geometry);
        if element.has_class("no-break") {
            measurement.breakable = false;
        }
        if let Some(standard) = self.database.read().await.standard_for(element_type) {
            measurement = measurement.enriched(&standard);
        }
        self.database
            .write()
            .await
            .learn_from_measurement(ELEMENT_CATEGORY, element_type, measurement.height);

        self.cache
            .set(key, CachedLayout::Element(measurement.clone()), None)
            .await;
        measurement
    }

    async fn break_plan(
        &self,
        measurements: &[Measurement],
        page: &PageMetrics,
    ) -> Result<BreakPlan, LayoutError> {
        let distribution = self.engine.reconcile(measurements.to_vec(), page).await?;
        let keep_together = measurements
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_high_complexity())
            .map(|(i, _)| i)
            .collect();
        Ok(BreakPlan {
            distribution,
            keep_together,
        })
    }

    fn decide_orientation(
        &self,
        snapshot: &RenderedSnapshot,
        measurements: &[Measurement],
        page: &PageMetrics,
        density: f64,
    ) -> OrientationDecision {
        let total_content = measurements.iter().map(|m| m.content_length).sum();
        let wide_elements = measurements
            .iter()
            .filter(|m| m.width > page.width * WIDE_ELEMENT_RATIO)
            .count();
        let tables = snapshot.elements.iter().filter(|e| e.tag == "table").count();

        let landscape = total_content > self.config.landscape_threshold
            || wide_elements > MAX_WIDE_ELEMENTS
            || tables > MAX_TABLES
            || density > LANDSCAPE_DENSITY;

        OrientationDecision {
            orientation: if landscape {
                Orientation::Landscape
            } else {
                Orientation::Portrait
            },
            total_content,
            wide_elements,
            tables,
            density,
        }
    }
}

/// Element cache key, scoped to one document.
fn element_key(document_id: &str, id: &str, element: &RenderedElement) -> String {
    MeasurementCache::<CachedLayout>::generate_key(
        "element",
        &[
            ("doc", document_id.to_string()),
            ("id", id.to_string()),
            ("len", element.outer_html_length.to_string()),
        ],
    )
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::phantom::{PhantomOptions, PhantomRenderer};
    use crate::layout::probe::EstimatingProbe;
    use crate::measurement::cache::{CacheConfig, ManualClock, MeasurementCache};
    use crate::measurement::database::Metric;
    use crate::measurement::MeasurementDatabase;
    use std::sync::Arc;

    fn service() -> (MeasurementService, SharedMeasurementCache<CachedLayout>, SharedDatabase) {
        let database = MeasurementDatabase::new().shared();
        let cache = SharedMeasurementCache::new(MeasurementCache::new(
            CacheConfig::default(),
            Arc::new(ManualClock::at(0)),
        ));
        let renderer = PhantomRenderer::new(
            Arc::new(EstimatingProbe::new(database.clone())),
            cache.clone(),
            database.clone(),
            PhantomOptions::default(),
        );
        let engine = CalculationEngine::new(renderer, database.clone(), false);
        let service = MeasurementService::new(
            engine,
            cache.clone(),
            database.clone(),
            ReadinessBoard::new(Duration::from_millis(500)),
            ServiceConfig::default(),
        );
        (service, cache, database)
    }

    fn element(tag: &str, classes: &[&str], height: f64, text_length: usize) -> RenderedElement {
        RenderedElement {
            tag: tag.to_string(),
            classes: classes.iter().map(|c| c.to_string()).collect(),
            outer_html_length: text_length + 40,
            breadcrumb: None,
            geometry: BoxGeometry {
                width: 674.0,
                height,
                text_length,
                ..BoxGeometry::default()
            },
        }
    }

    fn snapshot(elements: Vec<RenderedElement>) -> RenderedSnapshot {
        RenderedSnapshot {
            document_id: "doc-1".into(),
            elements,
        }
    }

    #[test]
    fn test_density_bands() {
        let dense = snapshot(vec![element("p", &[], 10.0, 150), element("li", &[], 10.0, 90)]);
        let css = css_properties(&dense);
        assert_eq!(css.content_density, 120.0);
        assert_eq!(css.total_elements, 2);
        assert_eq!(css.grid_scale, 0.8);

        let normal = snapshot(vec![element("td", &[], 10.0, 75)]);
        assert_eq!(css_properties(&normal).grid_scale, 1.0);

        let empty = snapshot(vec![element("div", &["module"], 10.0, 5000)]);
        let css = css_properties(&empty);
        assert_eq!(css.content_density, 0.0);
        assert_eq!(css.grid_scale, 1.2);
    }

    #[test]
    fn test_element_type_classification() {
        assert_eq!(element("div", &["module"], 0.0, 0).element_type(), "module");
        assert_eq!(element("h2", &["module-title"], 0.0, 0).element_type(), "h2");
        assert_eq!(element("ol", &[], 0.0, 0).element_type(), "list");
        assert_eq!(element("div", &["competency-card"], 0.0, 0).element_type(), "competency-card");
        assert_eq!(element("span", &[], 0.0, 0).element_type(), "generic");
    }

    #[tokio::test(start_paused = true)]
    async fn test_portrait_finalize_plans_breaks_and_arms_readiness() {
        let (service, _cache, database) = service();
        let snapshot = snapshot(vec![
            element("div", &["module"], 500.0, 1200),
            element("p", &[], 20.0, 80),
            element("div", &["module"], 600.0, 900),
            element("div", &["experience-item", "no-break"], 120.0, 300),
        ]);

        let report = service.finalize(&snapshot).await.expect("finalize");
        assert_eq!(report.orientation.orientation, Orientation::Portrait);
        assert!(!report.recalculated);
        assert_eq!(report.measurements.len(), 3);
        assert_eq!(report.measurements[0].id, "module-0");
        assert_eq!(report.measurements[2].id, "no-break-0");
        assert!(!report.measurements[2].breakable);
        assert_eq!(report.plan.distribution.break_points, vec![1]);
        assert_eq!(report.measurements[2].standard_height, Some(120.0));

        assert_eq!(service.readiness().is_ready("doc-1").await, Some(false));
        tokio::time::sleep(Duration::from_millis(501)).await;
        assert_eq!(service.readiness().is_ready("doc-1").await, Some(true));

        let learned = database.read().await.custom_measurement(ELEMENT_CATEGORY, "module", Metric::Max);
        assert_eq!(learned, Some(600.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_many_tables_switch_to_landscape_and_recalculate() {
        let (service, cache, _database) = service();
        let mut elements: Vec<RenderedElement> =
            (0..3).map(|_| element("table", &[], 100.0, 50)).collect();
        elements.extend((0..4).map(|_| element("div", &["module"], 200.0, 100)));
        let snapshot = snapshot(elements);

        let started = tokio::time::Instant::now();
        let report = service.finalize(&snapshot).await.expect("finalize");

        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(report.orientation.orientation, Orientation::Landscape);
        assert_eq!(report.orientation.tables, 3);
        assert!(report.recalculated);
        assert_eq!(report.page_metrics.height, 794.0);
        assert_eq!(report.page_metrics.usable_height, 650.0);
        // Three 200px modules fit in 978 but the third one would be left with
        // 250px in 650, less than itself plus 30% of the next one.
        assert_eq!(report.plan.distribution.break_points, vec![2]);
        assert_eq!(report.plan.distribution.orphaned_headers, vec![2]);
        // Portrait entries for the reflowed document are dropped.
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_finalize_hits_shared_cache() {
        let (service, cache, database) = service();
        let snapshot = snapshot(vec![element("div", &["module"], 400.0, 100)]);

        service.finalize(&snapshot).await.expect("finalize");
        service.finalize(&snapshot).await.expect("finalize");

        let stats = cache.stats().await;
        assert_eq!((stats.hits, stats.misses), (1, 1));
        let learned = database.read().await.export_learned_measurements();
        assert_eq!(learned["element.module"].samples, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_documents_do_not_share_element_measurements() {
        let (service, _cache, database) = service();
        let short = RenderedSnapshot {
            document_id: "doc-a".into(),
            elements: vec![
                element("div", &["module"], 100.0, 460),
                element("div", &["module"], 100.0, 460),
            ],
        };
        let tall = RenderedSnapshot {
            document_id: "doc-b".into(),
            elements: vec![
                element("div", &["module"], 900.0, 460),
                element("div", &["module"], 900.0, 460),
            ],
        };

        let first = service.finalize(&short).await.expect("finalize");
        assert_eq!(first.plan.distribution.page_count, 1);

        let second = service.finalize(&tall).await.expect("finalize");
        let heights: Vec<f64> = second.measurements.iter().map(|m| m.height).collect();
        assert_eq!(heights, vec![900.0, 900.0]);
        assert_eq!(second.plan.distribution.page_count, 2);
        assert_eq!(second.plan.distribution.break_points, vec![1]);

        let learned = database.read().await.export_learned_measurements();
        assert_eq!(learned["element.module"].samples, 4);
        assert_eq!(learned["element.module"].max, 900.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_complex_elements_get_keep_together_hints() {
        let (service, _cache, _database) = service();
        let mut heavy = element("div", &["module"], 300.0, 3000);
        heavy.geometry.child_count = 40;
        heavy.geometry.table_count = 1;
        let snapshot = snapshot(vec![element("div", &["module"], 100.0, 10), heavy]);

        let report = service.finalize(&snapshot).await.expect("finalize");
        assert_eq!(report.plan.keep_together, vec![1]);
    }
}
