//! Calculation engine: runs a phantom pass over the request data and writes the
//! pagination decision back into `__layout`.
//!
//! Two stages share one distribution routine:
//! - [`CalculationEngine::estimate`] before the real render (phantom measurements),
//! - [`CalculationEngine::reconcile`] after it (measurements of the real DOM).

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::layout::distribution::{Distribution, OverflowPolicy};
use crate::layout::measurement::Measurement;
use crate::layout::page::PageMetrics;
use crate::layout::phantom::{distribute_blocking, PhantomRenderer, PhantomResult};
use crate::layout::LayoutError;
use crate::measurement::SharedDatabase;
use crate::models::layout::{layout_object, CalculationSummary, PrecalcFlags, LAYOUT_KEY};
use crate::models::report::ReportData;

#[derive(Clone)]
pub struct CalculationEngine {
    renderer: PhantomRenderer,
    database: SharedDatabase,
    diagnostics: bool,
}

impl CalculationEngine {
    pub fn new(renderer: PhantomRenderer, database: SharedDatabase, diagnostics: bool) -> Self {
        Self {
            renderer,
            database,
            diagnostics,
        }
    }

    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.renderer.options().overflow
    }

    /// Page geometry for `data`: landscape when the pre-flight hints asked for it.
    pub async fn page_for(&self, data: &Value) -> PageMetrics {
        let landscape = data
            .get(LAYOUT_KEY)
            .and_then(|layout| layout.get("isLandscape"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        self.database.read().await.page_metrics(landscape)
    }

    /// Phantom stage: estimated pagination before the real render.
    pub async fn estimate(
        &self,
        report: &ReportData,
        page: &PageMetrics,
    ) -> Result<PhantomResult, LayoutError> {
        self.renderer.pre_calculate(report, page).await
    }

    /// Post-render stage: pagination of measurements taken from the real DOM.
    pub async fn reconcile(
        &self,
        actual: Vec<Measurement>,
        page: &PageMetrics,
    ) -> Result<Distribution, LayoutError> {
        distribute_blocking(actual, page.usable_height, self.overflow_policy()).await
    }

    /// Runs a full pass and injects its summary. Repeated calls overwrite the
    /// previous summary.
    pub async fn execute(&self, data: &mut Value) -> Result<CalculationSummary, LayoutError> {
        let report = ReportData::from_value(data);
        let page = self.page_for(data).await;
        let result = self.estimate(&report, &page).await?;

        let summary = CalculationSummary {
            performed: true,
            timestamp: Utc::now(),
            page_count: result.distribution.page_count,
            break_points: result.distribution.break_points.clone(),
            orphaned_headers: result.distribution.orphaned_headers.clone(),
            measurements: result.measurements.len(),
            error: None,
        };
        self.inject(data, &summary, Some(&result));

        info!(
            pages = summary.page_count,
            breaks = summary.break_points.len(),
            measurements = summary.measurements,
            "calculations injected"
        );
        Ok(summary)
    }

    /// Like [`Self::execute`], but a failed pass is recorded as
    /// `performed: false` with no hints instead of being returned.
    pub async fn execute_or_degrade(&self, data: &mut Value) -> CalculationSummary {
        match self.execute(data).await {
            Ok(summary) => summary,
            Err(e) => {
                error!(error = %e, "pre-calculation failed; rendering without pagination hints");
                let summary = CalculationSummary::failed(e.to_string());
                self.inject(data, &summary, None);
                summary
            }
        }
    }

    fn inject(&self, data: &mut Value, summary: &CalculationSummary, result: Option<&PhantomResult>) {
        let flags = PrecalcFlags {
            enabled: true,
            timestamp: summary.timestamp,
            calculation_requested: true,
            phantom_render_enabled: summary.performed,
            diagnostics_enabled: self.diagnostics,
        };
        let diagnostics = result
            .filter(|_| self.diagnostics)
            .map(|result| self.diagnostics_for(result));

        let Some(layout) = layout_object(data) else {
            warn!("request data is not an object; calculations not injected");
            return;
        };
        match (serde_json::to_value(summary), serde_json::to_value(&flags)) {
            (Ok(calculations), Ok(flags)) => {
                layout.insert("calculations".into(), calculations);
                layout.insert("fase2".into(), flags);
            }
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "failed to serialize calculation summary");
            }
        }
        match diagnostics {
            Some(diagnostics) => {
                layout.insert("diagnostics".into(), diagnostics);
            }
            None => {
                layout.remove("diagnostics");
            }
        }
    }

    fn diagnostics_for(&self, result: &PhantomResult) -> Value {
        json!({
            "probe": self.renderer.probe_name(),
            "pageMetrics": result.page_metrics,
            "pages": result.distribution.pages,
            "oversized": result.distribution.oversized,
            "measurements": result.measurements,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::phantom::PhantomOptions;
    use crate::layout::probe::scripted::{FailAt, ScriptedProbe};
    use crate::layout::probe::LayoutProbe;
    use crate::measurement::cache::{CacheConfig, ManualClock, MeasurementCache};
    use crate::measurement::{MeasurementDatabase, SharedMeasurementCache};
    use std::sync::Arc;

    fn engine(probe: Arc<dyn LayoutProbe>, diagnostics: bool) -> CalculationEngine {
        let database = MeasurementDatabase::new().shared();
        let cache = SharedMeasurementCache::new(MeasurementCache::new(
            CacheConfig::default(),
            Arc::new(ManualClock::at(0)),
        ));
        let renderer = PhantomRenderer::new(probe, cache, database.clone(), PhantomOptions::default());
        CalculationEngine::new(renderer, database, diagnostics)
    }

    fn scripted() -> Arc<ScriptedProbe> {
        Arc::new(ScriptedProbe::new(&[
            ("module-title", 48.0, 16.0),
            ("paragraph", 150.0, 0.0),
        ]))
    }

    fn data() -> Value {
        json!({
            "modulos": [{
                "titulo": "Experiencia",
                "secciones": [{ "titulo": "", "items": vec![json!({}); 10] }]
            }]
        })
    }

    #[tokio::test]
    async fn test_execute_injects_calculations_and_flags() {
        let engine = engine(scripted(), false);
        let mut data = data();
        let summary = engine.execute(&mut data).await.expect("pass");

        assert_eq!(summary.page_count, 2);
        let calculations = &data["__layout"]["calculations"];
        assert_eq!(calculations["performed"], json!(true));
        assert_eq!(calculations["pageCount"], json!(2));
        assert_eq!(calculations["breakPoints"], json!([7]));
        assert_eq!(calculations["orphanedHeaders"], json!([]));
        assert_eq!(calculations["measurements"], json!(11));
        assert!(calculations.get("error").is_none());

        let flags = &data["__layout"]["fase2"];
        assert_eq!(flags["enabled"], json!(true));
        assert_eq!(flags["calculationRequested"], json!(true));
        assert_eq!(flags["phantomRenderEnabled"], json!(true));
        assert_eq!(flags["diagnosticsEnabled"], json!(false));
        assert!(data["__layout"].get("diagnostics").is_none());
        // Input tree is left alone.
        assert_eq!(data["modulos"][0]["titulo"], json!("Experiencia"));
    }

    #[tokio::test]
    async fn test_execute_is_idempotent() {
        let engine = engine(scripted(), false);
        let mut data = data();
        engine.execute(&mut data).await.expect("pass");
        let first = data["__layout"]["calculations"].clone();
        engine.execute(&mut data).await.expect("pass");
        let second = &data["__layout"]["calculations"];

        assert_eq!(first["breakPoints"], second["breakPoints"]);
        assert_eq!(first["pageCount"], second["pageCount"]);
        assert_eq!(data["__layout"].as_object().map(|o| o.len()), Some(2));
    }

    #[tokio::test]
    async fn test_failed_pass_degrades_without_hints() {
        let probe = Arc::new(ScriptedProbe::new(&[]).failing_at(FailAt::Measure));
        let engine = engine(probe.clone(), true);
        let mut data = data();

        let summary = engine.execute_or_degrade(&mut data).await;
        assert!(!summary.performed);

        let calculations = &data["__layout"]["calculations"];
        assert_eq!(calculations["performed"], json!(false));
        assert_eq!(calculations["pageCount"], json!(0));
        assert_eq!(calculations["breakPoints"], json!([]));
        assert!(calculations["error"].as_str().is_some_and(|e| e.contains("crashed")));
        assert_eq!(data["__layout"]["fase2"]["phantomRenderEnabled"], json!(false));
        assert!(data["__layout"].get("diagnostics").is_none());
        assert_eq!(ScriptedProbe::count(&probe.detached), 1);
    }

    #[tokio::test]
    async fn test_landscape_hint_selects_landscape_page() {
        let engine = engine(scripted(), true);
        let mut data = data();
        data["__layout"] = json!({ "isLandscape": true });

        engine.execute(&mut data).await.expect("pass");
        let diagnostics = &data["__layout"]["diagnostics"];
        assert_eq!(diagnostics["pageMetrics"]["usableHeight"], json!(674.0));
        assert_eq!(diagnostics["probe"], json!("scripted"));
        // 64 + 4 × 150 = 664 fits; the fifth item breaks.
        assert_eq!(data["__layout"]["calculations"]["breakPoints"], json!([5, 9]));
        assert_eq!(data["__layout"]["isLandscape"], json!(true));
    }

    #[tokio::test]
    async fn test_reconcile_uses_shared_distribution() {
        let engine = engine(scripted(), false);
        let actual = (0..3)
            .map(|i| crate::layout::measurement::fixture(&format!("module-{i}"), "module", 500.0))
            .collect();
        let distribution = engine
            .reconcile(actual, &PageMetrics::a4_portrait())
            .await
            .expect("distribution");
        assert_eq!(distribution.page_count, 3);
        assert_eq!(distribution.break_points, vec![1, 2]);
    }
}
