//! Phantom rendering: an off-screen measurement pass over a structural skeleton
//! of the report.
//!
//! # Pipeline
//! 1. [`synthesize`] builds one box per structural element (optional cover,
//!    module titles, non-empty section titles, one box per item) together with
//!    the hidden HTML container the browser-backed probe mounts.
//! 2. The probe attaches the document, settles, measures every box and detaches.
//!    `detach` runs on every exit path once `attach` succeeded.
//! 3. Measurements are turned into [`Measurement`]s in traversal order and the
//!    whole pass is cached under a document fingerprint.
//! 4. [`distribute`] runs on the blocking pool.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::layout::distribution::{distribute, Distribution, OverflowPolicy};
use crate::layout::measurement::{CachedLayout, Measurement};
use crate::layout::page::PageMetrics;
use crate::layout::probe::{LayoutProbe, MountId};
use crate::layout::LayoutError;
use crate::measurement::cache::MeasurementCache;
use crate::measurement::{SharedDatabase, SharedMeasurementCache};
use crate::models::report::{item_field, ReportData};

pub const CONTAINER_ID: &str = "phantom-renderer";

const FILLER_TEXT: &str = "Lorem ipsum dolor sit amet, consectetur adipiscing elit.";

// ────────────────────────────────────────────────────────────────────────────
// Synthesis
// ────────────────────────────────────────────────────────────────────────────

/// One measurable element of the skeleton.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhantomBox {
    /// Value of the `data-phantom-box` attribute.
    pub id: String,
    /// Catalogue category (`module`, `headers`, `content`).
    pub category: String,
    /// Catalogue type, also the element's class (`module-title`, `experience-item`, ...).
    pub kind: String,
    /// Full class list as rendered.
    pub class_name: String,
    pub module_index: Option<usize>,
    pub section_index: Option<usize>,
    pub item_index: Option<usize>,
    /// Representative text content.
    pub text: String,
    pub child_count: usize,
    pub keep_together: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhantomDocument {
    /// Container width in CSS pixels (the usable page width).
    pub width: f64,
    /// Boxes in traversal order: module → section → item.
    pub boxes: Vec<PhantomBox>,
    pub html: String,
}

impl PhantomDocument {
    /// Stable fingerprint of the skeleton, used as the pass cache key.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.html.hash(&mut hasher);
        self.width.to_bits().hash(&mut hasher);
        hasher.finish()
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Item box type for a section `tipo`.
fn item_kind(tipo: Option<&str>) -> &'static str {
    match tipo {
        Some("experiencia") => "experience-item",
        Some("formacion") => "education-item",
        Some("competencias") => "competency-card",
        _ => "paragraph",
    }
}

/// Representative inner markup and text parts of one item.
fn item_parts(kind: &str, item: &Value) -> (Vec<(&'static str, String)>, bool) {
    let field = |key: &str, fallback: &str| item_field(item, key).unwrap_or_else(|| fallback.to_string());
    match kind {
        "experience-item" => (
            vec![
                ("h4", field("empresa", "Empresa")),
                ("p", field("puesto", "Puesto")),
                ("p", field("funciones", FILLER_TEXT)),
            ],
            true,
        ),
        "education-item" => (
            vec![("h4", field("titulo", "Título")), ("p", field("centro", "Centro"))],
            true,
        ),
        "competency-card" => (
            vec![
                ("span", field("nombre", "Competencia")),
                ("span", format!("{}/10", field("nivel", "8"))),
            ],
            true,
        ),
        _ => {
            let text = item
                .as_str()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .or_else(|| item_field(item, "descripcion"))
                .or_else(|| item_field(item, "texto"))
                .unwrap_or_else(|| "Contenido".to_string());
            (vec![("p", text)], false)
        }
    }
}

/// Builds the off-screen skeleton for `report` laid out at the usable width of `page`.
pub fn synthesize(report: &ReportData, page: &PageMetrics, include_cover: bool) -> PhantomDocument {
    let width = page.usable_width;
    let mut boxes = Vec::new();
    let mut html = format!(
        r#"<div id="{CONTAINER_ID}" aria-hidden="true" style="position:absolute;left:-9999px;top:-9999px;width:{width}px;visibility:hidden;overflow:hidden"><div class="phantom-content">"#
    );

    if include_cover {
        html.push_str(r#"<div class="module cover-page" data-module="cover" data-phantom-box="cover">Portada</div>"#);
        boxes.push(PhantomBox {
            id: "cover".into(),
            category: "module".into(),
            kind: "cover-page".into(),
            class_name: "module cover-page".into(),
            module_index: None,
            section_index: None,
            item_index: None,
            text: "Portada".into(),
            child_count: 0,
            keep_together: true,
        });
    }

    for (m, modulo) in report.modulos.iter().enumerate() {
        let title = modulo
            .titulo
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Módulo {}", m + 1));
        let title_id = format!("m{m}-title");
        html.push_str(&format!(
            r#"<div class="module" data-module="{m}" data-type="{}"><h2 class="module-title" data-phantom-box="{title_id}">{}</h2>"#,
            escape_html(modulo.module_type.as_deref().unwrap_or_default()),
            escape_html(&title)
        ));
        boxes.push(PhantomBox {
            id: title_id,
            category: "headers".into(),
            kind: "module-title".into(),
            class_name: "module-title".into(),
            module_index: Some(m),
            section_index: None,
            item_index: None,
            text: title,
            child_count: 0,
            keep_together: false,
        });

        for (s, seccion) in modulo.secciones.iter().enumerate() {
            html.push_str(&format!(r#"<div class="section" data-section="{s}">"#));

            if let Some(title) = seccion.titulo.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
                let id = format!("m{m}-s{s}-title");
                html.push_str(&format!(
                    r#"<h3 class="section-title" data-phantom-box="{id}">{}</h3>"#,
                    escape_html(title)
                ));
                boxes.push(PhantomBox {
                    id,
                    category: "headers".into(),
                    kind: "section-title".into(),
                    class_name: "section-title".into(),
                    module_index: Some(m),
                    section_index: Some(s),
                    item_index: None,
                    text: title.to_string(),
                    child_count: 0,
                    keep_together: false,
                });
            }

            let kind = item_kind(seccion.tipo.as_deref());
            for (i, item) in seccion.items.iter().enumerate() {
                let id = format!("m{m}-s{s}-i{i}");
                let (parts, keep_together) = item_parts(kind, item);
                let inner: String = parts
                    .iter()
                    .map(|(tag, text)| format!("<{tag}>{}</{tag}>", escape_html(text)))
                    .collect();
                html.push_str(&format!(
                    r#"<div class="section-item" data-item="{i}"><div class="{kind}" data-phantom-box="{id}">{inner}</div></div>"#
                ));
                boxes.push(PhantomBox {
                    id,
                    category: "content".into(),
                    kind: kind.to_string(),
                    class_name: kind.to_string(),
                    module_index: Some(m),
                    section_index: Some(s),
                    item_index: Some(i),
                    text: parts
                        .iter()
                        .map(|(_, text)| text.as_str())
                        .collect::<Vec<_>>()
                        .join(" "),
                    child_count: parts.len(),
                    keep_together,
                });
            }

            html.push_str("</div>");
        }

        html.push_str("</div>");
    }

    html.push_str("</div></div>");
    PhantomDocument { width, boxes, html }
}

// ────────────────────────────────────────────────────────────────────────────
// Renderer
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct PhantomOptions {
    pub include_cover: bool,
    pub overflow: OverflowPolicy,
}

/// Output of one pre-calculation pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhantomResult {
    pub measurements: Vec<Measurement>,
    pub distribution: Distribution,
    pub page_metrics: PageMetrics,
}

#[derive(Clone)]
pub struct PhantomRenderer {
    probe: Arc<dyn LayoutProbe>,
    cache: SharedMeasurementCache<CachedLayout>,
    database: SharedDatabase,
    options: PhantomOptions,
}

impl PhantomRenderer {
    pub fn new(
        probe: Arc<dyn LayoutProbe>,
        cache: SharedMeasurementCache<CachedLayout>,
        database: SharedDatabase,
        options: PhantomOptions,
    ) -> Self {
        Self {
            probe,
            cache,
            database,
            options,
        }
    }

    pub fn options(&self) -> PhantomOptions {
        self.options
    }

    pub fn probe_name(&self) -> &'static str {
        self.probe.name()
    }

    /// Measures the report skeleton and distributes it over pages of `page`.
    pub async fn pre_calculate(
        &self,
        report: &ReportData,
        page: &PageMetrics,
    ) -> Result<PhantomResult, LayoutError> {
        let document = synthesize(report, page, self.options.include_cover);
        let key = MeasurementCache::<CachedLayout>::generate_key(
            "phantom-pass",
            &[
                ("probe", self.probe.name().to_string()),
                ("boxes", document.boxes.len().to_string()),
                ("digest", format!("{:016x}", document.fingerprint())),
                ("width", format!("{:.0}", document.width)),
            ],
        );

        let renderer = self;
        let skeleton = &document;
        let cached = self
            .cache
            .get_or_calculate(&key, || async move {
                renderer.measure(skeleton).await.map(CachedLayout::Pass)
            })
            .await?;
        let measurements = match cached {
            CachedLayout::Pass(measurements) => measurements,
            CachedLayout::Element(_) => return Err(LayoutError::CacheShape(key)),
        };

        let distribution =
            distribute_blocking(measurements.clone(), page.usable_height, self.options.overflow)
                .await?;

        info!(
            elements = measurements.len(),
            pages = distribution.page_count,
            orphans = distribution.orphaned_headers.len(),
            "phantom pre-calculation complete"
        );

        Ok(PhantomResult {
            measurements,
            distribution,
            page_metrics: *page,
        })
    }

    /// Runs the probe over `document`. The mount is always detached once attached.
    async fn measure(&self, document: &PhantomDocument) -> Result<Vec<Measurement>, LayoutError> {
        let mount = self.probe.attach(document).await?;
        let result = self.measure_mounted(mount, document).await;

        if let Err(e) = self.probe.detach(mount).await {
            warn!(%mount, error = %e, "failed to detach phantom document");
        }
        result
    }

    async fn measure_mounted(
        &self,
        mount: MountId,
        document: &PhantomDocument,
    ) -> Result<Vec<Measurement>, LayoutError> {
        self.probe.settle(mount).await?;
        let mut measured: HashMap<String, _> = self
            .probe
            .measure(mount)
            .await?
            .into_iter()
            .map(|b| (b.id, b.geometry))
            .collect();

        let database = self.database.read().await;
        document
            .boxes
            .iter()
            .map(|phantom| {
                let geometry = measured
                    .remove(&phantom.id)
                    .ok_or_else(|| LayoutError::MissingBox(phantom.id.clone()))?;
                let measurement =
                    Measurement::from_geometry(&phantom.id, &phantom.class_name, &geometry).at(
                        phantom.module_index,
                        phantom.section_index,
                        phantom.item_index,
                    );
                Ok(match database.standard_for_box(&phantom.category, &phantom.kind) {
                    Some(standard) => measurement.enriched(&standard),
                    None => measurement,
                })
            })
            .collect()
    }
}

/// Runs [`distribute`] on the blocking pool.
pub async fn distribute_blocking(
    measurements: Vec<Measurement>,
    usable_height: f64,
    policy: OverflowPolicy,
) -> Result<Distribution, LayoutError> {
    tokio::task::spawn_blocking(move || distribute(&measurements, usable_height, policy))
        .await
        .map_err(|e| LayoutError::Task(e.to_string()))?
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
