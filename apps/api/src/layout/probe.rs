//! Layout probes: the capability of asking a layout engine how big something is.
//!
//! A probe receives a synthesized [`PhantomDocument`], mounts it off-screen,
//! waits for the engine to settle, reports one [`BoxGeometry`] per phantom box
//! and unmounts it. The renderer guarantees `detach` is called for every
//! successful `attach`, whatever happens in between.
//!
//! - [`EstimatingProbe`] answers from the measurement database. Deterministic,
//!   used when no browser sidecar is configured and in tests.
//! - [`crate::layout::http_probe::HttpLayoutProbe`] forwards to a headless
//!   browser sidecar over HTTP.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::layout::measurement::BoxGeometry;
use crate::layout::phantom::{PhantomBox, PhantomDocument};
use crate::measurement::database::MeasurementDatabase;
use crate::measurement::SharedDatabase;

/// Line box height used when estimating wrapped text.
pub const LINE_HEIGHT_PX: f64 = 20.0;
/// Average glyph advance of the report body font.
pub const CHAR_WIDTH_PX: f64 = 7.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MountId(pub Uuid);

impl MountId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Geometry of one phantom box, identified by its `data-phantom-box` id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasuredBox {
    pub id: String,
    #[serde(flatten)]
    pub geometry: BoxGeometry,
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("probe sidecar error (status {status}): {message}")]
    Sidecar { status: u16, message: String },

    #[error("probe sidecar unavailable after {retries} retries")]
    Exhausted { retries: u32 },

    #[error("unknown mount {0}")]
    UnknownMount(MountId),

    #[error("layout engine error: {0}")]
    Engine(String),
}

#[async_trait]
pub trait LayoutProbe: Send + Sync {
    /// Short identifier, part of the pass cache key.
    fn name(&self) -> &'static str;

    /// Mounts the document off-screen.
    async fn attach(&self, document: &PhantomDocument) -> Result<MountId, ProbeError>;

    /// Waits for one full layout and paint cycle.
    async fn settle(&self, mount: MountId) -> Result<(), ProbeError>;

    /// Geometry of every phantom box of the mounted document.
    async fn measure(&self, mount: MountId) -> Result<Vec<MeasuredBox>, ProbeError>;

    /// Removes the mounted document. Idempotent.
    async fn detach(&self, mount: MountId) -> Result<(), ProbeError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Database-backed estimating probe
// ────────────────────────────────────────────────────────────────────────────

pub struct EstimatingProbe {
    database: SharedDatabase,
    mounts: Mutex<HashMap<MountId, PhantomDocument>>,
}

impl EstimatingProbe {
    pub fn new(database: SharedDatabase) -> Self {
        Self {
            database,
            mounts: Mutex::new(HashMap::new()),
        }
    }

    pub async fn mounted(&self) -> usize {
        self.mounts.lock().await.len()
    }
}

/// Estimates one box.
///
/// Content boxes are sized from their wrapped text, clamped to the catalogue band
/// of their type. Headers and module wrappers take the catalogue average.
fn estimate_box(database: &MeasurementDatabase, phantom: &PhantomBox, width: f64) -> BoxGeometry {
    let text_length = phantom.text.chars().count();
    let chars_per_line = (width / CHAR_WIDTH_PX).floor().max(1.0);
    let lines = (text_length as f64 / chars_per_line).ceil().max(1.0);
    let text_height = lines * LINE_HEIGHT_PX;

    let (height, margin_bottom) = match database.standard_for_box(&phantom.category, &phantom.kind) {
        Some(standard) if phantom.category == "content" => {
            (text_height.clamp(standard.min, standard.max), standard.margin_bottom)
        }
        Some(standard) => (standard.avg, standard.margin_bottom),
        None => (text_height, 0.0),
    };

    BoxGeometry {
        width,
        height,
        margin_bottom,
        break_inside: phantom.keep_together.then(|| "avoid".to_string()),
        text_length,
        child_count: phantom.child_count,
        ..BoxGeometry::default()
    }
}

#[async_trait]
impl LayoutProbe for EstimatingProbe {
    fn name(&self) -> &'static str {
        "estimate"
    }

    async fn attach(&self, document: &PhantomDocument) -> Result<MountId, ProbeError> {
        let mount = MountId::new();
        self.mounts.lock().await.insert(mount, document.clone());
        debug!(%mount, boxes = document.boxes.len(), "phantom document attached");
        Ok(mount)
    }

    async fn settle(&self, mount: MountId) -> Result<(), ProbeError> {
        if !self.mounts.lock().await.contains_key(&mount) {
            return Err(ProbeError::UnknownMount(mount));
        }
        // Two scheduler turns stand in for the two animation frames.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn measure(&self, mount: MountId) -> Result<Vec<MeasuredBox>, ProbeError> {
        let document = self
            .mounts
            .lock()
            .await
            .get(&mount)
            .cloned()
            .ok_or(ProbeError::UnknownMount(mount))?;

        let database = self.database.read().await;
        Ok(document
            .boxes
            .iter()
            .map(|phantom| MeasuredBox {
                id: phantom.id.clone(),
                geometry: estimate_box(&database, phantom, document.width),
            })
            .collect())
    }

    async fn detach(&self, mount: MountId) -> Result<(), ProbeError> {
        self.mounts.lock().await.remove(&mount);
        debug!(%mount, "phantom document detached");
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Test probe with fixed heights per box class
// ────────────────────────────────────────────────────────────────────────────
