use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::errors::AppError;
use crate::layout::measurement::CachedLayout;
use crate::layout::preflight::preflight;
use crate::layout::readiness::ReadySignal;
use crate::layout::service::{FinalizeReport, RenderedSnapshot};
use crate::measurement::cache::{CacheSnapshot, CacheStats, WarmupEntry};
use crate::measurement::database::{EstimateRequest, LearnedSummary, ELEMENT_CATEGORY};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct EvictRequest {
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct EvictResponse {
    pub evicted: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct LearnRequest {
    #[serde(default = "default_learn_category")]
    pub category: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: f64,
}

fn default_learn_category() -> String {
    ELEMENT_CATEGORY.to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateBody {
    pub elements: Vec<EstimateRequest>,
    #[serde(default)]
    pub available_space: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateResponse {
    pub total_height: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fits: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSaveResponse {
    pub cache_entries: usize,
    pub learned_rows: usize,
}

/// POST /api/v1/layout/preflight
pub async fn handle_preflight(Json(mut data): Json<Value>) -> Result<Json<Value>, AppError> {
    if !data.is_object() {
        return Err(AppError::Validation("request data must be a JSON object".into()));
    }
    preflight(&mut data);
    Ok(Json(data))
}

/// POST /api/v1/layout/precalculate
///
/// A failed pass still answers 200 with `__layout.calculations.performed = false`.
pub async fn handle_precalculate(
    State(state): State<AppState>,
    Json(mut data): Json<Value>,
) -> Result<Json<Value>, AppError> {
    if !data.is_object() {
        return Err(AppError::Validation("request data must be a JSON object".into()));
    }
    state.engine.execute_or_degrade(&mut data).await;
    Ok(Json(data))
}

/// POST /api/v1/layout/finalize
pub async fn handle_finalize(
    State(state): State<AppState>,
    Json(snapshot): Json<RenderedSnapshot>,
) -> Result<Json<FinalizeReport>, AppError> {
    if snapshot.document_id.trim().is_empty() {
        return Err(AppError::Validation("documentId must not be empty".into()));
    }
    let report = state.service.finalize(&snapshot).await?;
    Ok(Json(report))
}

/// GET /api/v1/layout/ready/:document_id
pub async fn handle_ready(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<Json<ReadySignal>, AppError> {
    state
        .service
        .readiness()
        .signal(&document_id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Document {document_id} was never finalized")))
}

/// GET /api/v1/layout/cache/stats
pub async fn handle_cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats().await)
}

/// GET /api/v1/layout/cache/snapshot
pub async fn handle_cache_export(State(state): State<AppState>) -> Json<CacheSnapshot> {
    Json(state.cache.export().await)
}

/// PUT /api/v1/layout/cache/snapshot
pub async fn handle_cache_import(
    State(state): State<AppState>,
    Json(snapshot): Json<CacheSnapshot>,
) -> Json<CountResponse> {
    let count = state.cache.import(snapshot).await;
    Json(CountResponse { count })
}

/// POST /api/v1/layout/cache/warmup
pub async fn handle_cache_warmup(
    State(state): State<AppState>,
    Json(entries): Json<Vec<WarmupEntry<CachedLayout>>>,
) -> Json<CountResponse> {
    let count = state.cache.warmup(entries).await;
    Json(CountResponse { count })
}

/// POST /api/v1/layout/cache/cleanup
pub async fn handle_cache_cleanup(State(state): State<AppState>) -> Json<CountResponse> {
    let count = state.cache.cleanup().await;
    Json(CountResponse { count })
}

/// POST /api/v1/layout/cache/evict
///
/// Removes the `count` least-accessed entries.
pub async fn handle_cache_evict(
    State(state): State<AppState>,
    Json(req): Json<EvictRequest>,
) -> Json<EvictResponse> {
    let evicted = state.cache.evict_lru(req.count).await;
    info!(evicted = evicted.len(), "cache entries evicted on request");
    Json(EvictResponse { evicted })
}

/// DELETE /api/v1/layout/cache
///
/// Drops every entry and resets the statistics.
pub async fn handle_cache_clear(State(state): State<AppState>) -> StatusCode {
    state.cache.clear().await;
    StatusCode::NO_CONTENT
}

/// GET /api/v1/layout/database/learned
pub async fn handle_learned_export(
    State(state): State<AppState>,
) -> Json<BTreeMap<String, LearnedSummary>> {
    Json(state.database.read().await.export_learned_measurements())
}

/// PUT /api/v1/layout/database/learned
pub async fn handle_learned_import(
    State(state): State<AppState>,
    Json(learned): Json<BTreeMap<String, LearnedSummary>>,
) -> Json<CountResponse> {
    let count = learned.len();
    state.database.write().await.import_learned_measurements(learned);
    Json(CountResponse { count })
}

/// POST /api/v1/layout/database/learn
pub async fn handle_learn(
    State(state): State<AppState>,
    Json(req): Json<LearnRequest>,
) -> Result<Json<LearnedSummary>, AppError> {
    if !req.value.is_finite() || req.value < 0.0 {
        return Err(AppError::Validation(format!(
            "value must be a non-negative number, got {}",
            req.value
        )));
    }
    if req.category.is_empty() || req.kind.is_empty() {
        return Err(AppError::Validation("category and type are required".into()));
    }

    let mut database = state.database.write().await;
    database.learn_from_measurement(&req.category, &req.kind, req.value);
    let key = format!("{}.{}", req.category, req.kind);
    database
        .export_learned_measurements()
        .remove(&key)
        .map(Json)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("learned row {key} missing after update")))
}

/// POST /api/v1/layout/database/estimate
pub async fn handle_estimate(
    State(state): State<AppState>,
    Json(body): Json<EstimateBody>,
) -> Json<EstimateResponse> {
    let database = state.database.read().await;
    let total_height = database.estimate_total_height(&body.elements);
    let fits = body
        .available_space
        .map(|space| database.fits_in_space(&body.elements, space));
    Json(EstimateResponse { total_height, fits })
}

/// POST /api/v1/layout/snapshots/save
pub async fn handle_snapshots_save(
    State(state): State<AppState>,
) -> Result<Json<SnapshotSaveResponse>, AppError> {
    let store = state
        .snapshots
        .as_ref()
        .ok_or_else(|| AppError::ServiceUnavailable("snapshot persistence is not configured".into()))?;

    let cache = state.cache.export().await;
    let learned = state.database.read().await.export_learned_measurements();
    store.save(&cache, &learned).await?;

    info!(cache_entries = cache.cache.len(), learned_rows = learned.len(), "snapshots saved");
    Ok(Json(SnapshotSaveResponse {
        cache_entries: cache.cache.len(),
        learned_rows: learned.len(),
    }))
}
