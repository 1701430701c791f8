//! Admin surface: key CRUD, status flips, banned list, statistics,
//! health-check control.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};

use keymux_core::registry::StatusFilter;
use keymux_types::{ApiKey, BannedKey, HealthCheckProgress, KeyStatsView};

use super::registry_error;
use crate::state::AppState;

type ApiError = (StatusCode, Json<serde_json::Value>);

#[derive(Deserialize)]
pub struct LoginRequest {
    pub api_key: String,
}

/// POST /api/admin/login — admin credential check for the dashboard.
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let required = state.settings.snapshot().await.admin_api_key.clone();
    if required.is_empty() || payload.api_key != required {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "invalid admin API key"})),
        ));
    }
    Ok(Json(serde_json::json!({"message": "login successful"})))
}

#[derive(Deserialize)]
pub struct AddKeyRequest {
    pub api_key: String,
}

/// POST /api/admin/keys — add one key and validate it immediately. A key
/// that fails validation is kept, but disabled.
pub async fn add_key(
    State(state): State<AppState>,
    Json(payload): Json<AddKeyRequest>,
) -> Result<Json<ApiKey>, ApiError> {
    let mut key = state.store.add(&payload.api_key).await.map_err(registry_error)?;

    tracing::info!("key {} added, validating...", key.id);
    let (valid, reason) = state.engine.validate_key(&key.secret).await;
    if !valid {
        tracing::warn!("new key {} failed validation, disabling: {}", key.id, reason);
        state.store.disable(key.id, &format!("validation on admission failed: {reason}")).await;
        key.enabled = false;
    }
    Ok(Json(key))
}

fn default_page() -> u32 {
    1
}
fn default_page_size() -> u32 {
    10
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size", rename = "pageSize")]
    pub page_size: u32,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Serialize)]
pub struct KeyListResponse {
    pub keys: Vec<ApiKey>,
    pub total_count: i64,
    pub page: u32,
    pub page_size: u32,
}

/// GET /api/admin/keys — paginated listing, newest first.
pub async fn list_keys(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<KeyListResponse>, ApiError> {
    let filter = StatusFilter::parse(query.status.as_deref().unwrap_or("enabled"));
    let page = query.page.max(1);
    let page_size = query.page_size.max(1);

    let (keys, total) =
        state.store.list_paged(page, page_size, filter).await.map_err(registry_error)?;
    Ok(Json(KeyListResponse { keys, total_count: total, page, page_size }))
}

#[derive(Deserialize)]
pub struct BatchAddRequest {
    pub keys: Vec<String>,
}

/// POST /api/admin/keys/batch-add — bulk insert, duplicates skipped.
pub async fn batch_add(
    State(state): State<AppState>,
    Json(payload): Json<BatchAddRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (added, skipped) = state.store.add_many(&payload.keys).await.map_err(registry_error)?;
    tracing::info!("batch add complete: {} added, {} skipped", added, skipped);
    Ok(Json(serde_json::json!({
        "message": "batch add complete",
        "added": added,
        "skipped": skipped,
    })))
}

#[derive(Deserialize)]
pub struct BatchDeleteRequest {
    pub ids: Vec<i64>,
}

/// POST /api/admin/keys/batch-delete
pub async fn batch_delete(
    State(state): State<AppState>,
    Json(payload): Json<BatchDeleteRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = state.store.delete_many(&payload.ids).await.map_err(registry_error)?;
    Ok(Json(serde_json::json!({"message": "batch delete complete", "deleted": deleted})))
}

/// DELETE /api/admin/keys/disabled — purge every disabled key.
pub async fn delete_disabled(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = state.store.delete_disabled().await.map_err(registry_error)?;
    Ok(Json(serde_json::json!({"message": "disabled keys deleted", "deleted": deleted})))
}

/// DELETE /api/admin/keys/:id
pub async fn delete_key(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.store.delete(id).await.map_err(registry_error)?;
    state.pool.evict(id);
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/admin/keys/:id/activate
pub async fn activate_key(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    set_key_status(&state, id, true).await
}

/// POST /api/admin/keys/:id/deactivate
pub async fn deactivate_key(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    set_key_status(&state, id, false).await
}

async fn set_key_status(
    state: &AppState,
    id: i64,
    enabled: bool,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.store.set_enabled(id, enabled).await.map_err(registry_error)?;
    if !enabled {
        state.pool.evict(id);
    }
    Ok(Json(serde_json::json!({"status": "success", "id": id, "enabled": enabled})))
}

/// POST /api/admin/keys/:id/check — validate one key and sync its
/// enabled bit with the result.
pub async fn check_key(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let key = state.store.find(id).await.map_err(registry_error)?;
    let (valid, reason) = state.engine.validate_key(&key.secret).await;

    if key.enabled != valid {
        tracing::info!("key {} status changed to {} after validation: {}", id, valid, reason);
        state.store.set_enabled(id, valid).await.map_err(registry_error)?;
        if !valid {
            state.pool.evict(id);
        }
    }
    Ok(Json(serde_json::json!({"is_valid": valid, "reason": reason})))
}

#[derive(Serialize)]
pub struct BannedListResponse {
    pub keys: Vec<BannedKey>,
    pub total_count: usize,
    pub page: u32,
    pub page_size: u32,
}

/// GET /api/admin/keys/banned — keys currently on cooldown.
pub async fn list_banned(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<BannedListResponse> {
    let page = query.page.max(1);
    let page_size = query.page_size.max(1);

    let banned = state.pool.snapshot_cooldowns();
    let total = banned.len();
    // Saturate rather than overflow on huge page numbers; pages past the
    // end come back empty.
    let start = (page as usize - 1).saturating_mul(page_size as usize);
    let keys: Vec<BannedKey> =
        banned.into_iter().skip(start).take(page_size as usize).collect();

    Json(BannedListResponse { keys, total_count: total, page, page_size })
}

/// GET /api/admin/keys/stats — aggregate counts.
pub async fn key_stats(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (enabled, disabled) = state.store.count_by_status().await.map_err(registry_error)?;
    Ok(Json(serde_json::json!({
        "enabled_count": enabled,
        "disabled_count": disabled,
        "banned_count": state.pool.count_cooldowns(),
    })))
}

/// GET /api/admin/keys/details — per-key volatile statistics.
pub async fn key_details(State(state): State<AppState>) -> Json<Vec<KeyStatsView>> {
    Json(state.pool.stats_snapshot())
}

/// POST /api/admin/keys/scan — start a health check in the background.
pub async fn trigger_scan(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.checker.spawn_run() {
        return Err((
            StatusCode::CONFLICT,
            Json(serde_json::json!({"error": "a health check is already running"})),
        ));
    }
    Ok(Json(serde_json::json!({
        "message": "health check started; follow progress via /api/admin/keys/progress"
    })))
}

/// GET /api/admin/keys/progress
pub async fn scan_progress(State(state): State<AppState>) -> Json<HealthCheckProgress> {
    Json(state.checker.progress())
}
