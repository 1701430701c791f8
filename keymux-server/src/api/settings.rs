//! Admin settings: inspect the live snapshot, persist changes to the env
//! file, hot-reload.

use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, response::Json};

use crate::state::AppState;

/// GET /api/admin/settings
pub async fn get_settings(
    State(state): State<AppState>,
) -> Json<BTreeMap<String, serde_json::Value>> {
    let snapshot = state.settings.snapshot().await;
    Json(snapshot.to_display_map())
}

/// POST /api/admin/settings — write updates to the env file and swap the
/// configuration snapshot. Port and database path apply on restart only.
pub async fn update_settings(
    State(state): State<AppState>,
    Json(updates): Json<BTreeMap<String, String>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    state.settings.update_and_reload(&updates).await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": format!("failed to update env file: {e}")})),
        )
    })?;

    Ok(Json(serde_json::json!({
        "message": "settings updated and reloaded (port and database changes need a restart)"
    })))
}
