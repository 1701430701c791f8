//! Handler modules for the client and admin surfaces.

pub mod chat;
pub mod keys;
pub mod settings;

use axum::http::StatusCode;
use axum::response::Json;

use keymux_types::RegistryError;

/// Map registry failures onto admin API responses.
pub fn registry_error(err: RegistryError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match err {
        RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
        RegistryError::Duplicate => StatusCode::CONFLICT,
        RegistryError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": err.to_string() })))
}
