//! HTTP surface assembly: client routes, admin routes, middleware stack.

use axum::{
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use keymux_core::auth::{admin_auth_middleware, client_auth_middleware};

use crate::api::{chat, keys, settings};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let client_routes = Router::new()
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/models", get(chat::list_openai_models))
        .route("/v1beta/models", get(chat::list_native_models))
        .route("/v1beta/models/:model_and_action", post(chat::native_action))
        .layer(middleware::from_fn_with_state(
            state.settings.clone(),
            client_auth_middleware,
        ));

    let admin_protected = Router::new()
        .route("/keys", get(keys::list_keys).post(keys::add_key))
        .route("/keys/banned", get(keys::list_banned))
        .route("/keys/stats", get(keys::key_stats))
        .route("/keys/details", get(keys::key_details))
        .route("/keys/batch-add", post(keys::batch_add))
        .route("/keys/batch-delete", post(keys::batch_delete))
        .route("/keys/disabled", delete(keys::delete_disabled))
        .route("/keys/scan", post(keys::trigger_scan))
        .route("/keys/progress", get(keys::scan_progress))
        .route("/keys/:id", delete(keys::delete_key))
        .route("/keys/:id/activate", post(keys::activate_key))
        .route("/keys/:id/deactivate", post(keys::deactivate_key))
        .route("/keys/:id/check", post(keys::check_key))
        .route("/settings", get(settings::get_settings).post(settings::update_settings))
        .layer(middleware::from_fn_with_state(
            state.settings.clone(),
            admin_auth_middleware,
        ));

    let admin_routes = Router::new().route("/login", post(keys::login)).merge(admin_protected);

    Router::new()
        .merge(client_routes)
        .nest("/api/admin", admin_routes)
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, axum::Json(serde_json::json!({"status": "ok"})))
}
