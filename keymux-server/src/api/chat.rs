//! Client surface: chat completions, model listings, native actions.
//!
//! All handlers delegate to the proxy engine and relay the upstream
//! response verbatim; only the `stream` flag and the `model:action` path
//! component are inspected here.

use axum::{
    body::Body,
    extract::{Path, RawQuery, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use bytes::Bytes;

use keymux_core::proxy::{Dialect, SseStream, UpstreamReply};
use keymux_types::{ChatCompletionRequest, OpenAiErrorResponse, ProxyError};

use crate::state::AppState;

/// POST /v1/chat/completions — dispatches on the request's `stream` flag.
pub async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    let streaming = request.stream;
    let body = match serde_json::to_vec(&request) {
        Ok(body) => Bytes::from(body),
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                OpenAiErrorResponse::invalid_request(e.to_string()),
            );
        }
    };

    if streaming {
        match state.engine.execute_stream(&Dialect::OpenAiStream, body).await {
            Ok(stream) => sse_response(stream),
            Err(e) => proxy_error_response(e),
        }
    } else {
        match state.engine.execute(&Dialect::OpenAiUnary, body).await {
            Ok(reply) => relay_response(reply),
            Err(e) => proxy_error_response(e),
        }
    }
}

/// GET /v1/models — OpenAI-shaped model list relay.
pub async fn list_openai_models(State(state): State<AppState>) -> Response {
    match state.engine.list_models(false, None).await {
        Ok(reply) => relay_response(reply),
        Err(e) => proxy_error_response(e),
    }
}

/// GET /v1beta/models — native model list relay, query forwarded.
pub async fn list_native_models(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Response {
    match state.engine.list_models(true, query.as_deref()).await {
        Ok(reply) => relay_response(reply),
        Err(e) => proxy_error_response(e),
    }
}

/// POST /v1beta/models/{model}:{action} — raw relay of the native surface.
pub async fn native_action(
    State(state): State<AppState>,
    Path(model_and_action): Path<String>,
    body: Bytes,
) -> Response {
    let Some(dialect) = Dialect::from_native_path(&model_and_action) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            OpenAiErrorResponse::invalid_request(
                "invalid URL format, expected 'model:action' with a supported action",
            ),
        );
    };

    if dialect.is_streaming() {
        match state.engine.execute_stream(&dialect, body).await {
            Ok(stream) => sse_response(stream),
            Err(e) => proxy_error_response(e),
        }
    } else {
        match state.engine.execute(&dialect, body).await {
            Ok(reply) => relay_response(reply),
            Err(e) => proxy_error_response(e),
        }
    }
}

fn relay_response(reply: UpstreamReply) -> Response {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::OK);
    (
        status,
        [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
        reply.body,
    )
        .into_response()
}

fn sse_response(stream: SseStream) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Terminal (pre-stream) failures. Upstream rejections relay the raw
/// upstream body with its status; everything else gets a structured
/// OpenAI-shaped error.
fn proxy_error_response(err: ProxyError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match err {
        ProxyError::UpstreamRejected { body, .. } if !body.is_empty() => (
            status,
            [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
            body,
        )
            .into_response(),
        other => error_response(status, OpenAiErrorResponse::api_error(other.to_string())),
    }
}

fn error_response(status: StatusCode, body: OpenAiErrorResponse) -> Response {
    (status, Json(body)).into_response()
}
