//! Authentication middleware for the client and admin surfaces.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::config::SettingsManager;

/// Pull the presented credential from `Authorization: Bearer <k>` or the
/// `x-goog-api-key` header, in that order.
pub fn extract_api_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .or_else(|| headers.get("x-goog-api-key").and_then(|h| h.to_str().ok()))
        .filter(|k| !k.is_empty())
}

/// Shared-credential gate on the proxied surfaces (/v1, /v1beta). When no
/// credential is configured, requests pass through unauthenticated.
pub async fn client_auth_middleware(
    State(settings): State<Arc<SettingsManager>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let required = settings.snapshot().await.proxy_api_key.clone();
    if required.is_empty() {
        return Ok(next.run(request).await);
    }

    match extract_api_key(request.headers()) {
        Some(provided) if provided == required => Ok(next.run(request).await),
        Some(_) => Err(StatusCode::UNAUTHORIZED),
        None => Err(StatusCode::UNAUTHORIZED),
    }
}

/// Admin gate. Refuses everything when no admin credential is configured;
/// only the bearer form is accepted here.
pub async fn admin_auth_middleware(
    State(settings): State<Arc<SettingsManager>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let required = settings.snapshot().await.admin_api_key.clone();
    if required.is_empty() {
        tracing::error!("admin API key is not configured; denying admin request");
        return Err(StatusCode::FORBIDDEN);
    }

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "));

    match provided {
        Some(key) if key == required => Ok(next.run(request).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extract_prefers_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert("x-goog-api-key", HeaderValue::from_static("xyz"));
        assert_eq!(extract_api_key(&headers), Some("abc"));
    }

    #[test]
    fn test_extract_falls_back_to_goog_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-goog-api-key", HeaderValue::from_static("xyz"));
        assert_eq!(extract_api_key(&headers), Some("xyz"));
    }

    #[test]
    fn test_extract_rejects_malformed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_api_key(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_api_key(&headers), None);
    }
}
