//! Domain and wire models shared between the core and the server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A durable registry row: one upstream API credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: i64,
    /// The credential string sent to the upstream.
    #[serde(rename = "key")]
    pub secret: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    /// Last four characters of the secret, for log lines that must not
    /// leak the full credential.
    pub fn secret_tail(&self) -> &str {
        let n = self.secret.len();
        &self.secret[n.saturating_sub(4)..]
    }
}

/// Outcome of one proxied attempt, fed back to the pool on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Terminal 2xx from the upstream.
    Success,
    /// Upstream signalled 429.
    RateLimited,
    /// Any other upstream 4xx; the key is presumed revoked or malformed.
    ClientInvalid,
    /// Network error, upstream 5xx, or client disconnect. Blameless.
    Transient,
}

/// Per-key volatile statistics as shown to operators.
///
/// Regenerated from live use and the health checker; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyStatsView {
    pub id: i64,
    pub health_score: i32,
    pub success_count: u64,
    pub failure_count: u64,
    pub rate_limit_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_rate_limited_at: Option<DateTime<Utc>>,
    pub on_cooldown: bool,
    pub cooldown_until: Option<DateTime<Utc>>,
}

/// A key currently excluded from selection, with its readmission time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BannedKey {
    #[serde(flatten)]
    pub key: ApiKey,
    pub banned_until: DateTime<Utc>,
}

/// Snapshot of a health-check run, queryable at any time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthCheckProgress {
    pub total_keys: usize,
    pub processed_keys: usize,
    /// Completion percentage in [0, 100].
    pub progress: f64,
    pub rate_limited_count: usize,
    pub invalid_count: usize,
    pub recovered_count: usize,
    /// `"enabled"` or `"disabled"` while a phase is running.
    pub current_phase: String,
    pub elapsed_secs: u64,
    /// Extrapolated from current throughput; absent before the first result.
    pub eta_secs: Option<u64>,
    pub is_active: bool,
}

/// OpenAI-compatible chat completion request.
///
/// Only `stream` is inspected; every other field (declared or not) is
/// forwarded to the upstream verbatim via the flattened map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One conversation message. `content` stays untyped so both plain text
/// and multimodal part arrays pass through unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: serde_json::Value,
}

/// OpenAI-shaped error envelope returned to clients on terminal failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl OpenAiErrorResponse {
    pub fn api_error(message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                message: message.into(),
                error_type: "api_error".to_string(),
                code: None,
            },
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                message: message.into(),
                error_type: "invalid_request_error".to_string(),
                code: None,
            },
        }
    }
}
