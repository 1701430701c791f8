//! The client dialects sharing the retry loop.
//!
//! Each variant captures the upstream URL template, the auth-header
//! convention, and whether the response is relayed as a stream; the
//! attempt loop itself is written once in the engine.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};

/// Native actions routed through `/v1beta/models/{model}:{action}`.
pub const ACTION_GENERATE: &str = "generateContent";
pub const ACTION_STREAM_GENERATE: &str = "streamGenerateContent";
pub const ACTION_COUNT_TOKENS: &str = "countTokens";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dialect {
    /// OpenAI-compatible chat completion, unary.
    OpenAiUnary,
    /// OpenAI-compatible chat completion, SSE.
    OpenAiStream,
    NativeGenerate { model: String },
    NativeStream { model: String },
    NativeCountTokens { model: String },
}

impl Dialect {
    /// Parse the `model:action` path component of the native surface.
    pub fn from_native_path(model_and_action: &str) -> Option<Self> {
        let (model, action) = model_and_action.split_once(':')?;
        if model.is_empty() {
            return None;
        }
        match action {
            ACTION_GENERATE => Some(Self::NativeGenerate { model: model.to_string() }),
            ACTION_STREAM_GENERATE => Some(Self::NativeStream { model: model.to_string() }),
            ACTION_COUNT_TOKENS => Some(Self::NativeCountTokens { model: model.to_string() }),
            _ => None,
        }
    }

    pub fn url(&self, base: &str) -> String {
        match self {
            Self::OpenAiUnary | Self::OpenAiStream => {
                format!("{base}/v1beta/openai/chat/completions")
            }
            Self::NativeGenerate { model } => {
                format!("{base}/v1beta/models/{model}:generateContent")
            }
            Self::NativeStream { model } => {
                format!("{base}/v1beta/models/{model}:streamGenerateContent?alt=sse")
            }
            Self::NativeCountTokens { model } => {
                format!("{base}/v1beta/models/{model}:countTokens")
            }
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::OpenAiStream | Self::NativeStream { .. })
    }

    /// Headers for one attempt. The OpenAI-compatible surface uses a
    /// bearer token, the native surface the `x-goog-api-key` convention.
    pub fn headers(&self, secret: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        match self {
            Self::OpenAiUnary | Self::OpenAiStream => {
                if let Ok(value) = HeaderValue::from_str(&format!("Bearer {secret}")) {
                    headers.insert(AUTHORIZATION, value);
                }
            }
            Self::NativeGenerate { .. }
            | Self::NativeStream { .. }
            | Self::NativeCountTokens { .. } => {
                if let Ok(value) = HeaderValue::from_str(secret) {
                    headers.insert("x-goog-api-key", value);
                }
            }
        }

        if self.is_streaming() {
            headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        }
        headers
    }

    /// Short tag for log lines.
    pub fn label(&self) -> &'static str {
        match self {
            Self::OpenAiUnary => "chat",
            Self::OpenAiStream => "chat-stream",
            Self::NativeGenerate { .. } => "generate",
            Self::NativeStream { .. } => "stream-generate",
            Self::NativeCountTokens { .. } => "count-tokens",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_path_parsing() {
        assert_eq!(
            Dialect::from_native_path("gemini-2.5-pro:generateContent"),
            Some(Dialect::NativeGenerate { model: "gemini-2.5-pro".into() })
        );
        assert_eq!(
            Dialect::from_native_path("gemini-2.5-flash:streamGenerateContent"),
            Some(Dialect::NativeStream { model: "gemini-2.5-flash".into() })
        );
        assert!(Dialect::from_native_path("gemini-2.5-pro:embedContent").is_none());
        assert!(Dialect::from_native_path("no-action-here").is_none());
        assert!(Dialect::from_native_path(":generateContent").is_none());
    }

    #[test]
    fn test_urls() {
        let base = "https://upstream.test";
        assert_eq!(
            Dialect::OpenAiUnary.url(base),
            "https://upstream.test/v1beta/openai/chat/completions"
        );
        assert_eq!(
            Dialect::NativeStream { model: "m".into() }.url(base),
            "https://upstream.test/v1beta/models/m:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn test_auth_header_convention() {
        let openai = Dialect::OpenAiUnary.headers("sk-test");
        assert_eq!(openai.get(AUTHORIZATION).unwrap(), "Bearer sk-test");
        assert!(openai.get("x-goog-api-key").is_none());

        let native = Dialect::NativeGenerate { model: "m".into() }.headers("sk-test");
        assert_eq!(native.get("x-goog-api-key").unwrap(), "sk-test");
        assert!(native.get(AUTHORIZATION).is_none());

        let stream = Dialect::OpenAiStream.headers("sk-test");
        assert_eq!(stream.get(ACCEPT).unwrap(), "text/event-stream");
    }
}
