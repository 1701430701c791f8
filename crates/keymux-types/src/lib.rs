//! # Keymux Types
//!
//! Shared type system for the keymux key-pool proxy:
//!
//! - **`error`** - Typed error hierarchy for the registry, pool, and proxy engine
//! - **`models`** - Domain and wire models (keys, verdicts, stats, progress)
//!
//! This crate sits at the bottom of the dependency graph; both
//! `keymux-core` and `keymux-server` build on it. All types are
//! serializable via serde and cheap to clone across async boundaries.

pub mod error;
pub mod models;

pub use error::{PoolError, ProxyError, RegistryError};
pub use models::{
    ApiKey, BannedKey, ChatCompletionRequest, ErrorDetail, HealthCheckProgress, KeyStatsView,
    OpenAiErrorResponse, Verdict,
};
