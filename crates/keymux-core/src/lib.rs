//! # Keymux Core
//!
//! The key-pool engine behind the keymux proxy:
//!
//! - **`registry`** - durable key store (SQLite via sqlx), source of truth
//! - **`pool`** - in-memory live set: acquisition, verdicts, cooldowns, reconcile
//! - **`proxy`** - upstream attempt loop shared by every client dialect
//! - **`health`** - periodic and on-demand key prober
//! - **`config`** - env-driven settings with atomic hot-reload
//! - **`auth`** - axum middleware for the client and admin surfaces

pub mod auth;
pub mod config;
pub mod health;
pub mod pool;
pub mod proxy;
pub mod registry;

pub use config::{Settings, SettingsManager};
pub use health::HealthChecker;
pub use pool::KeyPool;
pub use proxy::ProxyEngine;
pub use registry::KeyStore;
