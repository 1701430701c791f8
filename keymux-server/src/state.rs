//! Shared application state handed to every handler.

use std::sync::Arc;

use keymux_core::{HealthChecker, KeyPool, KeyStore, ProxyEngine, SettingsManager};

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<SettingsManager>,
    pub store: Arc<KeyStore>,
    pub pool: Arc<KeyPool>,
    pub engine: Arc<ProxyEngine>,
    pub checker: Arc<HealthChecker>,
}
