//! Keymux Server
//!
//! A reverse proxy that multiplexes client requests across a managed pool
//! of Gemini API keys:
//! - OpenAI-compatible and native client surfaces on /v1 and /v1beta
//! - Admin REST API for key management on /api/admin
//! - Background reconciliation and health checking

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

mod api;
mod router;
mod state;

use keymux_core::{registry, HealthChecker, KeyPool, KeyStore, ProxyEngine, Settings, SettingsManager};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let settings = Settings::from_env();

    let level = Level::from_str(&settings.log_level).unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if settings.admin_api_key.is_empty() {
        warn!("ADMIN_API_KEY is not set; the admin API will refuse all requests");
    }
    if settings.proxy_api_key.is_empty() {
        warn!("PROXY_API_KEY is not set; /v1 and /v1beta are reachable without authentication");
    }

    let port = settings.server_port;
    let db = registry::open_database(&settings.sqlite_path).await?;
    info!("registry opened at {}", settings.sqlite_path.display());

    let store = Arc::new(KeyStore::new(db));
    let manager = Arc::new(SettingsManager::new(settings));

    let pool = Arc::new(KeyPool::new(Arc::clone(&store), Arc::clone(&manager)));
    match pool.reconcile().await {
        Ok(count) => info!("key pool loaded with {} enabled key(s)", count),
        Err(e) => warn!("initial key pool load failed: {}", e),
    }
    pool.spawn_reconcile_task();

    let engine = Arc::new(ProxyEngine::new(Arc::clone(&pool), Arc::clone(&manager))?);
    let checker = Arc::new(HealthChecker::new(
        Arc::clone(&store),
        Arc::clone(&pool),
        Arc::clone(&manager),
    )?);
    checker.spawn_schedule();

    let state = AppState { settings: manager, store, pool, engine, checker };
    let app = router::build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("=========================================================");
    info!("  keymux listening on http://{}", addr);
    info!("  chat API:        http://localhost:{}/v1/chat/completions", port);
    info!("  native API:      http://localhost:{}/v1beta/models/{{model}}:generateContent", port);
    info!("  admin API:       http://localhost:{}/api/admin/", port);
    info!("=========================================================");

    axum::serve(listener, app).await?;
    Ok(())
}
