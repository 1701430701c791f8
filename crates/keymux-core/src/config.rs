//! Env-driven settings with atomic hot-reload.
//!
//! The whole configuration is a single immutable snapshot behind a
//! `tokio::sync::RwLock`; readers always observe a consistent set of values
//! and `reload()` swaps the snapshot in one step. Admin settings updates
//! rewrite the `.env` file and then trigger a reload.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Process-wide configuration snapshot.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server_port: u16,
    /// Admin surface credential. Empty means the admin API is locked out.
    pub admin_api_key: String,
    /// Shared client credential. Empty means client auth is bypassed.
    pub proxy_api_key: String,
    pub sqlite_path: PathBuf,
    pub upstream_base_url: String,
    pub log_level: String,

    pub max_retries: u32,
    pub rate_limit_cooldown: Duration,
    pub acquire_timeout: Duration,
    pub refresh_interval: Duration,
    pub health_check_interval: Duration,
    pub health_check_concurrency: usize,
    pub min_health_score: i32,
    pub max_429_count: u64,
    pub recovery_bonus: i32,
    pub penalty_factor: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_port: 8080,
            admin_api_key: String::new(),
            proxy_api_key: String::new(),
            sqlite_path: PathBuf::from("./data/keymux.db"),
            upstream_base_url: DEFAULT_UPSTREAM_BASE_URL.to_string(),
            log_level: "info".to_string(),
            max_retries: 5,
            rate_limit_cooldown: Duration::from_secs(60),
            acquire_timeout: Duration::from_secs(30),
            refresh_interval: Duration::from_secs(300),
            health_check_interval: Duration::from_secs(3600),
            health_check_concurrency: 10,
            min_health_score: 30,
            max_429_count: 20,
            recovery_bonus: 5,
            penalty_factor: 1.5,
        }
    }
}

impl Settings {
    /// Build a snapshot from the process environment. Missing or malformed
    /// values fall back to their defaults with a warning.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_port: env_or("SERVER_PORT", defaults.server_port),
            admin_api_key: env_string("ADMIN_API_KEY"),
            proxy_api_key: env_string("PROXY_API_KEY"),
            sqlite_path: PathBuf::from(
                std::env::var("SQLITE_PATH").unwrap_or_else(|_| "./data/keymux.db".to_string()),
            ),
            upstream_base_url: std::env::var("UPSTREAM_BASE_URL")
                .ok()
                .map(|u| u.trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| DEFAULT_UPSTREAM_BASE_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            max_retries: env_or("MAX_RETRIES", defaults.max_retries),
            rate_limit_cooldown: Duration::from_secs(env_or("RATE_LIMIT_COOLDOWN", 60u64)),
            acquire_timeout: Duration::from_secs(env_or("ACQUIRE_TIMEOUT", 30u64)),
            refresh_interval: Duration::from_secs(env_or("REFRESH_INTERVAL", 300u64)),
            health_check_interval: Duration::from_secs(env_or("HEALTH_CHECK_INTERVAL", 3600u64)),
            health_check_concurrency: env_or("HEALTH_CHECK_CONCURRENCY", 10usize).max(1),
            min_health_score: env_or("MIN_HEALTH_SCORE", defaults.min_health_score),
            max_429_count: env_or("MAX_429_COUNT", defaults.max_429_count),
            recovery_bonus: env_or("RECOVERY_BONUS", defaults.recovery_bonus),
            penalty_factor: env_or("PENALTY_FACTOR", defaults.penalty_factor),
        }
    }

    /// Settings as shown on the admin surface. Secrets are included on
    /// purpose: the admin credential gates this view.
    pub fn to_display_map(&self) -> BTreeMap<String, serde_json::Value> {
        let mut map = BTreeMap::new();
        map.insert("SERVER_PORT".into(), self.server_port.into());
        map.insert("ADMIN_API_KEY".into(), self.admin_api_key.clone().into());
        map.insert("PROXY_API_KEY".into(), self.proxy_api_key.clone().into());
        map.insert("SQLITE_PATH".into(), self.sqlite_path.display().to_string().into());
        map.insert("UPSTREAM_BASE_URL".into(), self.upstream_base_url.clone().into());
        map.insert("LOG_LEVEL".into(), self.log_level.clone().into());
        map.insert("MAX_RETRIES".into(), self.max_retries.into());
        map.insert("RATE_LIMIT_COOLDOWN".into(), self.rate_limit_cooldown.as_secs().into());
        map.insert("ACQUIRE_TIMEOUT".into(), self.acquire_timeout.as_secs().into());
        map.insert("REFRESH_INTERVAL".into(), self.refresh_interval.as_secs().into());
        map.insert("HEALTH_CHECK_INTERVAL".into(), self.health_check_interval.as_secs().into());
        map.insert("HEALTH_CHECK_CONCURRENCY".into(), self.health_check_concurrency.into());
        map.insert("MIN_HEALTH_SCORE".into(), self.min_health_score.into());
        map.insert("MAX_429_COUNT".into(), self.max_429_count.into());
        map.insert("RECOVERY_BONUS".into(), self.recovery_bonus.into());
        map.insert("PENALTY_FACTOR".into(), self.penalty_factor.into());
        map
    }
}

fn env_string(key: &str) -> String {
    std::env::var(key).unwrap_or_default()
}

fn env_or<T>(key: &str, fallback: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!("invalid {}={:?}, falling back to {}", key, raw, fallback);
                fallback
            }
        },
        Err(_) => fallback,
    }
}

/// Holds the current settings snapshot and swaps it atomically on reload.
pub struct SettingsManager {
    current: RwLock<Arc<Settings>>,
    env_file: PathBuf,
}

impl SettingsManager {
    pub fn new(initial: Settings) -> Self {
        Self { current: RwLock::new(Arc::new(initial)), env_file: PathBuf::from(".env") }
    }

    /// Cheap clone of the current snapshot.
    pub async fn snapshot(&self) -> Arc<Settings> {
        self.current.read().await.clone()
    }

    /// Re-read the environment (including the `.env` file) and swap the
    /// snapshot. Database path and listen port take effect on restart only.
    pub async fn reload(&self) {
        let _ = dotenvy::from_path_override(&self.env_file);
        let fresh = Arc::new(Settings::from_env());
        *self.current.write().await = fresh;
        tracing::info!("configuration reloaded");
    }

    /// Persist `updates` into the env file, then hot-reload.
    pub async fn update_and_reload(
        &self,
        updates: &BTreeMap<String, String>,
    ) -> std::io::Result<()> {
        update_env_file(&self.env_file, updates)?;
        self.reload().await;
        Ok(())
    }
}

/// Rewrite an env file in place, updating known keys and appending new
/// ones. Comments, blank lines, and unrelated assignments are preserved.
pub fn update_env_file(path: &Path, updates: &BTreeMap<String, String>) -> std::io::Result<()> {
    let existing = std::fs::read_to_string(path).unwrap_or_default();
    let rewritten = apply_env_updates(&existing, updates);
    std::fs::write(path, rewritten)
}

fn apply_env_updates(content: &str, updates: &BTreeMap<String, String>) -> String {
    let mut seen: Vec<&str> = Vec::new();
    let mut lines: Vec<String> = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            lines.push(line.to_string());
            continue;
        }
        match trimmed.split_once('=') {
            Some((raw_key, _)) => {
                let key = raw_key.trim();
                if let Some((k, v)) = updates.get_key_value(key) {
                    lines.push(format!("{}={}", k, v));
                    seen.push(key);
                } else {
                    lines.push(line.to_string());
                }
            }
            None => lines.push(line.to_string()),
        }
    }

    for (key, value) in updates {
        if !seen.contains(&key.as_str()) {
            lines.push(format!("{}={}", key, value));
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.max_retries, 5);
        assert_eq!(s.rate_limit_cooldown, Duration::from_secs(60));
        assert_eq!(s.min_health_score, 30);
        assert_eq!(s.max_429_count, 20);
        assert_eq!(s.recovery_bonus, 5);
        assert_eq!(s.penalty_factor, 1.5);
        assert_eq!(s.refresh_interval, Duration::from_secs(300));
        assert_eq!(s.health_check_interval, Duration::from_secs(3600));
        assert_eq!(s.health_check_concurrency, 10);
    }

    #[test]
    fn test_apply_env_updates_preserves_comments_and_unknown_keys() {
        let content = "# keymux config\nSERVER_PORT=9000\n\nOTHER=keep\n";
        let mut updates = BTreeMap::new();
        updates.insert("SERVER_PORT".to_string(), "8081".to_string());
        updates.insert("MAX_RETRIES".to_string(), "3".to_string());

        let out = apply_env_updates(content, &updates);
        assert!(out.contains("# keymux config\n"));
        assert!(out.contains("SERVER_PORT=8081\n"));
        assert!(out.contains("OTHER=keep\n"));
        assert!(out.ends_with("MAX_RETRIES=3\n"));
        assert!(!out.contains("SERVER_PORT=9000"));
    }

    #[test]
    fn test_apply_env_updates_is_idempotent() {
        let mut updates = BTreeMap::new();
        updates.insert("A".to_string(), "1".to_string());
        let once = apply_env_updates("", &updates);
        let twice = apply_env_updates(&once, &updates);
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_manager_swaps_snapshot_atomically() {
        let manager = SettingsManager::new(Settings::default());
        let before = manager.snapshot().await;
        assert_eq!(before.max_retries, 5);
        // A held snapshot stays valid across reloads.
        manager.reload().await;
        assert_eq!(before.max_retries, 5);
    }
}
