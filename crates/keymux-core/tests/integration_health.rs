//! Health checker integration tests against a mock upstream.

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use keymux_core::config::{Settings, SettingsManager};
use keymux_core::registry::{open_in_memory, KeyStore};
use keymux_core::{HealthChecker, KeyPool};
use keymux_types::Verdict;

const PROBE_PATH: &str = "/v1beta/models/gemini-2.5-pro:generateContent";

struct Harness {
    store: Arc<KeyStore>,
    pool: Arc<KeyPool>,
    checker: Arc<HealthChecker>,
}

async fn harness(server: &MockServer) -> Harness {
    let settings = Settings {
        upstream_base_url: server.uri(),
        acquire_timeout: Duration::from_millis(200),
        health_check_concurrency: 4,
        ..Settings::default()
    };
    let store = Arc::new(KeyStore::new(open_in_memory().await.unwrap()));
    let manager = Arc::new(SettingsManager::new(settings));
    let pool = Arc::new(KeyPool::new(Arc::clone(&store), Arc::clone(&manager)));
    let checker =
        Arc::new(HealthChecker::new(Arc::clone(&store), Arc::clone(&pool), manager).unwrap());
    Harness { store, pool, checker }
}

#[tokio::test]
async fn test_disabled_key_recovers_on_clean_probe() {
    let server = MockServer::start().await;
    let h = harness(&server).await;

    let key = h.store.add("sk-recovered").await.unwrap();
    h.store.set_enabled(key.id, false).await.unwrap();
    h.pool.reconcile().await.unwrap();
    assert!(h.pool.is_empty());

    Mock::given(method("POST"))
        .and(path(PROBE_PATH))
        .and(header("x-goog-api-key", "sk-recovered"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"candidates": []})))
        .expect(1)
        .mount(&server)
        .await;

    assert!(h.checker.run_all().await);

    // Re-enabled in the registry; the next reconcile admits it fresh.
    assert!(h.store.find(key.id).await.unwrap().enabled);
    h.pool.reconcile().await.unwrap();
    assert_eq!(h.pool.len(), 1);
    assert_eq!(h.pool.stats_snapshot()[0].health_score, 100);

    let progress = h.checker.progress();
    assert!(!progress.is_active);
    assert_eq!(progress.recovered_count, 1);
}

#[tokio::test]
async fn test_invalid_enabled_key_is_retired() {
    let server = MockServer::start().await;
    let h = harness(&server).await;

    let key = h.store.add("sk-dead").await.unwrap();
    h.pool.reconcile().await.unwrap();

    Mock::given(method("POST"))
        .and(path(PROBE_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_string("PERMISSION_DENIED"))
        .expect(1)
        .mount(&server)
        .await;

    assert!(h.checker.run_all().await);

    assert!(!h.store.find(key.id).await.unwrap().enabled);
    assert!(!h.pool.contains(key.id));
    assert_eq!(h.checker.progress().invalid_count, 1);
}

#[tokio::test]
async fn test_rate_limited_enabled_key_enters_cooldown() {
    let server = MockServer::start().await;
    let h = harness(&server).await;

    let key = h.store.add("sk-hot").await.unwrap();
    h.pool.reconcile().await.unwrap();

    Mock::given(method("POST"))
        .and(path(PROBE_PATH))
        .respond_with(ResponseTemplate::new(429).set_body_string("RESOURCE_EXHAUSTED"))
        .expect(1)
        .mount(&server)
        .await;

    assert!(h.checker.run_all().await);

    // Still enabled, but cooling down and penalized.
    assert!(h.store.find(key.id).await.unwrap().enabled);
    assert!(h.pool.is_on_cooldown(key.id));
    let stats = &h.pool.stats_snapshot()[0];
    assert_eq!(stats.health_score, 80);
    assert_eq!(stats.rate_limit_count, 1);
    assert_eq!(h.checker.progress().rate_limited_count, 1);
}

#[tokio::test]
async fn test_keys_on_cooldown_are_not_probed() {
    let server = MockServer::start().await;
    let h = harness(&server).await;

    let key = h.store.add("sk-cooling").await.unwrap();
    h.pool.reconcile().await.unwrap();
    h.pool.apply_verdict(key.id, Verdict::RateLimited).await;
    assert!(h.pool.is_on_cooldown(key.id));

    // Known-bad keys are skipped entirely: zero probe traffic.
    Mock::given(method("POST"))
        .and(path(PROBE_PATH))
        .respond_with(ResponseTemplate::new(403))
        .expect(0)
        .mount(&server)
        .await;

    assert!(h.checker.run_all().await);

    assert!(h.store.find(key.id).await.unwrap().enabled);
    let progress = h.checker.progress();
    assert_eq!(progress.processed_keys, 1);
    assert_eq!(progress.invalid_count, 0);
}

#[tokio::test]
async fn test_transient_probe_failures_leave_keys_alone() {
    let server = MockServer::start().await;
    let h = harness(&server).await;

    let key = h.store.add("sk-unlucky").await.unwrap();
    h.pool.reconcile().await.unwrap();

    Mock::given(method("POST"))
        .and(path(PROBE_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("try again"))
        .expect(1)
        .mount(&server)
        .await;

    assert!(h.checker.run_all().await);

    assert!(h.store.find(key.id).await.unwrap().enabled);
    assert!(h.pool.contains(key.id));
    assert!(!h.pool.is_on_cooldown(key.id));
    assert_eq!(h.pool.stats_snapshot()[0].health_score, 100);
}

#[tokio::test]
async fn test_mixed_scan_counts_every_phase() {
    let server = MockServer::start().await;
    let h = harness(&server).await;

    h.store.add("sk-healthy").await.unwrap();
    let dead = h.store.add("sk-dead").await.unwrap();
    let sleeping = h.store.add("sk-sleeping").await.unwrap();
    h.store.set_enabled(sleeping.id, false).await.unwrap();
    h.pool.reconcile().await.unwrap();
    assert_eq!(h.pool.len(), 2);

    Mock::given(method("POST"))
        .and(path(PROBE_PATH))
        .and(header("x-goog-api-key", "sk-healthy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(PROBE_PATH))
        .and(header("x-goog-api-key", "sk-dead"))
        .respond_with(ResponseTemplate::new(400).set_body_string("API_KEY_INVALID"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(PROBE_PATH))
        .and(header("x-goog-api-key", "sk-sleeping"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&server)
        .await;

    assert!(h.checker.run_all().await);

    let progress = h.checker.progress();
    assert_eq!(progress.total_keys, 3);
    assert_eq!(progress.processed_keys, 3);
    assert_eq!(progress.invalid_count, 1);
    assert_eq!(progress.recovered_count, 1);
    assert!(!progress.is_active);

    assert!(!h.store.find(dead.id).await.unwrap().enabled);
    assert!(h.store.find(sleeping.id).await.unwrap().enabled);
}
