use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use keymux_types::{PoolError, Verdict};

use crate::config::{Settings, SettingsManager};
use crate::pool::{KeyPool, KeyStats};
use crate::registry::{open_in_memory, KeyStore};

fn fast_settings() -> Settings {
    Settings {
        acquire_timeout: Duration::from_millis(150),
        rate_limit_cooldown: Duration::from_secs(60),
        ..Settings::default()
    }
}

async fn pool_with(settings: Settings, secrets: &[&str]) -> (Arc<KeyPool>, Arc<KeyStore>) {
    let store = Arc::new(KeyStore::new(open_in_memory().await.unwrap()));
    for secret in secrets {
        store.add(secret).await.unwrap();
    }
    let manager = Arc::new(SettingsManager::new(settings));
    let pool = Arc::new(KeyPool::new(Arc::clone(&store), manager));
    pool.reconcile().await.unwrap();
    (pool, store)
}

#[tokio::test]
async fn test_acquire_from_empty_pool_times_out() {
    let (pool, _store) = pool_with(fast_settings(), &[]).await;

    let started = std::time::Instant::now();
    let result = pool.acquire().await;
    assert!(matches!(result, Err(PoolError::NoKeysAvailable)));
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn test_acquire_release_success_updates_stats() {
    let (pool, _store) = pool_with(fast_settings(), &["sk-a"]).await;

    let lease = pool.acquire().await.unwrap();
    let id = lease.id();
    lease.release(Verdict::Success);

    let views = pool.stats_snapshot();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].id, id);
    assert_eq!(views[0].success_count, 1);
    assert_eq!(views[0].health_score, 100);
    assert!(views[0].last_used_at.is_some());
}

#[tokio::test]
async fn test_rate_limited_key_enters_cooldown_and_is_not_acquirable() {
    let (pool, _store) = pool_with(fast_settings(), &["sk-a"]).await;

    let lease = pool.acquire().await.unwrap();
    let id = lease.id();
    lease.release(Verdict::RateLimited);

    let views = pool.stats_snapshot();
    assert_eq!(views[0].health_score, 80);
    assert_eq!(views[0].rate_limit_count, 1);
    assert!(views[0].on_cooldown);
    assert_eq!(pool.count_cooldowns(), 1);

    // A one-key pool cannot self-recover inside the cooldown window.
    assert!(matches!(pool.acquire().await, Err(PoolError::NoKeysAvailable)));
    assert!(pool.is_on_cooldown(id));
}

#[tokio::test]
async fn test_cooldown_expiry_readmits_without_polling_registry() {
    let settings = Settings {
        rate_limit_cooldown: Duration::from_millis(100),
        acquire_timeout: Duration::from_secs(2),
        ..Settings::default()
    };
    let (pool, _store) = pool_with(settings, &["sk-a"]).await;

    pool.acquire().await.unwrap().release(Verdict::RateLimited);
    assert_eq!(pool.count_cooldowns(), 1);

    // Blocks past the 100ms cooldown, then the key comes back on its own.
    let lease = pool.acquire().await.unwrap();
    lease.release(Verdict::Success);
    assert_eq!(pool.count_cooldowns(), 0);
}

#[tokio::test]
async fn test_success_clears_cooldown() {
    let (pool, _store) = pool_with(fast_settings(), &["sk-a"]).await;

    let lease = pool.acquire().await.unwrap();
    let id = lease.id();
    lease.release(Verdict::RateLimited);
    assert!(pool.is_on_cooldown(id));

    pool.apply_verdict(id, Verdict::Success).await;
    assert!(!pool.is_on_cooldown(id));
    assert_eq!(pool.stats_snapshot()[0].health_score, 85);
}

#[tokio::test]
async fn test_graduated_cooldown_on_third_rate_limit() {
    let (pool, _store) = pool_with(fast_settings(), &["sk-a"]).await;
    let id = pool.stats_snapshot()[0].id;

    for _ in 0..3 {
        pool.apply_verdict(id, Verdict::RateLimited).await;
    }

    // Third 429 lands in the base x penalty_factor bucket: 60s x 1.5 = 90s.
    let until = pool.cooldown_until(id).unwrap();
    let remaining = (until - Utc::now()).num_seconds();
    assert!((85..=90).contains(&remaining), "remaining {remaining}s");
}

#[tokio::test]
async fn test_client_invalid_retires_key() {
    let (pool, store) = pool_with(fast_settings(), &["sk-a", "sk-b"]).await;

    let lease = pool.acquire().await.unwrap();
    let id = lease.id();
    lease.release(Verdict::ClientInvalid);

    // Evicted from the live set at once.
    assert!(!pool.contains(id));
    assert_eq!(pool.len(), 1);

    // The registry demotion is spawned; wait for it to land.
    let mut disabled = false;
    for _ in 0..50 {
        if !store.find(id).await.unwrap().enabled {
            disabled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(disabled, "key {id} was not demoted in the registry");

    // The survivor still serves.
    let lease = pool.acquire().await.unwrap();
    assert_ne!(lease.id(), id);
    lease.release(Verdict::Success);
}

#[tokio::test]
async fn test_dropped_lease_releases_as_transient() {
    let (pool, _store) = pool_with(fast_settings(), &["sk-a"]).await;

    {
        let _lease = pool.acquire().await.unwrap();
        // Client went away mid-flight: the lease drops unreleased.
    }

    let views = pool.stats_snapshot();
    assert_eq!(views[0].health_score, 100);
    assert_eq!(views[0].success_count, 0);
    assert_eq!(views[0].failure_count, 0);
    assert!(views[0].last_used_at.is_some());

    // The key is back; no leak.
    let lease = pool.acquire().await.unwrap();
    lease.release(Verdict::Success);
}

#[tokio::test]
async fn test_reconcile_drops_registry_disabled_keys_even_on_cooldown() {
    let (pool, store) = pool_with(fast_settings(), &["sk-a", "sk-b"]).await;
    let views = pool.stats_snapshot();
    let victim = views[0].id;

    pool.apply_verdict(victim, Verdict::RateLimited).await;
    assert!(pool.is_on_cooldown(victim));

    store.set_enabled(victim, false).await.unwrap();
    pool.reconcile().await.unwrap();

    assert!(!pool.contains(victim));
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.count_cooldowns(), 0);
}

#[tokio::test]
async fn test_reconcile_retains_stats_for_surviving_keys() {
    let (pool, store) = pool_with(fast_settings(), &["sk-a"]).await;
    let id = pool.stats_snapshot()[0].id;

    pool.apply_verdict(id, Verdict::Success).await;
    pool.apply_verdict(id, Verdict::Success).await;

    store.add("sk-new").await.unwrap();
    pool.reconcile().await.unwrap();

    let views = pool.stats_snapshot();
    assert_eq!(views.len(), 2);
    let survivor = views.iter().find(|v| v.id == id).unwrap();
    assert_eq!(survivor.success_count, 2);
    let fresh = views.iter().find(|v| v.id != id).unwrap();
    assert_eq!(fresh.health_score, 100);
    assert_eq!(fresh.success_count, 0);
}

#[tokio::test]
async fn test_selection_skips_unhealthy_keys() {
    let (pool, _store) = pool_with(fast_settings(), &["sk-a", "sk-b"]).await;
    let views = pool.stats_snapshot();
    let (sick, healthy) = (views[0].id, views[1].id);

    pool.inject_stats(sick, KeyStats { health_score: 10, ..KeyStats::default() });

    for _ in 0..50 {
        let lease = pool.acquire().await.unwrap();
        assert_eq!(lease.id(), healthy, "key below MIN_HEALTH_SCORE was selected");
        lease.release(Verdict::Success);
    }
}

#[tokio::test]
async fn test_selection_skips_keys_over_429_budget() {
    let (pool, _store) = pool_with(fast_settings(), &["sk-a", "sk-b"]).await;
    let views = pool.stats_snapshot();
    let (hot, calm) = (views[0].id, views[1].id);

    pool.inject_stats(hot, KeyStats { rate_limit_count: 21, ..KeyStats::default() });

    for _ in 0..50 {
        let lease = pool.acquire().await.unwrap();
        assert_eq!(lease.id(), calm, "key over MAX_429_COUNT was selected");
        lease.release(Verdict::Success);
    }
}

#[tokio::test]
async fn test_banned_snapshot_lists_cooling_keys() {
    let (pool, _store) = pool_with(fast_settings(), &["sk-a", "sk-b"]).await;
    let id = pool.stats_snapshot()[0].id;

    pool.apply_verdict(id, Verdict::RateLimited).await;

    let banned = pool.snapshot_cooldowns();
    assert_eq!(banned.len(), 1);
    assert_eq!(banned[0].key.id, id);
    assert!(banned[0].banned_until > Utc::now());
}

#[tokio::test]
async fn test_concurrent_acquires_all_pair_with_releases() {
    let (pool, _store) = pool_with(
        Settings { acquire_timeout: Duration::from_secs(5), ..Settings::default() },
        &["sk-a", "sk-b", "sk-c"],
    )
    .await;

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..40 {
        let pool = Arc::clone(&pool);
        tasks.spawn(async move {
            let lease = pool.acquire().await.unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
            lease.release(Verdict::Success);
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap();
    }

    let views = pool.stats_snapshot();
    let total: u64 = views.iter().map(|v| v.success_count).sum();
    assert_eq!(total, 40);
    assert!(views.iter().all(|v| v.health_score == 100));
}
