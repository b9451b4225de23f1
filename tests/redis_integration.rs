//! Engine tests against a real Redis. Run with
//! `REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored`.

use slidegate::rate_limiter::{now_millis, DEFAULT_STORE_TIMEOUT};
use slidegate::{RateLimitEngine, RedisStore, ThrottlerError};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

async fn redis_store() -> RedisStore {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    RedisStore::connect(&url, "slidegate-test").await.unwrap()
}

fn unique_key(name: &str) -> String {
    format!("{}-{}", name, Uuid::new_v4().simple())
}

#[tokio::test]
#[ignore]
async fn test_sliding_window_against_redis() {
    let store = redis_store().await;
    let engine = RateLimitEngine::connect(Arc::new(store.clone()), DEFAULT_STORE_TIMEOUT)
        .await
        .unwrap();
    let key = unique_key("test-client");
    let window = Duration::from_secs(2);
    let t0 = now_millis();

    for (i, expected) in [4u64, 3, 2, 1, 0].into_iter().enumerate() {
        let decision = engine.allow(&key, Some(t0 + i as u64), 5, window).await.unwrap();
        assert!(decision.allowed, "request {} should be allowed", i);
        assert_eq!(decision.remaining, expected);
    }

    // Expiry is twice the window.
    let ttl_after_admit = store.pttl(&key).await.unwrap();
    assert!(ttl_after_admit > 2_000 && ttl_after_admit <= 4_000, "pttl {}", ttl_after_admit);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let denied = engine.allow(&key, Some(t0 + 5), 5, window).await.unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);
    assert_eq!(store.entry_count(&key).await.unwrap(), 5);
    assert!(store.pttl(&key).await.unwrap() < ttl_after_admit);

    let later = engine.allow(&key, Some(t0 + 2_005), 5, window).await.unwrap();
    assert!(later.allowed);
    assert_eq!(later.remaining, 4);

    store.clear(&key).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_multiple_clients_against_redis() {
    let store = redis_store().await;
    let engine = RateLimitEngine::connect(Arc::new(store.clone()), DEFAULT_STORE_TIMEOUT)
        .await
        .unwrap();
    let a = unique_key("clientA");
    let b = unique_key("clientB");
    let window = Duration::from_secs(1);
    let t0 = now_millis();

    for i in 0..3 {
        assert!(engine.allow(&a, Some(t0 + i), 3, window).await.unwrap().allowed);
        assert!(engine.allow(&b, Some(t0 + i), 3, window).await.unwrap().allowed);
    }
    assert!(!engine.allow(&a, Some(t0 + 3), 3, window).await.unwrap().allowed);
    assert!(!engine.allow(&b, Some(t0 + 3), 3, window).await.unwrap().allowed);

    store.clear(&a).await.unwrap();
    store.clear(&b).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_concurrent_engines_share_one_quota() {
    let store = redis_store().await;
    let key = unique_key("hot");
    let limit = 10;

    // Separate engines stand in for separate service instances.
    let mut tasks = Vec::new();
    for _ in 0..40 {
        let engine = RateLimitEngine::new(Arc::new(store.clone()), DEFAULT_STORE_TIMEOUT);
        let key = key.clone();
        tasks.push(tokio::spawn(async move {
            engine.allow(&key, None, limit, Duration::from_secs(30)).await
        }));
    }

    let mut admitted = 0;
    for task in tasks {
        if task.await.unwrap().unwrap().allowed {
            admitted += 1;
        }
    }

    assert_eq!(admitted, limit);
    assert_eq!(store.entry_count(&key).await.unwrap(), limit as u64);
    store.clear(&key).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_reloads_script_after_flush() {
    let store = redis_store().await;
    let engine = RateLimitEngine::connect(Arc::new(store.clone()), DEFAULT_STORE_TIMEOUT)
        .await
        .unwrap();
    let key = unique_key("flushed");

    engine.allow(&key, None, 5, Duration::from_secs(5)).await.unwrap();
    store.flush_procedures().await.unwrap();

    let decision = engine.allow(&key, None, 5, Duration::from_secs(5)).await.unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 3);

    store.clear(&key).await.unwrap();
}

#[tokio::test]
async fn test_unreachable_redis_fails_closed() {
    // Nothing listens on port 1.
    let result = RedisStore::connect("redis://127.0.0.1:1", "slidegate-test").await;
    let err = result.err().expect("connecting to a closed port should fail");
    assert!(matches!(
        ThrottlerError::from(err),
        ThrottlerError::StoreUnavailable(_)
    ));
}
