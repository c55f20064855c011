//! Integration tests for the in-memory store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use skp_distlimit::{
    GcConfig, ManualClock, MemoryStorage, RateLimitConfig, RateLimiter, Result, Script,
    ScriptInput, Storage, StorageError, StoreOps,
};

const T0: i64 = 1_700_000_000_000_000_000;

fn transfer(store: &mut dyn StoreOps, input: &ScriptInput<'_>) -> Result<Vec<i64>> {
    let from = input.key(0)?;
    let to = input.key(1)?;
    store.incr(to)?;
    if store.get(from)?.is_none() {
        return Err(StorageError::script("transfer", "source missing").into());
    }
    store.incr(from)?;
    Ok(vec![1])
}

static TRANSFER: Script = Script::new("transfer", "return {1}", transfer);

#[tokio::test]
async fn test_failed_script_leaves_no_trace() {
    let storage = MemoryStorage::new();
    let keys = vec!["missing".to_string(), "target".to_string()];

    let result = storage.eval(&TRANSFER, &keys, &[]).await;
    assert!(result.is_err());
    assert!(storage.is_empty(), "partial write survived: {:?}", storage.keys());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_never_over_admit() {
    let clock = ManualClock::new(T0);
    let storage = MemoryStorage::with_clock(clock.clone());
    let limiter = RateLimiter::new(RateLimitConfig::per_minute(25), storage).with_clock(clock);
    let allowed = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for task in 0..8 {
        let limiter = limiter.clone();
        let allowed = Arc::clone(&allowed);
        handles.push(tokio::spawn(async move {
            for _ in 0..20 {
                let admitted = match task % 3 {
                    0 => limiter.sliding_window("shared").await,
                    1 => limiter.fixed_window("shared").await,
                    _ => limiter.token_bucket("shared").await.is_allowed(),
                };
                if admitted {
                    allowed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Three algorithms, each capped at 25 for the key.
    assert_eq!(allowed.load(Ordering::Relaxed), 75);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_shards_never_over_admit() {
    let clock = ManualClock::new(T0);
    let storage = Arc::new(MemoryStorage::with_clock(clock.clone()));
    let allowed = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for node in 0..4 {
        let limiter = RateLimiter::from_shared(RateLimitConfig::per_minute(30), Arc::clone(&storage))
            .with_clock(clock.clone());
        let allowed = Arc::clone(&allowed);
        handles.push(tokio::spawn(async move {
            let node_id = format!("node-{node}");
            for _ in 0..20 {
                if limiter.distributed_sliding_window("shared", &node_id).await {
                    allowed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(allowed.load(Ordering::Relaxed), 30);
}

#[tokio::test]
async fn test_keys_expire_with_the_clock() {
    let clock = ManualClock::new(T0);
    let storage = MemoryStorage::with_clock(clock.clone());
    let limiter = RateLimiter::new(RateLimitConfig::per_second(1), storage).with_clock(clock.clone());

    assert!(limiter.sliding_window("user:1").await);
    assert_eq!(limiter.storage().keys(), vec!["sw:user:1"]);

    clock.advance(Duration::from_secs(1));
    assert!(limiter.storage().keys().is_empty());
    assert_eq!(limiter.storage().len(), 1);
    assert_eq!(limiter.storage().purge_expired(), 1);
    assert!(limiter.storage().is_empty());
}

#[tokio::test]
async fn test_hash_fields_are_readable() {
    let clock = ManualClock::new(T0);
    let storage = MemoryStorage::with_clock(clock.clone());
    let limiter = RateLimiter::new(RateLimitConfig::per_second(10), storage).with_clock(clock.clone());

    assert!(limiter.token_bucket("user:1").await.is_allowed());
    let storage = limiter.storage();
    assert_eq!(storage.hash_field("tb:user:1", "tokens").as_deref(), Some("9"));
    assert_eq!(storage.hash_field("tb:user:1", "last_refill"), Some(T0.to_string()));
    assert_eq!(storage.hash_field("tb:user:1", "missing"), None);
    assert_eq!(storage.hash_field("tb:user:2", "tokens"), None);

    clock.advance(Duration::from_secs(1));
    assert_eq!(storage.hash_field("tb:user:1", "tokens"), None);
}

#[tokio::test]
async fn test_request_based_gc() {
    let clock = ManualClock::new(T0);
    let storage = MemoryStorage::from_parts(clock.clone(), GcConfig::on_requests(2));
    let limiter = RateLimiter::new(RateLimitConfig::per_second(1), storage).with_clock(clock.clone());

    limiter.fixed_window("user:1").await;
    limiter.fixed_window("user:2").await;
    assert_eq!(limiter.storage().len(), 2);

    clock.advance(Duration::from_secs(5));
    // Third evaluation triggers a sweep before running.
    limiter.fixed_window("user:3").await;
    assert_eq!(limiter.storage().keys().len(), 1);
    assert_eq!(limiter.storage().len(), 1);
}

#[tokio::test]
async fn test_clear() {
    let clock = ManualClock::new(T0);
    let storage = MemoryStorage::with_clock(clock.clone());
    let limiter = RateLimiter::new(RateLimitConfig::per_second(1), storage).with_clock(clock);

    assert!(limiter.fixed_window("user:1").await);
    assert!(!limiter.fixed_window("user:1").await);

    limiter.storage().clear();
    assert!(limiter.storage().is_empty());
    assert!(limiter.fixed_window("user:1").await);
}
