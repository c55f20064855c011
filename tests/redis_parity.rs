//! Lua script bodies against their native counterparts.
//!
//! Every invocation is sent unchanged to a Redis server and to the in-memory
//! store, and the two replies must match. Runs only when `REDIS_URL` is set;
//! each run writes under a fresh key prefix.
//!
//! Timestamps stay below 2^53 ns so the doubles Lua computes with are exact.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use skp_distlimit::{
    Algorithm, Clock, DistributedSlidingWindow, FixedWindow, LeakyBucket, ManualClock,
    MemoryStorage, RateLimitConfig, RedisConfig, RedisStorage, Result, Script, ScriptInput,
    SlidingWindowCounter, SlidingWindowLog, Storage, StoreOps, TokenBucket,
};

const T0: i64 = 1_700_000_000_000_000;

fn registry_size(store: &mut dyn StoreOps, input: &ScriptInput<'_>) -> Result<Vec<i64>> {
    Ok(vec![store.smembers(input.key(0)?)?.len() as i64])
}

static REGISTRY_SIZE: Script = Script::new(
    "registry_size",
    "return {redis.call('SCARD', KEYS[1])}",
    registry_size,
);

struct Stores {
    memory: MemoryStorage,
    redis: RedisStorage,
    clock: ManualClock,
    config: RateLimitConfig,
}

impl Stores {
    async fn connect(config: RateLimitConfig) -> Option<Self> {
        let Ok(url) = std::env::var("REDIS_URL") else {
            eprintln!("REDIS_URL not set, skipping");
            return None;
        };
        let run = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        let redis = RedisStorage::new(RedisConfig::new(url).with_prefix(format!("parity:{run}:")))
            .await
            .unwrap();
        let clock = ManualClock::new(T0);

        Some(Self {
            memory: MemoryStorage::with_clock(clock.clone()),
            redis,
            clock,
            config,
        })
    }

    /// Run one invocation on both stores and return the shared reply.
    async fn check(&self, algorithm: &dyn Algorithm, key: &str) -> Vec<i64> {
        let now = self.clock.now_nanos();
        let invocation = algorithm.invocation(key, now, &self.config);
        let script = invocation.script();

        let native = self.memory.eval(script, invocation.keys(), invocation.args()).await.unwrap();
        let lua = self.redis.eval(script, invocation.keys(), invocation.args()).await.unwrap();
        assert_eq!(
            native,
            lua,
            "{} diverged {}ns into the run",
            algorithm.name(),
            now - T0
        );
        native
    }

    /// Call once per entry, after advancing the clock by that many milliseconds.
    async fn replay(&self, algorithm: &dyn Algorithm, key: &str, gaps_ms: &[u64]) -> Vec<Vec<i64>> {
        let mut replies = Vec::with_capacity(gaps_ms.len());
        for &gap in gaps_ms {
            self.clock.advance(Duration::from_millis(gap));
            replies.push(self.check(algorithm, key).await);
        }
        replies
    }

    async fn registry_size(&self, key: &str) -> (i64, i64) {
        let keys = [key.to_string()];
        let native = self.memory.eval(&REGISTRY_SIZE, &keys, &[]).await.unwrap();
        let lua = self.redis.eval(&REGISTRY_SIZE, &keys, &[]).await.unwrap();
        (native[0], lua[0])
    }
}

fn admitted(replies: &[Vec<i64>]) -> usize {
    replies.iter().filter(|reply| reply[0] == 1).count()
}

/// A burst, a steady trickle, then a long pause and a second burst.
fn schedule() -> Vec<u64> {
    let mut gaps = vec![0; 6];
    gaps.extend([100; 12]);
    gaps.push(2_500);
    gaps.extend([0; 6]);
    gaps
}

#[tokio::test]
async fn test_token_bucket_scripts_agree() {
    let Some(stores) = Stores::connect(RateLimitConfig::per_second(4).with_refill_rate(2.5)).await else {
        return;
    };

    let replies = stores.replay(&TokenBucket::new(), "user:1", &schedule()).await;
    assert!(admitted(&replies) > 4);
    assert!(admitted(&replies) < replies.len());
}

#[tokio::test]
async fn test_token_bucket_scripts_agree_on_capped_reset() {
    let config = RateLimitConfig::per_hour(1).with_refill_rate(1e-10);
    let Some(stores) = Stores::connect(config).await else {
        return;
    };

    let replies = stores.replay(&TokenBucket::new(), "user:1", &[0, 0]).await;
    assert_eq!(replies[0][0], 1);
    assert_eq!(replies[1], vec![0, 1, 0, 9_200_000_000_000_000_000]);
}

#[tokio::test]
async fn test_leaky_bucket_scripts_agree() {
    let Some(stores) = Stores::connect(RateLimitConfig::per_second(3)).await else {
        return;
    };

    let replies = stores.replay(&LeakyBucket::new(), "user:1", &schedule()).await;
    // A full queue at 3/s frees a slot a third of a second later, rounded up.
    assert_eq!(replies[3], vec![0, 3, 0, T0 + 333_333_334]);
}

#[tokio::test]
async fn test_sliding_window_log_scripts_agree() {
    let Some(stores) = Stores::connect(RateLimitConfig::per_second(5)).await else {
        return;
    };

    let replies = stores.replay(&SlidingWindowLog::new(), "user:1", &schedule()).await;
    assert_eq!(admitted(&replies[..6]), 5);
}

#[tokio::test]
async fn test_fixed_window_scripts_agree() {
    let Some(stores) = Stores::connect(RateLimitConfig::per_second(5)).await else {
        return;
    };

    let replies = stores.replay(&FixedWindow::new(), "user:1", &schedule()).await;
    assert_eq!(admitted(&replies[..6]), 5);
}

#[tokio::test]
async fn test_sliding_window_counter_scripts_agree() {
    let Some(stores) = Stores::connect(RateLimitConfig::per_second(10)).await else {
        return;
    };

    let mut gaps = vec![0; 11];
    gaps.push(1_200);
    gaps.extend([0; 8]);
    gaps.extend([100; 5]);
    let replies = stores.replay(&SlidingWindowCounter::new(), "user:1", &gaps).await;
    assert_eq!(admitted(&replies[..11]), 10);
}

#[tokio::test]
async fn test_distributed_sliding_window_scripts_agree_on_pruning() {
    let Some(stores) = Stores::connect(RateLimitConfig::per_second(3)).await else {
        return;
    };
    let node_a = DistributedSlidingWindow::new("node-a");
    let node_b = DistributedSlidingWindow::new("node-b");
    let registry = node_a.registry_key("user:1");

    assert_eq!(stores.check(&node_b, "user:1").await[0], 1);
    assert_eq!(stores.check(&node_b, "user:1").await[0], 1);

    // Store expiries follow the server's clock, so real time moves in step.
    tokio::time::sleep(Duration::from_millis(600)).await;
    stores.clock.advance(Duration::from_millis(600));
    assert_eq!(stores.check(&node_a, "user:1").await, vec![1, 3, 0, T0 + 1_600_000_000]);
    assert_eq!(stores.check(&node_a, "user:1").await[0], 0);
    assert_eq!(stores.registry_size(&registry).await, (2, 2));

    // node-b's shard has expired while the registry, refreshed by node-a,
    // still lists it.
    tokio::time::sleep(Duration::from_millis(600)).await;
    stores.clock.advance(Duration::from_millis(600));
    assert_eq!(stores.check(&node_a, "user:1").await, vec![1, 3, 1, T0 + 1_600_000_000]);
    assert_eq!(stores.registry_size(&registry).await, (1, 1));
}
