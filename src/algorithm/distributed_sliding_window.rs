//! Distributed Sliding Window rate limiting algorithm.
//!
//! A sliding log split into one shard per node. Each node prunes and appends
//! only to its own shard and reads the others with `ZCOUNT` over the live
//! range, so no node ever mutates another node's entries. The sum over all
//! active shards estimates the global count.
//!
//! Keys used for caller key `k`:
//!
//! - `dsw:k`: global sorted set of every admitted event, members tagged with
//!   the admitting node
//! - `dsw:k:shard:<node>`: one node's sorted set of admitted events
//! - `dsw:k:shards`: registry of active node ids
//!
//! The registry carries its own expiry, and any registered node whose shard
//! key has expired is removed from it on the next read, so a node that stops
//! emitting events drops out of the estimate.
//!
//! The derived keys are not declared to the store. On Redis Cluster the whole
//! family must hash to one slot, e.g. by wrapping the caller key in `{}`.
//!
//! The suffixes share the `dsw:` namespace with caller keys. A caller key
//! ending in `:shard:<node>` or `:shards` names the same store key as the
//! shard or registry of its stem, so callers of this algorithm must not use
//! keys of that shape.

use crate::algorithm::Algorithm;
use crate::config::RateLimitConfig;
use crate::decision::Decision;
use crate::error::Result;
use crate::script::{Invocation, Script, ScriptInput, event_member};
use crate::storage::{ScoreRange, StoreOps};

/// Distributed Sliding Window rate limiting algorithm, bound to one node.
#[derive(Debug, Clone)]
pub struct DistributedSlidingWindow {
    node_id: String,
}

impl DistributedSlidingWindow {
    /// Create an instance that records events in `node_id`'s shard.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
        }
    }

    /// The node this instance records for.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Store key of `node`'s shard for caller `key`.
    pub fn shard_key(&self, key: &str, node: &str) -> String {
        format!("{}:shard:{}", self.store_key(key), node)
    }

    /// Store key of the active shard registry for caller `key`.
    pub fn registry_key(&self, key: &str) -> String {
        format!("{}:shards", self.store_key(key))
    }
}

impl Algorithm for DistributedSlidingWindow {
    fn name(&self) -> &'static str {
        "distributed_sliding_window"
    }

    fn prefix(&self) -> &'static str {
        "dsw:"
    }

    fn invocation(&self, key: &str, now: i64, config: &RateLimitConfig) -> Invocation {
        Invocation::new(&SCRIPT)
            .key(self.store_key(key))
            .key(self.shard_key(key, &self.node_id))
            .arg(now)
            .arg(config.window_nanos())
            .arg(config.capacity_i64())
            .arg(self.node_id.as_str())
            .arg(config.window_ttl_secs())
            .arg(event_member(now))
            .arg(now.saturating_sub(config.window_nanos()))
    }
}

/// Live event counts seen by one node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardCounts {
    /// Entries in this node's own shard.
    pub own: u64,
    /// Live entries summed over every other active shard.
    pub others: u64,
}

impl ShardCounts {
    /// Estimated global count.
    pub fn estimate(&self) -> u64 {
        self.own.saturating_add(self.others)
    }
}

/// Decide on one request from the shard counts. `own_oldest` is the earliest
/// live entry of this node's shard. An allowed decision means `now` is to be
/// recorded in the global set and in this node's shard.
pub fn evaluate(
    now: i64,
    window: i64,
    max_requests: i64,
    counts: ShardCounts,
    own_oldest: Option<i64>,
) -> Decision {
    let total = max_requests as u64;
    let estimate = counts.estimate();
    let reset_at = own_oldest.unwrap_or(now) + window;

    if estimate < total {
        Decision::allowed(total, total - estimate - 1, reset_at)
    } else {
        Decision::denied(total, 0, reset_at)
    }
}

const LUA: &str = r#"
local global_key = KEYS[1]
local shard_key = KEYS[2]
local registry_key = global_key .. ':shards'
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local max_requests = tonumber(ARGV[3])
local node_id = ARGV[4]
local ttl = tonumber(ARGV[5])
local member = ARGV[6]
local cutoff = ARGV[7]

redis.call('ZREMRANGEBYSCORE', global_key, '-inf', cutoff)
redis.call('ZREMRANGEBYSCORE', shard_key, '-inf', cutoff)
redis.call('SADD', registry_key, node_id)
redis.call('EXPIRE', registry_key, ttl)

local others = 0
for _, id in ipairs(redis.call('SMEMBERS', registry_key)) do
    if id ~= node_id then
        local other_key = global_key .. ':shard:' .. id
        if redis.call('EXISTS', other_key) == 0 then
            redis.call('SREM', registry_key, id)
        else
            others = others + redis.call('ZCOUNT', other_key, '(' .. cutoff, '+inf')
        end
    end
end

local own = redis.call('ZCARD', shard_key)
local first = redis.call('ZRANGE', shard_key, 0, 0, 'WITHSCORES')
local reset_at = (tonumber(first[2]) or now) + window
local estimate = own + others

if estimate < max_requests then
    redis.call('ZADD', global_key, ARGV[1], member .. ':' .. node_id)
    redis.call('ZADD', shard_key, ARGV[1], member)
    redis.call('EXPIRE', global_key, ttl)
    redis.call('EXPIRE', shard_key, ttl)
    return {1, max_requests, max_requests - estimate - 1, reset_at}
end
return {0, max_requests, 0, reset_at}
"#;

pub(crate) static SCRIPT: Script = Script::new("distributed_sliding_window", LUA, run);

fn run(store: &mut dyn StoreOps, input: &ScriptInput<'_>) -> Result<Vec<i64>> {
    let global_key = input.key(0)?;
    let shard_key = input.key(1)?;
    let now = input.int(0)?;
    let window = input.int(1)?;
    let max_requests = input.int(2)?;
    let node_id = input.text(3)?;
    let ttl = input.int(4)?.max(1) as u64;
    let member = input.text(5)?;
    let cutoff = input.int(6)? as f64;
    let registry_key = format!("{global_key}:shards");

    store.zremrangebyscore(global_key, ScoreRange::up_to(cutoff))?;
    store.zremrangebyscore(shard_key, ScoreRange::up_to(cutoff))?;
    store.sadd(&registry_key, &node_id)?;
    store.expire(&registry_key, ttl)?;

    let mut others = 0u64;
    for id in store.smembers(&registry_key)? {
        if id == node_id {
            continue;
        }
        let other_key = format!("{global_key}:shard:{id}");
        if store.exists(&other_key)? {
            others += store.zcount(&other_key, ScoreRange::above(cutoff))?;
        } else {
            store.srem(&registry_key, &id)?;
        }
    }

    let counts = ShardCounts {
        own: store.zcard(shard_key)?,
        others,
    };
    let own_oldest = store.zfirst_score(shard_key)?.map(|score| score as i64);

    let decision = evaluate(now, window, max_requests, counts, own_oldest);
    if decision.is_allowed() {
        store.zadd(global_key, now as f64, &format!("{member}:{node_id}"))?;
        store.zadd(shard_key, now as f64, &member)?;
        store.expire(global_key, ttl)?;
        store.expire(shard_key, ttl)?;
    }

    Ok(decision.into_reply())
}
