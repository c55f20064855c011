//! Benchmarks for in-memory script evaluation.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use skp_distlimit::storage::{MemoryStorage, ScoreRange, Storage, StoreOps};
use skp_distlimit::{Result, Script, ScriptArg, ScriptInput};
use tokio::runtime::Runtime;

fn counter(store: &mut dyn StoreOps, input: &ScriptInput<'_>) -> Result<Vec<i64>> {
    let key = input.key(0)?;
    let value = store.incr(key)?;
    store.expire(key, 3600)?;
    Ok(vec![value])
}

fn log(store: &mut dyn StoreOps, input: &ScriptInput<'_>) -> Result<Vec<i64>> {
    let key = input.key(0)?;
    let now = input.int(0)?;
    store.zremrangebyscore(key, ScoreRange::up_to((now - 1_000) as f64))?;
    store.zadd(key, now as f64, &now.to_string())?;
    Ok(vec![store.zcard(key)? as i64])
}

static COUNTER: Script = Script::new("counter", "return {redis.call('INCR', KEYS[1])}", counter);
static LOG: Script = Script::new("log", "return {0}", log);

fn bench_storage_operations(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("storage");

    group.bench_function("counter_script", |b| {
        let storage = MemoryStorage::new();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let keys = [format!("bench:inc:{}", i % 100)];
            rt.block_on(async { black_box(storage.eval(&COUNTER, &keys, &[]).await) })
        })
    });

    group.bench_function("sorted_set_script", |b| {
        let storage = MemoryStorage::new();
        let keys = ["bench:log".to_string()];
        let mut i = 0i64;
        b.iter(|| {
            i += 1;
            let args = [ScriptArg::Int(i)];
            rt.block_on(async { black_box(storage.eval(&LOG, &keys, &args).await) })
        })
    });

    group.finish();
}

fn bench_storage_scaling(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("storage_scaling");

    for num_keys in [100u64, 1000, 10000] {
        group.bench_with_input(
            BenchmarkId::new("counter_with_entries", num_keys),
            &num_keys,
            |b, &num_keys| {
                let storage = MemoryStorage::new();

                rt.block_on(async {
                    for i in 0..num_keys {
                        let keys = [format!("scale:{}", i)];
                        storage.eval(&COUNTER, &keys, &[]).await.unwrap();
                    }
                });

                let mut i = 0u64;
                b.iter(|| {
                    i += 1;
                    let keys = [format!("scale:{}", i % num_keys)];
                    rt.block_on(async { black_box(storage.eval(&COUNTER, &keys, &[]).await) })
                })
            },
        );
    }

    group.finish();
}

fn bench_concurrent_access(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("concurrent_access");

    group.bench_function("counter_same_key", |b| {
        let storage = MemoryStorage::new();
        let keys = ["hotkey".to_string()];
        b.iter(|| rt.block_on(async { black_box(storage.eval(&COUNTER, &keys, &[]).await) }))
    });

    group.bench_function("counter_distributed_keys", |b| {
        let storage = MemoryStorage::new();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let keys = [format!("dist:{}", i % 1000)];
            rt.block_on(async { black_box(storage.eval(&COUNTER, &keys, &[]).await) })
        })
    });

    group.finish();
}

criterion_group!(benches, bench_storage_operations, bench_storage_scaling, bench_concurrent_access);
criterion_main!(benches);
