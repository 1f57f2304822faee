//! Benchmarks for EmberKV engine operations

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use emberkv::{Config, Engine};
use tempfile::TempDir;

const VALUE_SIZE: usize = 256;
const PRELOADED_KEYS: u64 = 10_000;

fn open_engine() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .max_file_size(64 * 1024 * 1024)
        .number_of_records(PRELOADED_KEYS as usize * 2)
        .build();
    let engine = Engine::open(temp_dir.path(), config).unwrap();
    (temp_dir, engine)
}

fn key(i: u64) -> Vec<u8> {
    format!("key-{:08}", i).into_bytes()
}

fn put_benchmark(c: &mut Criterion) {
    let (_temp, engine) = open_engine();
    let value = vec![0xAB; VALUE_SIZE];
    let mut i = 0u64;

    let mut group = c.benchmark_group("put");
    group.throughput(Throughput::Bytes(VALUE_SIZE as u64));
    group.bench_function("sequential_keys", |b| {
        b.iter(|| {
            engine.put(&key(i), black_box(&value)).unwrap();
            i += 1;
        })
    });
    group.bench_function("overwrite_one_key", |b| {
        b.iter(|| engine.put(b"hot", black_box(&value)).unwrap())
    });
    group.finish();
}

fn get_benchmark(c: &mut Criterion) {
    let (_temp, engine) = open_engine();
    let value = vec![0xCD; VALUE_SIZE];
    for i in 0..PRELOADED_KEYS {
        engine.put(&key(i), &value).unwrap();
    }
    let mut i = 0u64;

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Bytes(VALUE_SIZE as u64));
    group.bench_function("hit", |b| {
        b.iter(|| {
            let found = engine.get(&key(i % PRELOADED_KEYS)).unwrap();
            i += 7;
            black_box(found)
        })
    });
    group.bench_function("miss", |b| {
        b.iter(|| black_box(engine.get(b"missing").unwrap()))
    });
    group.finish();
}

fn mixed_benchmark(c: &mut Criterion) {
    let value = vec![0xEF; VALUE_SIZE];

    c.bench_function("mixed_80_read_20_write", |b| {
        b.iter_batched(
            || {
                let (temp, engine) = open_engine();
                for i in 0..1_000 {
                    engine.put(&key(i), &value).unwrap();
                }
                (temp, engine)
            },
            |(_temp, engine)| {
                for i in 0..1_000u64 {
                    if i % 5 == 0 {
                        engine.put(&key(i), &value).unwrap();
                    } else {
                        black_box(engine.get(&key(i)).unwrap());
                    }
                }
            },
            BatchSize::PerIteration,
        )
    });
}

criterion_group!(benches, put_benchmark, get_benchmark, mixed_benchmark);
criterion_main!(benches);
