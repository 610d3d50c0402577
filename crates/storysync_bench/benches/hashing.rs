//! Entity hashing and body codec benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use storysync_bench::generate_entities;
use storysync_protocol::EntityHash;

/// Benchmark hashing entities of growing size.
fn bench_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash");

    for size in [64, 1024, 16 * 1024, 256 * 1024].iter() {
        let entity = generate_entities(1, *size).remove(0);
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &entity, |b, entity| {
            b.iter(|| {
                let hash = EntityHash::of(black_box(entity)).unwrap();
                black_box(hash);
            });
        });
    }
    group.finish();
}

/// Benchmark hashing one entity of every type.
fn bench_hash_types(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_by_type");

    for entity in generate_entities(5, 1024) {
        let name = entity.entity_type().as_str();
        group.bench_function(name, |b| {
            b.iter(|| black_box(EntityHash::of(black_box(&entity)).unwrap()));
        });
    }
    group.finish();
}

/// Benchmark the JSON body round trip used on the wire.
fn bench_body_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("body");

    for size in [64, 4096, 64 * 1024].iter() {
        let entity = generate_entities(1, *size).remove(0);
        let body = entity.encode_body().unwrap();
        let entity_type = entity.entity_type();
        group.throughput(Throughput::Bytes(body.len() as u64));

        group.bench_with_input(BenchmarkId::new("encode", size), &entity, |b, entity| {
            b.iter(|| black_box(entity.encode_body().unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("decode", size), &body, |b, body| {
            b.iter(|| black_box(entity_type.decode_body(black_box(body)).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_hash, bench_hash_types, bench_body_codec);
criterion_main!(benches);
