//! Repository operation benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use storysync_bench::{generate_entities, random_text};
use storysync_protocol::{EntityHash, ProjectDefinition};
use storysync_server::{
    EntityStore, FileStore, MemoryStore, ProjectRepository, SaveOutcome, ServerConfig,
};
use storysync_testkit::{project, sample_scene};
use tempfile::TempDir;

const USER: i64 = 1;

fn repository(store: Arc<dyn EntityStore>) -> ProjectRepository {
    ProjectRepository::new(store, &ServerConfig::default())
}

/// Stores `count` entities in one session and returns their hashes.
fn populate(repo: &ProjectRepository, project: &ProjectDefinition, count: usize) -> Vec<EntityHash> {
    let begin = repo.begin_sync(USER, project).unwrap();
    let hashes = generate_entities(count, 256)
        .into_iter()
        .map(|entity| {
            match repo
                .save_entity(USER, project, entity, None, &begin.sync_id, false)
                .unwrap()
            {
                SaveOutcome::Accepted(hash) => hash,
                SaveOutcome::Conflict(_) => unreachable!("fresh project"),
            }
        })
        .collect();
    repo.end_sync(USER, project, &begin.sync_id, None, None)
        .unwrap();
    hashes
}

/// Benchmark accepted uploads that replace a known version.
fn bench_save(c: &mut Criterion) {
    let mut group = c.benchmark_group("save_entity");

    for size in [256, 4096, 64 * 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("memory", size), size, |b, &size| {
            let repo = repository(Arc::new(MemoryStore::new()));
            let novel = project("Bench");
            let sync = repo.begin_sync(USER, &novel).unwrap().sync_id;
            let text = random_text(size);
            let mut hash = None;
            let mut round = 0u64;

            b.iter(|| {
                round += 1;
                let entity = sample_scene(1, &format!("{round} {text}"));
                match repo
                    .save_entity(USER, &novel, entity, hash, &sync, false)
                    .unwrap()
                {
                    SaveOutcome::Accepted(h) => hash = Some(h),
                    SaveOutcome::Conflict(_) => unreachable!("hash is current"),
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("file", size), size, |b, &size| {
            let dir = TempDir::new().unwrap();
            let repo = repository(Arc::new(FileStore::open(dir.path()).unwrap()));
            let novel = project("Bench");
            let sync = repo.begin_sync(USER, &novel).unwrap().sync_id;
            let text = random_text(size);
            let mut round = 0u64;

            b.iter(|| {
                round += 1;
                let entity = sample_scene(1, &format!("{round} {text}"));
                black_box(
                    repo.save_entity(USER, &novel, entity, None, &sync, true)
                        .unwrap(),
                );
            });
        });
    }
    group.finish();
}

/// Benchmark rejected stale uploads.
fn bench_conflict(c: &mut Criterion) {
    let repo = repository(Arc::new(MemoryStore::new()));
    let novel = project("Bench");
    populate(&repo, &novel, 1);
    let sync = repo.begin_sync(USER, &novel).unwrap().sync_id;
    let stale = Some(EntityHash::from_bytes([0; 32]));
    let edit = sample_scene(1, &random_text(1024));

    c.bench_function("save_entity/conflict", |b| {
        b.iter(|| {
            let outcome = repo
                .save_entity(USER, &novel, edit.clone(), stale, &sync, false)
                .unwrap();
            black_box(outcome);
        });
    });
}

/// Benchmark a begin/end pair over a populated project.
fn bench_session(c: &mut Criterion) {
    let mut group = c.benchmark_group("session");

    for count in [10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let repo = repository(Arc::new(MemoryStore::new()));
            let novel = project("Bench");
            populate(&repo, &novel, count);

            b.iter(|| {
                let begin = repo.begin_sync(USER, &novel).unwrap();
                let end = repo
                    .end_sync(USER, &novel, &begin.sync_id, None, None)
                    .unwrap();
                black_box((begin, end));
            });
        });
    }
    group.finish();
}

/// Benchmark not-modified downloads.
fn bench_download(c: &mut Criterion) {
    let repo = repository(Arc::new(MemoryStore::new()));
    let novel = project("Bench");
    let hashes = populate(&repo, &novel, 100);
    let sync = repo.begin_sync(USER, &novel).unwrap().sync_id;

    c.bench_function("download_entity/not_modified", |b| {
        b.iter(|| {
            for (id, hash) in (1..).zip(&hashes) {
                let outcome = repo
                    .download_entity(USER, &novel, id, &sync, Some(*hash))
                    .unwrap();
                black_box(outcome);
            }
        });
    });
}

criterion_group!(
    benches,
    bench_save,
    bench_conflict,
    bench_session,
    bench_download
);
criterion_main!(benches);
