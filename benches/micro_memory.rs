//! Micro benchmarks for the in-memory store.
#![forbid(unsafe_code)]
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use quadstore::memory::{MemoryStore, MemoryStoreOptions, ReadMode, SyncDelay, TermPattern};
use quadstore::Term;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::TempDir;

const STATEMENTS: usize = 8_192;
const PREDICATES: usize = 16;

fn triples(count: usize, seed: u64) -> Vec<(Term, Term, Term)> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|n| {
            let p = rng.gen_range(0..PREDICATES);
            (
                Term::uri(format!("urn:s{}", n / 4)),
                Term::uri(format!("urn:p{p}")),
                Term::literal(format!("value {}", rng.gen::<u32>())),
            )
        })
        .collect()
}

fn load(store: &MemoryStore, data: &[(Term, Term, Term)]) {
    let mut txn = store.begin().expect("begin");
    for (s, p, o) in data {
        txn.add(s, p, o, None, true).expect("add");
    }
    txn.commit().expect("commit");
}

fn micro_memory(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro/memory");
    group.sample_size(20);

    let data = triples(STATEMENTS, 0x0DDB_A11);
    group.throughput(Throughput::Elements(STATEMENTS as u64));
    group.bench_function("commit_bulk", |b| {
        b.iter_batched(
            MemoryStore::in_memory,
            |store| {
                load(&store, &data);
                black_box(store.size().expect("size"));
            },
            BatchSize::SmallInput,
        );
    });

    let store = MemoryStore::in_memory();
    load(&store, &data);
    let by_predicate = TermPattern::any().predicate(Term::uri("urn:p3"));
    group.bench_function(BenchmarkId::new("query", "predicate"), |b| {
        b.iter(|| {
            black_box(
                store
                    .query(&by_predicate, false, ReadMode::Committed)
                    .expect("query")
                    .count(),
            )
        });
    });
    let by_subject = TermPattern::any().subject(Term::uri("urn:s100"));
    group.bench_function(BenchmarkId::new("query", "subject"), |b| {
        b.iter(|| {
            black_box(
                store
                    .query(&by_subject, false, ReadMode::Committed)
                    .expect("query")
                    .count(),
            )
        });
    });

    group.throughput(Throughput::Elements(STATEMENTS as u64));
    group.bench_function("snapshot_sync", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().expect("tempdir");
                let options = MemoryStoreOptions::new()
                    .snapshot(dir.path().join("memorystore.data"))
                    .sync_delay(SyncDelay::OnShutdown);
                let store = MemoryStore::open(options).expect("open");
                load(&store, &data);
                (dir, store)
            },
            |(_dir, store)| store.shutdown().expect("shutdown"),
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, micro_memory);
criterion_main!(benches);
