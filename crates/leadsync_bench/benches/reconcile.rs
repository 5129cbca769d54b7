//! Reconciliation pass benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use leadsync_bench::utils::{generate_contacts, generate_leads};
use leadsync_engine::{build_batches, LeadCache, Reconciler, SyncConfig, SyncMode};
use leadsync_storage::InMemoryStore;

fn cache_of(count: usize) -> LeadCache<InMemoryStore> {
    let mut cache = LeadCache::open(InMemoryStore::new(), 500).unwrap();
    for lead in generate_leads(count) {
        cache.put(lead).unwrap();
    }
    cache
}

/// Benchmark an incremental pass where a tenth of the contacts changed.
fn bench_incremental_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("incremental_pass");
    let config = SyncConfig::default();

    for count in [100, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let mut cache = cache_of(count);
            let contacts = generate_contacts(count, 0.1);

            b.iter(|| {
                let plan = Reconciler::new(&config, &mut cache)
                    .plan(black_box(&contacts), SyncMode::Incremental)
                    .unwrap();
                black_box(plan);
            });
        });
    }
    group.finish();
}

/// Benchmark a full pass including removal detection, where a fifth of the
/// cached leads no longer have a contact.
fn bench_full_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_pass");
    let config = SyncConfig::default();

    for count in [1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let mut cache = cache_of(count);
            let mut contacts = generate_contacts(count, 0.1);
            contacts.truncate(count * 4 / 5);

            b.iter(|| {
                let plan = Reconciler::new(&config, &mut cache)
                    .plan(black_box(&contacts), SyncMode::Full)
                    .unwrap();
                black_box(plan);
            });
        });
    }
    group.finish();
}

/// Benchmark splitting a plan into batches.
fn bench_batching(c: &mut Criterion) {
    let config = SyncConfig::default();
    let mut cache = cache_of(10_000);
    let contacts = generate_contacts(10_000, 0.5);
    let operations = Reconciler::new(&config, &mut cache)
        .plan(&contacts, SyncMode::Incremental)
        .unwrap()
        .operations()
        .unwrap();

    c.bench_function("build_batches", |b| {
        b.iter(|| black_box(build_batches(operations.clone(), config.batch_size)));
    });
}

criterion_group!(benches, bench_incremental_pass, bench_full_pass, bench_batching);
criterion_main!(benches);
