//! HOT PATH PERFORMANCE BENCHMARKS
//!
//! Ingest is the per-event path and must stay O(1) amortized; flush scales
//! with the number of live buckets.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;
use txmetrics::core::{fields, ConfigBuilder, Event, MetricsetKind};
use txmetrics::metrics::histogram::LosslessHistogram;
use txmetrics::metrics::key;
use txmetrics::metricsets;

fn event(service: usize, name: usize, duration: f64) -> Event {
    Event::new()
        .with(fields::PROCESSOR_EVENT, "transaction")
        .with(fields::SERVICE_NAME, format!("service-{}", service))
        .with(fields::TRANSACTION_NAME, format!("GET /{}", name))
        .with(fields::TRANSACTION_DURATION_US, duration)
        .with(fields::EVENT_OUTCOME, "success")
        .with("host.name", "bench-host")
        .with("service.environment", "production")
}

/// Composite key hashing over the transaction key fields
/// TARGET: <500ns per key
fn bench_key_hashing(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_hashing");
    let sample = event(1, 1, 100.0);
    let fields = [
        "transaction.name",
        "transaction.type",
        "event.outcome",
        "service.name",
        "service.environment",
        "host.name",
    ];

    group.bench_function("hash_fields", |b| {
        b.iter(|| black_box(key::hash_fields(black_box(&sample), &fields)));
    });

    group.finish();
}

/// Histogram recording with low and high value cardinality
fn bench_histogram(c: &mut Criterion) {
    let mut group = c.benchmark_group("lossless_histogram");

    for distinct in [16_u64, 4096] {
        group.bench_with_input(BenchmarkId::new("record", distinct), &distinct, |b, &distinct| {
            let mut histogram = LosslessHistogram::new();
            let mut i = 0_u64;
            b.iter(|| {
                i = i.wrapping_add(7919);
                histogram.record(black_box(i % distinct));
            });
        });
    }

    group.finish();
}

/// Full ingest path per metricset
/// TARGET: <2us per event
fn bench_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest");
    group.measurement_time(Duration::from_secs(5));

    let config = ConfigBuilder::new()
        .max_services(50)
        .max_transaction_groups_per_service(20)
        .build()
        .unwrap();
    let events: Vec<Event> = (0..10_000)
        .map(|i| event(i % 100, i % 40, (i % 997) as f64))
        .collect();

    for kind in [
        MetricsetKind::Transaction,
        MetricsetKind::ServiceTransaction,
        MetricsetKind::ServiceSummary,
    ] {
        group.bench_function(format!("{:?}", kind), |b| {
            let mut aggregator = metricsets::build(kind, &config).unwrap();
            let mut i = 0;
            b.iter(|| {
                aggregator.ingest(black_box(&events[i % events.len()]));
                i += 1;
            });
        });
    }

    group.finish();
}

/// Flush of a populated window
fn bench_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("flush");
    let config = ConfigBuilder::new().build().unwrap();

    for services in [10_usize, 100, 1000] {
        let events: Vec<Event> = (0..services * 10)
            .map(|i| event(i % services, i % 10, (i % 500) as f64))
            .collect();

        group.bench_with_input(BenchmarkId::new("transaction", services), &events, |b, events| {
            b.iter(|| {
                let mut aggregator = metricsets::build(MetricsetKind::Transaction, &config).unwrap();
                for event in events {
                    aggregator.ingest(event);
                }
                black_box(aggregator.flush());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_key_hashing, bench_histogram, bench_ingest, bench_flush);
criterion_main!(benches);
