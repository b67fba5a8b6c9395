//! Benchmarks for fan-out aggregation and queue admission.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use drainscope::prelude::*;
use drainscope::testing::DelayedFetcher;
use std::sync::Arc;
use std::time::Duration;

fn aggregate_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let fetchers: Vec<Arc<dyn Fetcher>> = (0..8)
        .map(|n| {
            Arc::new(DelayedFetcher::new(format!("field-{n}"), "value", Duration::ZERO))
                as Arc<dyn Fetcher>
        })
        .collect();
    let aggregator = FanOutAggregator::new(&CoreConfig::default(), fetchers).unwrap();
    let root = DeadlineScope::background();

    c.bench_function("aggregate_8_fetchers", |b| {
        b.iter(|| {
            runtime.block_on(async {
                black_box(aggregator.aggregate(&root, "1").await.unwrap());
            });
        });
    });
}

fn queue_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let queue = TaskQueue::new(1024, AdmissionPolicy::Reject).unwrap();
    let scope = DeadlineScope::background();

    c.bench_function("enqueue_dequeue", |b| {
        b.iter(|| {
            runtime.block_on(async {
                queue.enqueue(WorkItem::named("/work")).await.unwrap();
                let item = queue.dequeue(&scope).await;
                queue.complete();
                black_box(item);
            });
        });
    });
}

criterion_group!(benches, aggregate_benchmark, queue_benchmark);
criterion_main!(benches);
