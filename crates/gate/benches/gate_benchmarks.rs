use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::{Duration, Utc};
use pressroom_core::{GateConfig, ProcessedItem, RawItem, Rewrite};
use pressroom_gate::QualityGate;
use std::collections::BTreeMap;

fn candidates(n: usize) -> Vec<ProcessedItem> {
    let now = Utc::now();
    (0..n)
        .map(|i| {
            let title = format!("Story {i}");
            let body = format!(
                "Reporting on story {i}: the regional board met on Monday and \
                 agreed to publish the full minutes before the end of the month."
            );
            let mut item = ProcessedItem::from_raw(RawItem {
                source_id: format!("source-{}", i % 7),
                url: None,
                title: title.clone(),
                body: body.clone(),
                published_at: now - Duration::minutes(i as i64),
                reachable: i % 11 != 0,
            });
            item.category = Some(format!("category-{}", i % 5));
            let mut views = BTreeMap::new();
            views.insert("headline".to_string(), title.clone());
            views.insert("summary".to_string(), format!("Summary: {title}"));
            item.rewrite = Some(Rewrite { title, body, views });
            item
        })
        .collect()
}

fn bench_evaluate_batch(c: &mut Criterion) {
    let gate = QualityGate::new(GateConfig::default());
    let mut group = c.benchmark_group("quality_gate_batch");

    for size in [10usize, 100, 1_000] {
        let items = candidates(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &items, |b, items| {
            b.iter(|| black_box(gate.evaluate_batch(black_box(items))))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_evaluate_batch);
criterion_main!(benches);
