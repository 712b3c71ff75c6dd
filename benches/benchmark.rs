use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use doc_crawler::{collect_metadata, harvest_links, progress_ratio, Config, Frontier};
use std::time::Duration;

// Fast settings for all benchmarks
fn configure_fast_group(group: &mut criterion::BenchmarkGroup<criterion::measurement::WallTime>) {
    group.warm_up_time(Duration::from_millis(500));
    group.measurement_time(Duration::from_millis(500));
    group.sample_size(20);
}

fn doc_urls(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("https://developer.apple.com/documentation/swift/symbol-{i}"))
        .collect()
}

fn benchmark_config_creation(c: &mut Criterion) {
    let mut group = c.benchmark_group("config");
    configure_fast_group(&mut group);

    group.bench_function("creation", |b| {
        b.iter(|| {
            let config = Config::default();
            black_box(config);
        });
    });

    group.bench_function("validate", |b| {
        let config = Config::default();
        b.iter(|| black_box(config.validate().is_ok()));
    });

    group.finish();
}

fn benchmark_frontier(c: &mut Criterion) {
    let mut group = c.benchmark_group("frontier");
    configure_fast_group(&mut group);

    for size in [100, 1_000] {
        let urls = doc_urls(size);

        group.bench_with_input(BenchmarkId::new("add_with_duplicates", size), &urls, |b, urls| {
            b.iter(|| {
                let frontier = Frontier::new();
                for url in urls.iter().chain(urls.iter()) {
                    black_box(frontier.add(url));
                }
                black_box(frontier.queued_len());
            });
        });

        group.bench_with_input(BenchmarkId::new("drain_in_batches", size), &urls, |b, urls| {
            b.iter(|| {
                let frontier = Frontier::new();
                for url in urls {
                    frontier.add(url);
                }
                while frontier.has_more() {
                    for url in frontier.next_batch(5) {
                        frontier.mark_visited(&url);
                    }
                }
                black_box(frontier.visited_len());
            });
        });
    }

    group.finish();
}

fn benchmark_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("extraction");
    configure_fast_group(&mut group);

    let nav = doc_urls(200);
    let hero: Vec<String> = nav.iter().step_by(3).cloned().collect();
    let mut prefixed = doc_urls(250);
    prefixed.push("https://developer.apple.com/news".to_string());
    let filter = Config::default().selectors.link_filter;

    group.bench_function("harvest_links", |b| {
        b.iter(|| {
            let links = harvest_links(
                vec![nav.clone(), hero.clone(), prefixed.clone()],
                black_box(&filter),
            );
            black_box(links);
        });
    });

    let tags: Vec<(String, Option<String>)> = (0..40)
        .map(|i| (format!("meta-{}", i % 25), Some(format!("value {i}"))))
        .collect();

    group.bench_function("collect_metadata", |b| {
        b.iter(|| black_box(collect_metadata(tags.clone())));
    });

    group.bench_function("progress_ratio", |b| {
        b.iter(|| {
            for processed in 0..100 {
                black_box(progress_ratio(processed, black_box(250)));
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_config_creation,
    benchmark_frontier,
    benchmark_extraction
);
criterion_main!(benches);
