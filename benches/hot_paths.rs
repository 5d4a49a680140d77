use criterion::{black_box, criterion_group, criterion_main, Criterion};
use interest_report::aggregate::Aggregator;
use interest_report::drain::Batches;
use interest_report::report::ReportPlan;

const SERVICES: &[&str] = &["gym", "shop", "checkout", "support", "blog", "home"];
const AGES: &[&str] = &["<20", "20-30", "31-40", "41-50", "51-60", ">60"];
const CITIES: &[&str] = &["Warsaw", "Kraków", "Łódź", "Wrocław", "Poznań", "Gdańsk"];
const GENDERS: &[&str] = &["M", "F", "X"];

fn build_batches(per_topic: usize) -> Batches {
    let mut batches = Batches::new();

    for service in SERVICES {
        for (suffix, values) in [("age", AGES), ("city", CITIES), ("gender", GENDERS)] {
            let batch = (0..per_topic)
                .map(|i| values[i % values.len()].to_string())
                .collect();
            batches.insert(format!("{service}_{suffix}"), batch);
        }
        batches.insert(
            format!("{service}_clicks"),
            vec!["click".to_string(); per_topic],
        );
    }

    batches
}

fn bench_aggregate(c: &mut Criterion) {
    let batches = build_batches(10_000);
    let aggregator = Aggregator::new(1000);

    c.bench_function("aggregate_24_topics_x_10k", |b| {
        b.iter(|| black_box(aggregator.aggregate(black_box(&batches))))
    });
}

fn bench_plan(c: &mut Criterion) {
    let snapshot = Aggregator::new(0).aggregate(&build_batches(1_000)).snapshot;
    let reserved = vec!["home".to_string()];

    c.bench_function("plan_report_6_services", |b| {
        b.iter(|| black_box(ReportPlan::build(black_box(&snapshot), "Interest", &reserved)))
    });
}

criterion_group!(benches, bench_aggregate, bench_plan);
criterion_main!(benches);
