//! External sort benchmarks.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use extsort::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tempfile::TempDir;

fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        ColumnDef::new("id", DataType::Int),
        ColumnDef::new("name", DataType::String),
        ColumnDef::new("score", DataType::Float),
    ]))
}

fn gen_tuples(n: usize) -> Vec<Tuple> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..n)
        .map(|i| {
            let len = rng.gen_range(4..24);
            let name: String = (0..len).map(|_| rng.gen_range(b'a'..=b'z') as char).collect();
            Tuple::from_fields(vec![
                (i as i64).into(),
                name.into(),
                rng.gen_range(-1000.0f64..1000.0).into(),
            ])
        })
        .collect()
}

fn sort_benchmark(c: &mut Criterion) {
    let tuples = gen_tuples(50_000);
    let keys = vec![
        SortKey::desc(Expression::column("score")),
        SortKey::asc(Expression::column("name")),
    ];

    let mut group = c.benchmark_group("external_sort_50k");
    group.sample_size(10);
    for (label, buffer_pages, strategy) in [
        ("seq_b4", 4, MergeStrategy::Sequential),
        ("par_b4", 4, MergeStrategy::Parallel),
        ("seq_b64", 64, MergeStrategy::Sequential),
    ] {
        group.bench_function(BenchmarkId::from_parameter(label), |b| {
            b.iter(|| {
                let dir = TempDir::new().unwrap();
                let config = SortConfig::new(4096, buffer_pages)
                    .with_temp_prefix(format!("{}/", dir.path().display()))
                    .with_merge_strategy(strategy);
                let source = MemorySource::new(schema(), tuples.clone());
                let mut sort = OnDiskSort::new(source, keys.clone(), config, 1).unwrap();
                let result = sort.execute().unwrap().map(|r| r.len());
                black_box(result)
            })
        });
    }
    group.finish();
}

fn normalized_key_benchmark(c: &mut Criterion) {
    let tuples = gen_tuples(10_000);
    let cmp = TupleComparator::new(
        schema(),
        vec![SortKey::asc(Expression::column("name"))],
    )
    .unwrap();

    c.bench_function("normalized_key_10k", |b| {
        b.iter(|| {
            for t in &tuples {
                black_box(cmp.normalized_key(t).unwrap());
            }
        })
    });
}

criterion_group!(benches, sort_benchmark, normalized_key_benchmark);
criterion_main!(benches);
