//! Retrieval engine benchmarks.
//!
//! Run with: cargo bench -p covenant-core

use std::collections::HashMap;

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use covenant_core::embeddings::cosine_similarity;
use covenant_core::retrieval::{calculate_surprise, reciprocal_rank_fusion, reweight, ReweightConfig};

fn bench_rrf_fusion(c: &mut Criterion) {
    let lexical: Vec<(String, f32)> = (0..50).map(|i| (format!("doc-{i}"), 1.0 - i as f32 / 50.0)).collect();
    let dense: Vec<(String, f32)> = (0..50).map(|i| (format!("doc-{}", 25 + i), 1.0 - i as f32 / 50.0)).collect();
    let fts: Vec<(String, f32)> = (0..50).map(|i| (format!("doc-{}", 10 + i), 1.0 - i as f32 / 50.0)).collect();

    c.bench_function("rrf_50x50x50", |b| {
        b.iter(|| {
            black_box(reciprocal_rank_fusion(
                &[lexical.clone(), dense.clone(), fts.clone()],
                60.0,
            ));
        })
    });
}

fn bench_reweight(c: &mut Criterion) {
    use covenant_core::models::{Category, Memory, Worked};

    let now = Utc::now();
    let mut fused: Vec<(String, f32)> = (0..50).map(|i| (format!("doc-{i}"), 1.0 - i as f32 / 50.0)).collect();
    let memories: HashMap<String, Memory> = fused
        .iter()
        .enumerate()
        .map(|(i, (id, _))| {
            let memory = Memory {
                id: id.clone(),
                project: "proj".to_string(),
                category: Category::Decision,
                content: String::new(),
                rationale: None,
                context: None,
                tags: Vec::new(),
                file_path: None,
                outcome: None,
                worked: Worked::Unknown,
                pinned: i % 10 == 0,
                archived: false,
                importance_score: (i as f32 / 50.0).fract(),
                surprise_score: 0.0,
                provenance: None,
                happened_at: None,
                created_at: now - chrono::Duration::days(i as i64),
                updated_at: now,
            };
            (id.clone(), memory)
        })
        .collect();
    let cfg = ReweightConfig {
        recency: true,
        importance: true,
        pinned: true,
        ..Default::default()
    };

    c.bench_function("reweight_50", |b| {
        b.iter(|| {
            let mut fused = fused.clone();
            reweight(&mut fused, &memories, &cfg, now);
            black_box(&fused);
        })
    });
    black_box(&mut fused);
}

fn bench_cosine_similarity(c: &mut Criterion) {
    let a: Vec<f32> = (0..384).map(|i| (i as f32).sin()).collect();
    let b: Vec<f32> = (0..384).map(|i| (i as f32).cos()).collect();

    c.bench_function("cosine_similarity_384d", |bench| {
        bench.iter(|| {
            black_box(cosine_similarity(&a, &b));
        })
    });
}

fn bench_calculate_surprise(c: &mut Criterion) {
    let new_embedding: Vec<f32> = (0..384).map(|i| (i as f32).sin()).collect();
    let existing: Vec<Vec<f32>> = (0..200)
        .map(|j| (0..384).map(|i| ((i + j) as f32).cos()).collect())
        .collect();

    c.bench_function("surprise_384d_200existing", |b| {
        b.iter(|| {
            black_box(calculate_surprise(&new_embedding, &existing, 10));
        })
    });
}

criterion_group!(
    benches,
    bench_rrf_fusion,
    bench_reweight,
    bench_cosine_similarity,
    bench_calculate_surprise,
);
criterion_main!(benches);
