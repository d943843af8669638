//! Benchmarks for the matching toolkit and the tiered matcher.
//!
//! Benchmark targets:
//! - Exact-tier resolution on a 100 KB document: well under 1ms
//! - Unit-bounded fuzzy resolution: bounded by the window, not the document
//! - Global shingle fallback: the slow path, still bounded by the stride

// Criterion macros generate items without docs - this is expected for benchmarks
// Benchmarks use expect/unwrap for simplicity - panics are acceptable in benchmarks
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use palimpsest::matching::{TieredMatcher, shingle_similarity, windowed_similarity};
use palimpsest::models::{Anchor, DocumentId, Generation, GenerationId, StructuralUnit, UnitId};

/// Builds a synthetic document of roughly `paragraphs * 60` bytes.
fn synthetic_text(paragraphs: usize) -> String {
    (0..paragraphs)
        .map(|i| format!("Paragraph number {i} discusses subject {i} in moderate detail."))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn units_for(generation: &Generation) -> Vec<StructuralUnit> {
    let mut units = Vec::new();
    let mut offset = 0usize;
    for (index, paragraph) in generation.text.split("\n\n").enumerate() {
        units.push(StructuralUnit {
            id: UnitId::new(format!("u-{index}")),
            document_id: generation.document_id.clone(),
            generation_id: generation.id.clone(),
            index,
            start_offset: offset,
            end_offset: offset + paragraph.len(),
            text: paragraph.to_string(),
            embedding: Vec::new(),
            domain_label: String::new(),
            importance_score: 0.5,
            topic: None,
            stance: None,
        });
        offset += paragraph.len() + 2;
    }
    units
}

fn bench_shingle_similarity(c: &mut Criterion) {
    let a = "the training corpus was deduplicated using trigram fingerprints";
    let b = "the training corpus was de-duplicated using trigram fingerprint sets";

    c.bench_function("shingle_similarity_64b", |bencher| {
        bencher.iter(|| shingle_similarity(std::hint::black_box(a), std::hint::black_box(b)));
    });
}

fn bench_windowed_similarity(c: &mut Criterion) {
    let mut group = c.benchmark_group("windowed_similarity");
    let needle = "a phrase that was lightly reworded during cleanup";

    for paragraphs in [50usize, 500] {
        let haystack = synthetic_text(paragraphs);
        group.bench_with_input(
            BenchmarkId::from_parameter(paragraphs),
            &haystack,
            |bencher, haystack| {
                bencher.iter(|| {
                    windowed_similarity(
                        std::hint::black_box(needle),
                        std::hint::black_box(haystack),
                        0,
                        &Default::default(),
                    )
                });
            },
        );
    }
    group.finish();
}

fn bench_tiered_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("tiered_resolution");
    let matcher = TieredMatcher::default();

    for paragraphs in [50usize, 500] {
        let text = synthetic_text(paragraphs);
        let generation = Generation {
            id: GenerationId::new("gen-bench"),
            document_id: DocumentId::new("doc-bench"),
            sequence: 0,
            content_hash: String::new(),
            text: text.clone(),
            current: true,
            created_at: 0,
        };
        let units = units_for(&generation);
        let target_index = paragraphs / 2;

        // Verbatim phrase: resolves at the exact tier.
        let phrase = format!("subject {target_index} in moderate detail");
        let start = text.find(&phrase).unwrap();
        let exact_anchor = Anchor::new(
            generation.document_id.clone(),
            phrase.clone(),
            start,
            start + phrase.len(),
        )
        .with_source_unit_index(target_index);

        // Misspelled phrase: falls through to the unit-bounded tier.
        let fuzzy_anchor = Anchor::new(
            generation.document_id.clone(),
            format!("subjekt {target_index} in moderate detale"),
            start,
            start + phrase.len(),
        )
        .with_source_unit_index(target_index);

        group.bench_with_input(
            BenchmarkId::new("exact", paragraphs),
            &(&exact_anchor, &generation, &units),
            |bencher, (anchor, generation, units)| {
                bencher.iter(|| matcher.resolve(anchor, generation, units).unwrap());
            },
        );
        group.bench_with_input(
            BenchmarkId::new("unit_bounded", paragraphs),
            &(&fuzzy_anchor, &generation, &units),
            |bencher, (anchor, generation, units)| {
                bencher.iter(|| matcher.resolve(anchor, generation, units).unwrap());
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_shingle_similarity,
    bench_windowed_similarity,
    bench_tiered_resolution
);
criterion_main!(benches);
