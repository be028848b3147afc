//! Criterion benchmarks for the search module.
//!
//! Covers the per-step hot path: log-probability conversion, top-k beam
//! selection and a full `SearchJob::update` at realistic vocabulary sizes.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use candle_core::{DType, Device, Tensor};
use seqgen_core::search::{
    choose_beams, logits_to_log_probs, BeamSearchConfig, BeamSearchStrategy,
};
use seqgen_core::VocabularyInfo;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build a 2-D logits tensor [rows, vocab_size] on CPU.
fn make_logits_tensor(rows: usize, vocab_size: usize) -> Tensor {
    let data: Vec<f32> = (0..rows * vocab_size)
        .map(|i| ((i as f32 * 0.013).sin() * 5.0))
        .collect();
    Tensor::from_vec(data, (rows, vocab_size), &Device::Cpu)
        .expect("failed to create logits tensor")
}

fn vocab(size: usize) -> VocabularyInfo {
    VocabularyInfo::new(size, 0, 2, 3, 1).expect("invalid vocabulary")
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_log_probs(c: &mut Criterion) {
    let mut group = c.benchmark_group("logits_to_log_probs");

    for &vocab_size in &[32_000, 128_000] {
        let logits = make_logits_tensor(8, vocab_size);
        group.bench_with_input(
            BenchmarkId::new("vocab", vocab_size),
            &vocab_size,
            |b, _| {
                b.iter(|| logits_to_log_probs(black_box(&logits), 0.7, 1, 0).unwrap());
            },
        );
    }
    group.finish();
}

fn bench_choose_beams(c: &mut Criterion) {
    let mut group = c.benchmark_group("choose_beams");

    for &beam_size in &[1, 4, 8] {
        let candidates = make_logits_tensor(4 * beam_size, 32_000)
            .reshape((4, beam_size, 32_000))
            .expect("reshape failed");
        group.bench_with_input(
            BenchmarkId::new("beam", beam_size),
            &beam_size,
            |b, &k| {
                b.iter(|| choose_beams(black_box(&candidates), k).unwrap());
            },
        );
    }
    group.finish();
}

fn bench_job_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("search_job_update");
    let vocab_size = 32_000;

    for &beam_size in &[4, 8] {
        let strategy = BeamSearchStrategy::new(
            vocab(vocab_size),
            BeamSearchConfig {
                beam_size,
                min_len: 0,
                max_len: 64,
                ..Default::default()
            },
        )
        .expect("invalid config");
        let src = Tensor::zeros((4, 32), DType::U32, &Device::Cpu).expect("src");
        let first = make_logits_tensor(4, vocab_size);
        let logits = make_logits_tensor(4 * beam_size, vocab_size);

        group.bench_with_input(
            BenchmarkId::new("beam", beam_size),
            &beam_size,
            |b, _| {
                b.iter(|| {
                    let mut job = strategy.new_search_job(&src, None).unwrap();
                    job.update(&first).unwrap();
                    job.update(black_box(&logits)).unwrap();
                    job
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_log_probs, bench_choose_beams, bench_job_update);
criterion_main!(benches);
