use criterion::{black_box, criterion_group, criterion_main, Criterion};
use xlit_core::beam::{BeamSearch, FnScorer};

const VOCAB: usize = 64;

/// Fixed pseudo-random log-distributions, one per prefix length.
fn random_table(seed: u64, rows: usize) -> Vec<Vec<f32>> {
    let mut rng = oorandom::Rand32::new(seed);
    (0..rows)
        .map(|_| {
            let raw: Vec<f32> = (0..VOCAB).map(|_| rng.rand_float() + 1e-3).collect();
            let total: f32 = raw.iter().sum();
            raw.iter().map(|p| (p / total).ln()).collect()
        })
        .collect()
}

fn bench_beam_search(c: &mut Criterion) {
    let table = random_table(42, 64);
    let scorer = FnScorer(|example: usize, prefix: &[u32]| {
        let last = *prefix.last().unwrap_or(&0) as usize;
        table[(example + prefix.len() + last) % table.len()].clone()
    });

    let greedy = BeamSearch::greedy(30);
    c.bench_function("beam_greedy_30", |b| {
        b.iter(|| greedy.search(black_box(&scorer), 0).unwrap());
    });

    let beam = BeamSearch::new(5, 5, 30).unwrap();
    c.bench_function("beam_width_5_30", |b| {
        b.iter(|| beam.search(black_box(&scorer), 0).unwrap());
    });

    c.bench_function("beam_width_5_batch_16", |b| {
        b.iter(|| beam.search_batch(black_box(&scorer), 16).unwrap());
    });
}

criterion_group!(benches, bench_beam_search);
criterion_main!(benches);
