use criterion::{criterion_group, criterion_main, Criterion};
use simcore::matcher::Matcher;

fn descriptors(n: usize, seed: u32) -> Vec<Vec<f32>> {
    let mut s = seed;
    (0..n)
        .map(|_| {
            (0..128)
                .map(|_| {
                    s = s.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                    (s >> 8) as f32 / (1u32 << 24) as f32
                })
                .collect()
        })
        .collect()
}

fn bench_score(c: &mut Criterion) {
    let query = descriptors(500, 1);
    let candidate = descriptors(500, 2);
    let matcher = Matcher::default();
    c.bench_function("score_500x500x128", |b| b.iter(|| matcher.score(&query, &candidate)));
}

criterion_group!(benches, bench_score);
criterion_main!(benches);
