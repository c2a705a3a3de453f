// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{rngs::StdRng, Rng, SeedableRng};
use weak_cube_rs::core::plane::{self, PlaneFitConfig};
use weak_cube_rs::misc::type_aliases::{Float, Point3};

// Functions.

/// Noisy floor `y = 1.5` with 20% of outliers.
fn floor_points(nb_points: usize) -> Vec<Point3> {
    let mut rng = StdRng::seed_from_u64(0);
    (0..nb_points)
        .map(|_| {
            let x: Float = rng.gen_range(-3.0..3.0);
            let z: Float = rng.gen_range(1.0..8.0);
            let y: Float = if rng.gen_bool(0.2) {
                rng.gen_range(-2.0..1.5)
            } else {
                1.5 + rng.gen_range(-0.02..0.02)
            };
            Point3::new(x, y, z)
        })
        .collect()
}

// Benches.

fn criterion_benchmark(c: &mut Criterion) {
    let config = PlaneFitConfig::default();
    let mut group = c.benchmark_group("RANSAC plane fit");
    group.sample_size(20);
    for nb_points in [1_000, 10_000].iter() {
        let points = floor_points(*nb_points);
        group.bench_with_input(BenchmarkId::new("Sequential", nb_points), &points, |b, points| {
            let mut rng = StdRng::seed_from_u64(1);
            b.iter(|| black_box(plane::fit(points, &config, &mut rng)));
        });
        group.bench_with_input(BenchmarkId::new("Batched", nb_points), &points, |b, points| {
            let mut rng = StdRng::seed_from_u64(1);
            b.iter(|| black_box(plane::fit_parallel(points, &config, &mut rng)));
        });
    }
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
