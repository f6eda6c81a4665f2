use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::Rng;

use sfc_tree::morton::encode_grid;
use sfc_tree::{IndexConfig, Octree, Tetree};

fn random_positions(n: usize) -> Vec<[f32; 3]> {
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|_| {
            [
                rng.gen::<f32>() * 2000000.0,
                rng.gen::<f32>() * 2000000.0,
                rng.gen::<f32>() * 2000000.0,
            ]
        })
        .collect()
}

fn benchmark_morton_encoding(c: &mut Criterion) {
    let coords: Vec<[u32; 3]> = {
        let mut rng = rand::thread_rng();
        (0..1000000)
            .map(|_| {
                [
                    rng.gen::<u32>() & 0x1FFFFF,
                    rng.gen::<u32>() & 0x1FFFFF,
                    rng.gen::<u32>() & 0x1FFFFF,
                ]
            })
            .collect()
    };

    c.bench_function("morton encoding", |b| {
        b.iter(|| {
            for coord in coords.iter() {
                black_box(encode_grid(coord[0], coord[1], coord[2]));
            }
        })
    });
}

fn benchmark_octree_insertion(c: &mut Criterion) {
    let positions = random_positions(10000);

    c.bench_function("octree insert 10k", |b| {
        b.iter(|| {
            let index: Octree<usize> = Octree::new(IndexConfig::default()).unwrap();
            for (value, position) in positions.iter().enumerate() {
                index.insert(*position, black_box(10), value).unwrap();
            }
        })
    });
}

fn benchmark_octree_batch_insertion(c: &mut Criterion) {
    let positions = random_positions(10000);

    c.bench_function("octree batch insert 10k", |b| {
        b.iter(|| {
            let index: Octree<usize> = Octree::new(IndexConfig::default()).unwrap();
            let contents: Vec<usize> = (0..positions.len()).collect();
            index
                .insert_batch(&positions, contents, black_box(10))
                .unwrap();
        })
    });
}

fn benchmark_tetree_point_location(c: &mut Criterion) {
    let positions = random_positions(100000);

    c.bench_function("tetree point location", |b| {
        b.iter(|| {
            for position in positions.iter() {
                black_box(
                    sfc_tree::TetKey::enclosing(position, black_box(15)).unwrap(),
                );
            }
        })
    });
}

fn benchmark_knn(c: &mut Criterion) {
    let positions = random_positions(50000);
    let index: Tetree<usize> = Tetree::new(IndexConfig::default()).unwrap();
    for (value, position) in positions.iter().enumerate() {
        index.insert(*position, 10, value).unwrap();
    }

    c.bench_function("tetree knn k=16", |b| {
        b.iter(|| {
            black_box(index.k_nearest_neighbors(
                black_box(&[1000000.0, 1000000.0, 1000000.0]),
                16,
                None,
            ));
        })
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(30).measurement_time(std::time::Duration::from_secs(10));
    targets = benchmark_morton_encoding,
              benchmark_octree_insertion,
              benchmark_octree_batch_insertion,
              benchmark_tetree_point_location,
              benchmark_knn,
            }
criterion_main!(benches);
