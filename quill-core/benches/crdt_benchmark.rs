use criterion::{black_box, criterion_group, criterion_main, Criterion};
use quill_core::engine::Engine;
use quill_core::position::{generate_between, Position};
use quill_core::sim::{ChaosConfig, ChaosNetwork, SimClient};

fn bench_generate_between_shallow(c: &mut Criterion) {
    let left = Position::first();
    let right = Position::last();

    c.bench_function("generate_between_shallow", |b| {
        b.iter(|| {
            black_box(generate_between(
                black_box(&left),
                black_box(&right),
                black_box(7),
            ))
        })
    });
}

fn bench_generate_between_deep(c: &mut Criterion) {
    // Force depth extension by repeatedly bisecting the same exhausted gap.
    let mut left = Position(vec![4, 500]);
    let right = Position(vec![4, 501]);
    for _ in 0..32 {
        left = generate_between(&left, &right, 1);
    }

    c.bench_function("generate_between_depth_32", |b| {
        b.iter(|| {
            black_box(generate_between(
                black_box(&left),
                black_box(&right),
                black_box(7),
            ))
        })
    });
}

fn bench_engine_append_1000(c: &mut Criterion) {
    c.bench_function("engine_append_1000", |b| {
        b.iter(|| {
            let mut e = Engine::new();
            let mut left = Position::first();
            let right = Position::last();
            for i in 0..1000 {
                let el = e.insert(&left, &right, 'x', i % 16);
                left = el.position;
            }
            black_box(e.text())
        })
    });
}

fn bench_chaos_round_200_ops(c: &mut Criterion) {
    c.bench_function("chaos_round_200_ops", |b| {
        b.iter(|| {
            let mut net = ChaosNetwork::new(ChaosConfig::with_seed(7));
            let mut clients = vec![SimClient::new("A", 0), SimClient::new("B", 100)];
            let mut left = clients[0].left_bound();
            let right = clients[0].right_bound();
            for i in 0..200 {
                let idx = i % 2;
                let op = clients[idx].local_insert(&left, &right, 'x');
                net.send(op);
                left = clients[idx].positions().last().cloned().unwrap();
            }
            net.deliver_all(&mut clients);
            black_box(clients[0].document())
        })
    });
}

criterion_group!(
    benches,
    bench_generate_between_shallow,
    bench_generate_between_deep,
    bench_engine_append_1000,
    bench_chaos_round_200_ops
);
criterion_main!(benches);
