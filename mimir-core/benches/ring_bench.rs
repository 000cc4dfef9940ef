//! Claim/commit/drain throughput for the outbound frame ring

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use mimir_core::ring::{Drainer, FrameRing};

fn bench_claim_commit_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_ring");
    group.throughput(Throughput::Elements(1));

    group.bench_function("claim_commit_drain_64b", |b| {
        let ring = FrameRing::new(1 << 20, 1024);
        let mut drainer = Drainer::new(Arc::clone(&ring));
        let payload = [0x5Au8; 64];

        b.iter(|| {
            let mut claim = ring.try_claim(payload.len()).unwrap();
            claim.payload_mut().copy_from_slice(&payload);
            claim.commit();
            drainer.drain_frames(|frame| {
                black_box(frame);
            });
        });
    });

    group.bench_function("claim_abort", |b| {
        let ring = FrameRing::new(1 << 20, 1024);
        let mut drainer = Drainer::new(Arc::clone(&ring));

        b.iter(|| {
            let claim = ring.try_claim(64).unwrap();
            claim.abort();
            drainer.drain_frames(|frame| {
                black_box(frame);
            });
        });
    });

    group.finish();
}

criterion_group!(benches, bench_claim_commit_drain);
criterion_main!(benches);
