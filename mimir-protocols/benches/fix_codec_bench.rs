//! FIX encode/decode hot-path throughput

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use mimir_core::core::Protocol;
use mimir_core::ring::{Drainer, FrameRing};
use mimir_core::session::{LoggingListener, SessionCore, SessionRole};

use mimir_protocols::fix::decoder::{FixMessage, FixReader};
use mimir_protocols::fix::encoder::FixEncoderFactory;
use mimir_protocols::fix::{msg_type, tags};

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("fix_codec");
    group.throughput(Throughput::Elements(1));

    group.bench_function("encode_execution_report", |b| {
        let ring = FrameRing::new(1 << 20, 1024);
        let mut drainer = Drainer::new(Arc::clone(&ring));
        let factory = FixEncoderFactory::new(Arc::clone(&ring), "FIX.4.4", "MIMIR", "CLIENT");
        let core = SessionCore::new(
            "bench",
            Protocol::Fix44,
            SessionRole::Acceptor,
            30_000,
            Arc::new(LoggingListener),
        );

        b.iter(|| {
            let mut enc = factory.begin(&core, msg_type::EXECUTION_REPORT).unwrap();
            enc.field_int(tags::ORDER_ID, 123_456)
                .field_str(tags::CL_ORD_ID, "ORDER-0001")
                .field_int(tags::EXEC_ID, 777)
                .field_char(tags::EXEC_TYPE, b'F')
                .field_char(tags::ORD_STATUS, b'2')
                .field_str(tags::SYMBOL, "AAPL")
                .field_char(tags::SIDE, b'1')
                .field_int(tags::ORDER_QTY, 100)
                .field_decimal(tags::LAST_PX, 1_502_500, 4)
                .field_int(tags::LAST_SHARES, 100)
                .field_int(tags::LEAVES_QTY, 0)
                .field_int(tags::CUM_QTY, 100)
                .field_decimal(tags::AVG_PX, 1_502_500, 4);
            let sealed = enc.finish(1_700_000_000_000).unwrap();
            sealed.commit();
            drainer.drain_frames(|frame| {
                black_box(frame);
            });
        });
    });

    group.bench_function("decode_execution_report", |b| {
        // Build one representative wire message via the encoder
        let ring = FrameRing::new(1 << 20, 1024);
        let mut drainer = Drainer::new(Arc::clone(&ring));
        let factory = FixEncoderFactory::new(Arc::clone(&ring), "FIX.4.4", "MIMIR", "CLIENT");
        let core = SessionCore::new(
            "bench",
            Protocol::Fix44,
            SessionRole::Acceptor,
            30_000,
            Arc::new(LoggingListener),
        );
        let mut enc = factory.begin(&core, msg_type::EXECUTION_REPORT).unwrap();
        enc.field_int(tags::ORDER_ID, 123_456)
            .field_str(tags::CL_ORD_ID, "ORDER-0001")
            .field_char(tags::EXEC_TYPE, b'F')
            .field_char(tags::ORD_STATUS, b'2')
            .field_str(tags::SYMBOL, "AAPL")
            .field_int(tags::CUM_QTY, 100)
            .field_decimal(tags::AVG_PX, 1_502_500, 4);
        let sealed = enc.finish(1_700_000_000_000).unwrap();
        sealed.commit();
        let mut wire = Vec::new();
        drainer.drain_frames(|frame| wire.extend_from_slice(frame));

        let mut msg = FixMessage::default();
        b.iter(|| {
            let mut reader = FixReader::new();
            reader.add_data(&wire);
            assert!(reader.read_message(&mut msg).unwrap());
            black_box(msg.get_decimal(tags::AVG_PX, 4));
            black_box(msg.seq_num());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_encode);
criterion_main!(benches);
