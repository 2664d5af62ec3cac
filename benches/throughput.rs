//! Throughput benchmarks

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;

use rtkbase_core::core::protocol::checksum::{crc24q, ubx_checksum};
use rtkbase_core::core::protocol::nmea::build_sentence;
use rtkbase_core::core::protocol::rtcm3::encode_frame;
use rtkbase_core::core::protocol::ubx::{class, nav};
use rtkbase_core::{Engine, EngineConfig, UbxGenerator};

/// About one second of base station output: PVT, MSM4 sized RTCM frames
/// and a few NMEA sentences.
fn mixed_stream() -> Vec<u8> {
    let gen = UbxGenerator::new();
    let mut stream = Vec::new();
    for i in 0..20u8 {
        stream.extend_from_slice(&gen.generate_message(class::NAV, nav::PVT, &[i; 92]));
        let mut rtcm = vec![0x43, 0x20];
        rtcm.extend(std::iter::repeat(i).take(180));
        stream.extend_from_slice(&encode_frame(&rtcm));
        stream.extend_from_slice(
            build_sentence("GNGGA,123519.00,4807.03800,N,01131.00000,E,1,12,0.9,545.4,M,46.9,M,,")
                .as_bytes(),
        );
    }
    stream
}

fn checksum_benchmark(c: &mut Criterion) {
    let data: Vec<u8> = (0..1024).map(|i| (i % 256) as u8).collect();

    let mut group = c.benchmark_group("checksum");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("ubx_fletcher", |b| {
        b.iter(|| black_box(ubx_checksum(black_box(&data))))
    });

    group.bench_function("crc24q", |b| b.iter(|| black_box(crc24q(black_box(&data)))));

    group.finish();
}

fn engine_benchmark(c: &mut Criterion) {
    let stream = mixed_stream();

    let mut group = c.benchmark_group("engine");
    group.throughput(Throughput::Bytes(stream.len() as u64));

    group.bench_function("ingest_512_byte_reads", |b| {
        b.iter(|| {
            let mut engine = Engine::new(EngineConfig::default());
            for chunk in stream.chunks(512) {
                engine.ingest(black_box(chunk));
            }
            black_box(engine.stats())
        })
    });

    group.bench_function("ingest_single_bytes", |b| {
        b.iter(|| {
            let mut engine = Engine::new(EngineConfig::default());
            for byte in &stream {
                engine.ingest(std::slice::from_ref(byte));
            }
            black_box(engine.stats())
        })
    });

    group.finish();
}

criterion_group!(benches, checksum_benchmark, engine_benchmark);
criterion_main!(benches);
