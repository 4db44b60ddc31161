//! Codec benchmarks for beacon-protocol.

use beacon_protocol::{codec, InboundEnvelope, Locality, OutboundEnvelope, WireFormat};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;

fn sample_offer() -> String {
    let env = InboundEnvelope::new("offer", "+2000", json!({"sdp": "v=0\r\n".repeat(16)}));
    serde_json::to_string(&env).unwrap()
}

fn sample_outbound() -> OutboundEnvelope {
    OutboundEnvelope {
        sender: "+1000".into(),
        kind: Some("offer".into()),
        payload: json!({"sdp": "v=0\r\n".repeat(16)}),
        locality: Locality {
            same_network: true,
            sender_ip: Some("10.0.0.5".into()),
            target_ip: Some("10.0.0.7".into()),
        },
    }
}

fn bench_decode_text(c: &mut Criterion) {
    let text = sample_offer();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_function("json_offer", |b| {
        b.iter(|| codec::decode_text(black_box(&text)))
    });
    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let out = sample_outbound();

    let mut group = c.benchmark_group("encode");
    group.bench_function("json_offer", |b| {
        b.iter(|| codec::encode(black_box(&out), WireFormat::Json))
    });
    group.bench_function("msgpack_offer", |b| {
        b.iter(|| codec::encode(black_box(&out), WireFormat::MessagePack))
    });
    group.finish();
}

criterion_group!(benches, bench_decode_text, bench_encode);
criterion_main!(benches);
