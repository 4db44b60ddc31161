//! Throughput benchmarks for Beacon.
//!
//! These benchmarks measure the raw throughput of the relay's hot-path
//! components.

use std::sync::Arc;

use beacon_core::{
    same_network, ConnectionRegistry, IdentityResolver, IdentityStore, MemoryStore, NewIdentity,
};
use beacon_protocol::codec::MAX_FRAME_SIZE;
use beacon_protocol::{FrameCodec, InboundEnvelope, Locality, OutboundEnvelope, WireFormat};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;

fn outbound(payload_len: usize) -> OutboundEnvelope {
    OutboundEnvelope {
        sender: "+15551230000".to_string(),
        kind: Some("offer".to_string()),
        payload: json!({ "sdp": "x".repeat(payload_len) }),
        locality: Locality {
            same_network: true,
            sender_ip: Some("10.0.0.5".to_string()),
            target_ip: Some("10.0.0.6".to_string()),
        },
    }
}

fn inbound(payload_len: usize) -> InboundEnvelope {
    InboundEnvelope::new("offer", "+15551239999", json!({ "sdp": "x".repeat(payload_len) }))
}

/// Benchmark envelope encoding.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    let codec = FrameCodec::new(MAX_FRAME_SIZE);

    for (label, size) in [("64B", 64), ("1KB", 1024), ("64KB", 65536)] {
        let envelope = outbound(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(BenchmarkId::new("json", label), |b| {
            b.iter(|| codec.encode(black_box(&envelope), WireFormat::Json))
        });
        group.bench_function(BenchmarkId::new("msgpack", label), |b| {
            b.iter(|| codec.encode(black_box(&envelope), WireFormat::MessagePack))
        });
    }

    group.finish();
}

/// Benchmark envelope decoding.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    let codec = FrameCodec::new(MAX_FRAME_SIZE);

    for (label, size) in [("64B", 64), ("1KB", 1024), ("64KB", 65536)] {
        let envelope = inbound(size);
        let text = serde_json::to_string(&envelope).unwrap();
        let binary = rmp_serde::to_vec_named(&envelope).unwrap();

        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_function(BenchmarkId::new("json", label), |b| {
            b.iter(|| codec.decode_text(black_box(&text)))
        });
        group.throughput(Throughput::Bytes(binary.len() as u64));
        group.bench_function(BenchmarkId::new("msgpack", label), |b| {
            b.iter(|| codec.decode_binary(black_box(&binary)))
        });
    }

    group.finish();
}

/// Benchmark target resolution.
fn bench_resolver(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolver");
    let rt = tokio::runtime::Runtime::new().unwrap();

    let store = Arc::new(MemoryStore::new());
    rt.block_on(async {
        for i in 0..10_000 {
            store
                .upsert(NewIdentity::new(format!("+1555{i:07}"), format!("peer {i}")))
                .await
                .unwrap();
        }
    });
    let resolver = IdentityResolver::new(store);

    group.bench_function("surrogate_key", |b| {
        b.iter(|| rt.block_on(resolver.resolve(black_box("4242"))))
    });
    group.bench_function("canonical_address", |b| {
        b.iter(|| rt.block_on(resolver.resolve(black_box("+15550004242"))))
    });
    group.bench_function("not_found", |b| {
        b.iter(|| rt.block_on(resolver.resolve(black_box("99999"))))
    });

    group.finish();
}

/// Benchmark the locality classifier.
fn bench_locality(c: &mut Criterion) {
    let mut group = c.benchmark_group("locality");

    group.bench_function("ipv4_equal", |b| {
        b.iter(|| same_network(black_box("10.0.0.5"), black_box("10.0.0.5")))
    });
    group.bench_function("ipv6_prefix", |b| {
        b.iter(|| {
            same_network(
                black_box("2001:db8:1:2:aaaa::1"),
                black_box("2001:db8:1:2:bbbb::2"),
            )
        })
    });

    group.finish();
}

/// Benchmark fan-out to multi-device identities.
fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");

    for size in [1, 10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let registry = ConnectionRegistry::new();
            let mut rxs: Vec<_> = (0..size)
                .map(|_| {
                    let (handle, rx) = registry.open_session();
                    registry.join("+2000", handle);
                    rx
                })
                .collect();
            let envelope = outbound(64);

            b.iter(|| {
                let delivered = registry.send_to("+2000", black_box(envelope.clone()));
                for rx in &mut rxs {
                    let _ = rx.try_recv();
                }
                delivered
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_encode,
    bench_decode,
    bench_resolver,
    bench_locality,
    bench_fanout,
);
criterion_main!(benches);
