use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kms_core::audit::{AuditChain, AuditStatus, NewAuditEvent};
use kms_core::prelude::*;
use kms_core::wrapping::MasterKey;
use std::sync::Arc;

fn engine() -> Kms {
    let config = EngineConfig::new(&[0x11; 32], &[0x22; 32]).unwrap();
    Kms::in_memory(config).unwrap()
}

fn wrapping_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("wrapping");
    let master = MasterKey::new(&[0x33; 32]).unwrap();
    let material = [0x44u8; 32];
    let context = b"kms:key:bench:v1";

    group.bench_function("wrap", |b| {
        b.iter(|| master.wrap(&material, Some(context)))
    });

    let wrapped = master.wrap(&material, Some(context)).unwrap();
    group.bench_function("unwrap", |b| {
        b.iter(|| master.unwrap(&wrapped, Some(context)))
    });

    group.finish();
}

fn symmetric_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("symmetric");
    let kms = engine();
    let ctx = OperationContext::new("bench");

    for algorithm in ["AES128GCM", "AES256GCM", "AES256CBC", "ChaCha20Poly1305"] {
        let key = kms.create_key(&ctx, algorithm, algorithm).unwrap();

        for size in [64usize, 4096, 65536] {
            let plaintext = vec![0x55u8; size];
            group.throughput(Throughput::Bytes(size as u64));

            group.bench_with_input(
                BenchmarkId::new(format!("{}_encrypt", algorithm), size),
                &plaintext,
                |b, plaintext| b.iter(|| kms.encrypt(&ctx, &key.id, plaintext)),
            );

            let envelope = kms.encrypt(&ctx, &key.id, &plaintext).unwrap();
            group.bench_with_input(
                BenchmarkId::new(format!("{}_decrypt", algorithm), size),
                &envelope,
                |b, envelope| b.iter(|| kms.decrypt(&ctx, envelope)),
            );
        }
    }

    group.finish();
}

fn signature_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("signatures");
    let kms = engine();
    let ctx = OperationContext::new("bench");
    let message = b"This is a test message for benchmarking signature operations";

    for algorithm in ["ECC256", "ECC384", "Ed25519", "HMAC256", "HMAC512"] {
        let key = kms.create_key(&ctx, algorithm, algorithm).unwrap();

        group.bench_function(BenchmarkId::new("sign", algorithm), |b| {
            b.iter(|| kms.encrypt(&ctx, &key.id, message))
        });

        let envelope = kms.encrypt(&ctx, &key.id, message).unwrap();
        group.bench_function(BenchmarkId::new("verify", algorithm), |b| {
            b.iter(|| kms.decrypt(&ctx, &envelope))
        });
    }

    group.finish();
}

fn rsa_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("rsa");
    group.sample_size(10);
    let kms = engine();
    let ctx = OperationContext::new("bench");
    let key = kms.create_key(&ctx, "rsa", "RSA2048").unwrap();
    let plaintext = [0x66u8; 32];

    group.bench_function("encrypt", |b| {
        b.iter(|| kms.encrypt(&ctx, &key.id, &plaintext))
    });

    let envelope = kms.encrypt(&ctx, &key.id, &plaintext).unwrap();
    group.bench_function("decrypt", |b| b.iter(|| kms.decrypt(&ctx, &envelope)));

    group.finish();
}

fn audit_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("audit");
    let chain = AuditChain::open(&[0x77; 32], Arc::new(MemoryStore::new())).unwrap();

    group.bench_function("append", |b| {
        b.iter(|| {
            chain.append(
                NewAuditEvent::new("bench", "encrypt", "key", AuditStatus::Success)
                    .resource_id("bench-key"),
            )
        })
    });

    let store = Arc::new(MemoryStore::new());
    let chain = AuditChain::open(&[0x77; 32], store).unwrap();
    for _ in 0..1000 {
        chain
            .append(NewAuditEvent::new("bench", "decrypt", "key", AuditStatus::Success))
            .unwrap();
    }
    group.bench_function("verify_1000", |b| b.iter(|| chain.verify_stored()));

    group.finish();
}

criterion_group!(
    benches,
    wrapping_benchmarks,
    symmetric_benchmarks,
    signature_benchmarks,
    rsa_benchmarks,
    audit_benchmarks
);
criterion_main!(benches);
