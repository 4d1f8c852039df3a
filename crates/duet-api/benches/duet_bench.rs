//! Criterion microbenchmarks for duet hot paths.
//!
//! Run with:
//!   cargo bench -p duet-api
//!
//! HTML reports are written to `target/criterion/`.

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use duet_common::{ids::generate_session_id, models::SessionId, validation::validate_session_id};
use duet_db::MemoryStore;
use duet_match::{Coordinator, PayloadKind, Settings, signaling::role_for};
use serde_json::json;

// ── Signal payloads ───────────────────────────────────────────────────────────

fn bench_payload_classify(c: &mut Criterion) {
    let candidate = json!({
        "type": "candidate",
        "candidate": "candidate:842163049 1 udp 1677729535 203.0.113.7 46154 typ srflx raddr 0.0.0.0 rport 0",
        "sdpMid": "0",
        "sdpMLineIndex": 0
    });

    c.bench_function("signal/classify", |b| {
        b.iter(|| PayloadKind::of(black_box(&candidate)))
    });
}

/// Offers grow with the number of codecs and tracks; measure at typical sizes.
fn bench_offer_size_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("signal/offer_size_scaling");

    for size in [1024usize, 4096, 16384] {
        let offer = json!({ "type": "offer", "sdp": "a".repeat(size) });
        group.bench_with_input(BenchmarkId::from_parameter(size), &offer, |b, o| {
            b.iter(|| serde_json::to_vec(black_box(o)).unwrap().len())
        });
    }

    group.finish();
}

// ── Session ids ───────────────────────────────────────────────────────────────

fn bench_session_id_generate(c: &mut Criterion) {
    c.bench_function("id/session_generate", |b| b.iter(generate_session_id));
}

fn bench_session_id_validate(c: &mut Criterion) {
    let id = generate_session_id();
    c.bench_function("id/session_validate", |b| {
        b.iter(|| validate_session_id(black_box(id.as_str())).unwrap())
    });
}

fn bench_role_for(c: &mut Criterion) {
    let (a, b_) = (generate_session_id(), generate_session_id());
    c.bench_function("id/role_for", |b| {
        b.iter(|| role_for(black_box(&a), black_box(&b_)))
    });
}

// ── Coordinator round trips (in-memory store) ─────────────────────────────────

fn bench_pair_and_end(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let coordinator = Coordinator::new(Arc::new(MemoryStore::new()), Settings::default());
    let (s1, s2) = (SessionId::from("bench-a"), SessionId::from("bench-b"));

    c.bench_function("coordinator/pair_and_end", |b| {
        b.iter(|| {
            rt.block_on(async {
                coordinator.heartbeat(&s1).await.unwrap();
                coordinator.heartbeat(&s2).await.unwrap();
                let m = coordinator.poll_for_match(&s1).await.unwrap().unwrap();
                coordinator.end_call(m.match_id).await.unwrap();
            })
        })
    });
}

fn bench_signal_round_trip(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let coordinator = Coordinator::new(Arc::new(MemoryStore::new()), Settings::default());
    let (s1, s2) = (SessionId::from("bench-a"), SessionId::from("bench-b"));
    let match_id = rt.block_on(async {
        coordinator.start_waiting(Some(s1.clone())).await.unwrap();
        coordinator.start_waiting(Some(s2.clone())).await.unwrap();
        coordinator.poll_for_match(&s1).await.unwrap().unwrap().match_id
    });
    let payload = json!({ "type": "candidate", "candidate": "candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host" });

    c.bench_function("coordinator/signal_round_trip", |b| {
        b.iter(|| {
            rt.block_on(async {
                coordinator
                    .send_negotiation_message(match_id, &s1, payload.clone())
                    .await
                    .unwrap();
                coordinator.poll_negotiation_messages(match_id, &s2).await.unwrap()
            })
        })
    });
}

// ── criterion entrypoints ─────────────────────────────────────────────────────

criterion_group!(signals, bench_payload_classify, bench_offer_size_scaling);

criterion_group!(
    ids,
    bench_session_id_generate,
    bench_session_id_validate,
    bench_role_for,
);

criterion_group!(coordinator, bench_pair_and_end, bench_signal_round_trip);

criterion_main!(signals, ids, coordinator);
