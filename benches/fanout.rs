//! Fan-out benchmark suite.
//!
//! Measures the per-message cost of snapshotting the registry and invoking
//! every listener, and the cost of state machine transitions.
//!
//! Run with: cargo bench --bench fanout
//! Results saved to: target/criterion/

use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use overlay_link::multiplexer::{LinkEvent, ListenerRegistry, Machine, fan_out};
use overlay_link::{CloseKind, InboundMessage};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const LISTENER_COUNTS: &[usize] = &[1, 8, 64, 512];

const PAYLOAD: &str = r#"{"type":"tts.queued","user":"viewer42","text":"hello chat","voice":"en-US"}"#;

// ============================================================================
// Benchmark: Fan-out
// ============================================================================

fn bench_fan_out(c: &mut Criterion) {
    let message = InboundMessage::decode(PAYLOAD).expect("payload decodes");

    let mut group = c.benchmark_group("fan_out");

    for &count in LISTENER_COUNTS {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut registry = ListenerRegistry::new();
        for _ in 0..count {
            let hits = Arc::clone(&hits);
            registry.insert(Arc::new(move |message: &InboundMessage| {
                if message.kind().is_some() {
                    hits.fetch_add(1, Ordering::Relaxed);
                }
            }));
        }

        group.bench_with_input(BenchmarkId::new("listeners", count), &registry, |b, registry| {
            b.iter(|| {
                let snapshot = registry.snapshot();
                black_box(fan_out(&snapshot, &message))
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Decode
// ============================================================================

fn bench_decode(c: &mut Criterion) {
    c.bench_function("decode", |b| {
        b.iter(|| black_box(InboundMessage::decode(black_box(PAYLOAD))))
    });
}

// ============================================================================
// Benchmark: State Machine
// ============================================================================

fn bench_reconnect_cycle(c: &mut Criterion) {
    c.bench_function("reconnect_cycle", |b| {
        b.iter(|| {
            let mut machine = Machine::new(Duration::from_secs(3));
            machine.step(LinkEvent::ListenerAdded { listeners: 1 });

            for _ in 0..16 {
                let Some(attempt) = machine.state().attempt() else {
                    break;
                };
                machine.step(LinkEvent::Opened(attempt));
                machine.step(LinkEvent::Closed {
                    attempt,
                    kind: CloseKind::Abnormal,
                });
                if let Some(timer) = machine.pending_timer() {
                    machine.step(LinkEvent::ReconnectDue(timer));
                }
            }

            black_box(machine.step(LinkEvent::ListenerRemoved { listeners: 0 }))
        });
    });
}

criterion_group!(benches, bench_fan_out, bench_decode, bench_reconnect_cycle);
criterion_main!(benches);
