//! Hot path benchmarks for profiling-driven optimization.
//!
//! Run with: `cargo bench --bench hot_paths`
//! Compare baselines: `cargo bench --bench hot_paths -- --baseline main`
//!
//! These benchmarks cover the paths that dominate a partitioned run:
//! event queue push/pop, the exchange buffer codec, and a whole
//! single-partition PHOLD run.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use partisim::kernel::{EventQueue, PartitionId};
use partisim::rng::DeterministicRng;
use partisim::wire::ExchangeBuffer;
use partisim::workload::{node_name, PholdMessage, WorkloadNode};
use partisim::{Event, SimTime, Timeline};

fn random_events(n: usize, seed: u64) -> Vec<Event<PholdMessage>> {
    let mut rng = DeterministicRng::new(seed);
    (0..n)
        .map(|i| {
            Event::new(
                SimTime(rng.gen_range(0, 1_000_000)),
                node_name(i % 64),
                PholdMessage::Receive,
            )
        })
        .collect()
}

/// Benchmark EventQueue push followed by draining pops
fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_queue");

    for size in [100, 1_000, 10_000] {
        let events = random_events(size, 1);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_function(format!("push_pop_{}", size), |b| {
            b.iter_batched(
                || events.clone(),
                |events| {
                    let mut queue = EventQueue::new();
                    for event in events {
                        queue.push(event);
                    }
                    while !queue.is_empty() {
                        black_box(queue.pop_min());
                    }
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

/// Benchmark exchange buffer encode and decode
fn bench_wire(c: &mut Criterion) {
    let mut group = c.benchmark_group("exchange_buffer");

    for size in [0, 16, 256] {
        let buffer = ExchangeBuffer::new(PartitionId(0), 7, random_events(size, 2), SimTime(1234));
        let encoded = buffer.encode().unwrap();
        group.throughput(Throughput::Bytes(encoded.len() as u64));

        group.bench_function(format!("encode_{}", size), |b| {
            b.iter(|| black_box(&buffer).encode().unwrap())
        });
        group.bench_function(format!("decode_{}", size), |b| {
            b.iter(|| ExchangeBuffer::<PholdMessage>::decode(black_box(&encoded)).unwrap())
        });
    }

    group.finish();
}

/// Benchmark a complete PHOLD run on one timeline
fn bench_phold_single_partition(c: &mut Criterion) {
    let mut group = c.benchmark_group("phold");
    group.sample_size(20);

    let nodes = 16;
    let names: Vec<String> = (0..nodes).map(node_name).collect();
    group.bench_function("single_partition_16_nodes", |b| {
        b.iter(|| {
            let mut timeline = Timeline::new(SimTime(10_000));
            for (i, name) in names.iter().enumerate() {
                let node = WorkloadNode::new(
                    name.clone(),
                    4,
                    10,
                    names.clone(),
                    DeterministicRng::derive(42, i as u64),
                );
                timeline.add_entity(Box::new(node)).unwrap();
            }
            timeline.init().unwrap();
            black_box(timeline.run().unwrap())
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_queue,
    bench_wire,
    bench_phold_single_partition,
);

criterion_main!(benches);
