/*
Benchmarks the two primitives the control loops depend on: ring buffer
write/peek under contention-free conditions, and the absolute-deadline
sleep used by every periodic task (thread::sleep vs SpinSleeper jitter
at a 10 ms period).
*/

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use std::hint::black_box;
use std::time::{Duration, Instant};

use spin_sleep::{SpinSleeper, SpinStrategy};

use haul_core::buffer::RingBuffer;
use haul_core::types::FilteredSample;

const TARGET_PERIOD_US: u64 = 10_000;
const SAMPLES: usize = 200;

fn bench_ring_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_buffer");

    group.bench_function("write_peek", |b| {
        let buffer = RingBuffer::new();
        let mut n = 0i32;
        b.iter(|| {
            n = n.wrapping_add(1);
            buffer.write(FilteredSample {
                position_x: n,
                ..FilteredSample::default()
            });
            black_box(buffer.peek_latest());
        });
    });

    group.bench_function("write_full_overwrite", |b| {
        let buffer = RingBuffer::new();
        for n in 0..300 {
            buffer.write(FilteredSample {
                position_x: n,
                ..FilteredSample::default()
            });
        }
        b.iter(|| {
            buffer.write(black_box(FilteredSample::default()));
        });
    });

    group.finish();
}

fn bench_period_jitter(c: &mut Criterion) {
    let mut group = c.benchmark_group("period_jitter");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(10));

    group.bench_function(BenchmarkId::new("thread_sleep", "10ms"), |b| {
        b.iter(|| {
            let mut last = Instant::now();
            let mut jitter = Vec::with_capacity(SAMPLES);
            for _ in 0..SAMPLES {
                std::thread::sleep(Duration::from_micros(TARGET_PERIOD_US));
                let now = Instant::now();
                let actual = now.duration_since(last).as_micros() as i64;
                last = now;
                jitter.push(actual - TARGET_PERIOD_US as i64);
            }
            black_box(jitter)
        });
    });

    group.bench_function(BenchmarkId::new("spin_sleep", "10ms"), |b| {
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
        b.iter(|| {
            let mut last = Instant::now();
            let mut jitter = Vec::with_capacity(SAMPLES);
            for _ in 0..SAMPLES {
                sleeper.sleep(Duration::from_micros(TARGET_PERIOD_US));
                let now = Instant::now();
                let actual = now.duration_since(last).as_micros() as i64;
                last = now;
                jitter.push(actual - TARGET_PERIOD_US as i64);
            }
            black_box(jitter)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_ring_buffer, bench_period_jitter);
criterion_main!(benches);
