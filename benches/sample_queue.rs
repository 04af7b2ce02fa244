//! Criterion microbenchmarks for the real-time audio path.
//!
//! Run with:
//!   cargo bench --bench sample_queue

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use comms_link::audio::resample::LinearResampler;
use comms_link::audio::SampleQueue;
use comms_link::codec::OpusEncoder;
use comms_link::constants::FRAME_SAMPLES;

/// One callback's worth of push followed by the matching drain
fn bench_queue_batches(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue/batch");
    for batch in [128usize, 480, 960, 4096] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            let (mut producer, mut consumer) = SampleQueue::new();
            let input = vec![1i16; batch];
            let mut output = vec![0i16; batch];
            b.iter(|| {
                producer.push_slice(black_box(&input));
                consumer.fill_or_silence(black_box(&mut output));
            });
        });
    }
    group.finish();
}

fn bench_queue_per_sample(c: &mut Criterion) {
    c.bench_function("queue/push_pop_single", |b| {
        let (mut producer, mut consumer) = SampleQueue::new();
        b.iter(|| {
            producer.push(black_box(42));
            black_box(consumer.pop_or_silence());
        });
    });
}

fn bench_resample_capture(c: &mut Criterion) {
    let input: Vec<i16> = (0..441).map(|i| (i * 37 % 2000) as i16).collect();
    c.bench_function("resample/44100_to_48000_10ms", |b| {
        let mut resampler = LinearResampler::new(44_100, 48_000);
        b.iter(|| {
            let mut produced = 0usize;
            for &s in &input {
                resampler.push(black_box(s), |_| produced += 1);
            }
            produced
        });
    });
}

fn bench_encode_frame(c: &mut Criterion) {
    let frame: Vec<i16> = (0..FRAME_SAMPLES)
        .map(|i| ((i as f32 * 0.0575).sin() * 8000.0) as i16)
        .collect();
    c.bench_function("codec/encode_20ms", |b| {
        let mut encoder = OpusEncoder::new().unwrap();
        b.iter(|| encoder.encode(black_box(&frame)).unwrap());
    });
}

criterion_group!(
    benches,
    bench_queue_batches,
    bench_queue_per_sample,
    bench_resample_capture,
    bench_encode_frame
);
criterion_main!(benches);
