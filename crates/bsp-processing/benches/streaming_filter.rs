//! Throughput of the streaming filter
//!
//! The acquisition loop calls `process_one` once per channel per frame, so the
//! per-sample path matters most; block and offline paths are measured for
//! comparison.

use bsp_processing::{design_notch, filtfilt, FilterConfig, StreamingFilter};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn test_signal(len: usize) -> Vec<f64> {
    (0..len)
        .map(|n| {
            let t = n as f64 / 512.0;
            8192.0 + 400.0 * (2.0 * std::f64::consts::PI * 100.0 * t).sin()
        })
        .collect()
}

fn emg_filter() -> StreamingFilter {
    FilterConfig::emg(512.0)
        .build()
        .expect("EMG preset is valid at 512 Hz")
}

/// Benchmark one sample at a time
fn bench_process_one(c: &mut Criterion) {
    let mut filter = emg_filter();
    let mut x = 0.0_f64;

    c.bench_function("process_one_emg_notch", |b| {
        b.iter(|| {
            x += 1.0;
            black_box(filter.process_one(black_box(x)))
        })
    });
}

/// Benchmark block processing at typical chunk sizes
fn bench_process_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_block");

    for &size in &[32usize, 128, 512, 4096] {
        let input = test_signal(size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("in_place", size), &input, |b, input| {
            let mut filter = emg_filter();
            let mut buffer = input.clone();
            b.iter(|| {
                buffer.copy_from_slice(input);
                filter.process_block_in_place(black_box(&mut buffer));
                black_box(buffer[size - 1])
            })
        });

        group.bench_with_input(BenchmarkId::new("sample_by_sample", size), &input, |b, input| {
            let mut filter = emg_filter();
            b.iter(|| {
                let mut last = 0.0;
                for &x in input {
                    last = filter.process_one(x);
                }
                black_box(last)
            })
        });
    }

    group.finish();
}

/// Benchmark offline zero-phase filtering of one second and one minute of data
fn bench_filtfilt(c: &mut Criterion) {
    let mut group = c.benchmark_group("filtfilt");
    let config = FilterConfig::emg(512.0);
    let (spec, _) = config.design().expect("EMG preset is valid at 512 Hz");
    let notch = design_notch(50.0, 512.0, 30.0).expect("valid notch");

    for &seconds in &[1usize, 60] {
        let input = test_signal(512 * seconds);
        group.throughput(Throughput::Elements(input.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(seconds), &input, |b, input| {
            b.iter(|| black_box(filtfilt(Some(&spec), Some(&notch), input)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_process_one, bench_process_block, bench_filtfilt);
criterion_main!(benches);
