use clipstage::{ClipboardCodec, NodeId};
use compact_str::{CompactString, format_compact};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

fn sample_entries(count: usize) -> Vec<(NodeId, CompactString)> {
    (0..count)
        .map(|i| {
            (
                NodeId::from(format_compact!("n{i}").as_str()),
                format_compact!("Workspace Item {i}"),
            )
        })
        .collect()
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("clipboard_encode");

    for count in [1usize, 16, 256] {
        let entries = sample_entries(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &entries, |b, entries| {
            b.iter(|| ClipboardCodec::encode_entries(black_box("fs"), black_box(entries)))
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("clipboard_decode");

    for count in [1usize, 16, 256] {
        let payload = ClipboardCodec::encode_entries("fs", &sample_entries(count));
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &payload, |b, payload| {
            b.iter(|| ClipboardCodec::decode(black_box(payload)))
        });
    }

    // Foreign clipboard text should bail out quickly.
    let foreign = "just some text someone copied from a browser".repeat(64);
    group.bench_function("foreign_text", |b| {
        b.iter(|| ClipboardCodec::decode(black_box(&foreign)))
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
