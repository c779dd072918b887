use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ingest_pipeline::{BoundedChannelFullMode, BufferOptions, Channel, ChannelBuilder, NeverCancel};
use std::time::Duration;

const EVENTS_PER_RUN: u64 = 50_000;

fn options(outbound_buffer_max_size: usize, export_max_concurrency: usize) -> BufferOptions {
    BufferOptions {
        inbound_buffer_max_size: 16_384,
        outbound_buffer_max_size,
        outbound_buffer_max_lifetime: Duration::from_millis(50),
        export_max_concurrency: Some(export_max_concurrency),
        export_max_retries: 0,
        bounded_channel_full_mode: BoundedChannelFullMode::Wait,
        ..BufferOptions::default()
    }
}

async fn drive(channel: Channel<u32, ()>, events: u64) {
    for i in 0..events {
        channel.wait_to_write_event(i as u32, &NeverCancel).await;
    }
    channel.complete().await;
}

fn bench_batch_sizes(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("batch_sizes");
    group.throughput(Throughput::Elements(EVENTS_PER_RUN));

    for batch_size in [64, 256, 1024, 4096].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, &batch_size| {
                b.to_async(&rt).iter(|| {
                    let channel: Channel<u32, ()> =
                        ChannelBuilder::new(ingest_pipeline::NullExporter)
                            .options(options(batch_size, 4))
                            .build();
                    drive(channel, EVENTS_PER_RUN)
                });
            },
        );
    }

    group.finish();
}

fn bench_concurrency(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("exporter_concurrency");
    group.throughput(Throughput::Elements(EVENTS_PER_RUN));

    for workers in [1, 2, 4, 8].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(workers), workers, |b, &workers| {
            b.to_async(&rt).iter(|| {
                let channel: Channel<u32, ()> = ChannelBuilder::new(ingest_pipeline::NullExporter)
                    .options(options(1024, workers))
                    .build();
                drive(channel, EVENTS_PER_RUN)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_batch_sizes, bench_concurrency);
criterion_main!(benches);
