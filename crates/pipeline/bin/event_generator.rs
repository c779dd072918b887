//! Multi-Producer Event Generator
//!
//! Demonstrates structured async concurrency patterns for feeding the
//! ingestion pipeline:
//! - `JoinSet` for managing dynamic producer task lifecycles
//! - `watch` channel for graceful shutdown signaling, independent of the
//!   channel's own [`ShutdownSignal`]
//! - Decoupled rate limiting via the `RateLimiter` trait
//! - Per-producer FIFO ordering with varied generation rates
//!
//! Run with: `cargo run -p ingest-pipeline --bin event_generator`

use ingest_pipeline::{
    BufferOptions, Channel, ChannelBuilder, IntervalRateLimiter, NeverCancel, RateLimiter,
    StdoutExporter,
};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;

#[derive(Debug, Clone, serde::Serialize)]
struct Event {
    producer_id: usize,
    sequence: u64,
    operation: &'static str,
    payload_bytes: usize,
}

/// Statistics collected from each producer task.
#[derive(Debug)]
struct ProducerStats {
    producer_id: usize,
    events_sent: u64,
    duration: Duration,
    target_rate: Option<f64>,
}

impl ProducerStats {
    fn effective_rate(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.events_sent as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }
}

/// Configuration for a single producer task.
struct ProducerConfig {
    id: usize,
    rate_per_sec: f64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Multi-Producer Event Generator ===\n");

    let exporter = StdoutExporter::new(false);
    let mut options = BufferOptions::default();
    options.outbound_buffer_max_lifetime = Duration::from_millis(50);

    println!("Pipeline configuration:");
    println!("  inbound buffer size:  {}", options.inbound_buffer_max_size);
    println!("  outbound batch size:  {}", options.outbound_buffer_max_size);
    println!("  outbound batch age:   {:?}\n", options.outbound_buffer_max_lifetime);

    let channel: Arc<Channel<Event, ()>> = Arc::new(ChannelBuilder::new(exporter).options(options).build());

    // watch channel broadcasting shutdown to every producer, independent of
    // the channel's own shutdown signal (which only stops new submissions).
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let producer_configs = vec![
        ProducerConfig { id: 0, rate_per_sec: 50.0 },
        ProducerConfig { id: 1, rate_per_sec: 100.0 },
        ProducerConfig { id: 2, rate_per_sec: 200.0 },
        ProducerConfig { id: 3, rate_per_sec: 500.0 },
    ];

    println!("Starting {} producer tasks with varied rates:", producer_configs.len());
    for cfg in &producer_configs {
        println!("  producer {}: {} events/sec", cfg.id, cfg.rate_per_sec);
    }
    println!();

    let mut join_set: JoinSet<ProducerStats> = JoinSet::new();

    for cfg in producer_configs {
        let channel = Arc::clone(&channel);
        let shutdown_rx = shutdown_rx.clone();
        let rate_limiter = IntervalRateLimiter::from_rate(cfg.rate_per_sec);

        join_set.spawn(async move {
            producer_task(cfg.id, channel, rate_limiter, shutdown_rx).await
        });
    }

    println!("Generators running for 5 seconds...\n");
    tokio::time::sleep(Duration::from_secs(5)).await;

    shutdown_tx.send(true).expect("producers still listening");

    println!("Waiting for producer tasks to finish...\n");
    let mut all_stats = Vec::new();
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok(stats) => {
                println!(
                    "producer {} finished: {} events in {:.2}s ({:.1} events/sec, target {:.1})",
                    stats.producer_id,
                    stats.events_sent,
                    stats.duration.as_secs_f64(),
                    stats.effective_rate(),
                    stats.target_rate.unwrap_or(f64::INFINITY),
                );
                all_stats.push(stats);
            }
            Err(e) => eprintln!("producer task panicked: {e}"),
        }
    }

    let total_events: u64 = all_stats.iter().map(|s| s.events_sent).sum();
    let max_duration = all_stats.iter().map(|s| s.duration).max().unwrap_or(Duration::ZERO);

    println!("\n=== Generation Summary ===");
    println!("total events submitted: {total_events}");
    println!("total duration:         {:.2}s", max_duration.as_secs_f64());
    if max_duration.as_secs_f64() > 0.0 {
        println!(
            "aggregate throughput:   {:.1} events/sec",
            total_events as f64 / max_duration.as_secs_f64()
        );
    }

    println!("\nshutting down pipeline (draining remaining events)...");
    let channel = Arc::try_unwrap(channel).unwrap_or_else(|_| panic!("producers still hold a reference"));
    channel.complete().await;
    println!("shutdown complete!");
}

/// Generates events at a controlled rate until the shutdown signal fires.
async fn producer_task(
    producer_id: usize,
    channel: Arc<Channel<Event, ()>>,
    mut rate_limiter: IntervalRateLimiter,
    mut shutdown_rx: watch::Receiver<bool>,
) -> ProducerStats {
    let target_rate = rate_limiter.target_rate();
    let start_time = Instant::now();
    let mut sequence = 0u64;

    loop {
        if *shutdown_rx.borrow_and_update() {
            break;
        }

        rate_limiter.wait().await;

        let event = generate_random_event(producer_id, sequence);
        if !channel.wait_to_write_event(event, &NeverCancel).await {
            break;
        }

        sequence += 1;

        if sequence.is_multiple_of(100) {
            tokio::task::yield_now().await;
        }
    }

    ProducerStats {
        producer_id,
        events_sent: sequence,
        duration: start_time.elapsed(),
        target_rate,
    }
}

/// Builds a random event simulating one of a handful of backend operations.
fn generate_random_event(producer_id: usize, sequence: u64) -> Event {
    let mut rng = rand::thread_rng();

    let operations = [
        "http.request",
        "db.query",
        "cache.get",
        "queue.publish",
        "rpc.call",
    ];

    Event {
        producer_id,
        sequence,
        operation: operations[rng.gen_range(0..operations.len())],
        payload_bytes: rng.gen_range(16..4096),
    }
}
