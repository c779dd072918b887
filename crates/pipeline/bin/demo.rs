//! # Ingestion Pipeline Demo
//!
//! An end-to-end demonstration of the bounded, buffered ingestion pipeline:
//! multiple producers submit events against a simulated, occasionally-failing
//! backend wrapped in retry + circuit breaker + rate limiting.
//!
//! ## Running
//!
//! ```bash
//! # Quick mode (4 producers, 25 events each)
//! cargo run -p ingest-pipeline --bin demo --release -- --quick
//!
//! # Full mode (8 producers, 100 events each)
//! cargo run -p ingest-pipeline --bin demo --release
//! ```

use ingest_pipeline::{
    BufferOptions, Channel, ChannelBuilder, CountingObserver, Exporter, ExportError,
};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize)]
struct Event {
    producer_id: usize,
    sequence: usize,
    operation: &'static str,
    duration_ms: u64,
}

/// A simulated backend that occasionally fails, for demonstrating the pool's
/// retry path. Native async trait implementation (no `#[async_trait]` macro).
struct SimulatedBackendExporter {
    failure_rate: f64,
    latency: Duration,
    export_attempts: AtomicU64,
    successful_exports: AtomicU64,
    failed_exports: AtomicU64,
}

impl SimulatedBackendExporter {
    fn new(failure_rate: f64, latency: Duration) -> Self {
        Self {
            failure_rate,
            latency,
            export_attempts: AtomicU64::new(0),
            successful_exports: AtomicU64::new(0),
            failed_exports: AtomicU64::new(0),
        }
    }

    fn stats(&self) -> (u64, u64, u64) {
        (
            self.export_attempts.load(Ordering::Relaxed),
            self.successful_exports.load(Ordering::Relaxed),
            self.failed_exports.load(Ordering::Relaxed),
        )
    }
}

impl Exporter<Event, ()> for SimulatedBackendExporter {
    fn export(&self, batch: &[Event]) -> impl Future<Output = Result<(), ExportError>> + Send {
        let batch_len = batch.len();
        let failure_rate = self.failure_rate;
        let latency = self.latency;
        self.export_attempts.fetch_add(1, Ordering::Relaxed);

        async move {
            tokio::time::sleep(latency).await;

            if rand::random::<f64>() < failure_rate {
                Err(ExportError::Transport(format!(
                    "simulated backend failure (batch of {batch_len} events)"
                )))
            } else {
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ProducerStats {
    events_submitted: u64,
}

async fn run_producer(
    producer_id: usize,
    event_count: usize,
    channel: Arc<Channel<Event, ()>>,
) -> ProducerStats {
    let operations = [
        "http.request",
        "db.query",
        "cache.get",
        "grpc.call",
        "queue.publish",
    ];
    let mut stats = ProducerStats::default();
    let mut limiter = ingest_pipeline::IntervalRateLimiter::from_rate(500.0);

    for i in 0..event_count {
        use ingest_pipeline::RateLimiter;
        let event = Event {
            producer_id,
            sequence: i,
            operation: operations[i % operations.len()],
            duration_ms: (i % 20) as u64 + 1,
        };

        if channel
            .wait_to_write_event(event, &ingest_pipeline::NeverCancel)
            .await
        {
            stats.events_submitted += 1;
        }

        limiter.wait().await;
    }

    stats
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let quick = args.contains(&"--quick".to_string());
    let (num_producers, events_per_producer) = if quick { (4, 25) } else { (8, 100) };

    tracing::info!(num_producers, events_per_producer, "starting demo");

    let backend = Arc::new(SimulatedBackendExporter::new(0.15, Duration::from_millis(5)));
    let backend_stats = Arc::clone(&backend);

    let resilient = ingest_pipeline::resilient::ResilientExporterBuilder::new(backend)
        .with_retry(ingest_pipeline::resilient::RetryConfig::default())
        .with_circuit_breaker(ingest_pipeline::resilient::CircuitBreakerConfig::default())
        .build_with_retry_and_circuit_breaker();

    let mut options = BufferOptions::default();
    options.outbound_buffer_max_size = 64;
    options.outbound_buffer_max_lifetime = Duration::from_millis(200);

    let observer = Arc::new(CountingObserver::new());

    let channel: Arc<Channel<Event, ()>> = Arc::new(
        ChannelBuilder::new(resilient)
            .options(options)
            .observer_arc(Arc::clone(&observer))
            .build(),
    );

    let start = Instant::now();
    let mut handles = Vec::new();
    for producer_id in 0..num_producers {
        let channel = Arc::clone(&channel);
        handles.push(tokio::spawn(run_producer(
            producer_id,
            events_per_producer,
            channel,
        )));
    }

    let mut total_submitted = 0u64;
    for handle in handles {
        if let Ok(stats) = handle.await {
            total_submitted += stats.events_submitted;
        }
    }

    let channel = Arc::try_unwrap(channel).unwrap_or_else(|_| panic!("producers still hold a reference"));
    channel.complete().await;

    let elapsed = start.elapsed();
    let (attempts, _, _) = backend_stats.stats();

    println!("\ningestion pipeline demo complete");
    println!("  events submitted:     {total_submitted}");
    println!("  elapsed:              {elapsed:?}");
    println!("  backend export calls: {attempts}");
    println!(
        "  inbound published:    {}",
        observer.inbound_published.load(Ordering::Relaxed)
    );
    println!(
        "  export attempts:      {}",
        observer.export_attempts.load(Ordering::Relaxed)
    );
    println!(
        "  export retries:       {}",
        observer.export_retries.load(Ordering::Relaxed)
    );
    println!(
        "  buffers completed:    {}",
        observer.export_buffer_done.load(Ordering::Relaxed)
    );
}
