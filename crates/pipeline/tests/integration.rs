use ingest_pipeline::{
    BoundedChannelFullMode, BufferOptions, Channel, ChannelBuilder, CountingObserver, ExportError,
    Exporter, NeverCancel, ResponseClassifier,
};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
struct Event {
    producer_id: usize,
    sequence: u64,
}

/// Records every exported event and how many times `export` was called.
#[derive(Debug, Default)]
struct TestExporter {
    events: Mutex<Vec<Event>>,
    calls: AtomicU64,
}

impl TestExporter {
    fn new() -> Self {
        Self::default()
    }

    fn exported_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    fn events_by_producer(&self, producer_id: usize) -> Vec<Event> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.producer_id == producer_id)
            .cloned()
            .collect()
    }
}

impl Exporter<Event, ()> for TestExporter {
    fn export(&self, batch: &[Event]) -> impl Future<Output = Result<(), ExportError>> + Send {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.events.lock().unwrap().extend_from_slice(batch);
        async { Ok(()) }
    }
}

/// Exports after a fixed delay, to force producers to observe backpressure.
#[derive(Debug, Default)]
struct SlowExporter {
    delay: Duration,
    events: Mutex<Vec<Event>>,
}

impl SlowExporter {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            events: Mutex::new(Vec::new()),
        }
    }

    fn exported_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

impl Exporter<Event, ()> for SlowExporter {
    async fn export(&self, batch: &[Event]) -> Result<(), ExportError> {
        tokio::time::sleep(self.delay).await;
        self.events.lock().unwrap().extend_from_slice(batch);
        Ok(())
    }
}

fn test_event(producer_id: usize, sequence: u64) -> Event {
    Event {
        producer_id,
        sequence,
    }
}

#[tokio::test]
async fn concurrent_submission_no_data_loss_and_per_producer_order() {
    let exporter = Arc::new(TestExporter::new());

    let mut options = BufferOptions::default();
    options.outbound_buffer_max_size = 200;
    options.outbound_buffer_max_lifetime = Duration::from_millis(50);

    let channel: Arc<Channel<Event, ()>> = Arc::new(
        ChannelBuilder::new(Arc::clone(&exporter))
            .options(options)
            .build(),
    );

    let mut tasks = Vec::new();
    for producer_id in 0..8 {
        let channel = Arc::clone(&channel);
        tasks.push(tokio::spawn(async move {
            for seq in 0..2_000u64 {
                let event = test_event(producer_id, seq);
                assert!(channel.wait_to_write_event(event, &NeverCancel).await);
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    let channel = Arc::try_unwrap(channel).unwrap_or_else(|_| panic!("still shared"));
    channel.complete().await;

    assert_eq!(exporter.exported_count(), 8 * 2_000);

    for producer_id in 0..8 {
        let events = exporter.events_by_producer(producer_id);
        assert_eq!(events.len(), 2_000);
        for window in events.windows(2) {
            assert!(
                window[0].sequence < window[1].sequence,
                "producer {producer_id} FIFO order violated"
            );
        }
    }
}

#[tokio::test]
async fn wait_mode_backpressure_eventually_delivers_everything() {
    let mut options = BufferOptions::default();
    options.inbound_buffer_max_size = 16;
    options.outbound_buffer_max_size = 16;
    options.outbound_buffer_max_lifetime = Duration::from_millis(20);
    options.bounded_channel_full_mode = BoundedChannelFullMode::Wait;

    let exporter = Arc::new(SlowExporter::new(Duration::from_millis(20)));
    let channel: Channel<Event, ()> = ChannelBuilder::new(Arc::clone(&exporter))
        .options(options)
        .build();

    let start = std::time::Instant::now();
    for i in 0..500u64 {
        assert!(
            channel
                .wait_to_write_event(test_event(0, i), &NeverCancel)
                .await
        );
    }
    let submit_duration = start.elapsed();

    channel.complete().await;

    assert_eq!(exporter.exported_count(), 500);
    assert!(
        submit_duration >= Duration::from_millis(20),
        "a 16-wide inbound/outbound pair feeding a 20ms exporter should force at least one wait"
    );
}

#[tokio::test]
async fn drop_mode_sheds_load_without_blocking_and_reports_drops() {
    let mut options = BufferOptions::default();
    options.inbound_buffer_max_size = 4;
    options.outbound_buffer_max_size = 4;
    options.outbound_buffer_max_lifetime = Duration::from_millis(500);
    options.bounded_channel_full_mode = BoundedChannelFullMode::Drop;

    let exporter = Arc::new(SlowExporter::new(Duration::from_millis(200)));
    let observer = Arc::new(CountingObserver::new());

    let channel: Channel<Event, ()> = ChannelBuilder::new(Arc::clone(&exporter))
        .options(options)
        .observer_arc(Arc::clone(&observer) as Arc<dyn ingest_pipeline::Observer<Event, ()>>)
        .build();

    let mut accepted = 0u64;
    for i in 0..200u64 {
        if channel
            .wait_to_write_event(test_event(0, i), &NeverCancel)
            .await
        {
            accepted += 1;
        }
    }

    channel.complete().await;

    assert!(accepted < 200, "drop mode should have shed some load");
    assert_eq!(
        observer.items_dropped.load(Ordering::Relaxed) + accepted,
        200
    );
}

#[tokio::test]
async fn graceful_shutdown_drains_inflight_events() {
    let exporter = Arc::new(TestExporter::new());

    let mut options = BufferOptions::default();
    options.outbound_buffer_max_lifetime = Duration::from_secs(30); // force reliance on drain, not age-seal

    let channel: Channel<Event, ()> = ChannelBuilder::new(Arc::clone(&exporter))
        .options(options)
        .build();

    for i in 0..1_000u64 {
        assert!(
            channel
                .wait_to_write_event(test_event(0, i), &NeverCancel)
                .await
        );
    }

    channel.complete().await;

    assert_eq!(exporter.exported_count(), 1_000);
}

/// A response carrying per-item verdicts, used to exercise the classifier path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Accepted,
    Retryable,
    Rejected,
}

struct FlakyClassifyingExporter {
    events: Mutex<Vec<Event>>,
    rejected: Mutex<Vec<Event>>,
    attempts_seen: Mutex<std::collections::HashMap<u64, u32>>,
}

impl FlakyClassifyingExporter {
    fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            rejected: Mutex::new(Vec::new()),
            attempts_seen: Mutex::new(std::collections::HashMap::new()),
        }
    }
}

impl Exporter<Event, Vec<(Event, Verdict)>> for FlakyClassifyingExporter {
    async fn export(&self, batch: &[Event]) -> Result<Vec<(Event, Verdict)>, ExportError> {
        let verdicts = batch
            .iter()
            .map(|e| {
                let mut attempts = self.attempts_seen.lock().unwrap();
                let seen = attempts.entry(e.sequence).or_insert(0);
                *seen += 1;
                let verdict = if e.sequence % 10 == 0 {
                    Verdict::Rejected
                } else if e.sequence % 3 == 0 && *seen == 1 {
                    // transient failure: retryable once, then succeeds
                    Verdict::Retryable
                } else {
                    Verdict::Accepted
                };
                (e.clone(), verdict)
            })
            .collect::<Vec<_>>();

        for (event, verdict) in &verdicts {
            match verdict {
                Verdict::Accepted => self.events.lock().unwrap().push(event.clone()),
                Verdict::Rejected => self.rejected.lock().unwrap().push(event.clone()),
                Verdict::Retryable => {}
            }
        }

        Ok(verdicts)
    }
}

struct VerdictClassifier;

impl ResponseClassifier<Event, Vec<(Event, Verdict)>> for VerdictClassifier {
    fn per_item_retry(&self, response: &Vec<(Event, Verdict)>, item: &Event) -> bool {
        response
            .iter()
            .any(|(e, v)| e.sequence == item.sequence && *v == Verdict::Retryable)
    }

    fn per_item_reject(&self, response: &Vec<(Event, Verdict)>, item: &Event) -> bool {
        response
            .iter()
            .any(|(e, v)| e.sequence == item.sequence && *v == Verdict::Rejected)
    }
}

#[tokio::test]
async fn per_item_classification_retries_until_accepted() {
    let exporter = Arc::new(FlakyClassifyingExporter::new());

    let mut options = BufferOptions::default();
    options.outbound_buffer_max_size = 30;
    options.outbound_buffer_max_lifetime = Duration::from_millis(20);
    options.export_backoff.base_delay = Duration::from_millis(5);
    options.export_backoff.max_delay = Duration::from_millis(20);
    options.export_max_retries = 5;

    let channel: Channel<Event, Vec<(Event, Verdict)>> = ChannelBuilder::new(Arc::clone(&exporter))
        .options(options)
        .classifier(VerdictClassifier)
        .build();

    for seq in 0..30u64 {
        assert!(
            channel
                .wait_to_write_event(test_event(0, seq), &NeverCancel)
                .await
        );
    }

    channel.complete().await;

    let accepted = exporter.events.lock().unwrap().len();
    let rejected = exporter.rejected.lock().unwrap().len();
    // every sequence is eventually either accepted or rejected: `Retryable`
    // items succeed on their second attempt, so none loop forever.
    assert_eq!(accepted + rejected, 30);
    assert_eq!(rejected, 3); // sequences 0, 10, 20
}

/// Tracks concurrently in-flight export calls to verify the pool never
/// exceeds its configured worker count.
#[derive(Debug, Default)]
struct ConcurrencyTrackingExporter {
    in_flight: AtomicU64,
    high_water_mark: AtomicU64,
}

impl Exporter<Event, ()> for ConcurrencyTrackingExporter {
    async fn export(&self, _batch: &[Event]) -> Result<(), ExportError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water_mark.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn concurrency_never_exceeds_configured_max() {
    let exporter = Arc::new(ConcurrencyTrackingExporter::default());

    let mut options = BufferOptions::default();
    options.inbound_buffer_max_size = 256;
    options.outbound_buffer_max_size = 4;
    options.outbound_buffer_max_lifetime = Duration::from_millis(10);
    options.export_max_concurrency = Some(2);

    let channel: Channel<Event, ()> = ChannelBuilder::new(Arc::clone(&exporter))
        .options(options)
        .build();

    for i in 0..80u64 {
        assert!(
            channel
                .wait_to_write_event(test_event(0, i), &NeverCancel)
                .await
        );
    }

    channel.complete().await;

    let high_water_mark = exporter.high_water_mark.load(Ordering::SeqCst);
    assert!(high_water_mark >= 1, "exporter was never invoked");
    assert!(
        high_water_mark <= 2,
        "concurrency exceeded export_max_concurrency: saw {high_water_mark} in flight at once"
    );
}

/// Never returns on its own; used to exercise hard cancellation end to end.
#[derive(Debug, Default)]
struct HangingExporter;

impl Exporter<Event, ()> for HangingExporter {
    async fn export(&self, _batch: &[Event]) -> Result<(), ExportError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        unreachable!("shutdown should have cancelled this export first")
    }
}

#[tokio::test]
async fn shutdown_hard_cancels_hanging_export_worker() {
    let exporter = Arc::new(HangingExporter);

    let mut options = BufferOptions::default();
    options.outbound_buffer_max_size = 1;
    options.outbound_buffer_max_lifetime = Duration::from_millis(10);

    let channel: Channel<Event, ()> = ChannelBuilder::new(Arc::clone(&exporter))
        .options(options)
        .build();

    assert!(
        channel
            .wait_to_write_event(test_event(0, 0), &NeverCancel)
            .await
    );

    let signal = channel.shutdown_signal();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        signal.shutdown();
    });

    tokio::time::timeout(Duration::from_secs(2), channel.complete())
        .await
        .expect("shutdown should hard-cancel the hanging export and let complete() return promptly");
}
