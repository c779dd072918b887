//! The public entry point: accepts events, batches them, and drives them
//! through an exporter pool with retry and backpressure.

use crate::assembler;
use crate::batch::Batch;
use crate::classifier::{DefaultClassifier, ResponseClassifier};
use crate::error::ChannelError;
use crate::exporter::{Exporter, ExporterBoxed};
use crate::observer::{invoke, NoopObserver, Observer};
use crate::options::{BufferOptions, WaitHandle};
use crate::pool;
use crate::shutdown::{ShutdownSignal, ShutdownState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};

/// Context passed to [`Channel::wait_to_write`] and [`Channel::wait_to_write_event`],
/// letting a caller race the wait against its own cancellation source.
pub trait WriteContext {
    /// Returns `true` once the caller no longer wants to wait.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// A [`WriteContext`] that never cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverCancel;

impl WriteContext for NeverCancel {}

/// Builds a [`Channel`], supplying the exporter and optional observer/classifier.
pub struct ChannelBuilder<E, R> {
    options: BufferOptions,
    exporter: Arc<dyn ExporterBoxed<E, R>>,
    classifier: Arc<dyn ResponseClassifier<E, R>>,
    observer: Arc<dyn Observer<E, R>>,
    wait_handle: Option<Arc<WaitHandle>>,
}

impl<E, R> ChannelBuilder<E, R>
where
    E: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    /// Starts a builder with the given exporter and default options, the
    /// default classifier, and no observer.
    pub fn new<X>(exporter: X) -> Self
    where
        X: Exporter<E, R> + 'static,
    {
        Self {
            options: BufferOptions::default(),
            exporter: Arc::new(exporter),
            classifier: Arc::new(DefaultClassifier),
            observer: Arc::new(NoopObserver),
            wait_handle: None,
        }
    }

    #[must_use]
    pub fn options(mut self, options: BufferOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn classifier<C>(mut self, classifier: C) -> Self
    where
        C: ResponseClassifier<E, R> + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }

    #[must_use]
    pub fn observer<O>(mut self, observer: O) -> Self
    where
        O: Observer<E, R> + 'static,
    {
        self.observer = Arc::new(observer);
        self
    }

    /// Like [`Self::observer`], but takes an already-shared observer so the
    /// caller can keep inspecting it (e.g. a [`crate::observer::CountingObserver`])
    /// after the channel is built.
    #[must_use]
    pub fn observer_arc(mut self, observer: Arc<dyn Observer<E, R>>) -> Self {
        self.observer = observer;
        self
    }

    /// Supplies a caller-owned countdown rendezvous, released once per batch
    /// completion (see [`crate::options::WaitHandle`]). Useful for tests and
    /// batch-oriented callers that want to block until a known number of
    /// batches have finished. If omitted, batches complete without counting
    /// down anything.
    #[must_use]
    pub fn wait_handle(mut self, wait_handle: Arc<WaitHandle>) -> Self {
        self.wait_handle = Some(wait_handle);
        self
    }

    /// Builds the channel, spawning the assembler task and exporter workers.
    #[must_use]
    pub fn build(self) -> Channel<E, R> {
        let wait_handle = self.wait_handle.unwrap_or_else(|| WaitHandle::new(0));
        Channel::new(
            self.options,
            self.exporter,
            self.classifier,
            self.observer,
            wait_handle,
        )
    }
}

/// Bounded, two-stage ingestion pipeline: events accepted here are grouped
/// into batches by a background assembler task and exported by a pool of
/// worker tasks with retry, backoff, and per-item classification.
pub struct Channel<E, R> {
    inbound_tx: mpsc::Sender<E>,
    options: Arc<BufferOptions>,
    observer: Arc<dyn Observer<E, R>>,
    shutdown_state: Arc<ShutdownState>,
    backpressure_notify: Arc<Notify>,
    worker_handles: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
    assembler_handle: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<E, R> Channel<E, R>
where
    E: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    fn new(
        options: BufferOptions,
        exporter: Arc<dyn ExporterBoxed<E, R>>,
        classifier: Arc<dyn ResponseClassifier<E, R>>,
        observer: Arc<dyn Observer<E, R>>,
        wait_handle: Arc<WaitHandle>,
    ) -> Self {
        let options = Arc::new(options);
        let (inbound_tx, inbound_rx) = mpsc::channel::<E>(options.inbound_buffer_max_size.max(1));
        let (outbound_tx, outbound_rx) =
            mpsc::channel::<Batch<E>>(options.outbound_queue_capacity());
        let (cancel_tx, cancel_rx) = watch::channel(false);

        // `ShutdownState` owns `cancel_tx` directly so both `Channel::shutdown`
        // and a detached `ShutdownSignal` clone can flip `cancel_rx` (which
        // the assembler and every exporter worker select on) without routing
        // through a separate watcher task.
        let shutdown_state = Arc::new(ShutdownState::new(cancel_tx));
        let backpressure_notify = Arc::new(Notify::new());

        let assembler_handle = tokio::spawn(assembler::run(
            inbound_rx,
            outbound_tx,
            Arc::clone(&options),
            Arc::clone(&observer),
            cancel_rx.clone(),
        ));

        let worker_count = options.resolved_concurrency();
        let worker_handles = pool::spawn_workers(
            outbound_rx,
            worker_count,
            exporter,
            classifier,
            Arc::clone(&options),
            Arc::clone(&observer),
            wait_handle,
            cancel_rx,
        );

        Self {
            inbound_tx,
            options,
            observer,
            shutdown_state,
            backpressure_notify,
            worker_handles: std::sync::Mutex::new(worker_handles),
            assembler_handle: std::sync::Mutex::new(Some(assembler_handle)),
        }
    }

    /// Attempts to accept `event` without waiting. Returns `false` if the
    /// inbound buffer is full or the channel is closed.
    pub fn try_write(&self, event: E) -> bool {
        if self.shutdown_state.is_closed() {
            return false;
        }

        match self.inbound_tx.try_send(event) {
            Ok(()) => {
                invoke("on_inbound_published", || self.observer.on_inbound_published());
                true
            }
            Err(_) => {
                invoke("on_inbound_publish_failed", || {
                    self.observer.on_inbound_publish_failed();
                });
                false
            }
        }
    }

    /// Accepts `event`, waiting for buffer space under
    /// [`BoundedChannelFullMode::Wait`](crate::options::BoundedChannelFullMode::Wait),
    /// or dropping it immediately under `Drop` mode. Returns `true` iff the
    /// event was accepted.
    pub async fn wait_to_write_event(&self, event: E, ctx: &impl WriteContext) -> bool {
        match self.wait_to_write(ctx).await {
            Ok(true) => self.try_write(event),
            Ok(false) => {
                invoke("on_item_dropped", || self.observer.on_item_dropped(&event));
                false
            }
            Err(_) => false,
        }
    }

    /// Waits until the inbound buffer has slack, the channel closes, or `ctx`
    /// cancels. Returns `Ok(true)` if slack is available, `Ok(false)` if the
    /// caller should drop the event (`Drop` mode while full), or `Err` if the
    /// channel is closed.
    pub async fn wait_to_write(&self, ctx: &impl WriteContext) -> Result<bool, ChannelError> {
        use crate::options::BoundedChannelFullMode;

        loop {
            if self.shutdown_state.is_closed() {
                return Err(ChannelError::Closed);
            }

            if ctx.is_cancelled() {
                return Err(ChannelError::Closed);
            }

            if self.inbound_tx.capacity() > 0 {
                return Ok(true);
            }

            match self.options.bounded_channel_full_mode {
                BoundedChannelFullMode::Drop => return Ok(false),
                BoundedChannelFullMode::Wait => {
                    let notified = self.backpressure_notify.notified();
                    tokio::select! {
                        () = notified => {}
                        () = tokio::time::sleep(Duration::from_millis(10)) => {}
                    }
                }
            }
        }
    }

    /// Stops accepting new events and waits for the assembler and every
    /// exporter worker to drain and exit.
    pub async fn complete(self) {
        self.close();

        // Drop the producer-facing sender so the assembler's inbound queue
        // closes and drains instead of waiting on `cancel_rx` forever.
        let Self {
            inbound_tx,
            assembler_handle,
            worker_handles,
            ..
        } = self;
        drop(inbound_tx);

        if let Some(handle) = assembler_handle.lock().unwrap().take() {
            let _ = handle.await;
        }

        let handles = std::mem::take(&mut *worker_handles.lock().unwrap());
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Stops accepting new events, without waiting for drain. Idempotent.
    pub fn close(&self) {
        self.shutdown_state.close();
        self.backpressure_notify.notify_waiters();
    }

    /// Triggers a hard cancellation: in-flight export attempts and backoff
    /// sleeps observe it within bounded time and abandon their batch.
    pub fn shutdown(&self) {
        self.shutdown_state.initiate_shutdown();
        self.backpressure_notify.notify_waiters();
    }

    /// A cloneable handle that can trigger [`Channel::shutdown`] from outside
    /// the owning task.
    #[must_use]
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        ShutdownSignal::new(
            Arc::clone(&self.shutdown_state),
            Arc::clone(&self.backpressure_notify),
        )
    }
}
