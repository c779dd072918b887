//! The exporter worker pool: dequeues sealed batches and drives the
//! retry/backoff/classification loop against the configured [`Exporter`].
//!
//! Grounded on the teacher's `RateLimitedExporter`'s use of a shared
//! `tokio::sync::Mutex` to guard brief state across an await point: here the
//! same idiom shares one outbound receiver across N worker tasks, locking
//! only long enough to pop a batch before releasing it for the actual export.

use crate::batch::Batch;
use crate::classifier::ResponseClassifier;
use crate::exporter::ExporterBoxed;
use crate::observer::{invoke, Observer};
use crate::options::{BufferOptions, WaitHandle};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};

/// Spawns `worker_count` exporter worker tasks sharing one outbound receiver.
pub(crate) fn spawn_workers<E, R>(
    outbound_rx: mpsc::Receiver<Batch<E>>,
    worker_count: usize,
    exporter: Arc<dyn ExporterBoxed<E, R>>,
    classifier: Arc<dyn ResponseClassifier<E, R>>,
    options: Arc<BufferOptions>,
    observer: Arc<dyn Observer<E, R>>,
    wait_handle: Arc<WaitHandle>,
    cancel_rx: watch::Receiver<bool>,
) -> Vec<tokio::task::JoinHandle<()>>
where
    E: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    let shared_rx = Arc::new(Mutex::new(outbound_rx));

    (0..worker_count.max(1))
        .map(|_| {
            tokio::spawn(worker_loop(
                Arc::clone(&shared_rx),
                Arc::clone(&exporter),
                Arc::clone(&classifier),
                Arc::clone(&options),
                Arc::clone(&observer),
                Arc::clone(&wait_handle),
                cancel_rx.clone(),
            ))
        })
        .collect()
}

async fn worker_loop<E, R>(
    shared_rx: Arc<Mutex<mpsc::Receiver<Batch<E>>>>,
    exporter: Arc<dyn ExporterBoxed<E, R>>,
    classifier: Arc<dyn ResponseClassifier<E, R>>,
    options: Arc<BufferOptions>,
    observer: Arc<dyn Observer<E, R>>,
    wait_handle: Arc<WaitHandle>,
    mut cancel_rx: watch::Receiver<bool>,
) where
    E: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    tracing::debug!("exporter worker started");
    invoke("on_outbound_started", || observer.on_outbound_started());

    loop {
        if *cancel_rx.borrow() {
            break;
        }

        let batch = {
            let mut rx = shared_rx.lock().await;
            tokio::select! {
                biased;
                _ = cancel_rx.wait_for(|cancelled| *cancelled) => None,
                maybe_batch = rx.recv() => maybe_batch,
            }
        };

        let Some(batch) = batch else { break };

        process_batch(
            batch,
            exporter.as_ref(),
            classifier.as_ref(),
            &options,
            observer.as_ref(),
            &mut cancel_rx,
        )
        .await;

        wait_handle.count_down();
    }

    tracing::debug!("exporter worker exited");
    invoke("on_outbound_exited", || observer.on_outbound_exited());
}

/// Drives one batch through the attempt/backoff/classification loop described
/// in the retry algorithm until it empties out or retries are exhausted.
///
/// Every terminal branch fires its own `invoke(...)` call (rather than a
/// single trailing one after a `break`) so that a cancellation observed
/// mid-export returns immediately with no further callbacks at all, not even
/// `on_export_buffer_done`.
async fn process_batch<E, R>(
    batch: Batch<E>,
    exporter: &dyn ExporterBoxed<E, R>,
    classifier: &dyn ResponseClassifier<E, R>,
    options: &BufferOptions,
    observer: &dyn Observer<E, R>,
    cancel_rx: &mut watch::Receiver<bool>,
) where
    E: Send + Sync,
    R: Send + Sync,
{
    let sequence = batch.sequence;
    let mut retryable = batch.items;
    let mut attempt: u32 = 0;

    loop {
        invoke("on_export_attempt", || {
            observer.on_export_attempt(attempt, retryable.len());
        });
        tracing::debug!(sequence, attempt, items = retryable.len(), "export attempt");

        let outcome = tokio::select! {
            biased;
            _ = cancel_rx.wait_for(|cancelled| *cancelled) => {
                tracing::warn!(sequence, attempt, "cancelled mid-export, abandoning batch");
                return;
            }
            outcome = exporter.export_boxed(&retryable) => outcome,
        };

        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(sequence, attempt, %err, "export attempt failed");
                invoke("on_export_exception", || observer.on_export_exception(&err));
                invoke("on_export_buffer_done", || observer.on_export_buffer_done());
                return;
            }
        };

        invoke("on_export_response", || {
            observer.on_export_response(&response, retryable.len());
        });

        retryable = classify_and_filter(retryable, &response, classifier, observer);

        if retryable.is_empty() {
            tracing::debug!(sequence, attempt, "batch fully accepted");
            invoke("on_export_buffer_done", || observer.on_export_buffer_done());
            return;
        }

        if attempt == options.export_max_retries {
            tracing::warn!(
                sequence,
                remaining = retryable.len(),
                "export retries exhausted"
            );
            invoke("on_export_max_retries", || {
                observer.on_export_max_retries(&retryable);
            });
            invoke("on_export_buffer_done", || observer.on_export_buffer_done());
            return;
        }

        let delay = options.export_backoff.delay_for_attempt(attempt);
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            _ = cancel_rx.wait_for(|cancelled| *cancelled) => {
                tracing::warn!(sequence, attempt, "cancelled during backoff, abandoning batch");
                return;
            }
        }

        invoke("on_export_retry", || observer.on_export_retry(&retryable));
        attempt += 1;
        tracing::debug!(sequence, attempt, remaining = retryable.len(), "retrying batch");
    }
}

/// Applies the classifier to one response, splitting `items` into the subset
/// to retry next attempt. Rejected items fire `on_server_rejection`; items
/// neither retried nor rejected are dropped without a callback.
fn classify_and_filter<E, R>(
    items: Vec<E>,
    response: &R,
    classifier: &dyn ResponseClassifier<E, R>,
    observer: &dyn Observer<E, R>,
) -> Vec<E> {
    if classifier.retry_whole(response) {
        return items;
    }

    let mut retained = Vec::with_capacity(items.len());
    let mut rejected = Vec::new();

    for item in items {
        if classifier.per_item_retry(response, &item) {
            retained.push(item);
        } else if classifier.per_item_reject(response, &item) {
            rejected.push(item);
        }
    }

    if !rejected.is_empty() {
        tracing::warn!(rejected = rejected.len(), "server rejected items");
        invoke("on_server_rejection", || {
            observer.on_server_rejection(&rejected);
        });
    }

    retained
}
