//! Groups accepted events into size- and age-bounded batches.
//!
//! This is the single-reader task between the inbound single-event queue and
//! the outbound sealed-batch queue. Unlike the teacher's `BatchProcessor`
//! (which is pure, synchronous, and driven by an external poll loop), this
//! assembler owns its own wait-with-deadline loop directly on the inbound
//! `tokio::sync::mpsc::Receiver`, since there is exactly one of these tasks
//! per channel and no external polling cadence to share.

use crate::batch::Batch;
use crate::observer::{invoke, Observer};
use crate::options::BufferOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Runs the assembler loop until the inbound queue closes and drains, or
/// until `cancel_rx` observes a hard-cancellation signal.
///
/// Exits (and drops `outbound_tx`, closing the outbound queue) once every
/// accepted event has been shipped in some sealed batch.
pub(crate) async fn run<E, R>(
    mut inbound_rx: mpsc::Receiver<E>,
    outbound_tx: mpsc::Sender<Batch<E>>,
    options: Arc<BufferOptions>,
    observer: Arc<dyn Observer<E, R>>,
    mut cancel_rx: watch::Receiver<bool>,
) where
    E: Send + 'static,
    R: Send + 'static,
{
    tracing::debug!("assembler started");
    invoke("on_inbound_started", || observer.on_inbound_started());

    let max_size = options.outbound_buffer_max_size.max(1);
    let lifetime = options.clamped_lifetime();

    let mut pending: Vec<E> = Vec::with_capacity(max_size);
    let mut first_accepted_at: Option<Instant> = None;
    let mut sequence: u64 = 0;
    let mut closed = false;

    loop {
        if *cancel_rx.borrow() {
            tracing::warn!(sequence, "assembler cancelled, dropping unsealed pending events");
            return;
        }

        if pending.is_empty() {
            tokio::select! {
                maybe_event = inbound_rx.recv() => {
                    match maybe_event {
                        Some(event) => {
                            first_accepted_at = Some(Instant::now());
                            pending.push(event);
                        }
                        None => closed = true,
                    }
                }
                _ = cancel_rx.wait_for(|cancelled| *cancelled) => {
                    tracing::warn!("assembler cancelled while idle");
                    return;
                }
            }
        } else {
            let elapsed = first_accepted_at.expect("set whenever pending is non-empty").elapsed();
            let remaining = lifetime.saturating_sub(elapsed);
            tokio::select! {
                maybe_event = inbound_rx.recv() => {
                    match maybe_event {
                        Some(event) => pending.push(event),
                        None => closed = true,
                    }
                }
                () = sleep_for(remaining) => {}
                _ = cancel_rx.wait_for(|cancelled| *cancelled) => {
                    tracing::warn!(sequence, pending = pending.len(), "assembler cancelled with pending events unsealed");
                    return;
                }
            }
        }

        if !closed {
            while pending.len() < max_size {
                match inbound_rx.try_recv() {
                    Ok(event) => pending.push(event),
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        closed = true;
                        break;
                    }
                }
            }
        }

        let age_exceeded = first_accepted_at.is_some_and(|t| t.elapsed() >= lifetime);
        let should_seal = !pending.is_empty() && (pending.len() >= max_size || age_exceeded || closed);

        if should_seal {
            let items = std::mem::take(&mut pending);
            let first = first_accepted_at.take().expect("sealed batch always had a first item");
            let len = items.len();
            let batch = Batch::new(items, first, sequence);
            tracing::debug!(sequence, len, "sealed batch");
            sequence += 1;

            if outbound_tx.send(batch).await.is_ok() {
                invoke("on_outbound_published", || observer.on_outbound_published(len));
            } else {
                tracing::error!(sequence, "outbound queue closed, stopping assembler");
                invoke("on_outbound_publish_failed", || observer.on_outbound_publish_failed());
                closed = true;
            }
        }

        if closed && pending.is_empty() {
            break;
        }
    }

    tracing::debug!("assembler exited");
}

/// Sleeps for `duration`, returning immediately if it is zero.
///
/// Avoids depending on `tokio::time::sleep(Duration::ZERO)` behaving as an
/// immediate yield across all runtime configurations.
async fn sleep_for(duration: Duration) {
    if duration.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NoopObserver;

    fn opts(max_size: usize, lifetime: Duration) -> Arc<BufferOptions> {
        Arc::new(BufferOptions {
            outbound_buffer_max_size: max_size,
            outbound_buffer_max_lifetime: lifetime,
            ..BufferOptions::default()
        })
    }

    fn no_cancel() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn seals_on_size_threshold() {
        let (inbound_tx, inbound_rx) = mpsc::channel::<u32>(16);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Batch<u32>>(4);
        let options = opts(3, Duration::from_secs(60));
        let observer: Arc<dyn Observer<u32, ()>> = Arc::new(NoopObserver);

        let handle = tokio::spawn(run(inbound_rx, outbound_tx, options, observer, no_cancel()));

        for i in 0..3u32 {
            inbound_tx.send(i).await.unwrap();
        }

        let batch = outbound_rx.recv().await.unwrap();
        assert_eq!(batch.items, vec![0, 1, 2]);

        drop(inbound_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn seals_on_age_threshold() {
        let (inbound_tx, inbound_rx) = mpsc::channel::<u32>(16);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Batch<u32>>(4);
        let options = opts(100, Duration::from_millis(1_000));
        let observer: Arc<dyn Observer<u32, ()>> = Arc::new(NoopObserver);

        let handle = tokio::spawn(run(inbound_rx, outbound_tx, options, observer, no_cancel()));

        inbound_tx.send(1).await.unwrap();

        let batch = outbound_rx.recv().await.unwrap();
        assert_eq!(batch.items, vec![1]);
        assert!(batch.first_accepted_at.elapsed() >= Duration::from_secs(1));

        drop(inbound_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn drains_remainder_on_close() {
        let (inbound_tx, inbound_rx) = mpsc::channel::<u32>(16);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Batch<u32>>(4);
        let options = opts(100, Duration::from_secs(60));
        let observer: Arc<dyn Observer<u32, ()>> = Arc::new(NoopObserver);

        let handle = tokio::spawn(run(inbound_rx, outbound_tx, options, observer, no_cancel()));

        inbound_tx.send(1).await.unwrap();
        inbound_tx.send(2).await.unwrap();
        drop(inbound_tx);

        let batch = outbound_rx.recv().await.unwrap();
        assert_eq!(batch.items, vec![1, 2]);
        assert!(outbound_rx.recv().await.is_none());

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn never_exceeds_max_size() {
        let (inbound_tx, inbound_rx) = mpsc::channel::<u32>(64);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Batch<u32>>(16);
        let options = opts(4, Duration::from_secs(60));
        let observer: Arc<dyn Observer<u32, ()>> = Arc::new(NoopObserver);

        let handle = tokio::spawn(run(inbound_rx, outbound_tx, options, observer, no_cancel()));

        for i in 0..10u32 {
            inbound_tx.send(i).await.unwrap();
        }
        drop(inbound_tx);

        let mut seen = Vec::new();
        while let Some(batch) = outbound_rx.recv().await {
            assert!(batch.len() <= 4);
            seen.extend(batch.items);
        }
        assert_eq!(seen, (0..10u32).collect::<Vec<_>>());

        handle.await.unwrap();
    }
}
