//! Optional diagnostic hooks fired at every pipeline state transition.
//!
//! Modeled as a single trait with default no-op methods (matching
//! [`crate::rate_limiter::RateLimiter`]'s single-trait-with-defaults shape)
//! rather than a dynamically-dispatched collection of listeners: the core
//! calls a fixed set of methods on one shared `Arc<dyn Observer<E, R>>`.

use crate::error::ExportError;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Observer hooks for every stage of the pipeline. Every method has a
/// default no-op body; implementors override only what they need.
///
/// Each call is wrapped by the core in [`invoke`], so a panicking observer
/// cannot take down an exporter worker or the assembler.
pub trait Observer<E, R>: Send + Sync {
    /// Fired once per event accepted into the inbound buffer.
    fn on_inbound_published(&self) {}
    /// Fired once per event refused because the inbound buffer is full.
    fn on_inbound_publish_failed(&self) {}
    /// Fired once per event dropped under [`crate::options::BoundedChannelFullMode::Drop`].
    fn on_item_dropped(&self, item: &E) {
        let _ = item;
    }
    /// Fired once per sealed batch handed to the outbound queue.
    fn on_outbound_published(&self, batch_len: usize) {
        let _ = batch_len;
    }
    /// Fired if sealing a batch races a shutdown in progress.
    fn on_outbound_publish_failed(&self) {}
    /// Fired before each `Export` call, zero-indexed.
    fn on_export_attempt(&self, attempt: u32, item_count: usize) {
        let _ = (attempt, item_count);
    }
    /// Fired after each successful `Export` return, before classification.
    fn on_export_response(&self, response: &R, item_count: usize) {
        let _ = (response, item_count);
    }
    /// Fired when the exporter itself raises an error; terminal for the batch.
    fn on_export_exception(&self, err: &ExportError) {
        let _ = err;
    }
    /// Fired after backoff, before the next attempt, with the items being retried.
    fn on_export_retry(&self, retryable: &[E]) {
        let _ = retryable;
    }
    /// Fired once retries are exhausted with items still pending.
    fn on_export_max_retries(&self, remaining: &[E]) {
        let _ = remaining;
    }
    /// Fired with the items permanently rejected by the server for one attempt.
    fn on_server_rejection(&self, rejected: &[E]) {
        let _ = rejected;
    }
    /// Fired exactly once per batch, regardless of how it terminated.
    fn on_export_buffer_done(&self) {}
    /// Fired once when the assembler task starts.
    fn on_inbound_started(&self) {}
    /// Fired once per exporter worker task that starts.
    fn on_outbound_started(&self) {}
    /// Fired once per exporter worker task that exits.
    fn on_outbound_exited(&self) {}
}

/// Runs an observer callback, catching and logging any panic so it cannot
/// propagate into the calling worker.
pub(crate) fn invoke<F: FnOnce()>(hook_name: &'static str, f: F) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::error!(hook = hook_name, "observer hook panicked; continuing");
    }
}

/// An observer that does nothing; the default when none is supplied.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl<E, R> Observer<E, R> for NoopObserver {}

/// A test/diagnostic observer that counts every hook invocation.
///
/// Grounded on the pattern of wrapping every callback purely to tally events,
/// rather than subclassing or branching on a collection of listeners.
#[derive(Debug, Default)]
pub struct CountingObserver {
    pub inbound_published: std::sync::atomic::AtomicU64,
    pub inbound_publish_failed: std::sync::atomic::AtomicU64,
    pub items_dropped: std::sync::atomic::AtomicU64,
    pub outbound_published: std::sync::atomic::AtomicU64,
    pub export_attempts: std::sync::atomic::AtomicU64,
    pub export_responses: std::sync::atomic::AtomicU64,
    pub export_exceptions: std::sync::atomic::AtomicU64,
    pub export_retries: std::sync::atomic::AtomicU64,
    pub export_max_retries: std::sync::atomic::AtomicU64,
    pub server_rejections: std::sync::atomic::AtomicU64,
    pub export_buffer_done: std::sync::atomic::AtomicU64,
}

impl CountingObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<E, R> Observer<E, R> for CountingObserver {
    fn on_inbound_published(&self) {
        self.inbound_published
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    fn on_inbound_publish_failed(&self) {
        self.inbound_publish_failed
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    fn on_item_dropped(&self, _item: &E) {
        self.items_dropped
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    fn on_outbound_published(&self, _batch_len: usize) {
        self.outbound_published
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    fn on_export_attempt(&self, _attempt: u32, _item_count: usize) {
        self.export_attempts
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    fn on_export_response(&self, _response: &R, _item_count: usize) {
        self.export_responses
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    fn on_export_exception(&self, _err: &ExportError) {
        self.export_exceptions
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    fn on_export_retry(&self, _retryable: &[E]) {
        self.export_retries
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    fn on_export_max_retries(&self, _remaining: &[E]) {
        self.export_max_retries
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    fn on_server_rejection(&self, _rejected: &[E]) {
        self.server_rejections
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    fn on_export_buffer_done(&self) {
        self.export_buffer_done
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
}
