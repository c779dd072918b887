//! Shutdown coordination shared between the channel facade and its background tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};

/// Shared shutdown state between the channel facade and its workers.
///
/// Owns the hard-cancellation `watch` sender directly, so any holder of an
/// `Arc<ShutdownState>` — `Channel` itself or an external [`ShutdownSignal`]
/// clone — can flip `cancel_rx` (the receiver `assembler::run` and
/// `pool::worker_loop` select on) without routing through a separate
/// spawned watcher task.
#[derive(Debug)]
pub(crate) struct ShutdownState {
    closed: AtomicBool,
    shutdown_initiated: AtomicBool,
    cancel_tx: watch::Sender<bool>,
}

impl ShutdownState {
    pub(crate) fn new(cancel_tx: watch::Sender<bool>) -> Self {
        Self {
            closed: AtomicBool::new(false),
            shutdown_initiated: AtomicBool::new(false),
            cancel_tx,
        }
    }

    /// Stops accepting new events, without hard-cancelling in-flight work.
    /// Used by the graceful `Channel::complete()` path.
    #[inline]
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    /// Closes the channel and hard-cancels in-flight export attempts and
    /// backoff sleeps: the assembler and every exporter worker observe
    /// `cancel_rx` within bounded time and abandon their current work.
    /// Idempotent — only the first call has effect.
    pub(crate) fn initiate_shutdown(&self) {
        if !self.shutdown_initiated.swap(true, Ordering::AcqRel) {
            self.close();
            let _ = self.cancel_tx.send(true);
        }
    }
}

/// A cloneable signal that can trigger shutdown from outside the owning task.
///
/// Only the first call across all clones has effect; later calls are no-ops.
#[derive(Clone)]
pub struct ShutdownSignal {
    state: Arc<ShutdownState>,
    backpressure_notify: Arc<Notify>,
}

impl ShutdownSignal {
    pub(crate) fn new(state: Arc<ShutdownState>, backpressure_notify: Arc<Notify>) -> Self {
        Self {
            state,
            backpressure_notify,
        }
    }

    /// Triggers shutdown: stops accepting new events and hard-cancels
    /// in-flight export attempts and backoff sleeps. Idempotent.
    pub fn shutdown(&self) {
        self.state.initiate_shutdown();
        self.backpressure_notify.notify_waiters();
    }

    /// Returns `true` once shutdown has been initiated.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.state.is_shutdown_initiated()
    }
}
