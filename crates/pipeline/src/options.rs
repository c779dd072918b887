//! Buffer configuration: sizing, timing, retry/backoff, and full-buffer policy.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Minimum enforced value for [`BufferOptions::outbound_buffer_max_lifetime`].
///
/// Smaller configured values are silently clamped up to this, rather than
/// treated as invalid, since a sub-second flush interval is rarely intentional
/// and would otherwise make the assembler spin.
pub const MIN_OUTBOUND_BUFFER_MAX_LIFETIME: Duration = Duration::from_secs(1);

/// Behavior when the inbound buffer is saturated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundedChannelFullMode {
    /// Producers calling `wait_to_write` suspend until space frees up.
    /// `try_write` still fails immediately; it never blocks.
    Wait,
    /// Writes are refused outright once the buffer is full.
    Drop,
}

impl Default for BoundedChannelFullMode {
    fn default() -> Self {
        Self::Wait
    }
}

/// Backoff schedule applied between export attempts.
///
/// The delay grows linearly with the attempt index by default
/// (`base_delay * (attempt + 1)`), capped at `max_delay`; callers that want
/// exponential growth can scale `base_delay` accordingly or swap in their own
/// [`BackoffPolicy`] value before constructing the channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Delay charged for the first retry (attempt index 0).
    pub base_delay: Duration,
    /// Upper bound on any single backoff delay.
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    /// Delay to wait before the attempt numbered `attempt + 1` (0-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let secs = self.base_delay.as_secs_f64() * f64::from(attempt + 1);
        Duration::from_secs_f64(secs).min(self.max_delay)
    }
}

/// Immutable configuration for one ingestion pipeline instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferOptions {
    /// Capacity of the inbound single-event queue.
    pub inbound_buffer_max_size: usize,
    /// Target number of events per sealed batch.
    pub outbound_buffer_max_size: usize,
    /// Maximum age of the oldest item in an unsealed batch before it is
    /// force-sealed. Clamped to [`MIN_OUTBOUND_BUFFER_MAX_LIFETIME`].
    pub outbound_buffer_max_lifetime: Duration,
    /// Upper bound on concurrent exporter workers. `None` derives a value
    /// from buffer sizing and available parallelism.
    pub export_max_concurrency: Option<usize>,
    /// Extra attempts after the first, per batch.
    pub export_max_retries: u32,
    /// Backoff applied between attempts.
    pub export_backoff: BackoffPolicy,
    /// Behavior when the inbound buffer saturates.
    pub bounded_channel_full_mode: BoundedChannelFullMode,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            inbound_buffer_max_size: 100_000,
            outbound_buffer_max_size: 1_000,
            outbound_buffer_max_lifetime: Duration::from_secs(5),
            export_max_concurrency: None,
            export_max_retries: 3,
            export_backoff: BackoffPolicy::default(),
            bounded_channel_full_mode: BoundedChannelFullMode::default(),
        }
    }
}

impl BufferOptions {
    /// The effective (clamped) batch age threshold.
    #[must_use]
    pub fn clamped_lifetime(&self) -> Duration {
        self.outbound_buffer_max_lifetime
            .max(MIN_OUTBOUND_BUFFER_MAX_LIFETIME)
    }

    /// The effective exporter worker count: the configured value, or a
    /// derived default based on buffer sizing and host parallelism.
    #[must_use]
    pub fn resolved_concurrency(&self) -> usize {
        self.export_max_concurrency.unwrap_or_else(|| {
            let derived = self.inbound_buffer_max_size / self.outbound_buffer_max_size.max(1);
            derived.clamp(1, available_parallelism())
        })
    }

    /// Capacity of the outbound sealed-batch queue.
    #[must_use]
    pub fn outbound_queue_capacity(&self) -> usize {
        self.inbound_buffer_max_size
            .min(self.outbound_buffer_max_size.max(1))
    }
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4)
}

/// Countdown rendezvous used by tests and batch callers that want to block
/// until a known number of batches have finished (successfully or not).
///
/// Mirrors the `Notify`-based wake protocol used throughout the queue and
/// shutdown primitives elsewhere in this crate.
#[derive(Debug)]
pub struct WaitHandle {
    remaining: AtomicU64,
    notify: Notify,
}

impl WaitHandle {
    /// Creates a handle that will release waiters once `count` batches complete.
    #[must_use]
    pub fn new(count: u64) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicU64::new(count),
            notify: Notify::new(),
        })
    }

    /// Records completion of one batch, waking waiters if the count reaches zero.
    pub fn count_down(&self) {
        let mut current = self.remaining.load(Ordering::Acquire);
        while current > 0 {
            match self.remaining.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) if current == 1 => {
                    self.notify.notify_waiters();
                    return;
                }
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Returns the number of batches still outstanding.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::Acquire)
    }

    /// Waits until the countdown reaches zero.
    pub async fn wait(&self) {
        loop {
            if self.remaining.load(Ordering::Acquire) == 0 {
                return;
            }
            self.notify.notified().await;
        }
    }
}
