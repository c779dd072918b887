//! The sealed, immutable unit handed from the assembler to an exporter worker.

use tokio::time::Instant;

/// A sealed batch of accepted events, ready for export.
///
/// Order of `items` is preserved end to end; it is never reshuffled, only
/// shrunk as items are retried, rejected, or silently dropped across attempts.
#[derive(Debug)]
pub struct Batch<E> {
    /// The events carried by this batch, in acceptance order.
    pub items: Vec<E>,
    /// When the first event in this batch was accepted into the pipeline.
    pub first_accepted_at: Instant,
    /// Monotonically increasing identifier assigned by the assembler.
    pub sequence: u64,
}

impl<E> Batch<E> {
    pub(crate) fn new(items: Vec<E>, first_accepted_at: Instant, sequence: u64) -> Self {
        Self {
            items,
            first_accepted_at,
            sequence,
        }
    }

    /// Number of events currently in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the batch carries no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
