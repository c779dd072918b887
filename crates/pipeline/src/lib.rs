//! Bounded, buffered two-stage ingestion pipeline.
//!
//! Producers submit events into a bounded inbound queue. A single assembler
//! task groups accepted events into size- and age-bounded batches, handed to
//! a pool of exporter workers that drive each batch through a configurable
//! retry/backoff/classification loop against a pluggable [`Exporter`].
//!
//! # Rust edition features
//!
//! This crate uses native async traits (no `#[async_trait]` macro) throughout.

pub mod batch;
pub mod channel;
pub mod classifier;
pub mod error;
pub mod exporter;
pub mod observer;
pub mod options;
pub mod rate_limiter;
pub mod resilient;
pub mod shutdown;

mod assembler;
mod pool;

pub use batch::Batch;
pub use channel::{Channel, ChannelBuilder, NeverCancel, WriteContext};
pub use classifier::{DefaultClassifier, ResponseClassifier};
pub use error::{ChannelError, ExportError};
pub use exporter::{Exporter, ExporterBoxed, JsonFileExporter, NullExporter, StdoutExporter};
pub use observer::{CountingObserver, NoopObserver, Observer};
pub use options::{BackoffPolicy, BoundedChannelFullMode, BufferOptions, WaitHandle};
pub use rate_limiter::{IntervalRateLimiter, RateLimiter, RateLimiterBoxed, YieldingRateLimiter};
pub use shutdown::ShutdownSignal;
