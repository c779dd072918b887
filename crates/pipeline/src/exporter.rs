//! The exporter contract and a handful of sample implementations.
//!
//! Uses native `async fn` in traits (no `async-trait` macro) with a blanket
//! object-safe wrapper for dynamic dispatch, the same split the batching and
//! resilience layers in this crate already rely on.

use crate::error::ExportError;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;

/// A pure function from a batch of events to a response, supplied by the
/// embedding application. The core places no requirement on `R` beyond what
/// a [`crate::classifier::ResponseClassifier`] needs to interpret it.
///
/// Not object-safe (the return type is `impl Future`); use [`ExporterBoxed`]
/// for dynamic dispatch.
pub trait Exporter<E, R>: Send + Sync {
    /// Exports one batch. The slice is a read-only view; the core retains
    /// ownership of the batch across retries.
    fn export(&self, batch: &[E]) -> impl Future<Output = Result<R, ExportError>> + Send;
}

/// Lets a shared, independently-inspectable exporter (e.g. one whose stats a
/// caller wants to read after wrapping it in retry/circuit-breaker decorators)
/// be used anywhere an owned `Exporter` is expected.
impl<E, R, T: Exporter<E, R> + ?Sized> Exporter<E, R> for std::sync::Arc<T> {
    fn export(&self, batch: &[E]) -> impl Future<Output = Result<R, ExportError>> + Send {
        T::export(self, batch)
    }
}

/// Object-safe counterpart of [`Exporter`] for storage behind `Arc<dyn _>`.
pub trait ExporterBoxed<E, R>: Send + Sync {
    /// Boxed-future version of [`Exporter::export`].
    fn export_boxed<'a>(
        &'a self,
        batch: &'a [E],
    ) -> Pin<Box<dyn Future<Output = Result<R, ExportError>> + Send + 'a>>;
}

impl<E, R, T: Exporter<E, R>> ExporterBoxed<E, R> for T {
    fn export_boxed<'a>(
        &'a self,
        batch: &'a [E],
    ) -> Pin<Box<dyn Future<Output = Result<R, ExportError>> + Send + 'a>> {
        Box::pin(self.export(batch))
    }
}

/// Discards every batch. Useful for load-testing the pipeline without a
/// real backend.
#[derive(Debug, Default)]
pub struct NullExporter;

impl<E: Send + Sync> Exporter<E, ()> for NullExporter {
    async fn export(&self, _batch: &[E]) -> Result<(), ExportError> {
        Ok(())
    }
}

/// Prints batches to stdout. Useful for local development and demos.
#[derive(Debug)]
pub struct StdoutExporter {
    verbose: bool,
}

impl StdoutExporter {
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl<E: Debug + Send + Sync> Exporter<E, ()> for StdoutExporter {
    async fn export(&self, batch: &[E]) -> Result<(), ExportError> {
        if self.verbose {
            println!("=== exporting {} events ===", batch.len());
            for event in batch {
                println!("{event:?}");
            }
            println!("=== export complete ===\n");
        }
        Ok(())
    }
}

/// Writes each batch as pretty-printed JSON to a fixed file path, overwriting
/// the previous contents. Useful for local development.
#[derive(Debug)]
pub struct JsonFileExporter {
    file_path: String,
}

impl JsonFileExporter {
    #[must_use]
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }
}

impl<E: serde::Serialize + Sync> Exporter<E, ()> for JsonFileExporter {
    async fn export(&self, batch: &[E]) -> Result<(), ExportError> {
        let json = serde_json::to_string_pretty(batch)
            .map_err(|e| ExportError::Serialization(e.to_string()))?;

        tokio::fs::write(&self.file_path, json)
            .await
            .map_err(|e| ExportError::Transport(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::{ExportError, Exporter};
    use std::sync::Mutex;

    /// Records every exported event for assertion in tests.
    #[derive(Debug, Default)]
    pub struct RecordingExporter<E> {
        events: Mutex<Vec<E>>,
    }

    impl<E> RecordingExporter<E> {
        pub fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }

        pub fn exported_count(&self) -> usize {
            self.events.lock().unwrap().len()
        }
    }

    impl<E: Clone> RecordingExporter<E> {
        pub fn all(&self) -> Vec<E> {
            self.events.lock().unwrap().clone()
        }
    }

    impl<E: Send + Sync + Clone> Exporter<E, ()> for RecordingExporter<E> {
        async fn export(&self, batch: &[E]) -> Result<(), ExportError> {
            self.events.lock().unwrap().extend_from_slice(batch);
            Ok(())
        }
    }

    /// Exports after a fixed delay — used for backpressure tests.
    #[derive(Debug)]
    pub struct SlowExporter<E> {
        delay: std::time::Duration,
        events: Mutex<Vec<E>>,
    }

    impl<E> SlowExporter<E> {
        pub fn new(delay: std::time::Duration) -> Self {
            Self {
                delay,
                events: Mutex::new(Vec::new()),
            }
        }

        pub fn exported_count(&self) -> usize {
            self.events.lock().unwrap().len()
        }
    }

    impl<E: Send + Sync + Clone> Exporter<E, ()> for SlowExporter<E> {
        async fn export(&self, batch: &[E]) -> Result<(), ExportError> {
            tokio::time::sleep(self.delay).await;
            self.events.lock().unwrap().extend_from_slice(batch);
            Ok(())
        }
    }

    /// Always fails with a transport error. Never blocks — useful for
    /// exercising the exception path deterministically.
    #[derive(Debug, Default)]
    pub struct AlwaysFailingExporter;

    impl<E: Send + Sync> Exporter<E, ()> for AlwaysFailingExporter {
        async fn export(&self, _batch: &[E]) -> Result<(), ExportError> {
            Err(ExportError::Transport("simulated failure".into()))
        }
    }
}
