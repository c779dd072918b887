//! Decorator exporters layering retry, circuit-breaking, and rate limiting on
//! top of any [`Exporter`]. These are optional composition helpers for the
//! embedding application; the core [`crate::pool`] retry loop does not use
//! them and implements its own retry/backoff directly.

use crate::error::ExportError;
use crate::exporter::Exporter;
use crate::rate_limiter::RateLimiter;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Configuration for [`RetryingExporter`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries, just the initial attempt).
    pub max_retries: u32,
    /// Initial delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries (caps exponential growth).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);
        Duration::from_millis(delay_ms as u64).min(self.max_delay)
    }
}

/// Wraps an [`Exporter`] with automatic retry and exponential backoff.
///
/// Unlike the core pool's own retry loop, this operates on the whole batch
/// as an opaque unit: there is no per-item classification, only "did the
/// call succeed".
pub struct RetryingExporter<E, R, X: Exporter<E, R>> {
    inner: X,
    config: RetryConfig,
    total_retries: AtomicU64,
    recovered_exports: AtomicU64,
    _marker: std::marker::PhantomData<(E, R)>,
}

impl<E, R, X: Exporter<E, R>> RetryingExporter<E, R, X> {
    pub fn new(inner: X, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            total_retries: AtomicU64::new(0),
            recovered_exports: AtomicU64::new(0),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn with_defaults(inner: X) -> Self {
        Self::new(inner, RetryConfig::default())
    }

    #[must_use]
    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn recovered_exports(&self) -> u64 {
        self.recovered_exports.load(Ordering::Relaxed)
    }
}

impl<E, R, X> Exporter<E, R> for RetryingExporter<E, R, X>
where
    E: Send + Sync,
    R: Send + Sync,
    X: Exporter<E, R>,
{
    async fn export(&self, batch: &[E]) -> Result<R, ExportError> {
        let max_attempts = self.config.max_retries + 1;

        for attempt in 0..max_attempts {
            let delay = self.config.delay_for_attempt(attempt);
            if !delay.is_zero() {
                self.total_retries.fetch_add(1, Ordering::Relaxed);
                sleep(delay).await;
            }

            match self.inner.export(batch).await {
                Ok(response) => {
                    if attempt > 0 {
                        self.recovered_exports.fetch_add(1, Ordering::Relaxed);
                    }
                    return Ok(response);
                }
                Err(err) => {
                    if matches!(err, ExportError::CircuitOpen) {
                        return Err(err);
                    }
                }
            }
        }

        Err(ExportError::RetriesExhausted {
            attempts: max_attempts,
        })
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - requests flow through.
    Closed,
    /// Backend unhealthy - requests fail fast.
    Open,
    /// Testing if the backend recovered - allow one request through.
    HalfOpen,
}

/// Configuration for [`CircuitBreakerExporter`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// How long to wait before transitioning from Open to HalfOpen.
    pub reset_timeout: Duration,
    /// Number of successes in HalfOpen required to close the circuit.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

struct CircuitBreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure_time: Option<Instant>,
}

impl CircuitBreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure_time: None,
        }
    }
}

/// Wraps an [`Exporter`] with a fail-fast circuit breaker.
///
/// ```text
/// Closed --(failure_threshold)--> Open --(reset_timeout)--> HalfOpen
///   ^                                                            |
///   `---------------------(success_threshold)-------------------'
/// ```
pub struct CircuitBreakerExporter<E, R, X: Exporter<E, R>> {
    inner: X,
    config: CircuitBreakerConfig,
    state: Mutex<CircuitBreakerState>,
    times_opened: AtomicU32,
    _marker: std::marker::PhantomData<(E, R)>,
}

impl<E, R, X: Exporter<E, R>> CircuitBreakerExporter<E, R, X> {
    pub fn new(inner: X, config: CircuitBreakerConfig) -> Self {
        Self {
            inner,
            config,
            state: Mutex::new(CircuitBreakerState::new()),
            times_opened: AtomicU32::new(0),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn with_defaults(inner: X) -> Self {
        Self::new(inner, CircuitBreakerConfig::default())
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.state.lock().unwrap().state
    }

    #[must_use]
    pub fn times_opened(&self) -> u32 {
        self.times_opened.load(Ordering::Relaxed)
    }

    fn should_allow_request(&self) -> bool {
        let mut state = self.state.lock().unwrap();

        match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if let Some(last_failure) = state.last_failure_time {
                    if last_failure.elapsed() >= self.config.reset_timeout {
                        state.state = CircuitState::HalfOpen;
                        state.consecutive_successes = 0;
                        return true;
                    }
                }
                false
            }
            CircuitState::HalfOpen => true,
        }
    }

    fn record_success(&self) {
        let mut state = self.state.lock().unwrap();

        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                state.consecutive_successes += 1;
                if state.consecutive_successes >= self.config.success_threshold {
                    state.state = CircuitState::Closed;
                    state.consecutive_failures = 0;
                }
            }
            CircuitState::Open => {
                state.state = CircuitState::Closed;
                state.consecutive_failures = 0;
            }
        }
    }

    fn record_failure(&self) {
        let mut state = self.state.lock().unwrap();

        state.last_failure_time = Some(Instant::now());
        state.consecutive_successes = 0;

        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.failure_threshold {
                    state.state = CircuitState::Open;
                    self.times_opened.fetch_add(1, Ordering::Relaxed);
                }
            }
            CircuitState::HalfOpen => {
                state.state = CircuitState::Open;
                self.times_opened.fetch_add(1, Ordering::Relaxed);
            }
            CircuitState::Open => {}
        }
    }
}

impl<E, R, X> Exporter<E, R> for CircuitBreakerExporter<E, R, X>
where
    E: Send + Sync,
    R: Send + Sync,
    X: Exporter<E, R>,
{
    async fn export(&self, batch: &[E]) -> Result<R, ExportError> {
        if !self.should_allow_request() {
            return Err(ExportError::CircuitOpen);
        }

        match self.inner.export(batch).await {
            Ok(response) => {
                self.record_success();
                Ok(response)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }
}

/// Wraps an [`Exporter`] with a [`RateLimiter`], pacing export calls rather
/// than accepted events (contrast [`crate::rate_limiter`], which a producer
/// uses to pace its own submission rate).
pub struct RateLimitedExporter<E, R, X: Exporter<E, R>, L: RateLimiter> {
    inner: X,
    rate_limiter: tokio::sync::Mutex<L>,
    _marker: std::marker::PhantomData<(E, R)>,
}

impl<E, R, X: Exporter<E, R>, L: RateLimiter> RateLimitedExporter<E, R, X, L> {
    pub fn new(inner: X, rate_limiter: L) -> Self {
        Self {
            inner,
            rate_limiter: tokio::sync::Mutex::new(rate_limiter),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<E, R, X, L> Exporter<E, R> for RateLimitedExporter<E, R, X, L>
where
    E: Send + Sync,
    R: Send + Sync,
    X: Exporter<E, R>,
    L: RateLimiter + Send,
{
    async fn export(&self, batch: &[E]) -> Result<R, ExportError> {
        {
            let mut limiter = self.rate_limiter.lock().await;
            limiter.wait().await;
        }

        self.inner.export(batch).await
    }
}

/// Builds a composed resilient exporter: retry (inner), circuit breaker (outer).
pub struct ResilientExporterBuilder<E, R, X: Exporter<E, R>> {
    inner: X,
    retry_config: Option<RetryConfig>,
    circuit_config: Option<CircuitBreakerConfig>,
    _marker: std::marker::PhantomData<(E, R)>,
}

impl<E, R, X> ResilientExporterBuilder<E, R, X>
where
    E: Send + Sync + 'static,
    R: Send + Sync + 'static,
    X: Exporter<E, R> + 'static,
{
    pub fn new(inner: X) -> Self {
        Self {
            inner,
            retry_config: None,
            circuit_config: None,
            _marker: std::marker::PhantomData,
        }
    }

    #[must_use]
    pub fn with_retry(mut self, config: RetryConfig) -> Self {
        self.retry_config = Some(config);
        self
    }

    #[must_use]
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_config = Some(config);
        self
    }

    /// Builds the exporter with retry only.
    pub fn build_retry_only(self) -> RetryingExporter<E, R, X> {
        RetryingExporter::new(self.inner, self.retry_config.unwrap_or_default())
    }

    /// Builds the exporter with circuit breaking only.
    pub fn build_circuit_breaker_only(self) -> CircuitBreakerExporter<E, R, X> {
        CircuitBreakerExporter::new(self.inner, self.circuit_config.unwrap_or_default())
    }

    /// Builds with both retry (inner) and circuit breaker (outer).
    pub fn build_with_retry_and_circuit_breaker(
        self,
    ) -> CircuitBreakerExporter<E, R, RetryingExporter<E, R, X>> {
        let retrying = RetryingExporter::new(self.inner, self.retry_config.unwrap_or_default());
        CircuitBreakerExporter::new(retrying, self.circuit_config.unwrap_or_default())
    }
}
