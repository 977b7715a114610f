//! Bounded, jittered retry around a single backend call.
//!
//! Under Kerberos, many concurrent connections using one principal can trip the backend's
//! replay detection and fail with "GSS initiate failed". That failure, and only that failure,
//! is retried, and only while security is enabled. Everything else surfaces on the first attempt.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rand::Rng;
use tracing::{debug, error, warn};

use crate::config::{Configuration, DEFAULT_SASL_CONNECTION_RETRIES, SASL_CONNECTION_RETRIES};
use crate::error::{GatewayError, GatewayResult};

/// Message fragment identifying the transient Kerberos race.
pub const GSS_INITIATE_FAILED: &str = "GSS initiate failed";

/// Upper bound of the random backoff between attempts.
pub const MAX_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Fatal,
}

/// Transient iff the failure is I/O-class and its message carries the GSS signature.
pub fn classify(err: &GatewayError) -> FailureClass {
    match err {
        GatewayError::Io(io) if io.to_string().contains(GSS_INITIATE_FAILED) => FailureClass::Transient,
        _ => FailureClass::Fatal,
    }
}

/// Returned by `CancellationToken::sleep` when the sleep was cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

/// Cooperative interruption for blocking backoff sleeps. Clones share state; once cancelled
/// the token stays cancelled so callers further up can observe it.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self { Self::default() }

    pub fn cancel(&self) {
        let (flag, cv) = &*self.inner;
        *flag.lock() = true;
        cv.notify_all();
    }

    pub fn is_cancelled(&self) -> bool { *self.inner.0.lock() }

    pub fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        let (flag, cv) = &*self.inner;
        let deadline = Instant::now() + duration;
        let mut cancelled = flag.lock();
        loop {
            if *cancelled {
                return Err(Interrupted);
            }
            if cv.wait_until(&mut cancelled, deadline).timed_out() {
                return if *cancelled { Err(Interrupted) } else { Ok(()) };
            }
        }
    }
}

/// Stateless apart from its backoff bound, so one instance can be shared by every request.
/// Interruption is per call: pass the request's own `CancellationToken` to `execute_cancellable`.
#[derive(Debug, Clone)]
pub struct RetryingOperationExecutor {
    max_backoff_ms: u64,
}

impl Default for RetryingOperationExecutor {
    fn default() -> Self { Self { max_backoff_ms: MAX_BACKOFF_MS } }
}

impl RetryingOperationExecutor {
    pub fn new() -> Self { Self::default() }

    /// Tighten the backoff bound (tests, latency-sensitive callers). Never below 1ms.
    pub fn with_max_backoff(mut self, max: Duration) -> Self {
        self.max_backoff_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX).max(1);
        self
    }

    pub fn max_backoff(&self) -> Duration { Duration::from_millis(self.max_backoff_ms) }

    pub fn execute<T, F>(&self, configuration: &Configuration, operation_name: &str, operation: F) -> GatewayResult<T>
    where
        F: FnMut() -> GatewayResult<T>,
    {
        self.execute_with_retry_callback(configuration, operation_name, operation, || {})
    }

    /// `on_retry` runs after each backoff and before the next attempt, e.g. to drop a
    /// connection that is bound to the failed security context.
    pub fn execute_with_retry_callback<T, F, R>(
        &self,
        configuration: &Configuration,
        operation_name: &str,
        operation: F,
        on_retry: R,
    ) -> GatewayResult<T>
    where
        F: FnMut() -> GatewayResult<T>,
        R: FnMut(),
    {
        self.execute_cancellable(configuration, operation_name, &CancellationToken::new(), operation, on_retry)
    }

    /// Like `execute_with_retry_callback`, but a backoff sleep is cut short once `cancel` is
    /// cancelled and the failure that triggered the backoff is returned.
    pub fn execute_cancellable<T, F, R>(
        &self,
        configuration: &Configuration,
        operation_name: &str,
        cancel: &CancellationToken,
        mut operation: F,
        mut on_retry: R,
    ) -> GatewayResult<T>
    where
        F: FnMut() -> GatewayResult<T>,
        R: FnMut(),
    {
        if !configuration.is_security_enabled() {
            return operation();
        }

        let max_attempts = max_attempts(configuration)?;
        let mut attempt: u32 = 1;
        loop {
            let err = match operation() {
                Ok(v) => {
                    if attempt > 1 {
                        debug!(target: "dlagent::retry", "{} succeeded on attempt {}/{}", operation_name, attempt, max_attempts);
                    }
                    return Ok(v);
                }
                Err(e) => e,
            };

            if classify(&err) == FailureClass::Fatal {
                return Err(err);
            }
            if attempt >= max_attempts {
                error!(
                    target: "dlagent::retry",
                    "{} failed with '{}' after {} attempts, giving up",
                    operation_name, GSS_INITIATE_FAILED, max_attempts
                );
                return Err(err);
            }

            let backoff = rand::thread_rng().gen_range(1..=self.max_backoff_ms);
            warn!(
                target: "dlagent::retry",
                "{} attempt {}/{} failed with '{}', retrying in {}ms",
                operation_name, attempt, max_attempts, GSS_INITIATE_FAILED, backoff
            );
            if cancel.sleep(Duration::from_millis(backoff)).is_err() {
                warn!(target: "dlagent::retry", "{} interrupted during backoff, not retrying", operation_name);
                return Err(err);
            }
            on_retry();
            attempt += 1;
        }
    }
}

/// Configured retries + 1. A negative retry count is rejected before any attempt.
fn max_attempts(configuration: &Configuration) -> GatewayResult<u32> {
    let retries = configuration.get_i64(SASL_CONNECTION_RETRIES, DEFAULT_SASL_CONNECTION_RETRIES)?;
    if retries < 0 {
        return Err(GatewayError::config(
            configuration.server_name(),
            format!("property '{}' must be non-negative, got {}", SASL_CONNECTION_RETRIES, retries),
        ));
    }
    let retries = u32::try_from(retries).map_err(|_| {
        GatewayError::config(configuration.server_name(), format!("property '{}' is too large: {}", SASL_CONNECTION_RETRIES, retries))
    })?;
    Ok(retries.saturating_add(1))
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
