//! Retry logic with classified failures and exponential backoff
//!
//! [`RetryingCaller`] wraps one fallible external call. Each attempt:
//!
//! 1. waits for the shared [`RateLimiter`], if any
//! 2. runs the operation
//! 3. on failure, classifies the error through [`ClassifyError`] and either
//!    returns it or sleeps and tries again
//!
//! Without a server hint the sleep before attempt `n + 1` is
//! `min(backoff_cap, backoff_base^(n-1)) + uniform(0, jitter_max)`. A server hint
//! (`Retry-After`) replaces the computed backoff and is clamped to `backoff_cap`.
//! Every attempt is appended to the audit sink.
//!
//! # Example
//!
//! ```no_run
//! use resumable_ingest::config::RetryConfig;
//! use resumable_ingest::retry::{Classification, ClassifyError, Failure, RetryingCaller};
//!
//! #[derive(Debug)]
//! struct HttpError(u16);
//!
//! impl std::fmt::Display for HttpError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "HTTP {}", self.0)
//!     }
//! }
//!
//! impl ClassifyError for HttpError {
//!     fn classify(&self) -> Classification {
//!         Classification::Recognized(Failure::from_status(self.0))
//!     }
//! }
//!
//! # async fn example() {
//! let caller = RetryingCaller::new(RetryConfig::default());
//! let result = caller
//!     .call("fetch", || async { Ok::<_, HttpError>("body".to_string()) })
//!     .await;
//! assert!(result.is_ok());
//! # }
//! ```

mod audit;
mod classify;


pub use audit::{AttemptRecord, AuditSink, JsonlAuditLog, MemoryAuditLog};
pub use classify::{
    Classification, ClassifyError, ErrorCategory, Failure, RetryAfter, Verdict, verdict,
};

use crate::config::RetryConfig;
use crate::metrics::{self, MetricsSink, NoopMetrics};
use crate::rate_limiter::RateLimiter;
use chrono::Utc;
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Token usage reported by a successful call
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    /// Tokens in the request
    pub prompt_tokens: u64,
    /// Tokens in the response
    pub completion_tokens: u64,
    /// Tokens billed in total
    pub total_tokens: u64,
}

/// Why a retried call gave up
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The failure is not worth retrying
    #[error("{error} (non-retryable, attempt {attempts})")]
    NonRetryable {
        /// Error from the last attempt
        error: E,
        /// Attempts made
        attempts: u32,
        /// Classification of the last error
        failure: Failure,
    },

    /// Every allowed attempt failed
    #[error("{error} (gave up after {attempts} attempts)")]
    Exhausted {
        /// Error from the last attempt
        error: E,
        /// Attempts made
        attempts: u32,
        /// Classification of the last error
        failure: Failure,
    },

    /// The error was not a recognized service failure
    #[error("{error} (unexpected, attempt {attempts})")]
    Unexpected {
        /// The unexpected error
        error: E,
        /// Attempts made
        attempts: u32,
    },
}

impl<E> RetryError<E> {
    /// Number of attempts made
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::NonRetryable { attempts, .. }
            | RetryError::Exhausted { attempts, .. }
            | RetryError::Unexpected { attempts, .. } => *attempts,
        }
    }

    /// Classification of the final error, if it was recognized
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            RetryError::NonRetryable { failure, .. } | RetryError::Exhausted { failure, .. } => {
                Some(failure)
            }
            RetryError::Unexpected { .. } => None,
        }
    }

    /// The error returned by the final attempt
    pub fn error(&self) -> &E {
        match self {
            RetryError::NonRetryable { error, .. }
            | RetryError::Exhausted { error, .. }
            | RetryError::Unexpected { error, .. } => error,
        }
    }

    /// Unwrap the error returned by the final attempt
    pub fn into_error(self) -> E {
        match self {
            RetryError::NonRetryable { error, .. }
            | RetryError::Exhausted { error, .. }
            | RetryError::Unexpected { error, .. } => error,
        }
    }

    /// Whether the service is refusing us (rate limited after all retries, or
    /// rate limited with retries disabled for that status)
    pub fn is_blocked(&self) -> bool {
        self.failure().is_some_and(Failure::is_rate_limited)
    }

    /// Audit/metric label for the final error
    pub fn error_type(&self) -> &'static str {
        self.failure()
            .map(|f| f.category.as_str())
            .unwrap_or("unexpected")
    }
}

/// Backoff before attempt `attempt + 1`, without jitter
///
/// `min(backoff_cap, backoff_base^(attempt-1))`.
pub fn backoff_delay(policy: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let cap = policy.backoff_cap.as_secs_f64();
    let secs = policy.backoff_base.powi(exponent).min(cap);
    Duration::try_from_secs_f64(secs).unwrap_or(policy.backoff_cap)
}

/// Sleep before attempt `attempt + 1`
///
/// A server hint wins over the computed backoff; both are clamped to the cap,
/// and only the computed backoff gets jitter.
pub fn wait_before_retry(policy: &RetryConfig, attempt: u32, hint: Option<Duration>) -> Duration {
    match hint {
        Some(hint) => hint.min(policy.backoff_cap),
        None => backoff_delay(policy, attempt) + jitter(policy.jitter_max),
    }
}

fn jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let secs = rand::thread_rng().gen_range(0.0..=max.as_secs_f64());
    Duration::from_secs_f64(secs)
}

/// Retry wrapper for one external call site
#[derive(Clone)]
pub struct RetryingCaller {
    policy: RetryConfig,
    limiter: Option<RateLimiter>,
    audit: Option<Arc<dyn AuditSink>>,
    metrics: Arc<dyn MetricsSink>,
}

impl fmt::Debug for RetryingCaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryingCaller")
            .field("policy", &self.policy)
            .field("limiter", &self.limiter)
            .field("audit", &self.audit.is_some())
            .finish_non_exhaustive()
    }
}

impl RetryingCaller {
    /// Caller with no rate limiter, no audit log and no metrics
    pub fn new(policy: RetryConfig) -> Self {
        Self {
            policy,
            limiter: None,
            audit: None,
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Share `limiter` with other callers; it is acquired before every attempt
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Append every attempt to `audit`
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Report attempts, errors and token usage to `metrics`
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The policy this caller applies
    pub fn policy(&self) -> &RetryConfig {
        &self.policy
    }

    /// Run `op` until it succeeds or the policy gives up
    pub async fn call<F, Fut, T, E>(&self, operation: &str, op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ClassifyError,
    {
        self.call_with_usage(operation, op, |_| None).await
    }

    /// Like [`call`](Self::call), recording token usage of the successful result
    pub async fn call_with_usage<F, Fut, T, E, U>(
        &self,
        operation: &str,
        mut op: F,
        usage: U,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ClassifyError,
        U: Fn(&T) -> Option<Usage>,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;

            if let Some(limiter) = &self.limiter {
                limiter.acquire().await;
            }
            self.metrics
                .counter(metrics::EXTERNAL_CALL_ATTEMPTS, 1, &[("operation", operation)]);

            let started = Instant::now();
            let result = op().await;
            let latency = started.elapsed();
            self.metrics.histogram(
                metrics::EXTERNAL_CALL_LATENCY_MS,
                latency.as_secs_f64() * 1000.0,
                &[("operation", operation)],
            );

            let mut record =
                AttemptRecord::new(operation, attempt, max_attempts, latency.as_millis() as u64);

            let error = match result {
                Ok(value) => {
                    record.success = true;
                    if let Some(u) = usage(&value) {
                        record.prompt_tokens = Some(u.prompt_tokens);
                        record.completion_tokens = Some(u.completion_tokens);
                        record.total_tokens = Some(u.total_tokens);
                        self.metrics.counter(
                            metrics::LLM_PROMPT_TOKENS,
                            u.prompt_tokens,
                            &[("operation", operation)],
                        );
                    }
                    self.audit(&record);
                    if attempt > 1 {
                        tracing::info!(
                            operation,
                            attempts = attempt,
                            "operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            record.error_message = Some(error.to_string());
            let classification = error.classify();

            let failure = match classification {
                Classification::Unexpected => {
                    record.error_type = Some("unexpected".to_string());
                    record.retryable = Some(false);
                    record.fatal = Some(true);
                    self.audit(&record);
                    tracing::error!(
                        operation,
                        attempt,
                        error = %error,
                        "operation failed with unexpected error"
                    );
                    self.count_error(operation, "unexpected");
                    return Err(RetryError::Unexpected {
                        error,
                        attempts: attempt,
                    });
                }
                Classification::Recognized(ref failure) => failure.clone(),
            };

            let retryable = verdict(&classification, &self.policy).is_retryable();
            let hint = failure.retry_after.map(|h| h.delay_from(Utc::now()));
            record.error_type = Some(failure.category.as_str().to_string());
            record.status_code = failure.status;
            record.retry_after_s = hint.map(|h| h.as_secs_f64());
            record.retryable = Some(retryable);

            if !retryable {
                record.fatal = Some(true);
                self.audit(&record);
                tracing::error!(
                    operation,
                    attempt,
                    status = ?failure.status,
                    error = %error,
                    "operation failed with non-retryable error"
                );
                self.count_error(operation, failure.category.as_str());
                return Err(RetryError::NonRetryable {
                    error,
                    attempts: attempt,
                    failure,
                });
            }

            if attempt >= max_attempts {
                record.fatal = Some(false);
                self.audit(&record);
                tracing::error!(
                    operation,
                    attempts = attempt,
                    error = %error,
                    "operation failed after all retry attempts exhausted"
                );
                self.count_error(operation, failure.category.as_str());
                return Err(RetryError::Exhausted {
                    error,
                    attempts: attempt,
                    failure,
                });
            }

            let wait = wait_before_retry(&self.policy, attempt, hint);
            record.wait_time_s = Some(wait.as_secs_f64());
            self.audit(&record);
            tracing::warn!(
                operation,
                attempt,
                max_attempts,
                category = %failure.category,
                status = ?failure.status,
                wait_ms = wait.as_millis() as u64,
                error = %error,
                "operation failed, retrying"
            );
            tokio::time::sleep(wait).await;
        }
    }

    fn audit(&self, record: &AttemptRecord) {
        if let Some(audit) = &self.audit {
            audit.append(record);
        }
    }

    fn count_error(&self, operation: &str, error_type: &str) {
        self.metrics.counter(
            metrics::PIPELINE_ERRORS_TOTAL,
            1,
            &[("operation", operation), ("error_type", error_type)],
        );
    }
}
