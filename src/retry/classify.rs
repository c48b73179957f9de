//! Failure classification
//!
//! The retry loop never looks at concrete client error types. Callers implement
//! [`ClassifyError`] once per client to translate their errors into a
//! [`Classification`].

use crate::config::RetryConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::time::Duration;

/// Coarse failure category, as written to the audit log
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The service asked us to slow down
    RateLimited,
    /// Could not connect, or the connection dropped
    Connection,
    /// The call did not finish in time
    Timeout,
    /// The service failed (5xx)
    Server,
    /// The request was rejected (4xx other than rate limiting)
    Client,
    /// Recognized as a service error but not further classified
    Unknown,
}

impl ErrorCategory {
    /// Audit log name
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::RateLimited => "rate_limited",
            ErrorCategory::Connection => "connection",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Server => "server",
            ErrorCategory::Client => "client",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Best-effort category for an HTTP status code
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => ErrorCategory::RateLimited,
            408 => ErrorCategory::Timeout,
            400..=499 => ErrorCategory::Client,
            500..=599 => ErrorCategory::Server,
            _ => ErrorCategory::Unknown,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-declared wait before the next attempt
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RetryAfter {
    /// Relative delay in seconds
    Seconds(f64),
    /// Absolute point in time
    Date(DateTime<Utc>),
}

impl RetryAfter {
    /// Parse a `Retry-After` header value: delta-seconds or an HTTP-date
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        if let Ok(secs) = value.parse::<f64>() {
            return secs.is_finite().then_some(RetryAfter::Seconds(secs));
        }
        DateTime::parse_from_rfc2822(value)
            .ok()
            .map(|dt| RetryAfter::Date(dt.with_timezone(&Utc)))
    }

    /// Delay relative to `now`, never negative
    pub fn delay_from(&self, now: DateTime<Utc>) -> Duration {
        let secs = match self {
            RetryAfter::Seconds(secs) => *secs,
            RetryAfter::Date(at) => (*at - now).num_milliseconds() as f64 / 1000.0,
        };
        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::ZERO)
    }
}

/// A recognized service or transport failure
#[derive(Clone, Debug, PartialEq)]
pub struct Failure {
    /// Category of the failure
    pub category: ErrorCategory,
    /// HTTP status, when the service answered
    pub status: Option<u16>,
    /// Server wait hint, when present
    pub retry_after: Option<RetryAfter>,
}

impl Failure {
    /// A failure of `category` without status or hint
    pub fn new(category: ErrorCategory) -> Self {
        Self {
            category,
            status: None,
            retry_after: None,
        }
    }

    /// A failure carrying an HTTP status; the category is derived from it
    pub fn from_status(status: u16) -> Self {
        Self {
            category: ErrorCategory::from_status(status),
            status: Some(status),
            retry_after: None,
        }
    }

    /// Attach a server wait hint
    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Option<RetryAfter>) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Whether the failure means the service is refusing us
    pub fn is_rate_limited(&self) -> bool {
        self.category == ErrorCategory::RateLimited || self.status == Some(429)
    }
}

/// How the retry loop should treat an error
#[derive(Clone, Debug, PartialEq)]
pub enum Classification {
    /// A known service or transport failure
    Recognized(Failure),
    /// A bug or an error from outside the service boundary; never retried
    Unexpected,
}

/// Implemented by error types passed through [`RetryingCaller`](super::RetryingCaller)
pub trait ClassifyError: fmt::Display {
    /// Classify this error
    fn classify(&self) -> Classification;
}

/// Retry decision for one failed attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Status code in the retryable set
    RetryableStatus,
    /// Status code outside the retryable set, or a client error without status
    NonRetryableStatus,
    /// Transport failure without a status code
    RetryableTransport,
    /// Not a recognized failure
    Unexpected,
}

impl Verdict {
    /// Whether another attempt may be made
    pub fn is_retryable(&self) -> bool {
        matches!(self, Verdict::RetryableStatus | Verdict::RetryableTransport)
    }
}

/// Decide how to treat a classified failure under `policy`
pub fn verdict(classification: &Classification, policy: &RetryConfig) -> Verdict {
    match classification {
        Classification::Unexpected => Verdict::Unexpected,
        Classification::Recognized(failure) => match failure.status {
            Some(status) if policy.is_retryable_status(status) => Verdict::RetryableStatus,
            Some(_) => Verdict::NonRetryableStatus,
            None if failure.category == ErrorCategory::Client => Verdict::NonRetryableStatus,
            None => Verdict::RetryableTransport,
        },
    }
}

/// I/O errors from network sockets map onto transport categories
impl ClassifyError for io::Error {
    fn classify(&self) -> Classification {
        let category = match self.kind() {
            io::ErrorKind::TimedOut => ErrorCategory::Timeout,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::Interrupted => ErrorCategory::Connection,
            _ => return Classification::Unexpected,
        };
        Classification::Recognized(Failure::new(category))
    }
}
