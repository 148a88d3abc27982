//! Shared error taxonomy (spec.md §4.3, §7).
//!
//! `ErrorKind` is the stable tag every component dispatches on; nothing in
//! this crate or its callers should string-match a lower-level error more
//! than once. `categorize` is the one place that turns an opaque
//! lower-level message into a `ErrorKind` and exists precisely so that rule
//! holds.

use std::fmt;

use backtrace::Backtrace;
use thiserror::Error;

pub type EdgeResult<T> = Result<T, EdgeError>;

/// Stable error kind shared by the transport, pool, collector and sync
/// layers. Exact variant names are free per spec.md §4.3; these are ours.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("operation timed out")]
    Timeout,
    #[error("protocol error: {0}")]
    ProtocolError(String),
    #[error("invalid register: {0}")]
    InvalidRegister(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("connection pool exhausted")]
    PoolExhausted,
    #[error("circuit open for device {0}")]
    CircuitOpen(String),
    #[error("unknown error: {0}")]
    Unknown(String),

    // Boundary kinds, spec.md §7.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("local store failure: {0}")]
    LocalStoreFailure(String),
    #[error("operation cancelled")]
    Cancelled,
}

impl ErrorKind {
    /// Retry policy per spec.md §4.3: retryable kinds are transient,
    /// non-retryable kinds are a property of the request itself and would
    /// fail identically on every attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::ConnectionFailed(_)
                | ErrorKind::Timeout
                | ErrorKind::DeviceBusy
                | ErrorKind::Unknown(_)
                | ErrorKind::RemoteUnavailable(_)
                | ErrorKind::LocalStoreFailure(_)
        )
    }

    pub fn is_fatal_at_init(&self) -> bool {
        matches!(self, ErrorKind::ConfigInvalid(_))
    }

    /// Categorizes a lower-level error message into a stable `ErrorKind`.
    /// The patterns below are deliberately simple substring matches
    /// (spec.md §4.3 allows "string-matching table") so that new
    /// transports can reproduce the same categorization without importing
    /// this crate's private error types.
    pub fn categorize(message: &str) -> ErrorKind {
        let lower = message.to_lowercase();
        if lower.contains("timed out") || lower.contains("timeout") {
            ErrorKind::Timeout
        } else if lower.contains("connection refused")
            || lower.contains("connection reset")
            || lower.contains("broken pipe")
            || lower.contains("no route to host")
            || lower.contains("connect")
        {
            ErrorKind::ConnectionFailed(message.to_owned())
        } else if lower.contains("busy") || lower.contains("device is processing") {
            ErrorKind::DeviceBusy
        } else if lower.contains("invalid register")
            || lower.contains("illegal data address")
            || lower.contains("unknown object")
        {
            ErrorKind::InvalidRegister(message.to_owned())
        // A 4xx upload response is a terminal client error (spec.md §6:
        // "4xx is not retried by the batch"), so it must categorize the
        // same way as a malformed/rejected request rather than fall
        // through to `Unknown`, which is retryable.
        } else if lower.contains("client error")
            || lower.contains("malformed")
            || lower.contains("unexpected apdu")
            || lower.contains("protocol")
        {
            ErrorKind::ProtocolError(message.to_owned())
        } else if lower.contains("pool exhausted") || lower.contains("no connections available") {
            ErrorKind::PoolExhausted
        } else if lower.contains("remote unavailable") || lower.contains("server error") {
            ErrorKind::RemoteUnavailable(message.to_owned())
        } else {
            ErrorKind::Unknown(message.to_owned())
        }
    }
}

/// Top-level error: a stable `kind` plus a captured backtrace, mirroring
/// the teacher's `DbError { kind, status, backtrace }` shape.
#[derive(Debug)]
pub struct EdgeError {
    pub kind: ErrorKind,
    pub backtrace: Backtrace,
}

impl EdgeError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            backtrace: Backtrace::new_unresolved(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown(message.into()))
    }
}

impl fmt::Display for EdgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind, f)
    }
}

impl std::error::Error for EdgeError {}

impl From<ErrorKind> for EdgeError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Types that can describe themselves for structured logging, sentry
/// reporting and per-kind metrics, mirroring
/// `syncserver_common::ReportableError`.
pub trait ReportableError: fmt::Debug {
    fn error_backtrace(&self) -> String;
    fn is_sentry_event(&self) -> bool;
    fn metric_label(&self) -> Option<String>;
}

impl ReportableError for EdgeError {
    fn error_backtrace(&self) -> String {
        format!("{:?}", self.backtrace)
    }

    fn is_sentry_event(&self) -> bool {
        // Circuit-open and cancellation are expected operational states,
        // not incidents.
        !matches!(self.kind, ErrorKind::CircuitOpen(_) | ErrorKind::Cancelled)
    }

    fn metric_label(&self) -> Option<String> {
        let label = match &self.kind {
            ErrorKind::ConnectionFailed(_) => "connection_failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ProtocolError(_) => "protocol_error",
            ErrorKind::InvalidRegister(_) => "invalid_register",
            ErrorKind::DeviceBusy => "device_busy",
            ErrorKind::PoolExhausted => "pool_exhausted",
            ErrorKind::CircuitOpen(_) => "circuit_open",
            ErrorKind::Unknown(_) => "unknown",
            ErrorKind::ConfigInvalid(_) => "config_invalid",
            ErrorKind::RemoteUnavailable(_) => "remote_unavailable",
            ErrorKind::LocalStoreFailure(_) => "local_store_failure",
            ErrorKind::Cancelled => "cancelled",
        };
        Some(format!("edge.error.{label}"))
    }
}

/// Types that can construct themselves from an internal-error message,
/// mirroring `syncserver_common::InternalError` (used by the blocking
/// threadpool wrapper to surface cancellation as a typed error).
pub trait InternalError {
    fn internal_error(message: String) -> Self;
}

impl InternalError for EdgeError {
    fn internal_error(message: String) -> Self {
        EdgeError::new(ErrorKind::LocalStoreFailure(message))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn categorizes_timeout() {
        assert_eq!(ErrorKind::categorize("read timed out"), ErrorKind::Timeout);
    }

    #[test]
    fn categorizes_connection_failed() {
        assert_eq!(
            ErrorKind::categorize("connection refused by 10.0.0.5:502"),
            ErrorKind::ConnectionFailed("connection refused by 10.0.0.5:502".into())
        );
    }

    #[test]
    fn categorizes_a_4xx_upload_response_as_non_retryable() {
        let kind = ErrorKind::categorize("client error 401: bad api key");
        assert!(matches!(kind, ErrorKind::ProtocolError(_)));
        assert!(!kind.is_retryable());
    }

    #[test]
    fn categorizes_a_5xx_upload_response_as_retryable() {
        let kind = ErrorKind::categorize("server error 503: upstream unavailable");
        assert!(matches!(kind, ErrorKind::RemoteUnavailable(_)));
        assert!(kind.is_retryable());
    }

    #[test]
    fn retry_policy_matches_spec() {
        assert!(ErrorKind::ConnectionFailed("x".into()).is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::DeviceBusy.is_retryable());
        assert!(ErrorKind::Unknown("x".into()).is_retryable());
        assert!(!ErrorKind::ProtocolError("x".into()).is_retryable());
        assert!(!ErrorKind::InvalidRegister("x".into()).is_retryable());
    }
}
