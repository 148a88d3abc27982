//! Protocol-specific errors, grounded on the `ProtocolError` taxonomy in
//! `other_examples/...scada-ingestion-src-adapters-mod.rs`: any
//! network/protocol error propagates unchanged to the caller (spec.md
//! §4.1) — the Error Handler (`edge-breaker`) does the categorizing, not
//! this crate.

use thiserror::Error;

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("not connected")]
    NotConnected,
    #[error("read failed: {0}")]
    ReadFailed(String),
    #[error("invalid register: {0}")]
    InvalidRegister(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("timed out waiting for response")]
    Timeout,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// The raw message the Error Handler's `ErrorKind::categorize`
    /// expects (spec.md §4.3: "categorization is a pure function of the
    /// lower-level error").
    pub fn message(&self) -> String {
        self.to_string()
    }
}
