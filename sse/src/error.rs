//! Error types for the SSE relay engine.
use std::error::Error as StdError;
use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Top-level engine error type.
///
/// Only contract violations and pre-signalled cancellation surface as
/// errors. Transport failures (a client that went away mid-write) are part
/// of normal operation: they are caught at the sink boundary, logged, and
/// reported to callers as `Ok(false)` or a reduced delivery count, never as
/// an `Error`.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// The kinds of errors the engine can report to its callers.
#[derive(Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A send or close was invoked on a connection that is not currently
    /// admitted (either never admitted, or already removed). This signals a
    /// lifecycle bug in the caller, not a transport condition.
    NotConnected,
    /// The caller-supplied cancellation token was already triggered before
    /// the operation started.
    Cancelled,
    Other(String),
}

impl Error {
    pub fn not_connected() -> Self {
        Self {
            source: None,
            error_kind: ErrorKind::NotConnected,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            source: None,
            error_kind: ErrorKind::Cancelled,
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            source: None,
            error_kind: ErrorKind::Other(message.into()),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::NotConnected => write!(f, "SSE Error: connection is not connected"),
            ErrorKind::Cancelled => write!(f, "SSE Error: operation was cancelled"),
            ErrorKind::Other(message) => write!(f, "SSE Error: {message}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}
