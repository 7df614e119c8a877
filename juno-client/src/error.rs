//! Errors surfaced by the client.
//!
//! Store outcomes such as "not found" or "version conflict" are not errors;
//! they arrive as an `OperationStatus` on a successful `JunoResponse`.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use juno_common::FrameError;
use thiserror::Error;

/// Result type for client calls.
pub type JunoResult<T> = Result<T, JunoError>;

/// Which deadline expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// Waiting for a free pool slot.
    Acquire,
    /// Establishing a connection.
    Connect,
    /// Writing the request and reading its response.
    Response,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutPhase::Acquire => write!(f, "connection acquire"),
            TimeoutPhase::Connect => write!(f, "connect"),
            TimeoutPhase::Response => write!(f, "response"),
        }
    }
}

/// Transport, framing and argument failures.
///
/// `Clone` so that every awaiter of a shared future observes the same error;
/// IO causes are kept behind an `Arc` for that reason.
#[derive(Debug, Clone, Error)]
pub enum JunoError {
    /// Malformed or truncated wire data. The connection is discarded.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    /// Connect or IO failure talking to `addr`.
    #[error("connection error ({addr}): {source}")]
    Connection {
        addr: String,
        #[source]
        source: Arc<io::Error>,
    },
    /// A deadline expired.
    #[error("{phase} timed out after {after:?}")]
    Timeout { phase: TimeoutPhase, after: Duration },
    /// Rejected before any IO.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),
    /// Invalid client configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The call was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,
    /// The async runtime failed underneath the call.
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl JunoError {
    pub(crate) fn connection(addr: impl Into<String>, source: io::Error) -> Self {
        JunoError::Connection {
            addr: addr.into(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn illegal(msg: impl Into<String>) -> Self {
        JunoError::IllegalArgument(msg.into())
    }

    /// True for failures a retry on a fresh connection may fix.
    pub fn is_transient(&self) -> bool {
        matches!(self, JunoError::Connection { .. } | JunoError::Timeout { .. })
    }
}
