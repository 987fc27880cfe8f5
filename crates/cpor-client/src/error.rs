//! Client-side error taxonomy.
//!
//! The driver adds exactly two failure modes of its own (I/O that outlived
//! every reconnect attempt, and caller-supplied timeouts); everything else
//! is the engine's [`SessionError`] passed through unchanged.

use std::time::Duration;

use cpor_core::SessionError;
use thiserror::Error;

/// Errors surfaced by the async session driver.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The session engine reported an error
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Transport I/O failure outside the reconnect path
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// A caller-supplied timeout elapsed before the operation completed
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The driver task is gone; the session is closed or failed
    #[error("session driver is gone")]
    DriverGone,
}

impl ClientError {
    /// Whether the underlying session can no longer be used.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Session(e) => e.is_fatal() || matches!(e, SessionError::Closed),
            Self::Io(_) | Self::DriverGone => true,
            Self::Timeout(_) => false,
        }
    }
}

/// Convenient Result type alias for driver operations
pub type Result<T> = std::result::Result<T, ClientError>;
