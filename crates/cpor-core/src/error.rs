//! Error types for the CPOR protocol engine.
//!
//! The taxonomy distinguishes three severities:
//!
//! - **Frame-local**: malformed or unverifiable frames. The frame is
//!   rejected and the session continues (`Decode`, `Crypto`).
//! - **Backpressure / caller conditions**: not failures at all, just
//!   suspend-and-retry signals (`CreditExhausted`, `ResumePending`) or
//!   caller misuse (`InvalidState`, `Closed`).
//! - **Session-fatal**: violations that terminate the session and require a
//!   wholly new handshake (`ProtocolViolation`, `ResumeOverflow`,
//!   `CounterExhausted`, timeouts during handshake/resume).
//!
//! [`SessionError::is_fatal`] encodes the split so drivers never have to
//! guess.

use std::time::Duration;

use thiserror::Error;

use crate::session::SessionState;

/// Errors surfaced by the session engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Malformed frame bytes; the frame is dropped, the session continues
    #[error("decode error: {0}")]
    Decode(#[from] cpor_proto::ProtocolError),

    /// Signature verification or another crypto operation failed on a
    /// frame; the frame is dropped, the session continues
    #[error("crypto error: {0}")]
    Crypto(#[from] cpor_crypto::CryptoError),

    /// Peer violated sequencing or state rules; fatal to the session
    #[error("protocol violation: {reason}")]
    ProtocolViolation {
        /// What the peer did wrong
        reason: String,
    },

    /// A frame arrived that is not acceptable in the current state; fatal
    #[error("unexpected message: kind {kind:#06x} in state {state:?}")]
    UnexpectedMessage {
        /// State when the frame arrived
        state: SessionState,
        /// Kind code of the offending frame
        kind: u16,
    },

    /// Caller invoked an operation the current state does not allow
    #[error("invalid state: cannot {operation} from {state:?}")]
    InvalidState {
        /// Current state
        state: SessionState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// No send credit available; suspend and retry once credit returns
    #[error("credit window exhausted")]
    CreditExhausted,

    /// A resume is in progress; sends must wait for it to finish
    #[error("resume in progress")]
    ResumePending,

    /// Resume buffer hit capacity with unacknowledged entries; fatal, the
    /// session must be torn down and re-established
    #[error("resume buffer overflow: capacity {capacity} exceeded")]
    ResumeOverflow {
        /// Configured buffer capacity
        capacity: usize,
    },

    /// The peer's acknowledged counter predates the retained buffer; replay
    /// is impossible and a fresh handshake is required
    #[error("resume impossible: peer acknowledged {acked}, lowest retained {lowest}")]
    ResumeImpossible {
        /// Counter the peer reported
        acked: u64,
        /// Lowest counter still buffered
        lowest: u64,
    },

    /// The peer rejected our resume request; fatal, start a new session
    #[error("resume rejected by peer: status {status}: {reason}")]
    ResumeRejected {
        /// Status code from the ResumeResponse
        status: u16,
        /// Peer-supplied reason
        reason: String,
    },

    /// The send counter would wrap; fatal, forces a fresh handshake
    #[error("sequence counter exhausted")]
    CounterExhausted,

    /// Handshake did not complete within the configured timeout; fatal
    #[error("handshake timeout after {elapsed:?}")]
    HandshakeTimeout {
        /// How long we waited
        elapsed: Duration,
    },

    /// Resume did not complete within the configured timeout; fatal
    #[error("resume timeout after {elapsed:?}")]
    ResumeTimeout {
        /// How long we waited
        elapsed: Duration,
    },

    /// Heartbeat went unanswered; peer presumed dead, drives a reconnect
    /// attempt (not immediately fatal)
    #[error("heartbeat timeout after {elapsed:?}")]
    HeartbeatTimeout {
        /// Time since the unanswered probe was sent
        elapsed: Duration,
    },

    /// The handshake was rejected by the peer; fatal
    #[error("handshake rejected: status {status}: {reason}")]
    HandshakeRejected {
        /// Status code from the ConnectResponse
        status: u16,
        /// Peer-supplied reason
        reason: String,
    },

    /// Registration sub-protocol failure; fatal to the registration attempt
    #[error("registration failed: {0}")]
    Registration(String),

    /// The peer reported a fatal error frame
    #[error("peer error {code}: {message}")]
    Peer {
        /// Peer-supplied error code
        code: u16,
        /// Peer-supplied message
        message: String,
    },

    /// Underlying transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The session is terminal; no further operations are accepted
    #[error("session is closed")]
    Closed,
}

impl SessionError {
    /// Whether this error terminates the session.
    ///
    /// Fatal errors absorb the session into `Failed`; the caller must start
    /// a wholly new session. Non-fatal errors are frame-local rejections,
    /// backpressure conditions, or transient signals handled by the driver.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ProtocolViolation { .. }
                | Self::UnexpectedMessage { .. }
                | Self::ResumeOverflow { .. }
                | Self::ResumeImpossible { .. }
                | Self::ResumeRejected { .. }
                | Self::CounterExhausted
                | Self::HandshakeTimeout { .. }
                | Self::ResumeTimeout { .. }
                | Self::HandshakeRejected { .. }
                | Self::Peer { .. }
        )
    }

    /// Whether this error is a suspend-and-retry condition rather than a
    /// failure (credit exhaustion, resume in progress).
    #[must_use]
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::CreditExhausted | Self::ResumePending)
    }
}

/// Convenient Result type alias for engine operations
pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_local_errors_are_not_fatal() {
        assert!(!SessionError::Decode(cpor_proto::ProtocolError::InvalidMagic).is_fatal());
        assert!(!SessionError::Crypto(cpor_crypto::CryptoError::VerificationFailed).is_fatal());
    }

    #[test]
    fn backpressure_is_not_an_error() {
        assert!(SessionError::CreditExhausted.is_backpressure());
        assert!(SessionError::ResumePending.is_backpressure());
        assert!(!SessionError::CreditExhausted.is_fatal());
    }

    #[test]
    fn violations_are_fatal() {
        assert!(SessionError::ProtocolViolation { reason: "dup".into() }.is_fatal());
        assert!(SessionError::ResumeOverflow { capacity: 3 }.is_fatal());
        assert!(SessionError::CounterExhausted.is_fatal());
        assert!(
            SessionError::HandshakeTimeout { elapsed: Duration::from_secs(31) }.is_fatal()
        );
    }

    #[test]
    fn heartbeat_timeout_is_transient() {
        assert!(
            !SessionError::HeartbeatTimeout { elapsed: Duration::from_secs(6) }.is_fatal()
        );
    }
}
