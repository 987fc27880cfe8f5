//! Caller-facing session handle.
//!
//! The handle talks to the driver task over channels: commands in, verified
//! payloads out, status snapshots through a watch. Dropping the handle makes
//! the driver close the session gracefully.

use std::time::Duration;

use cpor_core::{SessionError, SessionState};
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{ClientError, Result};

/// Commands from the handle to the driver task.
pub(crate) enum Command {
    /// Queue an application payload for sending
    Send {
        /// Opaque payload bytes
        payload: Vec<u8>,
        /// Resolved once the message is signed, buffered, and on the wire
        reply: oneshot::Sender<std::result::Result<(), SessionError>>,
    },
    /// Queue a batch of payloads as one sequenced unit
    SendBatch {
        /// Payloads delivered in order under a single counter
        payloads: Vec<Vec<u8>>,
        /// Resolved once the envelope is signed, buffered, and on the wire
        reply: oneshot::Sender<std::result::Result<(), SessionError>>,
    },
    /// Start the graceful half-close handshake
    Close {
        /// Reason carried in the Close frame
        reason: String,
        /// Resolved once the session reaches a terminal state
        reply: oneshot::Sender<()>,
    },
}

/// Snapshot of session status, published by the driver on every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    /// Current lifecycle state
    pub state: SessionState,
    /// Send credits currently available
    pub credit_available: u32,
    /// The error that moved the session into `Failed`, if any
    pub error: Option<SessionError>,
}

/// Handle to a running session.
///
/// `send` suspends while a resume is in progress or the credit window is
/// exhausted, up to the caller's timeout. `recv` yields the verified,
/// ordered payload stream and ends once the session is terminal.
pub struct SessionHandle {
    pub(crate) commands: mpsc::Sender<Command>,
    pub(crate) deliveries: mpsc::Receiver<Vec<u8>>,
    pub(crate) status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    /// Send an application payload, waiting up to `timeout` for credit and
    /// any in-progress resume.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Timeout`] if the message did not make it onto the
    ///   wire in time; the queued send is cancelled and consumes nothing.
    /// - [`ClientError::Session`] with a fatal error if the session failed.
    /// - [`ClientError::DriverGone`] if the session is already torn down.
    pub async fn send(&self, payload: Vec<u8>, timeout: Duration) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Send { payload, reply: reply_tx })
            .await
            .map_err(|_| ClientError::DriverGone)?;
        Self::await_reply(reply_rx, timeout).await
    }

    /// Send a batch of payloads as one sequenced unit (single counter,
    /// single credit).
    ///
    /// # Errors
    ///
    /// Same conditions as [`SessionHandle::send`].
    pub async fn send_batch(&self, payloads: Vec<Vec<u8>>, timeout: Duration) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::SendBatch { payloads, reply: reply_tx })
            .await
            .map_err(|_| ClientError::DriverGone)?;
        Self::await_reply(reply_rx, timeout).await
    }

    /// Receive the next verified, ordered payload.
    ///
    /// Returns `None` once the session has reached `Closed` or `Failed` and
    /// every already-delivered payload has been consumed.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.deliveries.recv().await
    }

    /// Close the session gracefully and wait for the half-close handshake
    /// to finish (or the driver's close timeout to expire).
    pub async fn close(&self, reason: &str) {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = Command::Close { reason: reason.to_string(), reply: reply_tx };
        if self.commands.send(command).await.is_err() {
            // Driver already gone; the session is torn down
            return;
        }
        let _ = reply_rx.await;
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    /// Send credits currently available.
    #[must_use]
    pub fn credit_available(&self) -> u32 {
        self.status.borrow().credit_available
    }

    /// The error that moved the session into `Failed`, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<SessionError> {
        self.status.borrow().error.clone()
    }

    /// Block until the handshake completes.
    ///
    /// Used by `connect`; afterwards the state only leaves `Established`
    /// for resume or teardown.
    pub(crate) async fn wait_established(&mut self) -> Result<()> {
        loop {
            let status = self.status.borrow_and_update().clone();
            match status.state {
                SessionState::Established => return Ok(()),
                SessionState::Failed => {
                    return Err(status
                        .error
                        .map_or(ClientError::DriverGone, ClientError::Session));
                },
                SessionState::Closed => {
                    return Err(ClientError::Session(SessionError::Closed));
                },
                SessionState::Init
                | SessionState::Handshaking
                | SessionState::Resuming
                | SessionState::Closing => {},
            }
            if self.status.changed().await.is_err() {
                return Err(ClientError::DriverGone);
            }
        }
    }

    async fn await_reply(
        reply: oneshot::Receiver<std::result::Result<(), SessionError>>,
        timeout: Duration,
    ) -> Result<()> {
        match tokio::time::timeout(timeout, reply).await {
            // Dropping the receiver cancels the queued send; the driver
            // discards it without consuming a counter or credit
            Err(_) => Err(ClientError::Timeout(timeout)),
            Ok(Err(_)) => Err(ClientError::DriverGone),
            Ok(Ok(result)) => result.map_err(ClientError::Session),
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status.borrow().clone();
        f.debug_struct("SessionHandle")
            .field("state", &status.state)
            .field("credit_available", &status.credit_available)
            .finish_non_exhaustive()
    }
}
