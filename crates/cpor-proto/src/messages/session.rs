//! Connection lifecycle message bodies.
//!
//! These bodies handle the session lifecycle: handshake, resume after
//! disconnect, and graceful close.

use ed25519_dalek::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::{
    MessageKind,
    errors::{ProtocolError, Result},
    messages::{
        ClientId, KeyStorage, Nonce, SignedMessage, canonical_tuple, unsigned_signature,
    },
};

/// Status code: request accepted.
pub const STATUS_OK: u16 = 0;

/// Status code: accepted, registration sub-protocol must complete first.
pub const STATUS_REGISTRATION_PENDING: u16 = 1;

/// Status code: rejected.
pub const STATUS_REJECTED: u16 = 2;

/// Initial client handshake
///
/// The first message sent by a client to establish a session. The server
/// responds with [`ConnectResponse`].
///
/// When `registration_flag` is set, the server answers with
/// [`STATUS_REGISTRATION_PENDING`] and a session-scoped ephemeral key; the
/// client then sends a second `ConnectRequest` whose `client_metadata`
/// carries the sealed registration proof.
///
/// # Security
///
/// - **Claimed Key**: `client_pubkey` is the key the signature is verified
///   against. Until registration (or out-of-band pinning) binds it to an
///   identity, it authenticates only "the holder of this key".
///
/// - **Debug Redaction**: the `Debug` impl redacts `client_metadata` to
///   avoid logging sealed registration material.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    /// Client identifier (UUID bytes)
    pub client_id: ClientId,
    /// Client's long-term Ed25519 public key (32 bytes)
    pub client_pubkey: VerifyingKey,
    /// Last counter received in a previous session (0 for a fresh start)
    pub resume_counter: u64,
    /// Anti-replay nonce (16-32 bytes)
    pub nonce: Nonce,
    /// Request the registration sub-protocol
    pub registration_flag: bool,
    /// Optional wall-clock timestamp (informational only)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timestamp: Option<u64>,
    /// Opaque metadata; carries the sealed registration proof on the second
    /// handshake round
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub client_metadata: Option<Vec<u8>>,
    /// Where the client's private key lives (advisory)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub key_storage: Option<KeyStorage>,
    /// Client capabilities (future use)
    pub capabilities: Vec<String>,
    /// Signature over the canonical bytes
    pub signature: Signature,
}

impl ConnectRequest {
    /// Create an unsigned connect request.
    #[must_use]
    pub fn new(
        client_id: ClientId,
        client_pubkey: VerifyingKey,
        resume_counter: u64,
        nonce: Nonce,
        registration_flag: bool,
    ) -> Self {
        Self {
            client_id,
            client_pubkey,
            resume_counter,
            nonce,
            registration_flag,
            timestamp: None,
            client_metadata: None,
            key_storage: None,
            capabilities: Vec::new(),
            signature: unsigned_signature(),
        }
    }
}

impl std::fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("client_id", &self.client_id)
            .field("resume_counter", &self.resume_counter)
            .field("registration_flag", &self.registration_flag)
            .field("key_storage", &self.key_storage)
            .field("capabilities", &self.capabilities)
            .field(
                "client_metadata",
                &self.client_metadata.as_ref().map(|m| format!("<redacted {} bytes>", m.len())),
            )
            .finish_non_exhaustive()
    }
}

impl SignedMessage for ConnectRequest {
    fn canonical_bytes(&self) -> Result<Vec<u8>> {
        canonical_tuple(
            MessageKind::ConnectRequest,
            &(
                &self.client_id,
                &self.client_pubkey,
                self.resume_counter,
                &self.nonce,
                self.registration_flag,
                &self.timestamp,
                &self.client_metadata,
                &self.key_storage,
                &self.capabilities,
            ),
        )
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn set_signature(&mut self, signature: Signature) {
        self.signature = signature;
    }
}

/// Server response to ConnectRequest
///
/// `status_code` 0 establishes the session; [`STATUS_REGISTRATION_PENDING`]
/// means the handshake continues with a registration round; anything else is
/// a rejection and `error_message` must say why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectResponse {
    /// Session identifier assigned by the server
    pub session_id: u64,
    /// Server's long-term Ed25519 public key (32 bytes)
    pub server_pubkey: VerifyingKey,
    /// Last counter the server received from this client (0 for a fresh
    /// session)
    pub resume_counter: u64,
    /// 0 = ok, 1 = registration pending, >= 2 = rejected
    pub status_code: u16,
    /// Reason for rejection (required when rejected)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_message: Option<String>,
    /// Session-scoped X25519 ephemeral public key for registration
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ephemeral_pubkey: Option<[u8; 32]>,
    /// Largest body the server will accept
    pub max_payload_size: u32,
    /// Signature over the canonical bytes
    pub signature: Signature,
}

impl ConnectResponse {
    /// Create an unsigned accepting response.
    #[must_use]
    pub fn ok(session_id: u64, server_pubkey: VerifyingKey, resume_counter: u64) -> Self {
        Self {
            session_id,
            server_pubkey,
            resume_counter,
            status_code: STATUS_OK,
            error_message: None,
            ephemeral_pubkey: None,
            max_payload_size: crate::FrameHeader::MAX_PAYLOAD_SIZE,
            signature: unsigned_signature(),
        }
    }

    /// Create an unsigned rejection.
    #[must_use]
    pub fn rejected(
        session_id: u64,
        server_pubkey: VerifyingKey,
        status_code: u16,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            server_pubkey,
            resume_counter: 0,
            status_code,
            error_message: Some(reason.into()),
            ephemeral_pubkey: None,
            max_payload_size: crate::FrameHeader::MAX_PAYLOAD_SIZE,
            signature: unsigned_signature(),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.status_code > STATUS_REGISTRATION_PENDING && self.error_message.is_none() {
            return Err(ProtocolError::InvalidField {
                field: "error_message",
                reason: "required when status_code indicates rejection",
            });
        }
        if self.status_code == STATUS_REGISTRATION_PENDING && self.ephemeral_pubkey.is_none() {
            return Err(ProtocolError::InvalidField {
                field: "ephemeral_pubkey",
                reason: "required when registration is pending",
            });
        }
        if self.max_payload_size == 0 {
            return Err(ProtocolError::InvalidField {
                field: "max_payload_size",
                reason: "must be positive",
            });
        }
        Ok(())
    }
}

impl SignedMessage for ConnectResponse {
    fn canonical_bytes(&self) -> Result<Vec<u8>> {
        canonical_tuple(
            MessageKind::ConnectResponse,
            &(
                self.session_id,
                &self.server_pubkey,
                self.resume_counter,
                self.status_code,
                &self.error_message,
                &self.ephemeral_pubkey,
                self.max_payload_size,
            ),
        )
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn set_signature(&mut self, signature: Signature) {
        self.signature = signature;
    }
}

/// Request to resume a previous session after transport loss
///
/// `last_sequence_counter` is the highest application counter this side
/// accepted from the peer; the peer replays everything after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeRequest {
    /// Client identifier from the original handshake
    pub client_id: ClientId,
    /// Highest application counter received from the peer
    pub last_sequence_counter: u64,
    /// Fresh anti-replay nonce (16-32 bytes)
    pub client_nonce: Nonce,
    /// Signature over the canonical bytes
    pub signature: Signature,
}

impl ResumeRequest {
    /// Create an unsigned resume request.
    #[must_use]
    pub fn new(client_id: ClientId, last_sequence_counter: u64, client_nonce: Nonce) -> Self {
        Self {
            client_id,
            last_sequence_counter,
            client_nonce,
            signature: unsigned_signature(),
        }
    }
}

impl SignedMessage for ResumeRequest {
    fn canonical_bytes(&self) -> Result<Vec<u8>> {
        canonical_tuple(
            MessageKind::ResumeRequest,
            &(&self.client_id, self.last_sequence_counter, &self.client_nonce),
        )
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn set_signature(&mut self, signature: Signature) {
        self.signature = signature;
    }
}

/// Response to a resume request
///
/// On success (`status_code` 0), `resume_sequence` reports the highest
/// application counter the responder accepted from the requester; the
/// requester replays everything after it. Any other status fails the resume
/// and the session must be re-established from scratch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeResponse {
    /// 0 = resume accepted, anything else = rejected
    pub status_code: u16,
    /// Highest application counter received from the requester
    pub resume_sequence: u64,
    /// Reason for rejection (required when rejected)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_message: Option<String>,
    /// Fresh anti-replay nonce (16-32 bytes)
    pub server_nonce: Nonce,
    /// Signature over the canonical bytes
    pub signature: Signature,
}

impl ResumeResponse {
    /// Create an unsigned accepting response.
    #[must_use]
    pub fn ok(resume_sequence: u64, server_nonce: Nonce) -> Self {
        Self {
            status_code: STATUS_OK,
            resume_sequence,
            error_message: None,
            server_nonce,
            signature: unsigned_signature(),
        }
    }

    /// Create an unsigned rejection.
    #[must_use]
    pub fn rejected(status_code: u16, reason: impl Into<String>, server_nonce: Nonce) -> Self {
        Self {
            status_code,
            resume_sequence: 0,
            error_message: Some(reason.into()),
            server_nonce,
            signature: unsigned_signature(),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.status_code != STATUS_OK && self.error_message.is_none() {
            return Err(ProtocolError::InvalidField {
                field: "error_message",
                reason: "required when resume is rejected",
            });
        }
        Ok(())
    }
}

impl SignedMessage for ResumeResponse {
    fn canonical_bytes(&self) -> Result<Vec<u8>> {
        canonical_tuple(
            MessageKind::ResumeResponse,
            &(
                self.status_code,
                self.resume_sequence,
                &self.error_message,
                &self.server_nonce,
            ),
        )
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn set_signature(&mut self, signature: Signature) {
        self.signature = signature;
    }
}

/// Graceful close
///
/// Sent by either side to terminate a session. The receiver acknowledges
/// with its own `Close` before either side tears down, implementing a
/// half-close handshake. `final_counter` is the sender's last assigned
/// application counter, letting the receiver detect undelivered tail
/// messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseMessage {
    /// Reason for closing (for logging/debugging)
    pub reason: String,
    /// Sender's last assigned application counter
    pub final_counter: u64,
    /// False when closing due to an unrecoverable error
    pub graceful: bool,
    /// Signature over the canonical bytes
    pub signature: Signature,
}

impl CloseMessage {
    /// Create an unsigned close message.
    #[must_use]
    pub fn new(reason: impl Into<String>, final_counter: u64, graceful: bool) -> Self {
        Self { reason: reason.into(), final_counter, graceful, signature: unsigned_signature() }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.reason.is_empty() {
            return Err(ProtocolError::InvalidField {
                field: "reason",
                reason: "must be non-empty",
            });
        }
        Ok(())
    }
}

impl SignedMessage for CloseMessage {
    fn canonical_bytes(&self) -> Result<Vec<u8>> {
        canonical_tuple(MessageKind::Close, &(&self.reason, self.final_counter, self.graceful))
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn set_signature(&mut self, signature: Signature) {
        self.signature = signature;
    }
}
