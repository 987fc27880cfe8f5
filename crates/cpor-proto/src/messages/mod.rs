//! CBOR-encoded message bodies.
//!
//! Each message kind has a corresponding body type. The `Message` enum
//! provides type-safe handling with automatic CBOR serialization and a
//! canonical-bytes view for signing.
//!
//! # Design Rationale
//!
//! ## Why CBOR Instead of Raw Binary?
//!
//! - **Forward Compatibility**: CBOR allows adding optional fields without
//!   breaking old clients. Binary formats require version negotiation for
//!   every schema change.
//!
//! - **Type Safety**: CBOR preserves type information (distinguishes
//!   integers from strings). This prevents interpretation errors and
//!   simplifies debugging.
//!
//! ## Security Properties
//!
//! - **Bounded Deserialization**: All bodies are validated against the 1 MiB
//!   size limit before CBOR parsing begins. This prevents resource
//!   exhaustion attacks.
//!
//! - **Explicit Schema**: Each body type has an explicit Rust struct
//!   definition. There is no "generic map" parsing that could accept
//!   unexpected fields.
//!
//! - **Canonical Signing Input**: Every message exposes
//!   [`canonical bytes`](Message::canonical_bytes) - the deterministic CBOR
//!   encoding of `(kind, version, fields...)` excluding the signature. The
//!   kind and protocol version are bound into the signed bytes so a
//!   signature can never be transplanted onto a different variant or
//!   protocol revision.

pub mod app;
pub mod session;

use bytes::BufMut;
use ed25519_dalek::Signature;
use serde::{Deserialize, Serialize};

use crate::{
    Frame, FrameFlags, FrameHeader, MessageKind,
    errors::{ProtocolError, Result},
};

/// Smallest accepted nonce length in bytes.
pub const NONCE_MIN_LEN: usize = 16;

/// Largest accepted nonce length in bytes.
pub const NONCE_MAX_LEN: usize = 32;

/// A signature value for messages that have not been signed yet.
///
/// Message constructors fill this in; `cpor-crypto` replaces it when the
/// message is signed. All zeros is not a valid Ed25519 signature for any
/// message, so an unsigned message can never pass verification.
pub(crate) fn unsigned_signature() -> Signature {
    Signature::from_bytes(&[0u8; 64])
}

/// 128-bit client identifier (UUID bytes).
///
/// Stored as raw bytes rather than a formatted string so that the canonical
/// encoding is fixed-width and case-insensitivity can never bite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub [u8; 16]);

impl ClientId {
    /// Construct from a u128 value.
    #[must_use]
    pub const fn from_u128(value: u128) -> Self {
        Self(value.to_be_bytes())
    }

    /// View as a u128 value.
    #[must_use]
    pub const fn as_u128(&self) -> u128 {
        u128::from_be_bytes(self.0)
    }
}

/// Anti-replay nonce, 16 to 32 bytes.
///
/// Length is validated at construction and again during deserialization, so
/// a `Nonce` in hand is always in range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nonce(Vec<u8>);

impl Nonce {
    /// Construct a nonce, validating its length.
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < NONCE_MIN_LEN || bytes.len() > NONCE_MAX_LEN {
            return Err(ProtocolError::InvalidFieldLength {
                field: "nonce",
                expected: "16..=32",
                actual: bytes.len(),
            });
        }
        Ok(Self(bytes))
    }

    /// View the nonce bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Nonce {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Nonce {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        Self::new(bytes).map_err(serde::de::Error::custom)
    }
}

/// Where the client's long-term private key lives.
///
/// The engine never sees private key material either way; this is an
/// advisory field for server-side policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStorage {
    /// Key held in process memory
    Software,
    /// Key held in a hardware-backed store (TPM, secure element)
    Hardware,
}

/// Body of an Error frame
///
/// Error frames report protocol-level failures. `recoverable` tells the peer
/// whether retrying with a fresh session can succeed.
///
/// # Security
///
/// - **No Sensitive Data**: Error messages MUST NOT contain internal
///   details, file paths, or other information that could aid attackers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error code
    pub error_code: u16,
    /// Human-readable error message
    pub message: String,
    /// Whether a fresh session may succeed
    pub recoverable: bool,
    /// Signature over the canonical bytes
    pub signature: Signature,
}

impl ErrorMessage {
    /// Create an unsigned error message.
    #[must_use]
    pub fn new(error_code: u16, message: impl Into<String>, recoverable: bool) -> Self {
        Self { error_code, message: message.into(), recoverable, signature: unsigned_signature() }
    }
}

impl SignedMessage for ErrorMessage {
    fn canonical_bytes(&self) -> Result<Vec<u8>> {
        canonical_tuple(
            MessageKind::Error,
            &(self.error_code, &self.message, self.recoverable),
        )
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn set_signature(&mut self, signature: Signature) {
        self.signature = signature;
    }
}

/// Common behavior of every signed CPOR message body.
///
/// The canonical bytes are the signing/verification input: the deterministic
/// CBOR encoding of the message kind, protocol version, and every field
/// except `signature`, in declared order.
pub trait SignedMessage {
    /// Deterministic encoding of everything except the signature.
    fn canonical_bytes(&self) -> Result<Vec<u8>>;

    /// The attached signature.
    fn signature(&self) -> &Signature;

    /// Replace the attached signature.
    fn set_signature(&mut self, signature: Signature);
}

/// Encode the canonical tuple for a message body.
///
/// Binds `(kind, version)` ahead of the fields so signatures are scoped to
/// exactly one variant of exactly one protocol revision.
pub(crate) fn canonical_tuple<T: Serialize>(kind: MessageKind, fields: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(&(kind.to_u16(), FrameHeader::VERSION, fields), &mut buf)
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
    Ok(buf)
}

/// All possible message bodies
///
/// The body type is determined by the kind code in the frame header, so we
/// serialize only the inner struct content (no variant tag in CBOR).
///
/// # Invariants
///
/// - **Kind Uniqueness**: Each variant corresponds to exactly one
///   [`MessageKind`]. The `kind()` method returns a unique code per variant.
///
/// - **Serialization Consistency**: Encoding a `Message` and then decoding
///   it with the same kind MUST produce an equivalent value. This is
///   verified by round-trip tests.
///
/// # Security
///
/// - **No Variant Tag**: Unlike typical Rust enum serialization, we do NOT
///   serialize the variant discriminator. The frame header's kind field
///   already identifies the body type. This prevents attackers from sending
///   mismatched kind/body pairs.
///
/// - **Exhaustive Matching**: All methods use exhaustive `match` statements.
///   Adding a new variant causes compile errors in `encode()`, `decode()`,
///   and `kind()`, ensuring no variant is accidentally left unhandled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Initial handshake request
    ConnectRequest(session::ConnectRequest),
    /// Server response to ConnectRequest
    ConnectResponse(session::ConnectResponse),
    /// Request to resume a previous session
    ResumeRequest(session::ResumeRequest),
    /// Response to ResumeRequest
    ResumeResponse(session::ResumeResponse),
    /// Ordered application message
    Generic(app::GenericMessage),
    /// Batch of application payloads
    Batch(app::BatchEnvelope),
    /// Cumulative acknowledgment
    Ack(app::AckMessage),
    /// Liveness probe / response
    Heartbeat(app::Heartbeat),
    /// Graceful close / close acknowledgment
    Close(session::CloseMessage),
    /// Error report
    Error(ErrorMessage),
}

impl Message {
    /// Get the kind code for this message variant
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::ConnectRequest(_) => MessageKind::ConnectRequest,
            Self::ConnectResponse(_) => MessageKind::ConnectResponse,
            Self::ResumeRequest(_) => MessageKind::ResumeRequest,
            Self::ResumeResponse(_) => MessageKind::ResumeResponse,
            Self::Generic(_) => MessageKind::Generic,
            Self::Batch(_) => MessageKind::Batch,
            Self::Ack(_) => MessageKind::Ack,
            Self::Heartbeat(_) => MessageKind::Heartbeat,
            Self::Close(_) => MessageKind::Close,
            Self::Error(_) => MessageKind::Error,
        }
    }

    /// Sequence counter carried by sequenced application traffic.
    ///
    /// Returns `None` for lifecycle and control frames, which never consume
    /// counters (they carry snapshots instead).
    #[must_use]
    pub const fn sequence_counter(&self) -> Option<u64> {
        match self {
            Self::Generic(inner) => Some(inner.sequence_counter),
            Self::Batch(inner) => Some(inner.sequence_counter),
            _ => None,
        }
    }

    /// Canonical signing bytes for this message.
    ///
    /// See [`SignedMessage::canonical_bytes`].
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Self::ConnectRequest(inner) => inner.canonical_bytes(),
            Self::ConnectResponse(inner) => inner.canonical_bytes(),
            Self::ResumeRequest(inner) => inner.canonical_bytes(),
            Self::ResumeResponse(inner) => inner.canonical_bytes(),
            Self::Generic(inner) => inner.canonical_bytes(),
            Self::Batch(inner) => inner.canonical_bytes(),
            Self::Ack(inner) => inner.canonical_bytes(),
            Self::Heartbeat(inner) => inner.canonical_bytes(),
            Self::Close(inner) => inner.canonical_bytes(),
            Self::Error(inner) => inner.canonical_bytes(),
        }
    }

    /// The attached signature.
    #[must_use]
    pub fn signature(&self) -> &Signature {
        match self {
            Self::ConnectRequest(inner) => &inner.signature,
            Self::ConnectResponse(inner) => &inner.signature,
            Self::ResumeRequest(inner) => &inner.signature,
            Self::ResumeResponse(inner) => &inner.signature,
            Self::Generic(inner) => &inner.signature,
            Self::Batch(inner) => &inner.signature,
            Self::Ack(inner) => &inner.signature,
            Self::Heartbeat(inner) => &inner.signature,
            Self::Close(inner) => &inner.signature,
            Self::Error(inner) => &inner.signature,
        }
    }

    /// Replace the attached signature.
    pub fn set_signature(&mut self, signature: Signature) {
        match self {
            Self::ConnectRequest(inner) => inner.signature = signature,
            Self::ConnectResponse(inner) => inner.signature = signature,
            Self::ResumeRequest(inner) => inner.signature = signature,
            Self::ResumeResponse(inner) => inner.signature = signature,
            Self::Generic(inner) => inner.signature = signature,
            Self::Batch(inner) => inner.signature = signature,
            Self::Ack(inner) => inner.signature = signature,
            Self::Heartbeat(inner) => inner.signature = signature,
            Self::Close(inner) => inner.signature = signature,
            Self::Error(inner) => inner.signature = signature,
        }
    }

    /// Routing hint flags mirrored from the body.
    #[must_use]
    pub fn flags_hint(&self) -> FrameFlags {
        let mut flags = FrameFlags::empty();
        match self {
            Self::ConnectRequest(inner) => {
                if inner.registration_flag {
                    flags |= FrameFlags::REGISTRATION;
                }
            },
            Self::ConnectResponse(inner) => {
                if inner.ephemeral_pubkey.is_some() {
                    flags |= FrameFlags::REGISTRATION;
                }
            },
            Self::Generic(inner) => {
                if inner.priority > 0 {
                    flags |= FrameFlags::PRIORITY;
                }
            },
            _ => {},
        }
        flags
    }

    /// Semantic validation beyond what serde enforces.
    ///
    /// Called by [`Message::decode`]; also usable before signing to catch
    /// locally-constructed nonsense early.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::ConnectResponse(inner) => inner.validate(),
            Self::ResumeResponse(inner) => inner.validate(),
            Self::Close(inner) => inner.validate(),
            Self::Error(inner) => {
                if inner.message.is_empty() {
                    return Err(ProtocolError::InvalidField {
                        field: "message",
                        reason: "must be non-empty",
                    });
                }
                Ok(())
            },
            _ => Ok(()),
        }
    }

    /// Encode body to buffer (zero-allocation)
    ///
    /// Serializes only the inner struct, NOT the variant tag. The frame
    /// header's kind field already identifies the body type.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::CborEncode`] if serialization fails.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let mut writer = dst.writer();

        match self {
            Self::ConnectRequest(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::ConnectResponse(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::ResumeRequest(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::ResumeResponse(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Generic(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Batch(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Ack(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Heartbeat(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Close(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Error(inner) => ciborium::ser::into_writer(inner, &mut writer),
        }
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
    }

    /// Decode body from bytes based on kind
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `bytes.len() > MAX_PAYLOAD_SIZE` (1 MiB)
    /// - CBOR deserialization fails
    /// - Semantic validation fails
    ///
    /// # Security
    ///
    /// - **Size Validation First**: The size check happens BEFORE CBOR
    ///   parsing begins. This prevents the CBOR parser from processing
    ///   maliciously large inputs that could exhaust memory or CPU.
    ///
    /// - **No Panics**: every failure mode on attacker-controlled input is a
    ///   returned [`ProtocolError`].
    pub fn decode(kind: MessageKind, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        fn from_cbor<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
            ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
        }

        let message = match kind {
            MessageKind::ConnectRequest => Self::ConnectRequest(from_cbor(bytes)?),
            MessageKind::ConnectResponse => Self::ConnectResponse(from_cbor(bytes)?),
            MessageKind::ResumeRequest => Self::ResumeRequest(from_cbor(bytes)?),
            MessageKind::ResumeResponse => Self::ResumeResponse(from_cbor(bytes)?),
            MessageKind::Generic => Self::Generic(from_cbor(bytes)?),
            MessageKind::Batch => Self::Batch(from_cbor(bytes)?),
            MessageKind::Ack => Self::Ack(from_cbor(bytes)?),
            MessageKind::Heartbeat => Self::Heartbeat(from_cbor(bytes)?),
            MessageKind::Close => Self::Close(from_cbor(bytes)?),
            MessageKind::Error => Self::Error(from_cbor(bytes)?),
        };

        message.validate()?;

        Ok(message)
    }

    /// Convert message into a transport frame
    ///
    /// Encodes the body to CBOR bytes, stamps the kind and routing-hint
    /// flags into a fresh header, and builds a [`Frame`] with automatic
    /// payload-size calculation.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::CborEncode`] if serialization fails
    pub fn into_frame(self) -> Result<Frame> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        let header = FrameHeader::with_flags(self.kind(), self.flags_hint());
        Ok(Frame::new(header, buf))
    }

    /// Parse a message from a raw transport frame
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Kind code is invalid or unsupported
    /// - CBOR deserialization fails
    /// - Body exceeds maximum size
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let kind = frame
            .header
            .kind_enum()
            .ok_or(ProtocolError::InvalidKind(frame.header.kind()))?;
        Self::decode(kind, &frame.payload)
    }
}

impl SignedMessage for Message {
    fn canonical_bytes(&self) -> Result<Vec<u8>> {
        Self::canonical_bytes(self)
    }

    fn signature(&self) -> &Signature {
        Self::signature(self)
    }

    fn set_signature(&mut self, signature: Signature) {
        Self::set_signature(self, signature);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_round_trip() {
        let message = Message::Error(ErrorMessage::new(0x00FF, "test error", true));

        let frame = message.clone().into_frame().expect("should create frame");
        let decoded = Message::from_frame(&frame).expect("should parse message");
        assert_eq!(message, decoded);
    }

    #[test]
    fn reject_empty_error_message() {
        let message = Message::Error(ErrorMessage::new(1, "", false));
        assert!(matches!(message.validate(), Err(ProtocolError::InvalidField { .. })));
    }

    #[test]
    fn nonce_length_bounds() {
        assert!(Nonce::new(vec![0u8; 15]).is_err());
        assert!(Nonce::new(vec![0u8; 16]).is_ok());
        assert!(Nonce::new(vec![0u8; 32]).is_ok());
        assert!(Nonce::new(vec![0u8; 33]).is_err());
    }

    #[test]
    fn client_id_u128_round_trip() {
        let id = ClientId::from_u128(0x0123_4567_89AB_CDEF_0123_4567_89AB_CDEF);
        assert_eq!(id.as_u128(), 0x0123_4567_89AB_CDEF_0123_4567_89AB_CDEF);
    }

    #[test]
    fn canonical_bytes_exclude_signature() {
        let mut message = Message::Error(ErrorMessage::new(7, "boom", false));
        let before = message.canonical_bytes().expect("canonical");

        message.set_signature(Signature::from_bytes(&[0xAB; 64]));
        let after = message.canonical_bytes().expect("canonical");

        assert_eq!(before, after);
    }
}
