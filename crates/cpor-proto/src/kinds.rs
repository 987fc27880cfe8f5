//! Message kind codes for CPOR frames.
//!
//! Kind codes identify the message carried in a frame's CBOR body. They are
//! organized into ranges by functionality so routing code can make coarse
//! decisions without deserializing the body.
//!
//! # Kind Ranges
//!
//! - `0x0000-0x000F`: Connection lifecycle (handshake, resume)
//! - `0x0010-0x001F`: Sequenced application traffic
//! - `0x0020-0x002F`: Liveness and teardown
//! - `0x00FF`: Error

use serde_repr::{Deserialize_repr, Serialize_repr};

/// Frame message kinds
///
/// Each kind determines how the CBOR body is interpreted. The kind is bound
/// into every message's canonical signing bytes, so a signature produced for
/// one kind can never verify for another.
///
/// # Representation
///
/// Kinds are serialized as Big Endian `u16` values in the frame header.
/// The `#[repr(u16)]` ensures stable numeric values for wire compatibility.
///
/// # Security
///
/// - **Unknown Kinds**: `from_u16` returns `None` for unknown values rather
///   than panicking. Frames with unknown kinds must be rejected with
///   [`ProtocolError::InvalidKind`](crate::ProtocolError::InvalidKind).
///
/// - **No Implicit Behavior**: Each kind must be explicitly handled. There is
///   no "default" interpretation for unknown kinds, preventing accidental
///   mishandling of malicious or corrupted frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u16)]
pub enum MessageKind {
    // Connection lifecycle (0x0000-0x000F)
    /// Initial handshake request
    ConnectRequest = 0x0001,
    /// Server response to ConnectRequest
    ConnectResponse = 0x0002,
    /// Request to resume a previous session
    ResumeRequest = 0x0003,
    /// Response to ResumeRequest
    ResumeResponse = 0x0004,

    // Sequenced application traffic (0x0010-0x001F)
    /// Ordered application message
    Generic = 0x0010,
    /// Batch of application payloads delivered as one sequenced unit
    Batch = 0x0011,
    /// Cumulative acknowledgment of application messages
    Ack = 0x0012,

    // Liveness and teardown (0x0020-0x002F)
    /// Liveness probe / probe response
    Heartbeat = 0x0020,
    /// Graceful close (and close acknowledgment)
    Close = 0x0021,

    /// Error frame
    Error = 0x00FF,
}

impl MessageKind {
    /// Convert to raw u16 value
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Convert from raw u16 value
    ///
    /// Returns `None` if the value doesn't correspond to a known kind.
    ///
    /// # Security
    ///
    /// This function is **total** (defined for all u16 values) and
    /// **infallible**. It returns `Option<Self>` to distinguish between
    /// known and unknown kinds, allowing callers to reject frames with
    /// invalid kinds explicitly.
    ///
    /// Unknown kinds MUST be treated as protocol errors, not silently
    /// ignored.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(Self::ConnectRequest),
            0x0002 => Some(Self::ConnectResponse),
            0x0003 => Some(Self::ResumeRequest),
            0x0004 => Some(Self::ResumeResponse),

            0x0010 => Some(Self::Generic),
            0x0011 => Some(Self::Batch),
            0x0012 => Some(Self::Ack),

            0x0020 => Some(Self::Heartbeat),
            0x0021 => Some(Self::Close),

            0x00FF => Some(Self::Error),

            _ => None,
        }
    }

    /// Whether messages of this kind consume a per-direction sequence counter.
    ///
    /// Only application traffic is sequenced; lifecycle and liveness frames
    /// carry counter snapshots but never advance the counter.
    #[must_use]
    pub const fn is_sequenced(self) -> bool {
        matches!(self, Self::Generic | Self::Batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trip() {
        let kinds = [
            MessageKind::ConnectRequest,
            MessageKind::ConnectResponse,
            MessageKind::ResumeRequest,
            MessageKind::ResumeResponse,
            MessageKind::Generic,
            MessageKind::Batch,
            MessageKind::Ack,
            MessageKind::Heartbeat,
            MessageKind::Close,
            MessageKind::Error,
        ];

        for kind in kinds {
            let value = kind.to_u16();
            let parsed = MessageKind::from_u16(value);
            assert_eq!(Some(kind), parsed);
        }
    }

    #[test]
    fn invalid_kind() {
        assert_eq!(MessageKind::from_u16(0x9999), None);
        assert_eq!(MessageKind::from_u16(0x0000), None);
    }

    #[test]
    fn only_app_traffic_is_sequenced() {
        assert!(MessageKind::Generic.is_sequenced());
        assert!(MessageKind::Batch.is_sequenced());
        assert!(!MessageKind::Ack.is_sequenced());
        assert!(!MessageKind::Heartbeat.is_sequenced());
        assert!(!MessageKind::Close.is_sequenced());
        assert!(!MessageKind::ConnectRequest.is_sequenced());
    }
}
