//! Frame type combining header and body bytes.
//!
//! A `Frame` is the transport-layer packet consisting of:
//! - 16-byte raw binary header (Big Endian)
//! - Variable-length raw bytes (already CBOR-encoded)
//!
//! This is a pure data holder (header + bytes). For high-level logic,
//! see `Message::into_frame()` and `Message::from_frame()`.

use bytes::{BufMut, Bytes};

use crate::{
    FrameHeader,
    errors::{ProtocolError, Result},
};

/// Complete protocol frame (transport layer)
///
/// Layout on the wire:
/// `[FrameHeader: 16 bytes, raw binary] + [body: variable bytes]`
///
/// This type holds raw bytes, NOT the `Message` enum. This allows frames to
/// be relayed or buffered for retransmission without deserializing the body.
///
/// # Invariants
///
/// - **Size Consistency**: `payload.len()` MUST match `header.payload_size()`.
///   This invariant is enforced by [`Frame::new`] and verified by
///   [`Frame::decode`].
///
/// - **Size Limit**: `payload.len()` MUST NOT exceed
///   [`FrameHeader::MAX_PAYLOAD_SIZE`] (1 MiB). Violations are rejected
///   during encoding.
///
/// # Security
///
/// This struct provides **structural validity** only. It guarantees:
/// - Valid header format (magic number, version, size limits)
/// - Payload size matches header claim
///
/// It does **NOT** guarantee:
/// - Authentication (the body signature must be verified separately)
/// - CBOR validity (body deserialization happens later)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header (16 bytes)
    pub header: FrameHeader,

    /// Raw body bytes (already CBOR-encoded)
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame with automatic payload_size calculation
    ///
    /// The header's `payload_size` field is automatically set to match the
    /// actual body length, ensuring consistency.
    ///
    /// # Security
    ///
    /// - **Size Enforcement**: The payload size is set automatically, making
    ///   it impossible to create a Frame with mismatched header and body
    ///   sizes. This prevents desynchronization attacks where the header
    ///   claims a different size than the body.
    ///
    /// - **No Validation**: This constructor does NOT validate that body
    ///   size is under [`FrameHeader::MAX_PAYLOAD_SIZE`]. Oversized frames
    ///   will be rejected later during [`Frame::encode`]. This design allows
    ///   constructing frames for testing without artificial size
    ///   restrictions.
    #[must_use]
    pub fn new(mut header: FrameHeader, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();

        #[allow(clippy::cast_possible_truncation)]
        {
            header.payload_size = (payload.len() as u32).to_be_bytes();
        }

        Self { header, payload }
    }

    /// Encode frame into buffer (simple copy, no magic)
    ///
    /// Writes: `[header (16 bytes)] + [body (variable)]`
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::PayloadTooLarge`] if the body exceeds
    /// [`FrameHeader::MAX_PAYLOAD_SIZE`] (1 MiB).
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.payload.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);

        Ok(())
    }

    /// Decode frame from wire format
    ///
    /// Returns a Frame with raw bytes (does NOT deserialize the body).
    /// Use `Message::from_frame()` if you need the high-level enum.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Header parsing fails (invalid magic, version, or size limits)
    /// - Body is truncated (fewer bytes than header claims)
    ///
    /// # Security
    ///
    /// - **Fail Fast**: All validation happens before allocating memory for
    ///   the body. Malformed headers are rejected without copying data.
    ///
    /// - **Exact Size**: We only read exactly `payload_size` bytes from the
    ///   buffer. Trailing data is ignored, preventing buffer over-read.
    ///
    /// - **No Deserialization**: This function does NOT parse CBOR. It only
    ///   validates structural framing. Body deserialization happens later
    ///   with explicit error handling.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = FrameHeader::from_bytes(bytes)?;

        let payload_size = header.payload_size() as usize;
        let total_size = FrameHeader::SIZE + payload_size;

        if bytes.len() < total_size {
            return Err(ProtocolError::FrameTruncated {
                expected: payload_size,
                actual: bytes.len().saturating_sub(FrameHeader::SIZE),
            });
        }

        let payload = Bytes::copy_from_slice(&bytes[FrameHeader::SIZE..total_size]);

        Ok(Self { header: *header, payload })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    impl Arbitrary for Frame {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
            (any::<FrameHeader>(), any::<Vec<u8>>())
                .prop_map(|(header, payload_bytes)| Frame::new(header, payload_bytes))
                .boxed()
        }
    }

    proptest! {
        #[test]
        fn frame_round_trip(frame in any::<Frame>()) {
            let mut wire = Vec::new();
            frame.encode(&mut wire).expect("should encode");

            let parsed = Frame::decode(&wire).expect("should decode");
            prop_assert_eq!(frame.payload, parsed.payload);
        }
    }

    #[test]
    fn frame_with_payload() {
        let header = FrameHeader::new(crate::MessageKind::Heartbeat);

        // Create frame (payload_size set automatically)
        let payload_bytes = vec![1, 2, 3, 4];
        let frame = Frame::new(header, payload_bytes.clone());

        // Verify payload_size was set correctly
        assert_eq!(frame.header.payload_size(), payload_bytes.len() as u32);

        // Encode and decode
        let mut wire = Vec::new();
        frame.encode(&mut wire).expect("should encode");

        let parsed = Frame::decode(&wire).expect("should decode");
        assert_eq!(frame.payload, parsed.payload);
    }

    #[test]
    fn reject_truncated_frame() {
        // Create header claiming 100 bytes of body
        let mut header = FrameHeader::new(crate::MessageKind::Generic);
        header.payload_size = 100u32.to_be_bytes();

        let header_bytes = header.to_bytes();

        // Only provide header, no body
        let result = Frame::decode(&header_bytes);
        assert!(matches!(result, Err(ProtocolError::FrameTruncated { .. })));
    }
}
