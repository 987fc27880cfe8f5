//! Frame header implementation with zero-copy parsing.
//!
//! The `FrameHeader` is a fixed 16-byte structure that is serialized as raw
//! binary (Big Endian). This lets receivers reject malformed traffic and
//! route frames by kind before touching the CBOR body.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    FrameFlags, MessageKind,
    errors::{ProtocolError, Result},
};

/// Fixed 16-byte frame header (Big Endian network byte order)
///
/// All multi-byte integers are stored in Big Endian format to match network
/// byte order. Fields are stored as raw byte arrays to avoid alignment
/// issues with `#[repr(C, packed)]`.
///
/// # Security Properties
///
/// - **Zero-Copy Safety**: The `#[repr(C, packed)]` layout with `zerocopy`
///   traits ensures that this struct can be safely cast from untrusted
///   network bytes. All 16-byte patterns are valid (no invalid bit
///   patterns), preventing undefined behavior.
///
/// - **Bounded Bodies**: `payload_size` is validated against
///   [`FrameHeader::MAX_PAYLOAD_SIZE`] before any body allocation, so a
///   hostile header cannot trigger memory exhaustion.
///
/// - **No Authentication**: The header itself is unauthenticated; every CBOR
///   body carries an Ed25519 signature over its canonical bytes, which bind
///   the message kind and protocol version.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FrameHeader {
    // Protocol identification (8 bytes: 0-7)
    magic: [u8; 4],           // 0x43504F52 ("CPOR" in ASCII)
    version: u8,              // 0x02 (CPOR-2)
    flags: u8,                // FrameFlags bitfield
    pub(crate) kind: [u8; 2], // u16 message kind code

    // Body metadata (8 bytes: 8-15)
    pub(crate) payload_size: [u8; 4], // u32 CBOR body length
    reserved: [u8; 4],                // must be zero on send, ignored on receive
}

impl FrameHeader {
    /// Size of the serialized header (16 bytes)
    pub const SIZE: usize = 16;

    /// Magic number: "CPOR" in ASCII (0x43504F52)
    pub const MAGIC: u32 = 0x4350_4F52;

    /// Current protocol version (CPOR-2)
    pub const VERSION: u8 = 0x02;

    /// Maximum body size (1 MiB)
    pub const MAX_PAYLOAD_SIZE: u32 = 1024 * 1024;

    /// Create a new header with the specified message kind.
    #[must_use]
    pub fn new(kind: MessageKind) -> Self {
        Self {
            magic: Self::MAGIC.to_be_bytes(),
            version: Self::VERSION,
            flags: 0,
            kind: kind.to_u16().to_be_bytes(),
            payload_size: [0u8; 4],
            reserved: [0u8; 4],
        }
    }

    /// Create a new header with the specified kind and flags.
    #[must_use]
    pub fn with_flags(kind: MessageKind, flags: FrameFlags) -> Self {
        let mut header = Self::new(kind);
        header.flags = flags.to_byte();
        header
    }

    /// Parse header from network bytes (zero-copy, safe)
    ///
    /// This function casts raw bytes directly to a `FrameHeader` reference
    /// using compile-time layout verification from `zerocopy`. No data is
    /// copied.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if:
    /// - Buffer is too short (< 16 bytes)
    /// - Magic number is invalid
    /// - Protocol version is unsupported
    /// - Payload size exceeds maximum
    ///
    /// # Security
    ///
    /// - **Validation Order**: We validate cheapest-to-check properties first
    ///   (size, magic) before more expensive ones (version, payload size).
    ///   This fails fast on garbage data.
    ///
    /// - **No Signature Verification**: This function does NOT verify any
    ///   signature. Headers are structurally valid but not authenticated.
    ///   Signature verification happens on the decoded message.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::FrameTooShort {
                expected: Self::SIZE,
                actual: bytes.len(),
            })?
            .0;

        if u32::from_be_bytes(header.magic) != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic);
        }

        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        let payload_size = u32::from_be_bytes(header.payload_size);
        if payload_size > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_size as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(header)
    }

    /// Serialize header to bytes (zero-copy)
    #[must_use]
    #[allow(clippy::wrong_self_convention)] // Common serialization pattern
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let bytes = IntoBytes::as_bytes(self);
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(bytes);
        arr
    }

    /// Get the magic number
    #[must_use]
    pub fn magic(&self) -> u32 {
        u32::from_be_bytes(self.magic)
    }

    /// Get the protocol version
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Get the frame flags
    #[must_use]
    pub fn flags(&self) -> FrameFlags {
        FrameFlags::from_byte(self.flags)
    }

    /// Set the frame flags
    pub fn set_flags(&mut self, flags: FrameFlags) {
        self.flags = flags.to_byte();
    }

    /// Get the raw message kind code
    #[must_use]
    pub fn kind(&self) -> u16 {
        u16::from_be_bytes(self.kind)
    }

    /// Get the message kind as an enum (if valid)
    #[must_use]
    pub fn kind_enum(&self) -> Option<MessageKind> {
        MessageKind::from_u16(self.kind())
    }

    /// Get the payload size
    #[must_use]
    pub fn payload_size(&self) -> u32 {
        u32::from_be_bytes(self.payload_size)
    }
}

// Manual Debug implementation (can't derive due to packed repr)
impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHeader")
            .field("magic", &format!("{:#010x}", self.magic()))
            .field("version", &self.version())
            .field("flags", &self.flags())
            .field("kind", &format!("{:#06x}", self.kind()))
            .field("payload_size", &self.payload_size())
            .finish_non_exhaustive()
    }
}

// Manual PartialEq implementation (can't derive due to packed repr)
impl PartialEq for FrameHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for FrameHeader {}
