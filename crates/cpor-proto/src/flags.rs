//! Frame flags for the CPOR protocol.
//!
//! Flags are routing hints mirrored from the CBOR body so that relays can
//! make coarse decisions without deserializing the payload.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Frame feature flags (8 bits)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct FrameFlags: u8 {
        /// Frame participates in the registration sub-protocol
        const REGISTRATION = 0b0000_0001;

        /// High priority delivery
        const PRIORITY = 0b0000_0010;

        /// Reserved for future use
        const RESERVED = 0b1000_0000;
    }
}

impl FrameFlags {
    /// Create flags from raw byte value
    ///
    /// This function is **infallible** because `bitflags` represents flags as
    /// a simple `u8` wrapper. All 256 possible byte values are valid -
    /// unknown bits are preserved but ignored during flag checks.
    ///
    /// # Security
    ///
    /// - **No Validation Required**: Unlike enums, flag parsing cannot fail.
    ///   An attacker can set reserved bits, but this has no effect on
    ///   behavior since reserved bits are never checked.
    ///
    /// - **Forward Compatibility**: Future protocol versions can define new
    ///   flags in currently-reserved bits. Old clients will preserve but
    ///   ignore them.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        Self::from_bits_retain(byte)
    }

    /// Convert to raw byte value
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        self.bits()
    }
}

impl Default for FrameFlags {
    fn default() -> Self {
        Self::empty()
    }
}
