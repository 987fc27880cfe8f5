//! Wire format for the CPOR protocol (CPOR-2).
//!
//! Frames consist of a fixed 16-byte header (zero-copy binary) followed by a
//! variable-length CBOR body. The header carries structural information
//! (kind, body size, routing hints) while the body carries the signed
//! protocol message.
//!
//! Every message body ends with an Ed25519 signature over its canonical
//! bytes: the deterministic CBOR encoding of the message kind, protocol
//! version, and every other field in declared order. The canonical view is
//! exposed separately from frame encoding so the crypto layer can sign and
//! verify without re-deriving field-order rules.
//!
//! # Security
//!
//! All header parsing uses compile-time verified layouts via `zerocopy`. We
//! enforce a 1 MB body limit to prevent memory exhaustion attacks. No "fast
//! paths" that skip validation.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
pub mod flags;
pub mod frame;
pub mod header;
pub mod kinds;
pub mod messages;

pub use ed25519_dalek::{Signature, VerifyingKey};
pub use errors::{ProtocolError, Result};
pub use flags::FrameFlags;
pub use frame::Frame;
pub use header::FrameHeader;
pub use kinds::MessageKind;
pub use messages::{Message, SignedMessage};
