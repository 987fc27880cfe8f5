//! Cryptographic envelope and key handling for the CPOR protocol.
//!
//! This crate owns three concerns:
//!
//! - [`provider`]: the [`KeyProvider`] interface the engine signs through.
//!   The engine never touches private key material; software and
//!   hardware-backed stores implement the same two-method surface.
//! - [`envelope`]: signing and verifying messages over their canonical
//!   bytes.
//! - [`sealed`]: the X25519 + HKDF-SHA256 + XChaCha20-Poly1305 sealed box
//!   used by the registration sub-protocol.
//!
//! # Security
//!
//! Verification failure is always a typed error, never a silent success
//! path. Callers must not process a message whose verification failed.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod envelope;
pub mod provider;
pub mod sealed;

use thiserror::Error;

pub use envelope::{sign_message, verify_message};
pub use provider::{KeyProvider, SoftwareKeyProvider};
pub use sealed::{RegistrationEphemeral, SealedEnvelope};

/// Errors from cryptographic operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Signing failed (e.g. a hardware provider refused the operation)
    #[error("signing failed: {0}")]
    SigningFailed(String),

    /// Signature did not verify over the canonical bytes
    #[error("signature verification failed")]
    VerificationFailed,

    /// Canonical bytes could not be produced
    #[error("canonical encoding failed: {0}")]
    Canonical(String),

    /// Sealed-box encryption failed
    #[error("seal failed: {0}")]
    SealFailed(String),

    /// Sealed-box decryption or authentication failed
    #[error("open failed")]
    OpenFailed,

    /// A key or envelope field had the wrong length
    #[error("invalid length for {field}: expected {expected}, got {actual} bytes")]
    InvalidLength {
        /// Offending field
        field: &'static str,
        /// Expected length in bytes
        expected: usize,
        /// Actual length in bytes
        actual: usize,
    },

    /// Decrypted registration material failed validation
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),
}

impl From<cpor_proto::ProtocolError> for CryptoError {
    fn from(err: cpor_proto::ProtocolError) -> Self {
        Self::Canonical(err.to_string())
    }
}

/// Convenient Result type alias for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
