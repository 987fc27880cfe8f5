//! Key provider interface.
//!
//! The engine signs through this trait and never sees private key material.
//! [`SoftwareKeyProvider`] keeps the key in process memory; hardware-backed
//! stores (TPM, secure element) implement the same surface and keep the key
//! where it is.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::{CryptoRng, RngCore};

use crate::{CryptoError, Result};

/// Source of signatures for one long-term identity.
///
/// Implementations expose exactly `sign` and the corresponding public key;
/// nothing else about key storage leaks through this boundary.
pub trait KeyProvider: Send + Sync {
    /// Sign the given bytes with the provider's private key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::SigningFailed`] if the backing store refuses
    /// or fails the operation. Software providers are infallible; hardware
    /// providers are not.
    fn sign(&self, data: &[u8]) -> Result<Signature>;

    /// The public half of the provider's key pair.
    fn verifying_key(&self) -> VerifyingKey;
}

/// Key provider backed by an in-memory Ed25519 signing key.
#[derive(Clone)]
pub struct SoftwareKeyProvider {
    signing_key: SigningKey,
}

impl SoftwareKeyProvider {
    /// Create a provider from raw private key bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self { signing_key: SigningKey::from_bytes(bytes) }
    }

    /// Generate a fresh key pair from the given RNG.
    pub fn generate(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Self::from_bytes(&bytes)
    }
}

impl std::fmt::Debug for SoftwareKeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print private key material
        f.debug_struct("SoftwareKeyProvider")
            .field("verifying_key", &self.signing_key.verifying_key())
            .finish_non_exhaustive()
    }
}

impl KeyProvider for SoftwareKeyProvider {
    fn sign(&self, data: &[u8]) -> Result<Signature> {
        self.signing_key
            .try_sign(data)
            .map_err(|e| CryptoError::SigningFailed(e.to_string()))
    }

    fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}
