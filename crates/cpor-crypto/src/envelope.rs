//! Signing and verification over canonical message bytes.
//!
//! The wire codec defines each message's canonical bytes (everything except
//! the signature, in fixed order, with kind and protocol version bound in).
//! This module is the only place signatures are produced or checked, so the
//! "sign exactly what you verify" property lives in one spot.

use cpor_proto::SignedMessage;
use ed25519_dalek::{Verifier, VerifyingKey};

use crate::{CryptoError, KeyProvider, Result};

/// Sign a message in place.
///
/// Computes the canonical bytes and replaces the message's signature field.
///
/// # Errors
///
/// Returns an error if canonical encoding or the provider's signing
/// operation fails. On error the message is left unchanged.
pub fn sign_message<M: SignedMessage>(message: &mut M, provider: &dyn KeyProvider) -> Result<()> {
    let canonical = message.canonical_bytes()?;
    let signature = provider.sign(&canonical)?;
    message.set_signature(signature);
    Ok(())
}

/// Verify a message's signature against the given public key.
///
/// # Errors
///
/// Returns [`CryptoError::VerificationFailed`] if the signature does not
/// verify over the canonical bytes. Callers must treat that as a rejected
/// frame - there is no partial-trust outcome.
pub fn verify_message<M: SignedMessage>(message: &M, key: &VerifyingKey) -> Result<()> {
    let canonical = message.canonical_bytes()?;
    key.verify(&canonical, message.signature())
        .map_err(|_| CryptoError::VerificationFailed)
}
