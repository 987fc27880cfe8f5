//! Pluggable registration sub-protocol.
//!
//! When a connect request carries the registration flag, the responder
//! advertises a session-scoped ephemeral key, the initiator seals its
//! long-term public key to it, and the responder opens, validates, and
//! persists the result as the basis for future authentication.
//!
//! The session state machine drives the exchange through exactly one
//! extension point - the [`RegistrationPolicy`] trait - so alternative
//! policies can be substituted without touching the rest of the engine.

use cpor_crypto::{KeyProvider, RegistrationEphemeral, SealedEnvelope};
use ed25519_dalek::VerifyingKey;
use rand::{CryptoRng, RngCore};

use crate::error::{Result, SessionError};

/// Policy hook for the registration key exchange.
///
/// The state machine calls [`begin_registration`](Self::begin_registration)
/// on both sides and [`complete_registration`](Self::complete_registration)
/// on the responder:
///
/// - **Responder** begin: `peer_ephemeral` is `None`; returns the 32-byte
///   ephemeral public key to advertise in the ConnectResponse.
/// - **Initiator** begin: `peer_ephemeral` is the responder's advertised
///   key; returns the sealed proof to carry in the follow-up
///   ConnectRequest's `client_metadata`.
/// - **Responder** complete: opens and validates the proof, yielding the
///   initiator's long-term key. Persistence is the policy's business.
pub trait RegistrationPolicy: Send {
    /// Start a registration attempt. See the trait docs for the role split.
    fn begin_registration(&mut self, peer_ephemeral: Option<&[u8; 32]>) -> Result<Vec<u8>>;

    /// Finish a registration attempt with the initiator's sealed proof.
    fn complete_registration(&mut self, proof: &[u8]) -> Result<VerifyingKey>;
}

/// Default policy: seal the initiator's long-term Ed25519 public key with
/// the X25519 sealed box from `cpor-crypto`.
pub struct SealedKeyRegistration<R> {
    rng: R,
    /// Initiator: the key to register
    local_key: Option<VerifyingKey>,
    /// Responder: ephemeral for the in-flight attempt
    ephemeral: Option<RegistrationEphemeral>,
    /// Responder: the key a completed attempt registered
    registered: Option<VerifyingKey>,
}

impl<R: RngCore + CryptoRng + Send> SealedKeyRegistration<R> {
    /// Initiator-side policy registering `provider`'s public key.
    pub fn initiator(provider: &dyn KeyProvider, rng: R) -> Self {
        Self { rng, local_key: Some(provider.verifying_key()), ephemeral: None, registered: None }
    }

    /// Responder-side policy.
    pub fn responder(rng: R) -> Self {
        Self { rng, local_key: None, ephemeral: None, registered: None }
    }

    /// The key a completed attempt registered (responder side).
    #[must_use]
    pub fn registered_key(&self) -> Option<&VerifyingKey> {
        self.registered.as_ref()
    }
}

impl<R: RngCore + CryptoRng + Send> RegistrationPolicy for SealedKeyRegistration<R> {
    fn begin_registration(&mut self, peer_ephemeral: Option<&[u8; 32]>) -> Result<Vec<u8>> {
        match peer_ephemeral {
            // Initiator: seal our long-term key to the peer's ephemeral
            Some(ephemeral) => {
                let local = self.local_key.as_ref().ok_or_else(|| {
                    SessionError::Registration(
                        "initiator policy has no local key to register".to_string(),
                    )
                })?;
                let envelope =
                    SealedEnvelope::seal(ephemeral, local.as_bytes(), &mut self.rng)
                        .map_err(|e| SessionError::Registration(e.to_string()))?;
                Ok(envelope.to_bytes())
            },
            // Responder: mint a fresh ephemeral and advertise its public half
            None => {
                let ephemeral = RegistrationEphemeral::generate(&mut self.rng);
                let public = ephemeral.public_bytes().to_vec();
                self.ephemeral = Some(ephemeral);
                Ok(public)
            },
        }
    }

    fn complete_registration(&mut self, proof: &[u8]) -> Result<VerifyingKey> {
        let ephemeral = self.ephemeral.take().ok_or_else(|| {
            SessionError::Registration("no registration attempt in progress".to_string())
        })?;

        let envelope = SealedEnvelope::from_bytes(proof)
            .map_err(|e| SessionError::Registration(e.to_string()))?;
        let opened =
            ephemeral.open(&envelope).map_err(|e| SessionError::Registration(e.to_string()))?;

        let key_bytes: [u8; 32] = opened.as_slice().try_into().map_err(|_| {
            SessionError::Registration(format!(
                "registered key has wrong length: {} bytes",
                opened.len()
            ))
        })?;

        let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| {
            SessionError::Registration("registered bytes are not a valid Ed25519 key".to_string())
        })?;

        self.registered = Some(key);
        Ok(key)
    }
}
