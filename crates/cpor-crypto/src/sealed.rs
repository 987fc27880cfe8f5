//! Sealed box for the registration sub-protocol.
//!
//! The server hands out a session-scoped X25519 ephemeral public key; the
//! client seals its long-term Ed25519 public key to it and sends the result
//! back inside the second handshake round. Construction:
//!
//! - X25519 ECDH between a fresh sender ephemeral and the recipient key
//! - HKDF-SHA256 over the shared secret (salted with both public keys)
//! - XChaCha20-Poly1305 AEAD with a random 24-byte nonce
//!
//! The recipient ephemeral lives exactly as long as one registration
//! attempt; compromise of a long-term key never exposes past registrations.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use hkdf::Hkdf;
use rand::{CryptoRng, RngCore};
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::{CryptoError, Result};

/// Wire size of an X25519 public key.
const X25519_KEY_LEN: usize = 32;

/// Wire size of the XChaCha20-Poly1305 nonce.
const NONCE_LEN: usize = 24;

/// HKDF info string binding derived keys to this protocol use.
const HKDF_INFO: &[u8] = b"cpor-2 registration seal";

/// Derive the AEAD key for a (sender, recipient) key agreement.
fn derive_key(
    shared_secret: &[u8; 32],
    sender_public: &[u8; 32],
    recipient_public: &[u8; 32],
) -> [u8; 32] {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(sender_public);
    salt[32..].copy_from_slice(recipient_public);

    let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared_secret);
    let mut key = [0u8; 32];
    // Expand cannot fail for a 32-byte output with SHA-256.
    #[allow(clippy::expect_used)]
    hkdf.expand(HKDF_INFO, &mut key).expect("32 bytes is a valid HKDF-SHA256 output length");
    key
}

/// Session-scoped recipient key pair for one registration attempt.
///
/// Generated by the side that will *receive* a sealed envelope (the server).
/// The public half travels in `ConnectResponse.ephemeral_pubkey`.
pub struct RegistrationEphemeral {
    secret: StaticSecret,
    public: PublicKey,
}

impl RegistrationEphemeral {
    /// Generate a fresh ephemeral key pair.
    pub fn generate(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        let secret = StaticSecret::random_from_rng(rng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Public key bytes to advertise to the peer.
    #[must_use]
    pub fn public_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Open a sealed envelope addressed to this ephemeral key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::OpenFailed`] if authentication fails - a
    /// tampered envelope, a different recipient, or a replay against a new
    /// ephemeral all land here indistinguishably.
    pub fn open(&self, envelope: &SealedEnvelope) -> Result<Vec<u8>> {
        let sender_public = PublicKey::from(envelope.ephemeral_pubkey);
        let shared = self.secret.diffie_hellman(&sender_public);
        let key = derive_key(shared.as_bytes(), &envelope.ephemeral_pubkey, &self.public.to_bytes());

        let cipher = XChaCha20Poly1305::new((&key).into());
        cipher
            .decrypt(XNonce::from_slice(&envelope.nonce), envelope.ciphertext.as_slice())
            .map_err(|_| CryptoError::OpenFailed)
    }
}

impl std::fmt::Debug for RegistrationEphemeral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret half
        f.debug_struct("RegistrationEphemeral").field("public", &self.public).finish_non_exhaustive()
    }
}

/// A sealed payload addressed to an ephemeral recipient key.
///
/// Wire form (in `ConnectRequest.client_metadata`):
/// `[sender ephemeral pubkey: 32][nonce: 24][ciphertext: rest]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedEnvelope {
    /// Sender's one-shot X25519 public key
    pub ephemeral_pubkey: [u8; 32],
    /// AEAD nonce
    pub nonce: [u8; 24],
    /// AEAD ciphertext (plaintext + 16-byte tag)
    pub ciphertext: Vec<u8>,
}

impl SealedEnvelope {
    /// Seal `plaintext` to the recipient's ephemeral public key.
    ///
    /// A fresh sender ephemeral and nonce are drawn from `rng` for every
    /// call; sealing the same plaintext twice yields unrelated envelopes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::SealFailed`] if AEAD encryption fails.
    pub fn seal(
        recipient_public: &[u8; 32],
        plaintext: &[u8],
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<Self> {
        let sender_secret = StaticSecret::random_from_rng(&mut *rng);
        let sender_public = PublicKey::from(&sender_secret);

        let shared = sender_secret.diffie_hellman(&PublicKey::from(*recipient_public));
        let key = derive_key(shared.as_bytes(), &sender_public.to_bytes(), recipient_public);

        let mut nonce = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut nonce);

        let cipher = XChaCha20Poly1305::new((&key).into());
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|e| CryptoError::SealFailed(e.to_string()))?;

        Ok(Self { ephemeral_pubkey: sender_public.to_bytes(), nonce, ciphertext })
    }

    /// Serialize for transport.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(X25519_KEY_LEN + NONCE_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.ephemeral_pubkey);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse from transport bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidLength`] if the buffer cannot contain a
    /// key, a nonce, and a non-empty ciphertext.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() <= X25519_KEY_LEN + NONCE_LEN {
            return Err(CryptoError::InvalidLength {
                field: "sealed_envelope",
                expected: X25519_KEY_LEN + NONCE_LEN + 1,
                actual: bytes.len(),
            });
        }

        let mut ephemeral_pubkey = [0u8; X25519_KEY_LEN];
        ephemeral_pubkey.copy_from_slice(&bytes[..X25519_KEY_LEN]);

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[X25519_KEY_LEN..X25519_KEY_LEN + NONCE_LEN]);

        Ok(Self {
            ephemeral_pubkey,
            nonce,
            ciphertext: bytes[X25519_KEY_LEN + NONCE_LEN..].to_vec(),
        })
    }
}
