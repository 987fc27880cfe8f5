//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples driver logic from system resources
//! (time, randomness). This enables:
//!
//! - Deterministic Simulation: the harness provides a virtual clock and
//!   seeded RNG, allowing perfect bug reproduction.
//!
//! - Production Runtime: the client driver uses the real clock and OS
//!   entropy without any code changes to the protocol logic.
//!
//! # Design Philosophy
//!
//! Protocol state machines in `cpor-core` are pure logic. They:
//!
//! - MUST NOT call `std::time::Instant::now()` or `tokio::time::sleep()`
//! - MUST NOT use `rand::thread_rng()` or system entropy directly
//! - MUST accept time and random material as parameters
//!
//! The environment is implemented twice:
//!
//! 1. `SimEnv` (cpor-harness): Turmoil's virtual time and a seeded RNG
//! 2. `SystemEnv` (cpor-client): real system clock and OS entropy
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Determinism: given the same seed, `random_bytes()` produces the same
//!   sequence
//! - Isolation: implementations must not share global state

use std::time::{Duration, Instant};

use rand::{CryptoRng, RngCore};

/// Object-safe handle to a cryptographically secure RNG.
///
/// The session engine draws nonces and heartbeat marker seeds through this
/// trait so it can stay deterministic under test (seeded ChaCha20) and
/// secure in production (OS entropy). Blanket-implemented for every
/// `RngCore + CryptoRng` generator.
pub trait SecureRandom: Send {
    /// Fill `dest` with random bytes.
    fn fill(&mut self, dest: &mut [u8]);
}

impl<T: RngCore + CryptoRng + Send> SecureRandom for T {
    fn fill(&mut self, dest: &mut [u8]) {
        self.fill_bytes(dest);
    }
}

/// Adapter exposing an [`Environment`]'s randomness as a
/// [`SecureRandom`] handle for the session engine.
pub struct EnvRandom<E>(pub E);

impl<E: Environment> SecureRandom for EnvRandom<E> {
    fn fill(&mut self, dest: &mut [u8]) {
        self.0.random_bytes(dest);
    }
}

/// Abstract environment providing time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// 1. Time monotonicity: `now()` never goes backwards
/// 2. RNG quality: `random_bytes()` uses cryptographically secure entropy
///    in production
pub trait Environment: Clone + Send + Sync + 'static {
    /// Returns the current time.
    ///
    /// In simulation this is virtual time; in production it is the real
    /// monotonic clock.
    fn now(&self) -> Instant;

    /// Sleeps for the specified duration.
    ///
    /// - Simulation: advances virtual time instantly (no wall-clock delay)
    /// - Production: yields to the scheduler for the specified duration
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Security
    ///
    /// Production implementations MUST use cryptographically secure
    /// entropy. Simulation implementations use a seeded RNG and MUST log
    /// the seed for reproducibility.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    ///
    /// Convenience for session IDs, heartbeat marker seeds, and request
    /// IDs.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Generates a nonce of the given length.
    fn random_nonce(&self, len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        self.random_bytes(&mut bytes);
        bytes
    }
}
