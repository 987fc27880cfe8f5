//! Production environment: real monotonic clock, scheduler sleep, OS
//! entropy.

use std::time::{Duration, Instant};

use cpor_core::Environment;
use rand::RngCore;

/// System-backed [`Environment`] for production drivers.
///
/// The simulation counterpart (`SimEnv` in the harness crate) substitutes
/// virtual time and a seeded RNG; protocol code cannot tell the difference.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        // Tokio's clock is the system monotonic clock in production and the
        // controllable clock under `tokio::time::pause` in tests
        tokio::time::Instant::now().into_std()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        rand::rngs::OsRng.fill_bytes(buffer);
    }
}
