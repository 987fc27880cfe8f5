//! Async session driver for the CPOR protocol.
//!
//! This crate turns the sans-IO engine from `cpor-core` into a running
//! session on a Tokio runtime. One spawned task owns the transport and the
//! engine; callers hold a [`SessionHandle`]:
//!
//! - [`connect`] dials, handshakes (running the registration sub-protocol
//!   when a policy is supplied), and returns once the session is
//!   established.
//! - [`SessionHandle::send`] suspends while credit is exhausted or a
//!   resume is in progress, bounded by a caller-supplied timeout.
//! - [`SessionHandle::recv`] yields the verified, ordered payload stream
//!   and ends when the session closes or fails.
//! - Transport loss is handled inside the driver: reconnect with backoff,
//!   then resume with gapless replay. Callers only observe
//!   connected / reconnecting / failed through [`SessionHandle::state`].
//!
//! Time and entropy come from the [`cpor_core::Environment`] abstraction:
//! [`SystemEnv`] here for production, the simulation environment from the
//! harness crate for deterministic tests.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod driver;
mod error;
mod handle;
mod system_env;

pub use driver::{ClientConfig, connect};
pub use error::{ClientError, Result};
pub use handle::{SessionHandle, SessionStatus};
pub use system_env::SystemEnv;
