//! Deterministic simulation harness for the CPOR protocol.
//!
//! Everything the engine and driver need from the outside world — time,
//! entropy, a network — is swapped for a simulated twin here:
//!
//! - [`SimEnv`]: Turmoil's virtual clock plus a seeded ChaCha20 RNG
//! - [`SimTransport`]: Turmoil TCP behind the `cpor-core` transport trait
//! - [`Responder`]: a server-side session pump with fault-injection knobs
//!
//! The integration tests in `tests/` run full client/server sessions —
//! handshake, steady-state exchange, disconnect/resume with replay, flow
//! control, heartbeat-driven reconnect, registration — on virtual time, so
//! an eight-second heartbeat scenario finishes in milliseconds and every
//! run is reproducible from its seed.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod responder;
mod sim_env;
mod sim_transport;

pub use responder::{Responder, ResponderConfig};
pub use sim_env::SimEnv;
pub use sim_transport::SimTransport;
