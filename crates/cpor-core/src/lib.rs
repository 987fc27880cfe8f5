//! CPOR protocol core logic
//!
//! This crate contains the pure state machine logic for the CPOR protocol.
//! It is completely decoupled from I/O, enabling deterministic testing.
//!
//! # Architecture: "The Hollow Shell"
//!
//! Protocol logic is strictly separated from transport concerns:
//!
//! ```text
//!      ┌────────────────────────────┐
//!      │ cpor-core                  │
//!      │ - Session state machine    │
//!      │ - Sequencing, flow control │
//!      │ - Resume buffer, liveness  │
//!      └────────────────────────────┘
//!         ↓                      ↓
//! ┌────────────────┐  ┌────────────────┐
//! │ cpor-harness   │  │ cpor-client    │
//! │ (Turmoil)      │  │ (Tokio)        │
//! │ - Virtual time │  │ - Real network │
//! │ - Seeded RNG   │  │ - System clock │
//! │ - Fault inject │  │ - Production   │
//! └────────────────┘  └────────────────┘
//! ```
//!
//! # Key Principles
//!
//! - No I/O in core: never call `tokio::spawn` or
//!   `std::time::Instant::now()` directly; time arrives as parameters
//! - Action pattern: state machine methods return actions for the driver
//!   to execute
//! - Deterministic: given the same inputs, produce the same outputs
//!
//! # Modules
//!
//! - [`session`]: the connection lifecycle state machine
//! - [`sequence`]: per-direction counters and replay protection
//! - [`resume`]: bounded buffer of unacknowledged sends
//! - [`credit`]: credit-window flow control accounting
//! - [`heartbeat`]: idle-period liveness probing
//! - [`registration`]: pluggable registration sub-protocol
//! - [`transport`]: transport abstraction and reconnect backoff
//! - [`env`]: environment abstraction (time, RNG)
//! - [`error`]: session error taxonomy

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod credit;
pub mod env;
pub mod error;
pub mod heartbeat;
pub mod registration;
pub mod resume;
pub mod sequence;
pub mod session;
pub mod transport;

pub use credit::CreditWindow;
pub use env::{EnvRandom, Environment, SecureRandom};
pub use error::{Result, SessionError};
pub use heartbeat::{HeartbeatConfig, HeartbeatPoll, HeartbeatState};
pub use registration::{RegistrationPolicy, SealedKeyRegistration};
pub use resume::{ResumeBuffer, ResumeEntry};
pub use sequence::{ReplayGuard, SequenceCounter};
pub use session::{Session, SessionAction, SessionConfig, SessionRole, SessionState};
pub use transport::{BackoffPolicy, Transport, read_frame, write_frame};
