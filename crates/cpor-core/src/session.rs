//! Session lifecycle state machine.
//!
//! This is the composition point of the engine: framing and authentication,
//! sequence/replay enforcement, the resume buffer, credit-window flow
//! control, heartbeats, and the registration sub-protocol all meet here.
//!
//! # Architecture: Action-Based State Machine
//!
//! The state machine follows the action pattern:
//! - Methods accept time as a parameter (no stored clock)
//! - Methods return `Result<Vec<SessionAction>, SessionError>`
//! - Driver code executes actions (send frames, deliver payloads,
//!   reconnect, close)
//!
//! This enables:
//! - Pure state machine logic (no I/O)
//! - Easy testing (no mocking time)
//! - Symmetry (initiator and responder run the same machine)
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐ connect ┌─────────────┐ ok ┌─────────────┐ loss ┌──────────┐
//! │ Init │────────>│ Handshaking │───>│ Established │<────>│ Resuming │
//! └──────┘         └─────────────┘    └─────────────┘      └──────────┘
//!                        │                   │ Close             │
//!                        │ timeout/reject    ↓                   │ reject/
//!                        ↓             ┌─────────┐ ack           │ overflow
//!                   ┌────────┐         │ Closing │──┐            ↓
//!                   │ Failed │         └─────────┘  │       ┌────────┐
//!                   └────────┘              ↓       │       │ Failed │
//!                     (absorbing)      ┌────────┐<──┘       └────────┘
//!                                      │ Closed │
//!                                      └────────┘
//! ```
//!
//! `Failed` is absorbing and reachable from every state on a protocol
//! violation, resume overflow, or unrecoverable crypto failure.
//!
//! # Failure semantics
//!
//! Frame-local errors (decode, verification) reject the frame and leave all
//! session state untouched. Session-level errors mark the session `Failed`
//! before the typed error is returned, so the engine stays authoritative
//! even if the driver mishandles the result. Transport loss is not an
//! error: `Established` moves to `Resuming` and the driver reconnects with
//! backoff.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cpor_proto::{
    Frame, Message, VerifyingKey,
    messages::{
        ClientId, ErrorMessage, Nonce,
        app::{AckMessage, BatchEnvelope, GenericMessage, Heartbeat},
        session::{
            CloseMessage, ConnectRequest, ConnectResponse, ResumeRequest, ResumeResponse,
            STATUS_OK, STATUS_REGISTRATION_PENDING,
        },
    },
};
use cpor_crypto::{KeyProvider, sign_message, verify_message};

use crate::{
    credit::CreditWindow,
    env::SecureRandom,
    error::{Result, SessionError},
    heartbeat::{HeartbeatConfig, HeartbeatPoll, HeartbeatState},
    registration::RegistrationPolicy,
    resume::ResumeBuffer,
    sequence::{ReplayGuard, SequenceCounter},
};

/// Actions returned by the session state machine.
///
/// The driver (client runtime or test harness) executes these:
/// - `SendFrame`: serialize and send the frame over the transport
/// - `Deliver`: hand a verified, ordered application payload to the caller
/// - `Reconnect`: drop the transport and reconnect with backoff, then
///   resume
/// - `Close`: tear down the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Send this frame to the peer
    SendFrame(Frame),

    /// Deliver this payload to the application
    Deliver(Vec<u8>),

    /// Peer presumed dead; reconnect and resume
    Reconnect {
        /// Why the reconnect is needed
        reason: String,
    },

    /// Close the transport with this reason
    Close {
        /// Reason for closing
        reason: String,
    },
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, no handshake yet
    Init,
    /// ConnectRequest sent or registration round in flight
    Handshaking,
    /// Steady-state exchange
    Established,
    /// Transport lost; resume in progress
    Resuming,
    /// Close sent, awaiting the peer's acknowledging Close
    Closing,
    /// Terminal, idempotent
    Closed,
    /// Absorbing failure state; the caller must start a new session
    Failed,
}

impl SessionState {
    /// Whether the session accepts no further operations.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

/// Which end of the session this machine is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Sends the ConnectRequest
    Initiator,
    /// Answers it
    Responder,
}

/// Session configuration.
///
/// Every timeout is independent and caller-configurable.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Timeout for completing the handshake
    pub handshake_timeout: Duration,
    /// Timeout for a sent ResumeRequest to be answered
    pub resume_timeout: Duration,
    /// Heartbeat timing
    pub heartbeat: HeartbeatConfig,
    /// Flow-control window size (fixed at handshake time)
    pub credit_window: u32,
    /// Resume buffer capacity in messages
    pub resume_buffer_capacity: usize,
    /// Nonce length for handshake and resume nonces
    pub nonce_len: usize,
    /// Pin the peer's long-term key instead of trusting the handshake claim
    pub pinned_peer_key: Option<VerifyingKey>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            resume_timeout: Duration::from_secs(15),
            heartbeat: HeartbeatConfig::default(),
            credit_window: 32,
            resume_buffer_capacity: 128,
            nonce_len: 16,
            pinned_peer_key: None,
        }
    }
}

/// The session state machine.
///
/// Owns all per-session mutable state: counters, replay guard, resume
/// buffer, credit window, heartbeat state, and the lifecycle state itself.
/// One send path and one receive path may operate against it, serialized by
/// the driver (the engine itself is single-threaded by construction).
pub struct Session {
    role: SessionRole,
    config: SessionConfig,
    provider: Arc<dyn KeyProvider>,
    registration: Option<Box<dyn RegistrationPolicy>>,
    rng: Box<dyn SecureRandom>,

    state: SessionState,
    terminal_error: Option<SessionError>,

    client_id: ClientId,
    session_id: Option<u64>,
    peer_key: Option<VerifyingKey>,

    send_counter: SequenceCounter,
    recv_guard: ReplayGuard,
    /// Highest cumulative ack received from the peer
    last_peer_ack: u64,

    credit: CreditWindow,
    buffer: ResumeBuffer,
    heartbeat: HeartbeatState,

    /// When the current Handshaking/Resuming wait started
    phase_started_at: Option<Instant>,
    /// Nonce from the first handshake round (reused by the registration
    /// round; round freshness comes from the sealed proof's ephemeral)
    handshake_nonce: Option<Nonce>,
}

impl Session {
    /// Create an initiator-side session.
    ///
    /// If a registration policy is supplied, the connect request will carry
    /// the registration flag and the handshake runs the registration
    /// sub-protocol.
    pub fn initiator(
        config: SessionConfig,
        provider: Arc<dyn KeyProvider>,
        registration: Option<Box<dyn RegistrationPolicy>>,
        client_id: ClientId,
        mut rng: Box<dyn SecureRandom>,
        now: Instant,
    ) -> Self {
        let heartbeat_seed = random_u64(rng.as_mut());
        Self {
            role: SessionRole::Initiator,
            heartbeat: HeartbeatState::new(config.heartbeat, heartbeat_seed, now),
            credit: CreditWindow::new(config.credit_window),
            buffer: ResumeBuffer::new(config.resume_buffer_capacity),
            config,
            provider,
            registration,
            rng,
            state: SessionState::Init,
            terminal_error: None,
            client_id,
            session_id: None,
            peer_key: None,
            send_counter: SequenceCounter::new(),
            recv_guard: ReplayGuard::new(),
            last_peer_ack: 0,
            phase_started_at: None,
            handshake_nonce: None,
        }
    }

    /// Create a responder-side session.
    ///
    /// The driver must assign a session ID with
    /// [`Session::set_session_id`] before feeding the first frame.
    pub fn responder(
        config: SessionConfig,
        provider: Arc<dyn KeyProvider>,
        registration: Option<Box<dyn RegistrationPolicy>>,
        mut rng: Box<dyn SecureRandom>,
        now: Instant,
    ) -> Self {
        let heartbeat_seed = random_u64(rng.as_mut());
        Self {
            role: SessionRole::Responder,
            heartbeat: HeartbeatState::new(config.heartbeat, heartbeat_seed, now),
            credit: CreditWindow::new(config.credit_window),
            buffer: ResumeBuffer::new(config.resume_buffer_capacity),
            config,
            provider,
            registration,
            rng,
            state: SessionState::Init,
            terminal_error: None,
            client_id: ClientId([0u8; 16]),
            session_id: None,
            peer_key: None,
            send_counter: SequenceCounter::new(),
            recv_guard: ReplayGuard::new(),
            last_peer_ack: 0,
            phase_started_at: None,
            handshake_nonce: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// This machine's role.
    #[must_use]
    pub fn role(&self) -> SessionRole {
        self.role
    }

    /// Session ID (after handshake, or pre-assigned on the responder).
    #[must_use]
    pub fn session_id(&self) -> Option<u64> {
        self.session_id
    }

    /// Assign the session ID (responder use: before handling the first
    /// ConnectRequest).
    pub fn set_session_id(&mut self, session_id: u64) {
        self.session_id = Some(session_id);
    }

    /// The peer's authenticated long-term key, once known.
    #[must_use]
    pub fn peer_key(&self) -> Option<&VerifyingKey> {
        self.peer_key.as_ref()
    }

    /// Send credits currently available.
    #[must_use]
    pub fn credit_available(&self) -> u32 {
        self.credit.available()
    }

    /// Messages sent but not yet acknowledged.
    #[must_use]
    pub fn outstanding(&self) -> u32 {
        self.credit.outstanding()
    }

    /// Last application counter accepted from the peer.
    #[must_use]
    pub fn last_received(&self) -> u64 {
        self.recv_guard.last_accepted()
    }

    /// Last application counter assigned to an outbound message.
    #[must_use]
    pub fn last_sent(&self) -> u64 {
        self.send_counter.last()
    }

    /// The error that moved the session into `Failed`, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<&SessionError> {
        self.terminal_error.as_ref()
    }

    /// Whether the session accepts no further operations.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    // --- lifecycle operations -------------------------------------------

    /// Initiator: start the handshake.
    ///
    /// Transitions `Init -> Handshaking` and returns the signed
    /// ConnectRequest to send.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` when not in `Init`, or a crypto error if
    /// signing fails.
    pub fn connect(&mut self, now: Instant) -> Result<Vec<SessionAction>> {
        if self.state != SessionState::Init {
            return Err(SessionError::InvalidState { state: self.state, operation: "connect" });
        }
        if self.role != SessionRole::Initiator {
            return Err(SessionError::InvalidState { state: self.state, operation: "connect" });
        }

        let nonce = self.fresh_nonce()?;
        self.handshake_nonce = Some(nonce.clone());

        let registration = self.registration.is_some();
        let mut request = Message::ConnectRequest(ConnectRequest::new(
            self.client_id,
            self.provider.verifying_key(),
            0,
            nonce,
            registration,
        ));
        sign_message(&mut request, self.provider.as_ref())?;
        let frame = request.into_frame().map_err(SessionError::Decode)?;

        self.state = SessionState::Handshaking;
        self.phase_started_at = Some(now);
        self.heartbeat.note_traffic(now);

        tracing::debug!(registration, "handshake started");

        Ok(vec![SessionAction::SendFrame(frame)])
    }

    /// Graceful close: send a signed Close and await the peer's
    /// acknowledging Close.
    ///
    /// Idempotent once `Closing`/`Closed`.
    pub fn close(&mut self, reason: &str, now: Instant) -> Result<Vec<SessionAction>> {
        match self.state {
            SessionState::Closing | SessionState::Closed => Ok(vec![]),
            SessionState::Failed => Err(SessionError::Closed),
            SessionState::Init => {
                self.state = SessionState::Closed;
                Ok(vec![SessionAction::Close { reason: reason.to_string() }])
            },
            SessionState::Handshaking
            | SessionState::Established
            | SessionState::Resuming => {
                let mut close = Message::Close(CloseMessage::new(
                    reason,
                    self.send_counter.last(),
                    true,
                ));
                sign_message(&mut close, self.provider.as_ref())?;
                let frame = close.into_frame().map_err(SessionError::Decode)?;

                self.state = SessionState::Closing;
                self.heartbeat.note_traffic(now);

                tracing::debug!(reason, "close initiated");

                Ok(vec![SessionAction::SendFrame(frame)])
            },
        }
    }

    /// Force the session closed without the half-close handshake.
    ///
    /// For driver-level teardown (e.g. a close acknowledgment that never
    /// arrives). Idempotent.
    pub fn abort(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Closed;
        }
    }

    /// The transport dropped underneath us.
    ///
    /// `Established` enters `Resuming` (the driver reconnects and calls
    /// [`Session::resume`]); a loss mid-handshake is fatal; a loss while
    /// `Closing` completes the teardown.
    pub fn on_transport_lost(&mut self, now: Instant) -> Vec<SessionAction> {
        match self.state {
            SessionState::Established => {
                self.state = SessionState::Resuming;
                self.phase_started_at = None;
                self.heartbeat.reset(now);
                tracing::debug!("transport lost, entering resume");
                vec![]
            },
            SessionState::Resuming => {
                // Another loss while reconnecting; the driver keeps retrying
                self.phase_started_at = None;
                vec![]
            },
            SessionState::Handshaking => {
                let err = SessionError::Transport("connection lost during handshake".to_string());
                self.state = SessionState::Failed;
                self.terminal_error = Some(err);
                vec![SessionAction::Close { reason: "connection lost during handshake".to_string() }]
            },
            SessionState::Closing => {
                self.state = SessionState::Closed;
                vec![]
            },
            SessionState::Init | SessionState::Closed | SessionState::Failed => vec![],
        }
    }

    /// Driver report: reconnect attempts are exhausted.
    ///
    /// Transport disruptions are retried transparently up to the backoff
    /// policy's limits; once the driver gives up, the session fails with a
    /// connection error for the caller.
    pub fn transport_failed(&mut self, reason: &str) {
        if !self.state.is_terminal() {
            let _ = self.fail(SessionError::Transport(reason.to_string()));
        }
    }

    /// After the driver reconnected: send the signed ResumeRequest.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` when not `Resuming`.
    pub fn resume(&mut self, now: Instant) -> Result<Vec<SessionAction>> {
        if self.state != SessionState::Resuming {
            return Err(SessionError::InvalidState { state: self.state, operation: "resume" });
        }

        let nonce = self.fresh_nonce()?;
        let mut request = Message::ResumeRequest(ResumeRequest::new(
            self.client_id,
            self.recv_guard.last_accepted(),
            nonce,
        ));
        sign_message(&mut request, self.provider.as_ref())?;
        let frame = request.into_frame().map_err(SessionError::Decode)?;

        self.phase_started_at = Some(now);
        tracing::debug!(last_received = self.recv_guard.last_accepted(), "resume requested");

        Ok(vec![SessionAction::SendFrame(frame)])
    }

    /// Send an application payload.
    ///
    /// # Errors
    ///
    /// - [`SessionError::CreditExhausted`] when the window is full: a
    ///   backpressure condition, not a failure; the driver suspends the
    ///   caller and retries after the next acknowledgment.
    /// - [`SessionError::ResumePending`] while a resume is in progress.
    /// - [`SessionError::ResumeOverflow`] (fatal) when the resume buffer is
    ///   at capacity.
    ///
    /// Credit, counter, and buffer are only touched after signing and
    /// encoding fully succeed, so a failed send never corrupts state.
    pub fn send(&mut self, payload: Vec<u8>, now: Instant) -> Result<Vec<SessionAction>> {
        let body = |sequence: u64| Message::Generic(GenericMessage::new(sequence, payload));
        self.send_app_message(body, now)
    }

    /// Send a batch of payloads as one sequenced unit.
    ///
    /// The whole envelope consumes a single counter and a single credit.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Session::send`].
    pub fn send_batch(
        &mut self,
        payloads: Vec<Vec<u8>>,
        now: Instant,
    ) -> Result<Vec<SessionAction>> {
        let body = |sequence: u64| Message::Batch(BatchEnvelope::new(sequence, payloads));
        self.send_app_message(body, now)
    }

    fn send_app_message(
        &mut self,
        body: impl FnOnce(u64) -> Message,
        now: Instant,
    ) -> Result<Vec<SessionAction>> {
        match self.state {
            SessionState::Established => {},
            SessionState::Resuming => return Err(SessionError::ResumePending),
            SessionState::Init | SessionState::Handshaking => {
                return Err(SessionError::InvalidState { state: self.state, operation: "send" });
            },
            SessionState::Closing | SessionState::Closed | SessionState::Failed => {
                return Err(SessionError::Closed);
            },
        }

        if self.credit.available() == 0 {
            return Err(SessionError::CreditExhausted);
        }

        let sequence = self.send_counter.peek_next().map_err(|e| self.fail(e))?;

        let mut message = body(sequence);
        sign_message(&mut message, self.provider.as_ref())?;
        let frame = message.into_frame().map_err(SessionError::Decode)?;

        // Commit only now that the frame fully exists
        self.buffer.push(sequence, frame.clone(), now).map_err(|e| self.fail(e))?;
        self.send_counter.commit(sequence);
        let acquired = self.credit.try_acquire();
        debug_assert!(acquired);
        self.heartbeat.note_traffic(now);

        Ok(vec![SessionAction::SendFrame(frame)])
    }

    /// Periodic driver tick: timeout detection and heartbeat emission.
    ///
    /// Heartbeats run only while `Established`; entering
    /// `Closing`/`Closed`/`Failed` cancels them implicitly.
    pub fn tick(&mut self, now: Instant) -> Vec<SessionAction> {
        match self.state {
            SessionState::Handshaking => {
                if let Some(started) = self.phase_started_at {
                    let elapsed = now.duration_since(started);
                    if elapsed > self.config.handshake_timeout {
                        let _ = self.fail(SessionError::HandshakeTimeout { elapsed });
                        return vec![SessionAction::Close {
                            reason: format!("handshake timeout after {elapsed:?}"),
                        }];
                    }
                }
                vec![]
            },
            SessionState::Resuming => {
                if let Some(started) = self.phase_started_at {
                    let elapsed = now.duration_since(started);
                    if elapsed > self.config.resume_timeout {
                        let _ = self.fail(SessionError::ResumeTimeout { elapsed });
                        return vec![SessionAction::Close {
                            reason: format!("resume timeout after {elapsed:?}"),
                        }];
                    }
                }
                vec![]
            },
            SessionState::Established => match self.heartbeat.poll(now) {
                HeartbeatPoll::Idle => vec![],
                HeartbeatPoll::ProbeDue { heartbeat_id } => {
                    let mut probe = Message::Heartbeat(Heartbeat::probe(
                        heartbeat_id,
                        self.send_counter.last(),
                    ));
                    if let Err(e) = sign_message(&mut probe, self.provider.as_ref()) {
                        tracing::warn!(error = %e, "failed to sign heartbeat probe");
                        return vec![];
                    }
                    match probe.into_frame() {
                        Ok(frame) => {
                            self.heartbeat.probe_sent(heartbeat_id, now);
                            vec![SessionAction::SendFrame(frame)]
                        },
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to encode heartbeat probe");
                            vec![]
                        },
                    }
                },
                HeartbeatPoll::Expired { elapsed } => {
                    tracing::warn!(?elapsed, "heartbeat unanswered, peer presumed dead");
                    self.state = SessionState::Resuming;
                    self.phase_started_at = None;
                    self.heartbeat.reset(now);
                    vec![SessionAction::Reconnect {
                        reason: format!("heartbeat unanswered after {elapsed:?}"),
                    }]
                },
            },
            SessionState::Init
            | SessionState::Closing
            | SessionState::Closed
            | SessionState::Failed => vec![],
        }
    }

    // --- frame handling -------------------------------------------------

    /// Process a frame received from the peer.
    ///
    /// Decode and verification failures reject the frame without touching
    /// session state (the session continues). Sequencing and state
    /// violations are fatal: the session absorbs into `Failed` before the
    /// error is returned.
    ///
    /// # Errors
    ///
    /// See [`SessionError::is_fatal`] for the severity split.
    pub fn handle_frame(&mut self, frame: &Frame, now: Instant) -> Result<Vec<SessionAction>> {
        if self.state.is_terminal() {
            return Err(SessionError::Closed);
        }

        // Frame-local: malformed bytes reject the frame, nothing more
        let message = Message::from_frame(frame).map_err(|e| {
            tracing::warn!(error = %e, "dropping undecodable frame");
            SessionError::Decode(e)
        })?;

        // Frame-local: the engine never processes an unverified message
        self.verify(&message).inspect_err(|e| {
            tracing::warn!(kind = ?message.kind(), error = %e, "dropping unverified frame");
        })?;

        match message {
            Message::ConnectRequest(request) => self.handle_connect_request(request, now),
            Message::ConnectResponse(response) => self.handle_connect_response(response, now),
            Message::ResumeRequest(request) => self.handle_resume_request(&request, now),
            Message::ResumeResponse(response) => self.handle_resume_response(&response, now),
            Message::Generic(generic) => {
                self.accept_app_frame(generic.sequence_counter, now)?;
                let mut actions = vec![SessionAction::Deliver(generic.payload)];
                actions.extend(self.emit_ack()?);
                Ok(actions)
            },
            Message::Batch(batch) => {
                self.accept_app_frame(batch.sequence_counter, now)?;
                let mut actions: Vec<SessionAction> =
                    batch.messages.into_iter().map(SessionAction::Deliver).collect();
                actions.extend(self.emit_ack()?);
                Ok(actions)
            },
            Message::Ack(ack) => self.handle_ack(&ack, now),
            Message::Heartbeat(heartbeat) => self.handle_heartbeat(&heartbeat, now),
            Message::Close(close) => self.handle_close(&close, now),
            Message::Error(error) => self.handle_error(&error),
        }
    }

    fn handle_connect_request(
        &mut self,
        request: ConnectRequest,
        now: Instant,
    ) -> Result<Vec<SessionAction>> {
        if self.role != SessionRole::Responder {
            return Err(self.unexpected(cpor_proto::MessageKind::ConnectRequest));
        }

        let Some(session_id) = self.session_id else {
            // Driver bug, not a peer violation: reject without failing
            return Err(SessionError::InvalidState {
                state: self.state,
                operation: "handle ConnectRequest without a session id",
            });
        };

        match self.state {
            // First round
            SessionState::Init => {
                if request.registration_flag {
                    if request.client_metadata.is_some() {
                        return Err(self.fail(SessionError::ProtocolViolation {
                            reason: "registration proof before an ephemeral was issued"
                                .to_string(),
                        }));
                    }
                    let ephemeral = self.begin_registration_responder()?;

                    let mut response =
                        ConnectResponse::ok(session_id, self.provider.verifying_key(), 0);
                    response.status_code = STATUS_REGISTRATION_PENDING;
                    response.ephemeral_pubkey = Some(ephemeral);
                    let mut message = Message::ConnectResponse(response);
                    sign_message(&mut message, self.provider.as_ref())?;
                    let frame = message.into_frame().map_err(SessionError::Decode)?;

                    self.client_id = request.client_id;
                    self.state = SessionState::Handshaking;
                    self.phase_started_at = Some(now);
                    self.heartbeat.note_traffic(now);

                    tracing::debug!("registration round started");
                    return Ok(vec![SessionAction::SendFrame(frame)]);
                }

                self.client_id = request.client_id;
                self.peer_key = Some(request.client_pubkey);
                self.establish(now);

                let mut message = Message::ConnectResponse(ConnectResponse::ok(
                    session_id,
                    self.provider.verifying_key(),
                    0,
                ));
                sign_message(&mut message, self.provider.as_ref())?;
                let frame = message.into_frame().map_err(SessionError::Decode)?;

                tracing::debug!(session_id, "session established");
                Ok(vec![SessionAction::SendFrame(frame)])
            },

            // Second round: the sealed registration proof
            SessionState::Handshaking => {
                let Some(proof) = request.client_metadata.as_deref() else {
                    return Err(self.fail(SessionError::ProtocolViolation {
                        reason: "registration round without a proof".to_string(),
                    }));
                };
                if request.client_id != self.client_id {
                    return Err(self.fail(SessionError::ProtocolViolation {
                        reason: "client id changed between handshake rounds".to_string(),
                    }));
                }

                let registered = self.complete_registration_responder(proof)?;
                if registered != request.client_pubkey {
                    return Err(self.fail(SessionError::ProtocolViolation {
                        reason: "registered key does not match the claimed key".to_string(),
                    }));
                }

                self.peer_key = Some(registered);
                self.establish(now);

                let mut message = Message::ConnectResponse(ConnectResponse::ok(
                    session_id,
                    self.provider.verifying_key(),
                    0,
                ));
                sign_message(&mut message, self.provider.as_ref())?;
                let frame = message.into_frame().map_err(SessionError::Decode)?;

                tracing::debug!(session_id, "registration completed, session established");
                Ok(vec![SessionAction::SendFrame(frame)])
            },

            _ => Err(self.unexpected(cpor_proto::MessageKind::ConnectRequest)),
        }
    }

    fn handle_connect_response(
        &mut self,
        response: ConnectResponse,
        now: Instant,
    ) -> Result<Vec<SessionAction>> {
        if self.role != SessionRole::Initiator || self.state != SessionState::Handshaking {
            return Err(self.unexpected(cpor_proto::MessageKind::ConnectResponse));
        }

        if let Some(pinned) = self.config.pinned_peer_key {
            if response.server_pubkey != pinned {
                return Err(self.fail(SessionError::ProtocolViolation {
                    reason: "server key does not match the pinned key".to_string(),
                }));
            }
        }

        match response.status_code {
            STATUS_OK => {
                self.session_id = Some(response.session_id);
                self.peer_key = Some(response.server_pubkey);
                self.establish(now);

                tracing::debug!(session_id = response.session_id, "session established");
                Ok(vec![])
            },
            STATUS_REGISTRATION_PENDING => {
                // validate() guarantees the ephemeral is present
                let Some(ephemeral) = response.ephemeral_pubkey else {
                    return Err(self.fail(SessionError::ProtocolViolation {
                        reason: "registration pending without an ephemeral key".to_string(),
                    }));
                };

                let proof = self.begin_registration_initiator(&ephemeral)?;
                let nonce = match self.handshake_nonce.clone() {
                    Some(nonce) => nonce,
                    None => self.fresh_nonce()?,
                };

                let mut request = ConnectRequest::new(
                    self.client_id,
                    self.provider.verifying_key(),
                    0,
                    nonce,
                    true,
                );
                request.client_metadata = Some(proof);
                let mut message = Message::ConnectRequest(request);
                sign_message(&mut message, self.provider.as_ref())?;
                let frame = message.into_frame().map_err(SessionError::Decode)?;

                self.phase_started_at = Some(now);
                self.heartbeat.note_traffic(now);

                tracing::debug!("sending registration proof");
                Ok(vec![SessionAction::SendFrame(frame)])
            },
            status => {
                let reason = response.error_message.unwrap_or_default();
                Err(self.fail(SessionError::HandshakeRejected { status, reason }))
            },
        }
    }

    fn handle_resume_request(
        &mut self,
        request: &ResumeRequest,
        now: Instant,
    ) -> Result<Vec<SessionAction>> {
        if !matches!(self.state, SessionState::Established | SessionState::Resuming) {
            return Err(self.unexpected(cpor_proto::MessageKind::ResumeRequest));
        }
        if request.client_id != self.client_id {
            return Err(self.fail(SessionError::ProtocolViolation {
                reason: "resume request for a different client".to_string(),
            }));
        }

        let acked = request.last_sequence_counter;
        if acked > self.send_counter.last() {
            // The peer claims to have received more than we ever sent
            return Err(self.fail(SessionError::ProtocolViolation {
                reason: format!(
                    "peer reports last received {acked} but only {} were sent",
                    self.send_counter.last()
                ),
            }));
        }

        // Everything at or below the reported counter was delivered
        let purged = self.buffer.acknowledge(acked);
        self.credit.release(purged as u32);
        if acked > self.last_peer_ack {
            self.last_peer_ack = acked;
        }

        let replay = match self.buffer.replay_after(acked, self.send_counter.last()) {
            Ok(replay) => replay,
            Err(e) => {
                let fatal = self.fail(e);
                let mut response = Message::ResumeResponse(ResumeResponse::rejected(
                    2,
                    fatal.to_string(),
                    self.fresh_nonce()?,
                ));
                sign_message(&mut response, self.provider.as_ref())?;
                let frame = response.into_frame().map_err(SessionError::Decode)?;
                // Tell the peer, then tear down; the session is already Failed
                return Ok(vec![SessionAction::SendFrame(frame), SessionAction::Close {
                    reason: fatal.to_string(),
                }]);
            },
        };

        let mut response = Message::ResumeResponse(ResumeResponse::ok(
            self.recv_guard.last_accepted(),
            self.fresh_nonce()?,
        ));
        sign_message(&mut response, self.provider.as_ref())?;
        let frame = response.into_frame().map_err(SessionError::Decode)?;

        let replayed = replay.len();
        let mut actions = Vec::with_capacity(1 + replayed);
        actions.push(SessionAction::SendFrame(frame));
        actions.extend(replay.into_iter().map(SessionAction::SendFrame));

        self.establish(now);
        tracing::debug!(acked, replayed, "resume served");

        Ok(actions)
    }

    fn handle_resume_response(
        &mut self,
        response: &ResumeResponse,
        now: Instant,
    ) -> Result<Vec<SessionAction>> {
        if self.state != SessionState::Resuming {
            return Err(self.unexpected(cpor_proto::MessageKind::ResumeResponse));
        }

        if response.status_code != STATUS_OK {
            return Err(self.fail(SessionError::ResumeRejected {
                status: response.status_code,
                reason: response.error_message.clone().unwrap_or_default(),
            }));
        }

        let acked = response.resume_sequence;
        if acked > self.send_counter.last() {
            return Err(self.fail(SessionError::ProtocolViolation {
                reason: format!(
                    "peer reports last received {acked} but only {} were sent",
                    self.send_counter.last()
                ),
            }));
        }

        let purged = self.buffer.acknowledge(acked);
        self.credit.release(purged as u32);
        if acked > self.last_peer_ack {
            self.last_peer_ack = acked;
        }

        let replay = self
            .buffer
            .replay_after(acked, self.send_counter.last())
            .map_err(|e| self.fail(e))?;

        let replayed = replay.len();
        self.establish(now);
        tracing::debug!(acked, replayed, "resume completed");

        Ok(replay.into_iter().map(SessionAction::SendFrame).collect())
    }

    fn handle_ack(&mut self, ack: &AckMessage, now: Instant) -> Result<Vec<SessionAction>> {
        if self.state != SessionState::Established {
            // Acks racing a close teardown are benign
            if self.state == SessionState::Closing {
                return Ok(vec![]);
            }
            return Err(self.unexpected(cpor_proto::MessageKind::Ack));
        }

        if ack.ack_counter > self.send_counter.last() {
            return Err(self.fail(SessionError::ProtocolViolation {
                reason: format!(
                    "ack {} exceeds last sent {}",
                    ack.ack_counter,
                    self.send_counter.last()
                ),
            }));
        }
        if ack.ack_counter <= self.last_peer_ack {
            return Err(self.fail(SessionError::ProtocolViolation {
                reason: format!(
                    "stale ack {} (already acknowledged through {})",
                    ack.ack_counter, self.last_peer_ack
                ),
            }));
        }

        let purged = self.buffer.acknowledge(ack.ack_counter);
        self.credit.release(purged as u32);
        self.last_peer_ack = ack.ack_counter;
        self.heartbeat.note_traffic(now);

        Ok(vec![])
    }

    fn handle_heartbeat(
        &mut self,
        heartbeat: &Heartbeat,
        now: Instant,
    ) -> Result<Vec<SessionAction>> {
        match self.state {
            SessionState::Established => {},
            // Probes racing a teardown are benign
            SessionState::Closing => return Ok(vec![]),
            _ => return Err(self.unexpected(cpor_proto::MessageKind::Heartbeat)),
        }

        self.heartbeat.note_traffic(now);

        if heartbeat.requires_response {
            let mut echo = Message::Heartbeat(Heartbeat::echo(
                heartbeat,
                self.send_counter.last(),
            ));
            sign_message(&mut echo, self.provider.as_ref())?;
            let frame = echo.into_frame().map_err(SessionError::Decode)?;
            return Ok(vec![SessionAction::SendFrame(frame)]);
        }

        if !self.heartbeat.echo_received(heartbeat.heartbeat_id, now) {
            tracing::debug!(id = heartbeat.heartbeat_id, "ignoring stale heartbeat echo");
        }
        Ok(vec![])
    }

    fn handle_close(&mut self, close: &CloseMessage, _now: Instant) -> Result<Vec<SessionAction>> {
        match self.state {
            SessionState::Established | SessionState::Resuming => {
                // On an intact stream every assigned counter precedes the
                // Close, so a counter beyond our guard means undetected loss.
                if self.state == SessionState::Established
                    && close.final_counter > self.recv_guard.last_accepted()
                {
                    return Err(self.fail(SessionError::ProtocolViolation {
                        reason: format!(
                            "close reports final counter {} but only {} were received",
                            close.final_counter,
                            self.recv_guard.last_accepted()
                        ),
                    }));
                }

                let mut ack = Message::Close(CloseMessage::new(
                    "close acknowledged",
                    self.send_counter.last(),
                    true,
                ));
                sign_message(&mut ack, self.provider.as_ref())?;
                let frame = ack.into_frame().map_err(SessionError::Decode)?;

                self.state = SessionState::Closed;
                tracing::debug!(reason = %close.reason, "peer closed session");

                Ok(vec![SessionAction::SendFrame(frame), SessionAction::Close {
                    reason: format!("peer close: {}", close.reason),
                }])
            },
            // Our close, their acknowledgment (or a simultaneous close)
            SessionState::Closing => {
                self.state = SessionState::Closed;
                Ok(vec![SessionAction::Close {
                    reason: format!("close acknowledged: {}", close.reason),
                }])
            },
            _ => Err(self.unexpected(cpor_proto::MessageKind::Close)),
        }
    }

    fn handle_error(&mut self, error: &ErrorMessage) -> Result<Vec<SessionAction>> {
        tracing::warn!(code = error.error_code, message = %error.message, "peer reported error");
        Err(self.fail(SessionError::Peer {
            code: error.error_code,
            message: error.message.clone(),
        }))
    }

    // --- internals ------------------------------------------------------

    /// Accept an inbound application frame: replay guard, then bookkeeping.
    fn accept_app_frame(&mut self, sequence: u64, now: Instant) -> Result<()> {
        if self.state != SessionState::Established {
            return Err(self.unexpected(cpor_proto::MessageKind::Generic));
        }
        self.recv_guard.accept(sequence).map_err(|e| self.fail(e))?;
        self.heartbeat.note_traffic(now);
        Ok(())
    }

    /// Cumulative ack for everything accepted so far.
    fn emit_ack(&mut self) -> Result<Vec<SessionAction>> {
        let mut ack = Message::Ack(AckMessage::new(
            self.send_counter.last(),
            self.recv_guard.last_accepted(),
        ));
        sign_message(&mut ack, self.provider.as_ref())?;
        let frame = ack.into_frame().map_err(SessionError::Decode)?;
        Ok(vec![SessionAction::SendFrame(frame)])
    }

    /// Pick the verification key for an inbound message and verify it.
    fn verify(&self, message: &Message) -> Result<()> {
        let key = match message {
            // Handshake frames are verified against their claimed key; the
            // claim is bound to an identity by pinning or registration
            Message::ConnectRequest(request) => request.client_pubkey,
            Message::ConnectResponse(response) => {
                self.config.pinned_peer_key.unwrap_or(response.server_pubkey)
            },
            _ => *self.peer_key.as_ref().ok_or_else(|| SessionError::ProtocolViolation {
                reason: "sequenced frame before handshake completed".to_string(),
            })?,
        };
        verify_message(message, &key)?;
        Ok(())
    }

    fn establish(&mut self, now: Instant) {
        self.state = SessionState::Established;
        self.phase_started_at = None;
        self.heartbeat.reset(now);
    }

    /// Absorb into `Failed`, recording the error, and hand it back.
    fn fail(&mut self, error: SessionError) -> SessionError {
        tracing::error!(error = %error, "session failed");
        self.state = SessionState::Failed;
        self.terminal_error = Some(error.clone());
        error
    }

    fn unexpected(&mut self, kind: cpor_proto::MessageKind) -> SessionError {
        self.fail(SessionError::UnexpectedMessage { state: self.state, kind: kind.to_u16() })
    }

    fn fresh_nonce(&mut self) -> Result<Nonce> {
        let mut bytes = vec![0u8; self.config.nonce_len];
        self.rng.fill(&mut bytes);
        Nonce::new(bytes).map_err(SessionError::Decode)
    }

    fn begin_registration_initiator(&mut self, ephemeral: &[u8; 32]) -> Result<Vec<u8>> {
        let Some(policy) = self.registration.as_mut() else {
            return Err(self.fail(SessionError::Registration(
                "peer requested registration but no policy is configured".to_string(),
            )));
        };
        match policy.begin_registration(Some(ephemeral)) {
            Ok(proof) => Ok(proof),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn begin_registration_responder(&mut self) -> Result<[u8; 32]> {
        let Some(policy) = self.registration.as_mut() else {
            return Err(self.fail(SessionError::Registration(
                "client requested registration but no policy is configured".to_string(),
            )));
        };
        let bytes = match policy.begin_registration(None) {
            Ok(bytes) => bytes,
            Err(e) => return Err(self.fail(e)),
        };
        let ephemeral: [u8; 32] = match bytes.as_slice().try_into() {
            Ok(ephemeral) => ephemeral,
            Err(_) => {
                return Err(self.fail(SessionError::Registration(format!(
                    "policy produced a {}-byte ephemeral key",
                    bytes.len()
                ))));
            },
        };
        Ok(ephemeral)
    }

    fn complete_registration_responder(&mut self, proof: &[u8]) -> Result<VerifyingKey> {
        let Some(policy) = self.registration.as_mut() else {
            return Err(self.fail(SessionError::Registration(
                "registration proof without a policy".to_string(),
            )));
        };
        match policy.complete_registration(proof) {
            Ok(key) => Ok(key),
            Err(e) => Err(self.fail(e)),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("session_id", &self.session_id)
            .field("last_sent", &self.send_counter.last())
            .field("last_received", &self.recv_guard.last_accepted())
            .field("outstanding", &self.credit.outstanding())
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

fn random_u64(rng: &mut dyn SecureRandom) -> u64 {
    let mut bytes = [0u8; 8];
    rng.fill(&mut bytes);
    u64::from_be_bytes(bytes)
}
