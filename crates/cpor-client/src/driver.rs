//! Tokio session driver.
//!
//! One task owns the socket halves and the protocol engine; callers talk to
//! it through a [`SessionHandle`]. The driver pumps four event sources:
//!
//! - commands from the handle (send, batch, close)
//! - frames from a per-connection reader task
//! - a periodic tick (timeout detection, heartbeat emission)
//! - reconnect-with-backoff after transport loss
//!
//! The engine stays authoritative for all protocol state; the driver only
//! executes the actions it returns. Transport loss while established is
//! invisible to callers: the driver reconnects with backoff and resumes,
//! and pending sends simply wait. Only exhausted retries or a protocol
//! violation surface as errors.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpor_core::{
    BackoffPolicy, EnvRandom, Environment, RegistrationPolicy, Session, SessionAction,
    SessionConfig, SessionError, SessionState, Transport, read_frame, write_frame,
};
use cpor_crypto::KeyProvider;
use cpor_proto::{Frame, messages::ClientId};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::handle::{Command, SessionHandle, SessionStatus};

/// Driver configuration.
///
/// Engine timeouts live in [`SessionConfig`]; the fields here govern only
/// the driver loop itself.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Engine configuration (handshake/resume timeouts, heartbeat timing,
    /// credit window, resume buffer capacity)
    pub session: SessionConfig,
    /// Reconnect pacing after transport loss
    pub backoff: BackoffPolicy,
    /// Driver tick period; bounds the detection latency of every
    /// engine-side timeout
    pub tick_interval: Duration,
    /// How long to wait for the peer's acknowledging Close before tearing
    /// down anyway
    pub close_timeout: Duration,
    /// Depth of the verified-payload delivery queue
    pub delivery_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            backoff: BackoffPolicy::default(),
            tick_interval: Duration::from_millis(500),
            close_timeout: Duration::from_secs(5),
            delivery_buffer: 64,
        }
    }
}

/// Connect to `addr` and drive a session until it closes or fails.
///
/// Returns once the handshake (including the registration round, when a
/// policy is supplied) has completed. The driver task keeps running in the
/// background; dropping the returned handle closes the session gracefully.
///
/// # Errors
///
/// Handshake rejection, handshake timeout, and unreachable endpoints
/// surface here; afterwards errors arrive through the handle's operations.
pub async fn connect<T, E>(
    transport: T,
    addr: impl Into<String>,
    client_id: ClientId,
    provider: Arc<dyn KeyProvider>,
    registration: Option<Box<dyn RegistrationPolicy>>,
    config: ClientConfig,
    env: E,
) -> Result<SessionHandle>
where
    T: Transport,
    E: Environment,
{
    let addr = addr.into();
    let (send_half, recv_half) = transport.connect(&addr).await?;

    let now = env.now();
    let rng = Box::new(EnvRandom(env.clone()));
    let mut engine = Session::initiator(
        config.session.clone(),
        provider,
        registration,
        client_id,
        rng,
        now,
    );

    let (command_tx, command_rx) = mpsc::channel(32);
    let (delivery_tx, delivery_rx) = mpsc::channel(config.delivery_buffer.max(1));
    let (status_tx, status_rx) = watch::channel(SessionStatus {
        state: engine.state(),
        credit_available: engine.credit_available(),
        error: None,
    });

    let request = engine.connect(now)?;

    let mut driver = Driver {
        env,
        transport,
        addr,
        engine,
        config,
        send_half: None,
        frames: None,
        reader: None,
        commands: command_rx,
        commands_open: true,
        deliveries: delivery_tx,
        status: status_tx,
        pending: VecDeque::new(),
        close_reply: None,
        close_deadline: None,
        needs_reconnect: false,
    };
    driver.install_connection(send_half, recv_half);
    driver.execute(request).await;
    driver.publish_status();
    tokio::spawn(driver.run());

    let mut handle = SessionHandle {
        commands: command_tx,
        deliveries: delivery_rx,
        status: status_rx,
    };
    handle.wait_established().await?;
    Ok(handle)
}

/// A queued application send awaiting credit (or the end of a resume).
struct PendingSend {
    op: PendingOp,
    reply: oneshot::Sender<std::result::Result<(), SessionError>>,
}

enum PendingOp {
    Message(Vec<u8>),
    Batch(Vec<Vec<u8>>),
}

enum Event {
    Command(Option<Command>),
    Frame(Option<io::Result<Frame>>),
    Tick,
}

struct Driver<T: Transport, E: Environment> {
    env: E,
    transport: T,
    addr: String,
    engine: Session,
    config: ClientConfig,

    send_half: Option<T::SendStream>,
    frames: Option<mpsc::Receiver<io::Result<Frame>>>,
    reader: Option<JoinHandle<()>>,

    commands: mpsc::Receiver<Command>,
    commands_open: bool,
    deliveries: mpsc::Sender<Vec<u8>>,
    status: watch::Sender<SessionStatus>,

    pending: VecDeque<PendingSend>,
    close_reply: Option<oneshot::Sender<()>>,
    close_deadline: Option<Instant>,
    needs_reconnect: bool,
}

impl<T: Transport, E: Environment> Driver<T, E> {
    async fn run(mut self) {
        loop {
            if self.engine.is_terminal() {
                break;
            }
            if self.needs_reconnect {
                self.reconnect().await;
                self.publish_status();
                continue;
            }

            let event = {
                let frames = self.frames.as_mut();
                tokio::select! {
                    command = self.commands.recv(), if self.commands_open => {
                        Event::Command(command)
                    },
                    frame = Self::next_frame(frames) => Event::Frame(frame),
                    () = self.env.sleep(self.config.tick_interval) => Event::Tick,
                }
            };

            match event {
                Event::Command(None) => {
                    // Every handle is gone; wind the session down
                    self.commands_open = false;
                    self.close_session("handle dropped").await;
                },
                Event::Command(Some(command)) => self.handle_command(command).await,
                Event::Frame(Some(Ok(frame))) => self.handle_frame(&frame).await,
                Event::Frame(Some(Err(e))) => self.note_transport_loss(&e.to_string()),
                Event::Frame(None) => self.note_transport_loss("frame stream ended"),
                Event::Tick => self.handle_tick().await,
            }
            self.publish_status();
        }
        self.finish();
    }

    /// Resolve the next inbound frame, or park forever while disconnected.
    async fn next_frame(
        frames: Option<&mut mpsc::Receiver<io::Result<Frame>>>,
    ) -> Option<io::Result<Frame>> {
        match frames {
            Some(frames) => frames.recv().await,
            None => std::future::pending().await,
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send { payload, reply } => {
                self.pending.push_back(PendingSend { op: PendingOp::Message(payload), reply });
                self.flush_pending().await;
            },
            Command::SendBatch { payloads, reply } => {
                self.pending.push_back(PendingSend { op: PendingOp::Batch(payloads), reply });
                self.flush_pending().await;
            },
            Command::Close { reason, reply } => {
                self.close_reply = Some(reply);
                self.close_session(&reason).await;
            },
        }
    }

    async fn close_session(&mut self, reason: &str) {
        let now = self.env.now();
        match self.engine.close(reason, now) {
            Ok(actions) => {
                self.execute(actions).await;
                if self.engine.state() == SessionState::Closing {
                    self.close_deadline = Some(now + self.config.close_timeout);
                }
            },
            Err(e) => tracing::debug!(error = %e, "close not possible"),
        }
        // Nothing queued can complete once teardown has begun
        self.fail_pending(&SessionError::Closed);
    }

    async fn handle_frame(&mut self, frame: &Frame) {
        let now = self.env.now();
        match self.engine.handle_frame(frame, now) {
            Ok(actions) => {
                self.execute(actions).await;
                // An ack or a completed resume may have freed credit
                self.flush_pending().await;
            },
            Err(e) if e.is_fatal() => self.fail_pending(&e),
            Err(_) => {
                // Frame-local rejection; the engine already logged it
            },
        }
    }

    async fn handle_tick(&mut self) {
        let now = self.env.now();

        if let Some(deadline) = self.close_deadline {
            if self.engine.state() == SessionState::Closing && now >= deadline {
                tracing::debug!("close acknowledgment never arrived, tearing down");
                self.engine.abort();
                self.drop_transport();
                return;
            }
        }

        let actions = self.engine.tick(now);
        self.execute(actions).await;
    }

    /// Try to move queued sends into the engine.
    ///
    /// Stops at the first backpressure boundary (no credit, resume in
    /// progress); later events re-run this. Entries whose caller timed out
    /// are discarded without consuming a counter or credit.
    async fn flush_pending(&mut self) {
        loop {
            // Anything but steady state queues: a resume in flight, and
            // teardown fails the queue elsewhere
            if self.engine.state() != SessionState::Established {
                break;
            }
            if self.engine.credit_available() == 0 {
                break;
            }
            let Some(entry) = self.pending.pop_front() else { break };
            if entry.reply.is_closed() {
                continue;
            }

            let now = self.env.now();
            let result = match entry.op {
                PendingOp::Message(payload) => self.engine.send(payload, now),
                PendingOp::Batch(payloads) => self.engine.send_batch(payloads, now),
            };
            match result {
                Ok(actions) => {
                    let _ = entry.reply.send(Ok(()));
                    if !self.execute(actions).await {
                        break;
                    }
                },
                Err(e) => {
                    let fatal = e.is_fatal();
                    let _ = entry.reply.send(Err(e.clone()));
                    if fatal {
                        self.fail_pending(&e);
                        break;
                    }
                },
            }
        }
    }

    /// Execute engine actions. Returns `false` if the transport was lost
    /// while writing; buffered frames are replayed after the next resume,
    /// so skipped writes are safe.
    async fn execute(&mut self, actions: Vec<SessionAction>) -> bool {
        let mut alive = true;
        for action in actions {
            match action {
                SessionAction::SendFrame(frame) => {
                    if !alive {
                        continue;
                    }
                    if let Err(e) = self.write(&frame).await {
                        self.note_transport_loss(&e.to_string());
                        alive = false;
                    }
                },
                SessionAction::Deliver(payload) => {
                    // Fails only when the caller dropped the receive side
                    let _ = self.deliveries.send(payload).await;
                },
                SessionAction::Reconnect { reason } => {
                    tracing::debug!(reason, "engine requested reconnect");
                    self.drop_transport();
                    self.needs_reconnect = true;
                    alive = false;
                },
                SessionAction::Close { reason } => {
                    tracing::debug!(reason, "engine requested transport close");
                    self.drop_transport();
                    alive = false;
                },
            }
        }
        alive
    }

    async fn write(&mut self, frame: &Frame) -> io::Result<()> {
        match self.send_half.as_mut() {
            Some(send) => write_frame(send, frame).await,
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "transport is down")),
        }
    }

    /// Record transport loss and let the engine decide what it means.
    fn note_transport_loss(&mut self, reason: &str) {
        tracing::debug!(reason, "transport lost");
        self.drop_transport();
        let now = self.env.now();
        let actions = self.engine.on_transport_lost(now);
        // The loss paths only ever yield a transport close, already done
        debug_assert!(
            actions
                .iter()
                .all(|action| matches!(action, SessionAction::Close { .. }))
        );
        self.needs_reconnect = self.engine.state() == SessionState::Resuming;
    }

    /// Reconnect with backoff, then ask the engine to resume.
    ///
    /// Commands stall while this runs; queued sends would be refused during
    /// a resume anyway. Gives up when the backoff policy is exhausted,
    /// failing the session with a connection error.
    async fn reconnect(&mut self) {
        self.needs_reconnect = false;
        let mut attempt = 0;
        loop {
            if self.engine.is_terminal() {
                return;
            }
            let Some(delay) = self.config.backoff.delay(attempt) else {
                self.engine.transport_failed("reconnect attempts exhausted");
                let error = self
                    .engine
                    .last_error()
                    .cloned()
                    .unwrap_or(SessionError::Closed);
                self.fail_pending(&error);
                return;
            };
            attempt += 1;
            self.env.sleep(delay).await;

            let (send_half, recv_half) = match self.transport.connect(&self.addr).await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::debug!(error = %e, attempt, "reconnect attempt failed");
                    continue;
                },
            };
            self.install_connection(send_half, recv_half);

            let now = self.env.now();
            let actions = match self.engine.resume(now) {
                Ok(actions) => actions,
                Err(e) => {
                    tracing::debug!(error = %e, "resume not possible");
                    return;
                },
            };
            if self.execute(actions).await {
                tracing::debug!(attempt, "reconnected, resume requested");
                return;
            }
            // The fresh connection died under the resume request; retry
        }
    }

    fn install_connection(&mut self, send_half: T::SendStream, recv_half: T::RecvStream) {
        self.drop_transport();
        let (frames, reader) = Self::spawn_reader(recv_half);
        self.send_half = Some(send_half);
        self.frames = Some(frames);
        self.reader = Some(reader);
    }

    fn drop_transport(&mut self) {
        self.send_half = None;
        self.frames = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    /// One reader task per connection; frames arrive over a channel so the
    /// main select loop never cancels a partially-read frame.
    fn spawn_reader(
        mut recv_half: T::RecvStream,
    ) -> (mpsc::Receiver<io::Result<Frame>>, JoinHandle<()>) {
        let (frame_tx, frame_rx) = mpsc::channel(16);
        let reader = tokio::spawn(async move {
            loop {
                match read_frame(&mut recv_half).await {
                    Ok(frame) => {
                        if frame_tx.send(Ok(frame)).await.is_err() {
                            return;
                        }
                    },
                    Err(e) => {
                        let _ = frame_tx.send(Err(e)).await;
                        return;
                    },
                }
            }
        });
        (frame_rx, reader)
    }

    fn fail_pending(&mut self, error: &SessionError) {
        while let Some(entry) = self.pending.pop_front() {
            let _ = entry.reply.send(Err(error.clone()));
        }
    }

    fn publish_status(&self) {
        let status = SessionStatus {
            state: self.engine.state(),
            credit_available: self.engine.credit_available(),
            error: self.engine.last_error().cloned(),
        };
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    fn finish(mut self) {
        let error = self.engine.last_error().cloned().unwrap_or(SessionError::Closed);
        self.fail_pending(&error);
        // Publish the terminal status before releasing a waiting close(),
        // so the caller observes the final state as soon as it resumes
        self.publish_status();
        if let Some(reply) = self.close_reply.take() {
            let _ = reply.send(());
        }
        self.drop_transport();
        tracing::debug!(state = ?self.engine.state(), "session driver finished");
        // Dropping the delivery sender ends the handle's receive stream
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use cpor_crypto::SoftwareKeyProvider;
    use tokio::io::{ReadHalf, WriteHalf};

    use super::*;
    use crate::{ClientError, SystemEnv};

    /// Transport whose endpoint is permanently unreachable.
    struct UnreachableTransport;

    #[async_trait]
    impl Transport for UnreachableTransport {
        type SendStream = WriteHalf<tokio::io::DuplexStream>;
        type RecvStream = ReadHalf<tokio::io::DuplexStream>;

        async fn connect(&self, _addr: &str) -> io::Result<(Self::SendStream, Self::RecvStream)> {
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "nothing listening"))
        }

        async fn accept(&self) -> io::Result<(Self::SendStream, Self::RecvStream)> {
            Err(io::Error::new(io::ErrorKind::Unsupported, "connect-only transport"))
        }
    }

    #[tokio::test]
    async fn connect_surfaces_unreachable_endpoint() {
        let result = connect(
            UnreachableTransport,
            "nowhere:443",
            ClientId::from_u128(1),
            Arc::new(SoftwareKeyProvider::from_bytes(&[1u8; 32])),
            None,
            ClientConfig::default(),
            SystemEnv,
        )
        .await;

        assert!(matches!(result, Err(ClientError::Io(_))));
    }

    /// Transport that connects but whose peer never answers.
    struct SilentPeer;

    #[async_trait]
    impl Transport for SilentPeer {
        type SendStream = WriteHalf<tokio::io::DuplexStream>;
        type RecvStream = ReadHalf<tokio::io::DuplexStream>;

        async fn connect(&self, _addr: &str) -> io::Result<(Self::SendStream, Self::RecvStream)> {
            let (local, peer) = tokio::io::duplex(4096);
            // Keep the peer end alive so the connection stays open
            tokio::spawn(async move {
                let mut peer = peer;
                let mut sink = Vec::new();
                let _ = tokio::io::AsyncReadExt::read_to_end(&mut peer, &mut sink).await;
            });
            let (recv, send) = tokio::io::split(local);
            Ok((send, recv))
        }

        async fn accept(&self) -> io::Result<(Self::SendStream, Self::RecvStream)> {
            Err(io::Error::new(io::ErrorKind::Unsupported, "connect-only transport"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connect_times_out_against_a_silent_peer() {
        let config = ClientConfig {
            session: SessionConfig {
                handshake_timeout: Duration::from_secs(2),
                ..SessionConfig::default()
            },
            tick_interval: Duration::from_millis(100),
            ..ClientConfig::default()
        };

        let result = connect(
            SilentPeer,
            "silent:443",
            ClientId::from_u128(2),
            Arc::new(SoftwareKeyProvider::from_bytes(&[2u8; 32])),
            None,
            config,
            SystemEnv,
        )
        .await;

        match result {
            Err(ClientError::Session(SessionError::HandshakeTimeout { .. })) => {},
            other => panic!("expected handshake timeout, got {other:?}"),
        }
    }
}
