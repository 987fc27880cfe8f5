//! In-simulation responder peer.
//!
//! A minimal server-side driver for one session: it accepts connections,
//! pumps frames through a responder-role engine, and keeps the session
//! alive across reconnects so resume scenarios work end to end. Fault
//! injection knobs (delayed acks, forced drops, muted heartbeats) exist so
//! tests can provoke exactly the failure they want to observe.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpor_core::{
    EnvRandom, Environment, RegistrationPolicy, Session, SessionAction, SessionConfig,
    read_frame, write_frame,
};
use cpor_crypto::KeyProvider;
use cpor_proto::{Frame, MessageKind};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use turmoil::net::TcpStream;

use crate::{SimEnv, SimTransport};

/// Behavior knobs for the responder.
#[derive(Debug, Clone)]
pub struct ResponderConfig {
    /// Engine configuration for the responder session
    pub session: SessionConfig,
    /// Session ID handed out in the ConnectResponse
    pub session_id: u64,
    /// Pump tick period
    pub tick_interval: Duration,
    /// Hold every acknowledgment back for this long before sending it
    pub ack_delay: Option<Duration>,
    /// Drop the connection right after accepting this application counter
    pub drop_after: Option<u64>,
    /// Swallow heartbeat frames on the first connection, so the peer's
    /// probe goes unanswered
    pub mute_heartbeats_once: bool,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            session_id: 1,
            tick_interval: Duration::from_millis(100),
            ack_delay: None,
            drop_after: None,
            mute_heartbeats_once: false,
        }
    }
}

enum PumpEvent {
    Frame(Option<io::Result<Frame>>),
    Tick,
}

/// Server half of a simulated session.
pub struct Responder {
    env: SimEnv,
    config: ResponderConfig,
    session: Session,
    deliveries: mpsc::UnboundedSender<Vec<u8>>,
    delayed_acks: VecDeque<(Instant, Frame)>,
    connections: u32,
}

impl Responder {
    /// Build a responder session.
    ///
    /// Delivered application payloads go out through `deliveries` in
    /// arrival order; tests drain the channel after the simulation.
    #[must_use]
    pub fn new(
        env: SimEnv,
        provider: Arc<dyn KeyProvider>,
        registration: Option<Box<dyn RegistrationPolicy>>,
        config: ResponderConfig,
        deliveries: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Self {
        let now = env.now();
        let rng = Box::new(EnvRandom(env.clone()));
        let mut session =
            Session::responder(config.session.clone(), provider, registration, rng, now);
        session.set_session_id(config.session_id);
        Self {
            env,
            config,
            session,
            deliveries,
            delayed_acks: VecDeque::new(),
            connections: 0,
        }
    }

    /// Accept and pump connections on `addr` until the session terminates.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind or accept.
    pub async fn serve(mut self, addr: &str) -> io::Result<()> {
        let transport = SimTransport::bind(addr).await?;
        while !self.session.is_terminal() {
            let (send, recv) = cpor_core::Transport::accept(&transport).await?;
            self.connections += 1;
            tracing::debug!(connection = self.connections, "responder accepted");
            self.pump(send, recv).await;
        }
        tracing::debug!(state = ?self.session.state(), "responder finished");
        Ok(())
    }

    /// Pump one connection until it drops or the session ends.
    async fn pump(&mut self, mut send: WriteHalf<TcpStream>, recv: ReadHalf<TcpStream>) {
        let (mut frames, reader) = spawn_reader(recv);
        let mut drop_connection = false;

        while !drop_connection && !self.session.is_terminal() {
            let event = {
                tokio::select! {
                    frame = frames.recv() => PumpEvent::Frame(frame),
                    () = self.env.sleep(self.config.tick_interval) => PumpEvent::Tick,
                }
            };
            match event {
                PumpEvent::Frame(Some(Ok(frame))) => {
                    let now = self.env.now();
                    match self.session.handle_frame(&frame, now) {
                        Ok(actions) => {
                            drop_connection = self.execute(actions, &mut send).await;
                        },
                        Err(e) if e.is_fatal() => break,
                        Err(e) => tracing::debug!(error = %e, "responder rejected frame"),
                    }
                    if let Some(limit) = self.config.drop_after {
                        if self.session.last_received() >= limit {
                            self.config.drop_after = None;
                            drop_connection = true;
                        }
                    }
                },
                // EOF or a broken stream; wait for a reconnect
                PumpEvent::Frame(Some(Err(_)) | None) => {
                    drop_connection = true;
                },
                PumpEvent::Tick => {
                    if self.flush_delayed_acks(&mut send).await {
                        drop_connection = true;
                    } else {
                        let actions = self.session.tick(self.env.now());
                        drop_connection = self.execute(actions, &mut send).await;
                    }
                },
            }
        }

        reader.abort();
        drop(send);
        if !self.session.is_terminal() {
            self.session.on_transport_lost(self.env.now());
        }
    }

    /// Execute engine actions. Returns `true` when the connection should
    /// be dropped (engine said so, a fault knob fired, or a write failed).
    async fn execute(
        &mut self,
        actions: Vec<SessionAction>,
        send: &mut WriteHalf<TcpStream>,
    ) -> bool {
        for action in actions {
            match action {
                SessionAction::SendFrame(frame) => {
                    let kind = frame.header.kind_enum();
                    if self.config.mute_heartbeats_once
                        && self.connections == 1
                        && kind == Some(MessageKind::Heartbeat)
                    {
                        tracing::debug!("muting heartbeat frame");
                        continue;
                    }
                    if kind == Some(MessageKind::Ack) {
                        if let Some(delay) = self.config.ack_delay {
                            self.delayed_acks.push_back((self.env.now() + delay, frame));
                            continue;
                        }
                    }
                    if write_frame(send, &frame).await.is_err() {
                        return true;
                    }
                },
                SessionAction::Deliver(payload) => {
                    let _ = self.deliveries.send(payload);
                },
                // The responder cannot dial out; drop the connection and
                // let the peer come back
                SessionAction::Reconnect { .. } | SessionAction::Close { .. } => return true,
            }
        }
        false
    }

    /// Send every delayed ack that has come due. Returns `true` on write
    /// failure.
    async fn flush_delayed_acks(&mut self, send: &mut WriteHalf<TcpStream>) -> bool {
        let now = self.env.now();
        while self.delayed_acks.front().is_some_and(|(due, _)| *due <= now) {
            if let Some((_, frame)) = self.delayed_acks.pop_front() {
                if write_frame(send, &frame).await.is_err() {
                    return true;
                }
            }
        }
        false
    }
}

/// One reader task per connection, so the pump's select loop never cancels
/// a partially-read frame.
fn spawn_reader(
    mut recv: ReadHalf<TcpStream>,
) -> (mpsc::Receiver<io::Result<Frame>>, JoinHandle<()>) {
    let (frame_tx, frame_rx) = mpsc::channel(16);
    let reader = tokio::spawn(async move {
        loop {
            match read_frame(&mut recv).await {
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
