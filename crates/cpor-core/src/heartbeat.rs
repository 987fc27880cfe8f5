//! Idle-period liveness probing.
//!
//! A probe is due once no traffic has moved in either direction for the
//! configured interval. Every probe carries a freshness marker that the
//! peer must echo; a probe that stays unanswered for
//! `interval * timeout_multiple` is a dead-connection signal, which drives
//! the session into a reconnect attempt (it is not immediately fatal).
//!
//! Freshness is clock-free: matching is on the echoed marker, never on
//! timestamps.

use std::time::{Duration, Instant};

/// Heartbeat timing configuration.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    /// Idle time before a probe is sent
    pub interval: Duration,
    /// Multiple of `interval` an unanswered probe may remain outstanding
    pub timeout_multiple: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(20), timeout_multiple: 3 }
    }
}

/// What the heartbeat manager wants done right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatPoll {
    /// Nothing to do
    Idle,
    /// Send a probe with the given freshness marker
    ProbeDue {
        /// Marker the peer must echo
        heartbeat_id: u64,
    },
    /// The outstanding probe went unanswered; peer presumed dead
    Expired {
        /// Time since the unanswered probe was sent
        elapsed: Duration,
    },
}

/// Per-session heartbeat state.
#[derive(Debug, Clone)]
pub struct HeartbeatState {
    config: HeartbeatConfig,
    /// Last time any traffic moved (either direction)
    last_traffic: Instant,
    /// Probe awaiting its echo: (marker, send time)
    outstanding: Option<(u64, Instant)>,
    /// Next freshness marker; seeded randomly, incremented per probe
    next_id: u64,
}

impl HeartbeatState {
    /// Create heartbeat state.
    ///
    /// `id_seed` seeds the freshness markers; drivers supply a random value
    /// so markers are unpredictable across sessions.
    #[must_use]
    pub fn new(config: HeartbeatConfig, id_seed: u64, now: Instant) -> Self {
        Self { config, last_traffic: now, outstanding: None, next_id: id_seed }
    }

    /// Record traffic in either direction; resets the idle clock.
    pub fn note_traffic(&mut self, now: Instant) {
        self.last_traffic = now;
    }

    /// Decide what to do at time `now`.
    ///
    /// Expiry takes precedence over sending another probe: once a probe has
    /// been outstanding for `interval * timeout_multiple`, the connection
    /// is presumed dead.
    #[must_use]
    pub fn poll(&self, now: Instant) -> HeartbeatPoll {
        if let Some((_, sent_at)) = self.outstanding {
            let elapsed = now.duration_since(sent_at);
            if elapsed >= self.config.interval * self.config.timeout_multiple {
                return HeartbeatPoll::Expired { elapsed };
            }
            return HeartbeatPoll::Idle;
        }

        if now.duration_since(self.last_traffic) >= self.config.interval {
            return HeartbeatPoll::ProbeDue { heartbeat_id: self.next_id };
        }

        HeartbeatPoll::Idle
    }

    /// Record that the probe returned by [`Self::poll`] was sent.
    pub fn probe_sent(&mut self, heartbeat_id: u64, now: Instant) {
        debug_assert_eq!(heartbeat_id, self.next_id);
        self.outstanding = Some((heartbeat_id, now));
        self.next_id = self.next_id.wrapping_add(1);
        self.last_traffic = now;
    }

    /// Process an echoed marker.
    ///
    /// Returns `true` if it matched the outstanding probe. Stale echoes
    /// (after a resume, or duplicated by the network) return `false` and
    /// are ignored by the caller.
    pub fn echo_received(&mut self, heartbeat_id: u64, now: Instant) -> bool {
        match self.outstanding {
            Some((expected, _)) if expected == heartbeat_id => {
                self.outstanding = None;
                self.last_traffic = now;
                true
            },
            _ => false,
        }
    }

    /// Drop any outstanding probe (used when the transport is torn down).
    pub fn reset(&mut self, now: Instant) {
        self.outstanding = None;
        self.last_traffic = now;
    }
}
