//! Sequenced application traffic and liveness message bodies.

use ed25519_dalek::Signature;
use serde::{Deserialize, Serialize};

use crate::{
    MessageKind,
    errors::Result,
    messages::{SignedMessage, canonical_tuple, unsigned_signature},
};

/// Ordered application message
///
/// The payload is opaque to the engine; interpretation belongs to the
/// application layer. Each `GenericMessage` consumes one per-direction
/// sequence counter and one flow-control credit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericMessage {
    /// Monotonic per-direction counter
    pub sequence_counter: u64,
    /// Opaque application payload
    pub payload: Vec<u8>,
    /// Delivery priority hint (0 = normal)
    pub priority: u8,
    /// Signature over the canonical bytes
    pub signature: Signature,
}

impl GenericMessage {
    /// Create an unsigned application message.
    #[must_use]
    pub fn new(sequence_counter: u64, payload: Vec<u8>) -> Self {
        Self { sequence_counter, payload, priority: 0, signature: unsigned_signature() }
    }
}

impl SignedMessage for GenericMessage {
    fn canonical_bytes(&self) -> Result<Vec<u8>> {
        canonical_tuple(MessageKind::Generic, &(self.sequence_counter, &self.payload, self.priority))
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn set_signature(&mut self, signature: Signature) {
        self.signature = signature;
    }
}

/// Batch of application payloads delivered as one sequenced unit
///
/// The whole envelope consumes a single sequence counter and a single
/// credit; payloads are delivered upward in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEnvelope {
    /// Monotonic per-direction counter
    pub sequence_counter: u64,
    /// Payloads in delivery order
    pub messages: Vec<Vec<u8>>,
    /// Signature over the canonical bytes
    pub signature: Signature,
}

impl BatchEnvelope {
    /// Create an unsigned batch envelope.
    #[must_use]
    pub fn new(sequence_counter: u64, messages: Vec<Vec<u8>>) -> Self {
        Self { sequence_counter, messages, signature: unsigned_signature() }
    }
}

impl SignedMessage for BatchEnvelope {
    fn canonical_bytes(&self) -> Result<Vec<u8>> {
        canonical_tuple(MessageKind::Batch, &(self.sequence_counter, &self.messages))
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn set_signature(&mut self, signature: Signature) {
        self.signature = signature;
    }
}

/// Cumulative acknowledgment of application messages
///
/// `ack_counter` acknowledges every application message with counter less
/// than or equal to it; accepted acks must be strictly increasing.
/// `sequence_counter` is a snapshot of the sender's own send counter at
/// emission time (informational; acks do not consume counters).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckMessage {
    /// Snapshot of the sender's application send counter
    pub sequence_counter: u64,
    /// Cumulative acknowledged counter
    pub ack_counter: u64,
    /// Signature over the canonical bytes
    pub signature: Signature,
}

impl AckMessage {
    /// Create an unsigned acknowledgment.
    #[must_use]
    pub fn new(sequence_counter: u64, ack_counter: u64) -> Self {
        Self { sequence_counter, ack_counter, signature: unsigned_signature() }
    }
}

impl SignedMessage for AckMessage {
    fn canonical_bytes(&self) -> Result<Vec<u8>> {
        canonical_tuple(MessageKind::Ack, &(self.sequence_counter, self.ack_counter))
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn set_signature(&mut self, signature: Signature) {
        self.signature = signature;
    }
}

/// Liveness probe / probe response
///
/// Freshness is clock-free: probes carry a random `heartbeat_id` and the
/// response echoes it with `requires_response` cleared. A probe with no
/// matching echo inside the configured timeout is a dead-connection signal.
/// Heartbeats never consume sequence counters or flow-control credit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Random freshness marker, echoed by the response
    pub heartbeat_id: u64,
    /// Snapshot of the sender's application send counter
    pub sequence_counter: u64,
    /// Optional wall-clock timestamp (informational only)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timestamp: Option<u64>,
    /// True on probes, false on echoes
    pub requires_response: bool,
    /// Signature over the canonical bytes
    pub signature: Signature,
}

impl Heartbeat {
    /// Create an unsigned probe.
    #[must_use]
    pub fn probe(heartbeat_id: u64, sequence_counter: u64) -> Self {
        Self {
            heartbeat_id,
            sequence_counter,
            timestamp: None,
            requires_response: true,
            signature: unsigned_signature(),
        }
    }

    /// Create an unsigned echo answering `probe`.
    #[must_use]
    pub fn echo(probe: &Self, sequence_counter: u64) -> Self {
        Self {
            heartbeat_id: probe.heartbeat_id,
            sequence_counter,
            timestamp: None,
            requires_response: false,
            signature: unsigned_signature(),
        }
    }
}

impl SignedMessage for Heartbeat {
    fn canonical_bytes(&self) -> Result<Vec<u8>> {
        canonical_tuple(
            MessageKind::Heartbeat,
            &(
                self.heartbeat_id,
                self.sequence_counter,
                &self.timestamp,
                self.requires_response,
            ),
        )
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn set_signature(&mut self, signature: Signature) {
        self.signature = signature;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_echo_preserves_id() {
        let probe = Heartbeat::probe(0xDEAD_BEEF, 5);
        let echo = Heartbeat::echo(&probe, 9);

        assert_eq!(echo.heartbeat_id, probe.heartbeat_id);
        assert!(probe.requires_response);
        assert!(!echo.requires_response);
    }

    #[test]
    fn ack_canonical_bytes_cover_both_counters() {
        let a = AckMessage::new(5, 3);
        let b = AckMessage::new(5, 4);
        let c = AckMessage::new(6, 3);

        let base = a.canonical_bytes().unwrap();
        assert_ne!(base, b.canonical_bytes().unwrap());
        assert_ne!(base, c.canonical_bytes().unwrap());
    }

    #[test]
    fn batch_preserves_order() {
        let batch = BatchEnvelope::new(1, vec![vec![1], vec![2], vec![3]]);
        assert_eq!(batch.messages, vec![vec![1], vec![2], vec![3]]);
    }
}
