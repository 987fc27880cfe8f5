//! Bounded buffer of sent-but-unacknowledged application frames.
//!
//! Every outbound application message is retained (as its fully signed
//! frame) until the peer's cumulative acknowledgment covers it. On
//! reconnect, everything past the peer's acknowledged counter is replayed
//! byte-identically, in original order.
//!
//! Capacity is a hard bound: inserting into a full buffer is an explicit
//! [`SessionError::ResumeOverflow`], never silent eviction of
//! unacknowledged data. The overflow forces a clean reconnect with the
//! error propagated to the caller.

use std::collections::VecDeque;
use std::time::Instant;

use cpor_proto::Frame;

use crate::error::{Result, SessionError};

/// One retained outbound frame.
#[derive(Debug, Clone)]
pub struct ResumeEntry {
    /// Application sequence counter of the buffered message
    pub sequence: u64,
    /// The fully signed, encoded frame (replayed byte-identically)
    pub frame: Frame,
    /// When the frame was first sent
    pub enqueued_at: Instant,
}

/// Bounded store of recently sent, not-yet-acknowledged frames.
///
/// Entries are kept in send order; since only application traffic consumes
/// counters, retained sequences are always contiguous.
#[derive(Debug, Clone)]
pub struct ResumeBuffer {
    entries: VecDeque<ResumeEntry>,
    capacity: usize,
}

impl ResumeBuffer {
    /// Create a buffer holding at most `capacity` unacknowledged frames.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { entries: VecDeque::with_capacity(capacity.min(64)), capacity }
    }

    /// Retain an outbound frame until it is acknowledged.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ResumeOverflow`] when the buffer is already
    /// at capacity. The caller must treat that as fatal to the session.
    pub fn push(&mut self, sequence: u64, frame: Frame, now: Instant) -> Result<()> {
        if self.entries.len() >= self.capacity {
            return Err(SessionError::ResumeOverflow { capacity: self.capacity });
        }

        if let Some(last) = self.entries.back() {
            debug_assert_eq!(last.sequence + 1, sequence);
        }

        self.entries.push_back(ResumeEntry { sequence, frame, enqueued_at: now });
        Ok(())
    }

    /// Purge every entry with counter `<= acked`.
    ///
    /// Returns how many entries were purged; each purged entry frees one
    /// flow-control credit.
    pub fn acknowledge(&mut self, acked: u64) -> usize {
        let mut purged = 0;
        while let Some(front) = self.entries.front() {
            if front.sequence > acked {
                break;
            }
            self.entries.pop_front();
            purged += 1;
        }
        purged
    }

    /// Frames to replay for a peer whose last received counter is `acked`,
    /// in original send order.
    ///
    /// `last_sent` is the sender's last assigned counter, used to detect the
    /// nothing-to-replay case when the buffer has drained.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ResumeImpossible`] when frames between
    /// `acked` and the lowest retained counter have already been purged -
    /// the gap cannot be replayed and the session must be re-established.
    pub fn replay_after(&self, acked: u64, last_sent: u64) -> Result<Vec<Frame>> {
        debug_assert!(acked <= last_sent);

        if acked == last_sent {
            return Ok(Vec::new());
        }

        match self.lowest_retained() {
            Some(lowest) if acked + 1 >= lowest => Ok(self
                .entries
                .iter()
                .filter(|entry| entry.sequence > acked)
                .map(|entry| entry.frame.clone())
                .collect()),
            Some(lowest) => Err(SessionError::ResumeImpossible { acked, lowest }),
            // Unacknowledged frames exist (acked < last_sent) but nothing is
            // retained: an earlier ack already purged them. The peer's claim
            // regressed and replay is impossible.
            None => Err(SessionError::ResumeImpossible { acked, lowest: last_sent + 1 }),
        }
    }

    /// Lowest retained counter, if any.
    #[must_use]
    pub fn lowest_retained(&self) -> Option<u64> {
        self.entries.front().map(|entry| entry.sequence)
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
