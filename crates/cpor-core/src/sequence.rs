//! Per-direction sequence counters and replay protection.
//!
//! Only application traffic (Generic, Batch) consumes counters. Lifecycle
//! and liveness frames carry counter snapshots but never advance either
//! side. That keeps the application stream dense: an accepted counter is
//! always exactly `last + 1`, so duplicates, reorders, and gaps are all
//! detectable with one comparison.

use crate::error::{Result, SessionError};

/// Outbound counter for one direction.
///
/// Counters start at zero ("nothing sent") and the first message is 1.
/// Assignment is two-phase: [`SequenceCounter::peek_next`] reserves nothing,
/// [`SequenceCounter::commit`] advances. The split lets the engine sign and
/// encode a message before committing, so a failed signing step never burns
/// a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceCounter {
    last: u64,
}

impl SequenceCounter {
    /// Counter with nothing sent yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { last: 0 }
    }

    /// The next counter value, without advancing.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::CounterExhausted`] if the counter would
    /// wrap. Wraparound is illegal; the session must be re-established with
    /// a fresh handshake rather than ever reusing counter space.
    pub fn peek_next(&self) -> Result<u64> {
        self.last.checked_add(1).ok_or(SessionError::CounterExhausted)
    }

    /// Advance to `value`, which must be the value [`Self::peek_next`]
    /// returned.
    pub fn commit(&mut self, value: u64) {
        debug_assert_eq!(value, self.last.wrapping_add(1));
        self.last = value;
    }

    /// Last assigned counter (0 if nothing sent).
    #[must_use]
    pub const fn last(&self) -> u64 {
        self.last
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Inbound replay/ordering guard for one direction.
///
/// Rejecting a frame never mutates the guard, so a hostile frame cannot
/// desynchronize an otherwise healthy stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayGuard {
    last_accepted: u64,
}

impl ReplayGuard {
    /// Guard with nothing accepted yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { last_accepted: 0 }
    }

    /// Validate and accept an incoming application counter.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ProtocolViolation`] on duplicates, reorders
    /// (`counter <= last`), and gaps (`counter > last + 1`). Gaps imply loss
    /// that must be resolved through resume, never silently skipped. No
    /// heuristic recovery is attempted and the guard state is unchanged on
    /// rejection.
    pub fn accept(&mut self, counter: u64) -> Result<()> {
        if counter <= self.last_accepted {
            return Err(SessionError::ProtocolViolation {
                reason: format!(
                    "duplicate or reordered counter {counter} (last accepted {})",
                    self.last_accepted
                ),
            });
        }
        if counter != self.last_accepted + 1 {
            return Err(SessionError::ProtocolViolation {
                reason: format!(
                    "sequence gap: got {counter}, expected {}",
                    self.last_accepted + 1
                ),
            });
        }
        self.last_accepted = counter;
        Ok(())
    }

    /// Last accepted counter (0 if nothing accepted).
    #[must_use]
    pub const fn last_accepted(&self) -> u64 {
        self.last_accepted
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn counter_two_phase_assignment() {
        let mut counter = SequenceCounter::new();
        assert_eq!(counter.last(), 0);

        let next = counter.peek_next().unwrap();
        assert_eq!(next, 1);
        assert_eq!(counter.last(), 0); // peek does not advance

        counter.commit(next);
        assert_eq!(counter.last(), 1);
    }

    #[test]
    fn counter_exhaustion_is_an_error() {
        let mut counter = SequenceCounter::new();
        counter.last = u64::MAX;
        assert_eq!(counter.peek_next(), Err(SessionError::CounterExhausted));
    }

    #[test]
    fn guard_accepts_dense_stream() {
        let mut guard = ReplayGuard::new();
        for counter in 1..=100 {
            guard.accept(counter).unwrap();
        }
        assert_eq!(guard.last_accepted(), 100);
    }

    #[test]
    fn guard_rejects_duplicate_without_mutation() {
        let mut guard = ReplayGuard::new();
        guard.accept(1).unwrap();
        guard.accept(2).unwrap();

        let err = guard.accept(2).unwrap_err();
        assert!(matches!(err, SessionError::ProtocolViolation { .. }));
        assert_eq!(guard.last_accepted(), 2);

        // Stream continues after a rejected frame
        guard.accept(3).unwrap();
    }

    #[test]
    fn guard_rejects_reorder() {
        let mut guard = ReplayGuard::new();
        guard.accept(1).unwrap();
        guard.accept(2).unwrap();

        assert!(guard.accept(1).is_err());
        assert_eq!(guard.last_accepted(), 2);
    }

    #[test]
    fn guard_rejects_gap() {
        let mut guard = ReplayGuard::new();
        guard.accept(1).unwrap();

        let err = guard.accept(3).unwrap_err();
        assert!(matches!(err, SessionError::ProtocolViolation { .. }));
        assert_eq!(guard.last_accepted(), 1);
    }

    proptest! {
        // Accepted counters are strictly increasing with no duplicates, for
        // any interleaving of valid and invalid candidates.
        #[test]
        fn accepted_counters_strictly_increase(
            candidates in prop::collection::vec(1u64..32, 1..256)
        ) {
            let mut guard = ReplayGuard::new();
            let mut accepted = Vec::new();

            for candidate in candidates {
                if guard.accept(candidate).is_ok() {
                    accepted.push(candidate);
                }
            }

            for pair in accepted.windows(2) {
                prop_assert!(pair[0] < pair[1]);
                prop_assert_eq!(pair[0] + 1, pair[1]);
            }
        }

        // A rejection never changes what the guard will accept next.
        #[test]
        fn rejection_preserves_guard_state(
            valid in 1u64..16,
            junk in prop::collection::vec(any::<u64>(), 0..32)
        ) {
            let mut guard = ReplayGuard::new();
            for counter in 1..=valid {
                guard.accept(counter).unwrap();
            }

            for candidate in junk {
                if candidate != valid + 1 {
                    let _ = guard.accept(candidate);
                    prop_assert_eq!(guard.last_accepted(), valid);
                }
            }

            guard.accept(valid + 1).unwrap();
        }
    }
}
