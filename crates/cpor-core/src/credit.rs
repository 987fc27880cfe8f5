//! Credit-window flow control accounting.
//!
//! Each outbound application message consumes one credit; each cumulative
//! acknowledgment releases the credits it covers. When the window is
//! exhausted the *driver* suspends the sender - this module is pure
//! accounting and never blocks.

/// Flow-control window for one direction.
///
/// # Invariant
///
/// `0 <= outstanding <= window_size` after every operation. The type
/// enforces it: acquisition fails at the boundary and release saturates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditWindow {
    window_size: u32,
    outstanding: u32,
}

impl CreditWindow {
    /// Create a window of the given size (fixed at handshake time).
    #[must_use]
    pub const fn new(window_size: u32) -> Self {
        Self { window_size, outstanding: 0 }
    }

    /// Consume one credit if any is available.
    ///
    /// Returns `false` when the window is exhausted; the caller suspends
    /// until [`CreditWindow::release`] frees capacity.
    pub fn try_acquire(&mut self) -> bool {
        if self.outstanding < self.window_size {
            self.outstanding += 1;
            true
        } else {
            false
        }
    }

    /// Release `count` credits (messages covered by an acknowledgment).
    ///
    /// Saturates at zero: a hostile over-acknowledgment can never push
    /// `outstanding` negative or above the window.
    pub fn release(&mut self, count: u32) {
        self.outstanding = self.outstanding.saturating_sub(count);
    }

    /// Credits currently available.
    #[must_use]
    pub const fn available(&self) -> u32 {
        self.window_size - self.outstanding
    }

    /// Messages currently in flight.
    #[must_use]
    pub const fn outstanding(&self) -> u32 {
        self.outstanding
    }

    /// Configured window size.
    #[must_use]
    pub const fn window_size(&self) -> u32 {
        self.window_size
    }
}
