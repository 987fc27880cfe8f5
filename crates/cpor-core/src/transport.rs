//! Transport abstraction for network I/O.
//!
//! The `Transport` trait abstracts over reliable, ordered byte-stream
//! transports. The engine never touches sockets; drivers pump frames
//! between the state machine and whichever transport is in play:
//!
//! - production: TCP/TLS or QUIC streams
//! - testing: Turmoil's deterministic simulated TCP
//!
//! Transport-level handshakes, congestion control, and downgrade behavior
//! all live behind this boundary; the engine only assumes reliable ordered
//! delivery between connect and loss.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use cpor_proto::{Frame, FrameHeader};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Abstract reliable byte-stream transport.
///
/// One `connect`/`accept` yields a split send/receive stream pair carrying
/// whole frames back-to-back. Reconnection (for resume) is a fresh
/// `connect` paced by a [`BackoffPolicy`].
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Type of stream for sending bytes.
    type SendStream: AsyncWrite + Unpin + Send + 'static;

    /// Type of stream for receiving bytes.
    type RecvStream: AsyncRead + Unpin + Send + 'static;

    /// Connect to a remote endpoint (e.g. `"server:443"`).
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if the remote endpoint is unreachable, the
    /// connection is refused, or name resolution fails.
    async fn connect(&self, addr: &str) -> io::Result<(Self::SendStream, Self::RecvStream)>;

    /// Accept an incoming connection.
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if the endpoint is shut down or the
    /// connection fails during establishment.
    async fn accept(&self) -> io::Result<(Self::SendStream, Self::RecvStream)>;
}

/// Read one frame from a byte stream.
///
/// Frames travel back-to-back: a 16-byte header, then exactly
/// `payload_size` body bytes. The header is validated (magic, version,
/// size bound) before the body is allocated, so a hostile peer cannot make
/// this allocate more than the 1 MiB frame limit.
///
/// # Errors
///
/// I/O errors pass through; a malformed header surfaces as
/// `InvalidData`. On a byte stream there is no way to resynchronize after
/// either, so callers treat any error here as loss of the connection.
pub async fn read_frame<R: AsyncRead + Unpin>(recv: &mut R) -> io::Result<Frame> {
    let mut header_buf = [0u8; FrameHeader::SIZE];
    recv.read_exact(&mut header_buf).await?;

    let header = FrameHeader::from_bytes(&header_buf)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let mut payload = vec![0u8; header.payload_size() as usize];
    recv.read_exact(&mut payload).await?;

    Ok(Frame::new(*header, payload))
}

/// Write one frame to a byte stream and flush it.
///
/// # Errors
///
/// I/O errors pass through; an oversized frame surfaces as `InvalidData`.
pub async fn write_frame<W: AsyncWrite + Unpin>(send: &mut W, frame: &Frame) -> io::Result<()> {
    let mut buf = Vec::with_capacity(FrameHeader::SIZE + frame.payload.len());
    frame
        .encode(&mut buf)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    send.write_all(&buf).await?;
    send.flush().await
}

/// Exponential backoff pacing for reconnect attempts.
///
/// Attempt `n` (zero-based) is delayed `initial * multiplier^n`, capped at
/// `max_delay`; after `max_retries` attempts the policy reports exhaustion
/// and the connection error surfaces to the caller.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub initial: Duration,
    /// Multiplier applied per attempt
    pub multiplier: u32,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Attempts before giving up
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            multiplier: 2,
            max_delay: Duration::from_secs(5),
            max_retries: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay before attempt `attempt` (zero-based), or `None` when retries
    /// are exhausted.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let factor = self.multiplier.saturating_pow(attempt);
        Some(self.initial.saturating_mul(factor).min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use cpor_proto::MessageKind;

    use super::*;

    #[tokio::test]
    async fn frames_travel_back_to_back() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let first = Frame::new(FrameHeader::new(MessageKind::Generic), vec![1, 2, 3]);
        let second = Frame::new(FrameHeader::new(MessageKind::Ack), vec![4]);
        write_frame(&mut client, &first).await.unwrap();
        write_frame(&mut client, &second).await.unwrap();

        assert_eq!(read_frame(&mut server).await.unwrap(), first);
        assert_eq!(read_frame(&mut server).await.unwrap(), second);
    }

    #[tokio::test]
    async fn garbage_header_is_invalid_data() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        tokio::io::AsyncWriteExt::write_all(&mut client, &[0xFFu8; 32]).await.unwrap();

        let err = read_frame(&mut server).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn truncated_stream_is_unexpected_eof() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let frame = Frame::new(FrameHeader::new(MessageKind::Generic), vec![9; 100]);
        let mut wire = Vec::new();
        frame.encode(&mut wire).unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut client, &wire[..40]).await.unwrap();
        drop(client);

        let err = read_frame(&mut server).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = BackoffPolicy {
            initial: Duration::from_millis(100),
            multiplier: 2,
            max_delay: Duration::from_secs(1),
            max_retries: 6,
        };

        assert_eq!(policy.delay(0), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay(1), Some(Duration::from_millis(200)));
        assert_eq!(policy.delay(2), Some(Duration::from_millis(400)));
        assert_eq!(policy.delay(3), Some(Duration::from_millis(800)));
        // Capped
        assert_eq!(policy.delay(4), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay(5), Some(Duration::from_secs(1)));
        // Exhausted
        assert_eq!(policy.delay(6), None);
    }
}
