//! Turmoil-based transport over simulated TCP streams.

use std::io;

use async_trait::async_trait;
use cpor_core::Transport;
use tokio::io::{ReadHalf, WriteHalf};
use turmoil::net::{TcpListener, TcpStream};

/// Simulation transport using Turmoil's deterministic TCP.
///
/// Turmoil controls packet ordering, delay, and partitions, which makes
/// disconnect/resume scenarios reproducible. TCP stands in for whatever
/// reliable stream production uses; the engine only assumes ordered bytes
/// between connect and loss, so the substitution is exact.
pub struct SimTransport {
    listener: Option<TcpListener>,
}

impl SimTransport {
    /// Bind a listening transport (server side).
    ///
    /// # Errors
    ///
    /// Returns an error if the address is in use or malformed.
    pub async fn bind(addr: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener: Some(listener) })
    }

    /// Connect-only transport (client side).
    #[must_use]
    pub fn client() -> Self {
        Self { listener: None }
    }
}

#[async_trait]
impl Transport for SimTransport {
    type SendStream = WriteHalf<TcpStream>;
    type RecvStream = ReadHalf<TcpStream>;

    async fn connect(&self, addr: &str) -> io::Result<(Self::SendStream, Self::RecvStream)> {
        let stream = TcpStream::connect(addr).await?;
        let (recv, send) = tokio::io::split(stream);
        Ok((send, recv))
    }

    async fn accept(&self) -> io::Result<(Self::SendStream, Self::RecvStream)> {
        let Some(listener) = &self.listener else {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "connect-only transport cannot accept",
            ));
        };
        let (stream, _addr) = listener.accept().await?;
        let (recv, send) = tokio::io::split(stream);
        Ok((send, recv))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[test]
    fn echo_round_trip() {
        let mut sim = turmoil::Builder::new().build();

        sim.host("server", || async {
            let transport = SimTransport::bind("0.0.0.0:443").await?;
            let (mut send, mut recv) = transport.accept().await?;

            let mut buf = [0u8; 128];
            let n = recv.read(&mut buf).await?;
            send.write_all(&buf[..n]).await?;
            Ok(())
        });

        sim.client("client", async {
            let transport = SimTransport::client();
            let (mut send, mut recv) = transport.connect("server:443").await?;

            send.write_all(b"hello cpor").await?;
            let mut buf = vec![0u8; 10];
            recv.read_exact(&mut buf).await?;
            assert_eq!(&buf, b"hello cpor");
            Ok(())
        });

        sim.run().expect("simulation failed");
    }

    #[test]
    fn client_transport_cannot_accept() {
        let mut sim = turmoil::Builder::new().build();

        sim.client("client", async {
            let transport = SimTransport::client();
            let err = transport.accept().await.expect_err("accept must fail");
            assert_eq!(err.kind(), io::ErrorKind::Unsupported);
            Ok(())
        });

        sim.run().expect("simulation failed");
    }
}
