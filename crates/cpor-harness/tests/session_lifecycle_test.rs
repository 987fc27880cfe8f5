//! Session lifecycle integration tests over the simulated network.
//!
//! Covers the handshake, steady-state exchange with acknowledgment-driven
//! credit recycling, batch delivery, handshake rejection, and the graceful
//! half-close.

use std::sync::Arc;
use std::time::Duration;

use cpor_client::{ClientConfig, ClientError, connect};
use cpor_core::{SessionConfig, SessionError, SessionState};
use cpor_crypto::{KeyProvider, SoftwareKeyProvider};
use cpor_harness::{Responder, ResponderConfig, SimEnv, SimTransport};
use cpor_proto::messages::ClientId;
use tokio::sync::mpsc;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

fn client_config() -> ClientConfig {
    ClientConfig {
        tick_interval: Duration::from_millis(100),
        ..ClientConfig::default()
    }
}

fn provider(seed: u8) -> Arc<SoftwareKeyProvider> {
    Arc::new(SoftwareKeyProvider::from_bytes(&[seed; 32]))
}

#[test]
fn handshake_exchange_and_graceful_close() {
    let mut sim = turmoil::Builder::new().build();
    let (delivered_tx, mut delivered_rx) = mpsc::unbounded_channel();

    sim.host("server", move || {
        let delivered = delivered_tx.clone();
        async move {
            let responder = Responder::new(
                SimEnv::with_seed(11),
                provider(2),
                None,
                ResponderConfig::default(),
                delivered,
            );
            responder.serve("0.0.0.0:443").await?;
            Ok(())
        }
    });

    sim.client("client", async {
        let mut handle = connect(
            SimTransport::client(),
            "server:443",
            ClientId::from_u128(7),
            provider(1),
            None,
            client_config(),
            SimEnv::with_seed(12),
        )
        .await?;

        assert_eq!(handle.state(), SessionState::Established);
        assert_eq!(handle.credit_available(), 32);

        for payload in [b"alpha".to_vec(), b"beta".to_vec(), b"gamma".to_vec()] {
            handle.send(payload, SEND_TIMEOUT).await?;
        }

        // Acknowledgments drain the window back to full
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(handle.credit_available(), 32);

        handle.close("done").await;
        assert_eq!(handle.state(), SessionState::Closed);
        assert!(handle.recv().await.is_none());
        Ok(())
    });

    sim.run().expect("simulation failed");

    let mut seen = Vec::new();
    while let Ok(payload) = delivered_rx.try_recv() {
        seen.push(payload);
    }
    assert_eq!(seen, vec![b"alpha".to_vec(), b"beta".to_vec(), b"gamma".to_vec()]);
}

#[test]
fn batch_delivers_in_order_under_one_credit() {
    let mut sim = turmoil::Builder::new().build();
    let (delivered_tx, mut delivered_rx) = mpsc::unbounded_channel();

    sim.host("server", move || {
        let delivered = delivered_tx.clone();
        async move {
            let responder = Responder::new(
                SimEnv::with_seed(21),
                provider(2),
                None,
                ResponderConfig::default(),
                delivered,
            );
            responder.serve("0.0.0.0:443").await?;
            Ok(())
        }
    });

    sim.client("client", async {
        let handle = connect(
            SimTransport::client(),
            "server:443",
            ClientId::from_u128(7),
            provider(1),
            None,
            client_config(),
            SimEnv::with_seed(22),
        )
        .await?;

        let window = handle.credit_available();
        handle
            .send_batch(vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()], SEND_TIMEOUT)
            .await?;
        // The whole envelope consumed a single credit
        assert_eq!(handle.credit_available(), window - 1);

        tokio::time::sleep(Duration::from_millis(500)).await;
        handle.close("done").await;
        Ok(())
    });

    sim.run().expect("simulation failed");

    let mut seen = Vec::new();
    while let Ok(payload) = delivered_rx.try_recv() {
        seen.push(payload);
    }
    assert_eq!(seen, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
}

#[test]
fn pinned_key_mismatch_fails_the_handshake() {
    let mut sim = turmoil::Builder::new().build();
    let (delivered_tx, _delivered_rx) = mpsc::unbounded_channel();

    sim.host("server", move || {
        let delivered = delivered_tx.clone();
        async move {
            let responder = Responder::new(
                SimEnv::with_seed(31),
                provider(2),
                None,
                ResponderConfig::default(),
                delivered,
            );
            responder.serve("0.0.0.0:443").await?;
            Ok(())
        }
    });

    sim.client("client", async {
        // Pin a key the server does not hold: its responses verify only
        // against the pinned key, so they are dropped as unauthentic and
        // the handshake starves
        let config = ClientConfig {
            session: SessionConfig {
                pinned_peer_key: Some(provider(9).verifying_key()),
                handshake_timeout: Duration::from_secs(1),
                ..SessionConfig::default()
            },
            ..client_config()
        };

        let result = connect(
            SimTransport::client(),
            "server:443",
            ClientId::from_u128(7),
            provider(1),
            None,
            config,
            SimEnv::with_seed(32),
        )
        .await;

        match result {
            Err(ClientError::Session(SessionError::HandshakeTimeout { .. })) => Ok(()),
            other => panic!("expected a handshake timeout, got {other:?}"),
        }
    });

    sim.run().expect("simulation failed");
}
