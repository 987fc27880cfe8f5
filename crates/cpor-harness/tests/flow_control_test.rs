//! Credit-window flow control under a slow acknowledger.
//!
//! The server holds acknowledgments back, so a small window fills up and
//! further sends must suspend. A generous caller timeout rides out the
//! delay; a short one surfaces as a timeout with nothing consumed.

use std::sync::Arc;
use std::time::Duration;

use cpor_client::{ClientConfig, ClientError, connect};
use cpor_core::{SessionConfig, SessionState};
use cpor_crypto::SoftwareKeyProvider;
use cpor_harness::{Responder, ResponderConfig, SimEnv, SimTransport};
use cpor_proto::messages::ClientId;
use tokio::sync::mpsc;

fn provider(seed: u8) -> Arc<SoftwareKeyProvider> {
    Arc::new(SoftwareKeyProvider::from_bytes(&[seed; 32]))
}

fn small_window() -> SessionConfig {
    SessionConfig { credit_window: 2, ..SessionConfig::default() }
}

#[test]
fn exhausted_window_suspends_until_credit_returns() {
    let mut sim = turmoil::Builder::new()
        .simulation_duration(Duration::from_secs(60))
        .build();
    let (delivered_tx, mut delivered_rx) = mpsc::unbounded_channel();

    sim.host("server", move || {
        let delivered = delivered_tx.clone();
        async move {
            let responder = Responder::new(
                SimEnv::with_seed(51),
                provider(2),
                None,
                ResponderConfig {
                    session: small_window(),
                    ack_delay: Some(Duration::from_secs(2)),
                    ..ResponderConfig::default()
                },
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
            ClientConfig {
                session: small_window(),
                tick_interval: Duration::from_millis(100),
                ..ClientConfig::default()
            },
            SimEnv::with_seed(52),
        )
        .await?;

        // Fill the window
        handle.send(b"one".to_vec(), Duration::from_secs(5)).await?;
        handle.send(b"two".to_vec(), Duration::from_secs(5)).await?;
        assert_eq!(handle.credit_available(), 0);

        // The third send suspends until the delayed acks free credit
        let started = tokio::time::Instant::now();
        handle.send(b"three".to_vec(), Duration::from_secs(10)).await?;
        let elapsed = started.elapsed();
        assert!(
            elapsed >= Duration::from_millis(1900),
            "send completed before credit could have returned: {elapsed:?}"
        );

        tokio::time::sleep(Duration::from_secs(3)).await;
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
fn credit_wait_times_out_without_consuming_anything() {
    let mut sim = turmoil::Builder::new()
        .simulation_duration(Duration::from_secs(60))
        .build();
    let (delivered_tx, _delivered_rx) = mpsc::unbounded_channel();

    sim.host("server", move || {
        let delivered = delivered_tx.clone();
        async move {
            let responder = Responder::new(
                SimEnv::with_seed(61),
                provider(2),
                None,
                ResponderConfig {
                    session: small_window(),
                    // Far beyond any caller timeout in this test
                    ack_delay: Some(Duration::from_secs(30)),
                    ..ResponderConfig::default()
                },
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
            ClientConfig {
                session: small_window(),
                tick_interval: Duration::from_millis(100),
                ..ClientConfig::default()
            },
            SimEnv::with_seed(62),
        )
        .await?;

        handle.send(b"one".to_vec(), Duration::from_secs(5)).await?;
        handle.send(b"two".to_vec(), Duration::from_secs(5)).await?;

        let timeout = Duration::from_millis(500);
        match handle.send(b"three".to_vec(), timeout).await {
            Err(ClientError::Timeout(reported)) => assert_eq!(reported, timeout),
            other => panic!("expected a timeout, got {other:?}"),
        }

        // Backpressure is not a failure: the session is intact, the window
        // is still fully occupied by the first two sends
        assert_eq!(handle.state(), SessionState::Established);
        assert_eq!(handle.credit_available(), 0);

        handle.close("done").await;
        Ok(())
    });

    sim.run().expect("simulation failed");
}
