//! Heartbeat-driven liveness detection on virtual time.
//!
//! Interval 2s, timeout multiple 3: a probe goes out after 2 idle seconds,
//! and with no echo the dead-connection signal fires 6 seconds after the
//! probe. The driver then reconnects and resumes; the caller only ever
//! sees a brief `Resuming` between two `Established`s.

use std::sync::Arc;
use std::time::Duration;

use cpor_client::{ClientConfig, connect};
use cpor_core::{HeartbeatConfig, SessionConfig, SessionState};
use cpor_crypto::SoftwareKeyProvider;
use cpor_harness::{Responder, ResponderConfig, SimEnv, SimTransport};
use cpor_proto::messages::ClientId;
use tokio::sync::mpsc;

fn provider(seed: u8) -> Arc<SoftwareKeyProvider> {
    Arc::new(SoftwareKeyProvider::from_bytes(&[seed; 32]))
}

#[test]
fn unanswered_heartbeat_reconnects_within_the_timeout_budget() {
    let mut sim = turmoil::Builder::new()
        .simulation_duration(Duration::from_secs(60))
        .build();
    let (delivered_tx, mut delivered_rx) = mpsc::unbounded_channel();

    sim.host("server", move || {
        let delivered = delivered_tx.clone();
        async move {
            let responder = Responder::new(
                SimEnv::with_seed(71),
                provider(2),
                None,
                ResponderConfig {
                    // Swallow heartbeat traffic on the first connection;
                    // behave normally once the client comes back
                    mute_heartbeats_once: true,
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
                session: SessionConfig {
                    heartbeat: HeartbeatConfig {
                        interval: Duration::from_secs(2),
                        timeout_multiple: 3,
                    },
                    ..SessionConfig::default()
                },
                tick_interval: Duration::from_millis(100),
                ..ClientConfig::default()
            },
            SimEnv::with_seed(72),
        )
        .await?;

        let established_at = tokio::time::Instant::now();

        // Stay idle and watch for the dead-connection signal: probe at
        // ~2s, expiry 6s later
        let resuming_at = loop {
            tokio::time::sleep(Duration::from_millis(10)).await;
            match handle.state() {
                SessionState::Resuming => break tokio::time::Instant::now(),
                SessionState::Established => {
                    assert!(
                        established_at.elapsed() < Duration::from_secs(12),
                        "dead connection never detected"
                    );
                },
                other => panic!("unexpected state while idle: {other:?}"),
            }
        };
        let detection = resuming_at - established_at;
        assert!(
            detection >= Duration::from_secs(8),
            "signal fired before interval * multiple could elapse: {detection:?}"
        );
        assert!(
            detection < Duration::from_secs(9),
            "signal fired too late: {detection:?}"
        );

        // The driver resumes on its own
        while handle.state() != SessionState::Established {
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert!(
                established_at.elapsed() < Duration::from_secs(20),
                "resume never completed"
            );
        }

        // And the session is fully usable again
        handle.send(b"after the storm".to_vec(), Duration::from_secs(5)).await?;
        tokio::time::sleep(Duration::from_millis(500)).await;
        handle.close("done").await;
        Ok(())
    });

    sim.run().expect("simulation failed");

    let mut seen = Vec::new();
    while let Ok(payload) = delivered_rx.try_recv() {
        seen.push(payload);
    }
    assert_eq!(seen, vec![b"after the storm".to_vec()]);
}
