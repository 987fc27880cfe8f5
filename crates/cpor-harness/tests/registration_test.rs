//! Registration sub-protocol over the simulated network.
//!
//! The client asks to register, the server answers with a session-scoped
//! ephemeral key, the client seals its long-term public key to it, and the
//! server opens and persists the result. Traffic after the handshake is
//! verified against the registered key, so a delivered payload proves the
//! whole exchange authenticated correctly.

use std::sync::Arc;
use std::time::Duration;

use cpor_client::{ClientConfig, connect};
use cpor_core::{SealedKeyRegistration, SessionState};
use cpor_crypto::SoftwareKeyProvider;
use cpor_harness::{Responder, ResponderConfig, SimEnv, SimTransport};
use cpor_proto::messages::ClientId;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tokio::sync::mpsc;

#[test]
fn registration_round_establishes_and_authenticates() {
    let mut sim = turmoil::Builder::new().build();
    let (delivered_tx, mut delivered_rx) = mpsc::unbounded_channel();

    sim.host("server", move || {
        let delivered = delivered_tx.clone();
        async move {
            let responder = Responder::new(
                SimEnv::with_seed(81),
                Arc::new(SoftwareKeyProvider::from_bytes(&[2u8; 32])),
                Some(Box::new(SealedKeyRegistration::responder(
                    ChaCha20Rng::seed_from_u64(810),
                ))),
                ResponderConfig::default(),
                delivered,
            );
            responder.serve("0.0.0.0:443").await?;
            Ok(())
        }
    });

    sim.client("client", async {
        let client_provider = SoftwareKeyProvider::from_bytes(&[1u8; 32]);
        let registration = SealedKeyRegistration::initiator(
            &client_provider,
            ChaCha20Rng::seed_from_u64(820),
        );

        let handle = connect(
            SimTransport::client(),
            "server:443",
            ClientId::from_u128(7),
            Arc::new(client_provider),
            Some(Box::new(registration)),
            ClientConfig {
                tick_interval: Duration::from_millis(100),
                ..ClientConfig::default()
            },
            SimEnv::with_seed(82),
        )
        .await?;

        // connect() only returns once both handshake rounds are done
        assert_eq!(handle.state(), SessionState::Established);

        // The server verifies this against the key it just registered
        handle.send(b"registered hello".to_vec(), Duration::from_secs(5)).await?;
        tokio::time::sleep(Duration::from_millis(500)).await;

        handle.close("done").await;
        Ok(())
    });

    sim.run().expect("simulation failed");

    let mut seen = Vec::new();
    while let Ok(payload) = delivered_rx.try_recv() {
        seen.push(payload);
    }
    assert_eq!(seen, vec![b"registered hello".to_vec()]);
}
