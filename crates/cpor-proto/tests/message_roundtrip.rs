//! Round-trip property tests for every message variant.
//!
//! `decode(encode(m)) == m` must hold for all structurally valid messages,
//! including boundary field lengths (16-byte vs 32-byte nonces).

use cpor_proto::{
    Frame, Message, Signature,
    messages::{
        ClientId, ErrorMessage, KeyStorage, Nonce,
        app::{AckMessage, BatchEnvelope, GenericMessage, Heartbeat},
        session::{CloseMessage, ConnectRequest, ConnectResponse, ResumeRequest, ResumeResponse},
    },
};
use ed25519_dalek::SigningKey;
use proptest::prelude::*;

fn verifying_key_strategy() -> impl Strategy<Value = ed25519_dalek::VerifyingKey> {
    any::<[u8; 32]>().prop_map(|seed| SigningKey::from_bytes(&seed).verifying_key())
}

fn signature_strategy() -> impl Strategy<Value = Signature> {
    prop::collection::vec(any::<u8>(), 64).prop_map(|bytes| {
        let mut arr = [0u8; 64];
        arr.copy_from_slice(&bytes);
        Signature::from_bytes(&arr)
    })
}

fn nonce_strategy() -> impl Strategy<Value = Nonce> {
    // Boundary lengths get explicit weight
    prop_oneof![
        Just(16usize),
        Just(32usize),
        17usize..=31,
    ]
    .prop_flat_map(|len| prop::collection::vec(any::<u8>(), len))
    .prop_map(|bytes| Nonce::new(bytes).expect("length in range"))
}

fn connect_request_strategy() -> impl Strategy<Value = Message> {
    (
        any::<u128>(),
        verifying_key_strategy(),
        any::<u64>(),
        nonce_strategy(),
        any::<bool>(),
        prop::option::of(any::<u64>()),
        prop::option::of(prop::collection::vec(any::<u8>(), 0..128)),
        prop::option::of(prop_oneof![Just(KeyStorage::Software), Just(KeyStorage::Hardware)]),
        signature_strategy(),
    )
        .prop_map(
            |(id, key, counter, nonce, flag, timestamp, metadata, storage, signature)| {
                let mut request =
                    ConnectRequest::new(ClientId::from_u128(id), key, counter, nonce, flag);
                request.timestamp = timestamp;
                request.client_metadata = metadata;
                request.key_storage = storage;
                request.signature = signature;
                Message::ConnectRequest(request)
            },
        )
}

fn connect_response_strategy() -> impl Strategy<Value = Message> {
    (any::<u64>(), verifying_key_strategy(), any::<u64>(), signature_strategy())
        .prop_map(|(session_id, key, counter, signature)| {
            let mut response = ConnectResponse::ok(session_id, key, counter);
            response.signature = signature;
            Message::ConnectResponse(response)
        })
}

fn resume_request_strategy() -> impl Strategy<Value = Message> {
    (any::<u128>(), any::<u64>(), nonce_strategy(), signature_strategy()).prop_map(
        |(id, counter, nonce, signature)| {
            let mut request = ResumeRequest::new(ClientId::from_u128(id), counter, nonce);
            request.signature = signature;
            Message::ResumeRequest(request)
        },
    )
}

fn resume_response_strategy() -> impl Strategy<Value = Message> {
    (any::<u64>(), nonce_strategy(), signature_strategy()).prop_map(
        |(counter, nonce, signature)| {
            let mut response = ResumeResponse::ok(counter, nonce);
            response.signature = signature;
            Message::ResumeResponse(response)
        },
    )
}

fn generic_strategy() -> impl Strategy<Value = Message> {
    (any::<u64>(), prop::collection::vec(any::<u8>(), 0..256), any::<u8>(), signature_strategy())
        .prop_map(|(counter, payload, priority, signature)| {
            let mut message = GenericMessage::new(counter, payload);
            message.priority = priority;
            message.signature = signature;
            Message::Generic(message)
        })
}

fn batch_strategy() -> impl Strategy<Value = Message> {
    (
        any::<u64>(),
        prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..8),
        signature_strategy(),
    )
        .prop_map(|(counter, messages, signature)| {
            let mut batch = BatchEnvelope::new(counter, messages);
            batch.signature = signature;
            Message::Batch(batch)
        })
}

fn ack_strategy() -> impl Strategy<Value = Message> {
    (any::<u64>(), any::<u64>(), signature_strategy()).prop_map(|(seq, ack, signature)| {
        let mut message = AckMessage::new(seq, ack);
        message.signature = signature;
        Message::Ack(message)
    })
}

fn heartbeat_strategy() -> impl Strategy<Value = Message> {
    (any::<u64>(), any::<u64>(), prop::option::of(any::<u64>()), any::<bool>(), signature_strategy())
        .prop_map(|(id, seq, timestamp, requires_response, signature)| {
            let mut probe = Heartbeat::probe(id, seq);
            probe.timestamp = timestamp;
            probe.requires_response = requires_response;
            probe.signature = signature;
            Message::Heartbeat(probe)
        })
}

fn close_strategy() -> impl Strategy<Value = Message> {
    ("[a-z]{1,32}", any::<u64>(), any::<bool>(), signature_strategy()).prop_map(
        |(reason, counter, graceful, signature)| {
            let mut close = CloseMessage::new(reason, counter, graceful);
            close.signature = signature;
            Message::Close(close)
        },
    )
}

fn error_strategy() -> impl Strategy<Value = Message> {
    (any::<u16>(), "[a-z]{1,32}", any::<bool>(), signature_strategy()).prop_map(
        |(code, text, recoverable, signature)| {
            let mut error = ErrorMessage::new(code, text, recoverable);
            error.signature = signature;
            Message::Error(error)
        },
    )
}

fn message_strategy() -> impl Strategy<Value = Message> {
    prop_oneof![
        connect_request_strategy(),
        connect_response_strategy(),
        resume_request_strategy(),
        resume_response_strategy(),
        generic_strategy(),
        batch_strategy(),
        ack_strategy(),
        heartbeat_strategy(),
        close_strategy(),
        error_strategy(),
    ]
}

proptest! {
    #[test]
    fn message_round_trip(message in message_strategy()) {
        let kind = message.kind();

        let frame = message.clone().into_frame().expect("should encode");
        prop_assert_eq!(frame.header.kind_enum(), Some(kind));

        let mut wire = Vec::new();
        frame.encode(&mut wire).expect("should encode frame");

        let parsed_frame = Frame::decode(&wire).expect("should decode frame");
        let decoded = Message::from_frame(&parsed_frame).expect("should decode message");

        prop_assert_eq!(message, decoded);
    }

    #[test]
    fn canonical_bytes_are_deterministic(message in message_strategy()) {
        let first = message.canonical_bytes().expect("canonical");
        let second = message.canonical_bytes().expect("canonical");
        prop_assert_eq!(first, second);
    }

    #[test]
    fn canonical_bytes_ignore_signature(message in message_strategy(), sig in signature_strategy()) {
        let before = message.canonical_bytes().expect("canonical");

        let mut mutated = message;
        mutated.set_signature(sig);
        let after = mutated.canonical_bytes().expect("canonical");

        prop_assert_eq!(before, after);
    }
}

#[test]
fn garbage_bytes_never_panic() {
    // Deterministic sweep over junk inputs; decode must fail cleanly.
    for len in 0..64usize {
        let junk = vec![0xA7u8; len];
        let _ = Frame::decode(&junk);
    }
}
