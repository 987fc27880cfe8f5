//! Pinned wire and canonical-byte fixtures.
//!
//! The canonical signing bytes are a wire contract: both peers must derive
//! the same octets for the same message or signatures stop interoperating.
//! These vectors pin the exact encoding - field order, the bound-in kind
//! and version, CBOR integer minimality - so an accidental change to any of
//! them fails loudly here instead of silently splitting deployed versions.
//!
//! Layout reminder: canonical bytes are the CBOR array
//! `[kind, version, [field_1, ..., field_n]]` with the signature excluded.
//! Note that `Vec<u8>` fields encode as integer arrays (serde sequence
//! semantics), not CBOR byte strings.

use cpor_proto::{
    FrameHeader, Message, MessageKind, Signature,
    messages::{
        SignedMessage,
        app::{AckMessage, GenericMessage, Heartbeat},
        session::CloseMessage,
    },
};
use hex_literal::hex;

#[test]
fn ack_canonical_bytes() {
    // [18, 2, [5, 3]]
    let ack = AckMessage::new(5, 3);
    assert_eq!(hex::encode(ack.canonical_bytes().unwrap()), "831202820503");
}

#[test]
fn heartbeat_probe_canonical_bytes() {
    // [32, 2, [7, 0, null, true]]
    let probe = Heartbeat::probe(7, 0);
    assert_eq!(hex::encode(probe.canonical_bytes().unwrap()), "83182002840700f6f5");
}

#[test]
fn close_canonical_bytes() {
    // [33, 2, ["bye", 4, true]]
    let close = CloseMessage::new("bye", 4, true);
    assert_eq!(hex::encode(close.canonical_bytes().unwrap()), "83182102836362796504f5");
}

#[test]
fn generic_canonical_bytes() {
    // [16, 2, [1, [171, 205], 0]]
    let message = GenericMessage::new(1, vec![0xAB, 0xCD]);
    assert_eq!(hex::encode(message.canonical_bytes().unwrap()), "83100283018218ab18cd00");
}

#[test]
fn filling_the_signature_leaves_canonical_bytes_pinned() {
    let mut message = Message::Ack(AckMessage::new(5, 3));
    message.set_signature(Signature::from_bytes(&[0x5A; 64]));
    assert_eq!(hex::encode(message.canonical_bytes().unwrap()), "831202820503");
}

#[test]
fn kind_and_version_prefix_differs_per_variant() {
    // The bound-in prefix is what stops cross-variant signature transplants;
    // two messages with identical field bytes must still diverge up front
    let ack = AckMessage::new(1, 1).canonical_bytes().unwrap();
    let generic = GenericMessage::new(1, Vec::new()).canonical_bytes().unwrap();
    assert_ne!(hex::encode(&ack[..2]), hex::encode(&generic[..2]));
}

#[test]
fn frame_header_parses_pinned_wire_bytes() {
    let wire = hex!(
        "43504f52" // magic "CPOR"
        "02"       // version
        "00"       // flags
        "0012"     // kind: Ack
        "00000006" // payload size
        "00000000" // reserved
    );

    let header = FrameHeader::from_bytes(&wire).unwrap();
    assert_eq!(header.kind_enum(), Some(MessageKind::Ack));
    assert_eq!(header.payload_size(), 6);
    assert_eq!(header.version(), FrameHeader::VERSION);
    assert_eq!(hex::encode(header.to_bytes()), hex::encode(wire));
}
