#![no_main]

use cpor_proto::{Frame, Message};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Body deserialization and semantic validation on attacker-controlled
    // input: every failure mode must be a returned error
    if let Ok(frame) = Frame::decode(data) {
        let _ = Message::from_frame(&frame);
    }
});
