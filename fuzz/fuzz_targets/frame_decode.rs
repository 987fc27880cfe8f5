#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Structural framing must reject arbitrary bytes, never panic
    let _ = cpor_proto::Frame::decode(data);
});
