#![no_main]

use cpor_core::ReplayGuard;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|counters: Vec<u64>| {
    let mut guard = ReplayGuard::new();
    let mut last = 0;
    for counter in counters {
        if guard.accept(counter).is_ok() {
            // Accepted counters are strictly increasing and dense
            assert_eq!(counter, last + 1);
            last = counter;
        }
        // Rejections never move the guard
        assert_eq!(guard.last_accepted(), last);
    }
});
