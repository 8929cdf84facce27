#![no_main]

use libfuzzer_sys::fuzz_target;
use applyfuzz_core::harness;

fuzz_target!(|data: &[u8]| {
    harness::init_logging();
    // A fresh server per input; nothing carries over between runs.
    let _status = harness::apply_entries(data).into_status();
});
