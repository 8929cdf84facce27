#![no_main]

use libfuzzer_sys::fuzz_target;
use applyfuzz_core::harness;

fuzz_target!(|data: &[u8]| {
    harness::init_logging();
    // Shared for the whole process: store state accumulates across inputs.
    let mut ctx = harness::shared_context();
    let _status = harness::backend_apply(&mut ctx, data).into_status();
});
