#![no_main]

use libfuzzer_sys::fuzz_target;
use applyfuzz_core::domain::InternalRaftRequest;
use applyfuzz_core::harness::{select_request, Decoder};

fuzz_target!(|data: &[u8]| {
    let mut env = InternalRaftRequest::default();
    match select_request(&mut Decoder::new(data), &mut env) {
        Ok(kind) => {
            assert_eq!(env.populated_slots(), 1);
            assert_eq!(env.kind(), Some(kind));
        }
        Err(_) => assert_eq!(env.populated_slots(), 0),
    }
});
