use proptest::prelude::*;
use applyfuzz_core::domain::{CommandKind, InternalRaftRequest, Request};
use applyfuzz_core::harness::{select_envelope, select_request, Decoder, SelectError, KIND_TABLE};

fn key_of(req: &Request) -> Option<&[u8]> {
    match req {
        Request::Range(r) => Some(r.key.as_slice()),
        Request::Put(r) => Some(r.key.as_slice()),
        Request::DeleteRange(r) => Some(r.key.as_slice()),
        Request::AuthRoleRevokePermission(r) => Some(r.key.as_slice()),
        _ => None,
    }
}

proptest! {
    /// A successful selection fills exactly the slot the first byte names; a
    /// failed one leaves the envelope empty.
    #[test]
    fn prop_single_slot(data in proptest::collection::vec(any::<u8>(), 0..256)) {
        let mut env = InternalRaftRequest::default();
        match select_request(&mut Decoder::new(&data), &mut env) {
            Ok(kind) => {
                prop_assert_eq!(env.populated_slots(), 1);
                prop_assert_eq!(Some(kind), env.kind());
                prop_assert_eq!(kind, KIND_TABLE[usize::from(data[0]) % CommandKind::COUNT].kind);
            }
            Err(_) => prop_assert_eq!(env.populated_slots(), 0),
        }
    }

    /// Same bytes, same selection.
    #[test]
    fn prop_selection_is_deterministic(data in proptest::collection::vec(any::<u8>(), 0..256)) {
        let a = select_envelope(&mut Decoder::new(&data));
        let b = select_envelope(&mut Decoder::new(&data));
        prop_assert_eq!(a, b);
    }

    /// Key-bearing kinds never select with an empty key.
    #[test]
    fn prop_selected_keys_are_non_empty(data in proptest::collection::vec(any::<u8>(), 1..256)) {
        if let Ok(env) = select_envelope(&mut Decoder::new(&data)) {
            if let Some(key) = env.request().and_then(key_of) {
                prop_assert!(!key.is_empty());
            }
        }
    }

    /// Lease revoke requests never make it into an envelope.
    #[cfg(not(feature = "strict-lease-revoke"))]
    #[test]
    fn prop_lease_revoke_never_selects(tail in proptest::collection::vec(any::<u8>(), 0..64)) {
        let mut data = vec![6u8];
        data.extend(tail);
        prop_assert!(select_envelope(&mut Decoder::new(&data)).is_err());
    }
}

#[test]
fn all_zero_buffer_selects_range_and_rejects_it() {
    let data = [0u8; 64];
    match select_envelope(&mut Decoder::new(&data)) {
        Err(SelectError::Invalid(e)) => assert!(e.to_string().starts_with("Range")),
        other => panic!("unexpected selection {other:?}"),
    }
}

#[test]
fn table_is_complete() {
    assert_eq!(KIND_TABLE.len(), CommandKind::COUNT);
    for (entry, kind) in KIND_TABLE.iter().zip(CommandKind::ALL) {
        assert_eq!(entry.kind, kind);
    }
}
