//! Command selection: one byte picks a kind from `KIND_TABLE`, the decoder
//! fills that kind's request, and the kind's validator decides whether the
//! request is meaningful enough to apply.

use arbitrary::Arbitrary;

use crate::domain::*;

use super::decoder::{DecodeError, Decoder};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{kind}: required field `{field}` is empty")]
    Empty { kind: CommandKind, field: &'static str },
    #[error("{0} requests are never applied")]
    Rejected(CommandKind),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Occupied(#[from] SlotOccupied),
}

pub type Validator<R> = fn(&R) -> Result<(), ValidationError>;

/// One row of the selection table.
#[derive(Clone, Copy)]
pub struct KindEntry {
    pub kind: CommandKind,
    pub select: fn(&mut Decoder<'_>) -> Result<Request, SelectError>,
}

impl std::fmt::Debug for KindEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KindEntry").field("kind", &self.kind).finish_non_exhaustive()
    }
}

fn populate_valid<'a, R: Arbitrary<'a>>(
    d: &mut Decoder<'a>,
    validate: Validator<R>,
    wrap: fn(R) -> Request,
) -> Result<Request, SelectError> {
    let r: R = d.populate()?;
    validate(&r)?;
    Ok(wrap(r))
}

fn require(kind: CommandKind, fields: &[(&'static str, bool)]) -> Result<(), ValidationError> {
    match fields.iter().find(|(_, present)| !present) {
        Some((field, _)) => Err(ValidationError::Empty { kind, field }),
        None => Ok(()),
    }
}

fn accept<R>(_: &R) -> Result<(), ValidationError> {
    Ok(())
}

fn validate_range(r: &RangeRequest) -> Result<(), ValidationError> {
    require(CommandKind::Range, &[("key", !r.key.is_empty()), ("range_end", !r.range_end.is_empty())])
}

fn validate_put(r: &PutRequest) -> Result<(), ValidationError> {
    require(CommandKind::Put, &[("key", !r.key.is_empty()), ("value", !r.value.is_empty())])
}

fn validate_delete_range(r: &DeleteRangeRequest) -> Result<(), ValidationError> {
    require(CommandKind::DeleteRange, &[("key", !r.key.is_empty()), ("range_end", !r.range_end.is_empty())])
}

fn validate_txn(r: &TxnRequest) -> Result<(), ValidationError> {
    require(
        CommandKind::Txn,
        &[("compare", !r.compare.is_empty()), ("success", !r.success.is_empty()), ("failure", !r.failure.is_empty())],
    )
}

fn validate_lease_grant(r: &LeaseGrantRequest) -> Result<(), ValidationError> {
    require(CommandKind::LeaseGrant, &[("ttl", r.ttl != 0), ("id", r.id != 0)])
}

#[cfg(not(feature = "strict-lease-revoke"))]
fn validate_lease_revoke(_: &LeaseRevokeRequest) -> Result<(), ValidationError> {
    Err(ValidationError::Rejected(CommandKind::LeaseRevoke))
}

#[cfg(feature = "strict-lease-revoke")]
fn validate_lease_revoke(r: &LeaseRevokeRequest) -> Result<(), ValidationError> {
    require(CommandKind::LeaseRevoke, &[("id", r.id != 0)])
}

fn validate_lease_checkpoint(r: &LeaseCheckpointRequest) -> Result<(), ValidationError> {
    require(CommandKind::LeaseCheckpoint, &[("checkpoints", !r.checkpoints.is_empty())])
}

fn validate_authenticate(r: &InternalAuthenticateRequest) -> Result<(), ValidationError> {
    require(
        CommandKind::Authenticate,
        &[
            ("name", !r.name.is_empty()),
            ("password", !r.password.is_empty()),
            ("simple_token", !r.simple_token.is_empty()),
        ],
    )
}

fn validate_user_add(r: &AuthUserAddRequest) -> Result<(), ValidationError> {
    require(
        CommandKind::AuthUserAdd,
        &[
            ("name", !r.name.is_empty()),
            ("password", !r.password.is_empty()),
            ("hashed_password", !r.hashed_password.is_empty()),
        ],
    )
}

fn validate_user_delete(r: &AuthUserDeleteRequest) -> Result<(), ValidationError> {
    require(CommandKind::AuthUserDelete, &[("name", !r.name.is_empty())])
}

fn validate_user_get(r: &AuthUserGetRequest) -> Result<(), ValidationError> {
    require(CommandKind::AuthUserGet, &[("name", !r.name.is_empty())])
}

fn validate_user_change_password(r: &AuthUserChangePasswordRequest) -> Result<(), ValidationError> {
    require(
        CommandKind::AuthUserChangePassword,
        &[
            ("name", !r.name.is_empty()),
            ("password", !r.password.is_empty()),
            ("hashed_password", !r.hashed_password.is_empty()),
        ],
    )
}

fn validate_user_grant_role(r: &AuthUserGrantRoleRequest) -> Result<(), ValidationError> {
    require(CommandKind::AuthUserGrantRole, &[("user", !r.user.is_empty()), ("role", !r.role.is_empty())])
}

fn validate_user_revoke_role(r: &AuthUserRevokeRoleRequest) -> Result<(), ValidationError> {
    require(CommandKind::AuthUserRevokeRole, &[("name", !r.name.is_empty()), ("role", !r.role.is_empty())])
}

fn validate_role_add(r: &AuthRoleAddRequest) -> Result<(), ValidationError> {
    require(CommandKind::AuthRoleAdd, &[("name", !r.name.is_empty())])
}

fn validate_role_delete(r: &AuthRoleDeleteRequest) -> Result<(), ValidationError> {
    require(CommandKind::AuthRoleDelete, &[("role", !r.role.is_empty())])
}

fn validate_role_get(r: &AuthRoleGetRequest) -> Result<(), ValidationError> {
    require(CommandKind::AuthRoleGet, &[("role", !r.role.is_empty())])
}

fn validate_role_grant_permission(r: &AuthRoleGrantPermissionRequest) -> Result<(), ValidationError> {
    require(CommandKind::AuthRoleGrantPermission, &[("name", !r.name.is_empty()), ("perm", r.perm.is_some())])
}

fn validate_role_revoke_permission(r: &AuthRoleRevokePermissionRequest) -> Result<(), ValidationError> {
    require(
        CommandKind::AuthRoleRevokePermission,
        &[("role", !r.role.is_empty()), ("key", !r.key.is_empty()), ("range_end", !r.range_end.is_empty())],
    )
}

fn validate_cluster_version_set(r: &ClusterVersionSetRequest) -> Result<(), ValidationError> {
    require(CommandKind::ClusterVersionSet, &[("ver", !r.ver.is_empty())])
}

fn validate_cluster_member_attr_set(r: &ClusterMemberAttrSetRequest) -> Result<(), ValidationError> {
    require(CommandKind::ClusterMemberAttrSet, &[("member_attributes", r.member_attributes.is_some())])
}

fn validate_downgrade_info_set(r: &DowngradeInfoSetRequest) -> Result<(), ValidationError> {
    require(CommandKind::DowngradeInfoSet, &[("ver", !r.ver.is_empty())])
}

macro_rules! entry {
    ($kind:ident, $validate:expr) => {
        KindEntry { kind: CommandKind::$kind, select: |d| populate_valid(d, $validate, Request::$kind) }
    };
}

/// Selection table, in `CommandKind::ALL` order.
pub static KIND_TABLE: [KindEntry; CommandKind::COUNT] = [
    entry!(Range, validate_range),
    entry!(Put, validate_put),
    entry!(DeleteRange, validate_delete_range),
    entry!(Txn, validate_txn),
    entry!(Compaction, accept::<CompactionRequest>),
    entry!(LeaseGrant, validate_lease_grant),
    entry!(LeaseRevoke, validate_lease_revoke),
    // Alarm requests are applied without a field check.
    entry!(Alarm, accept::<AlarmRequest>),
    entry!(LeaseCheckpoint, validate_lease_checkpoint),
    entry!(AuthEnable, accept::<AuthEnableRequest>),
    entry!(AuthDisable, accept::<AuthDisableRequest>),
    entry!(AuthStatus, accept::<AuthStatusRequest>),
    entry!(Authenticate, validate_authenticate),
    entry!(AuthUserAdd, validate_user_add),
    entry!(AuthUserDelete, validate_user_delete),
    entry!(AuthUserGet, validate_user_get),
    entry!(AuthUserChangePassword, validate_user_change_password),
    entry!(AuthUserGrantRole, validate_user_grant_role),
    entry!(AuthUserRevokeRole, validate_user_revoke_role),
    entry!(AuthUserList, accept::<AuthUserListRequest>),
    entry!(AuthRoleList, accept::<AuthRoleListRequest>),
    entry!(AuthRoleAdd, validate_role_add),
    entry!(AuthRoleDelete, validate_role_delete),
    entry!(AuthRoleGet, validate_role_get),
    entry!(AuthRoleGrantPermission, validate_role_grant_permission),
    entry!(AuthRoleRevokePermission, validate_role_revoke_permission),
    entry!(ClusterVersionSet, validate_cluster_version_set),
    entry!(ClusterMemberAttrSet, validate_cluster_member_attr_set),
    entry!(DowngradeInfoSet, validate_downgrade_info_set),
];

/// Picks, populates and validates one request and attaches it to `env`.
/// Nothing outside `env` and the decoder cursor changes.
pub fn select_request(d: &mut Decoder<'_>, env: &mut InternalRaftRequest) -> Result<CommandKind, SelectError> {
    let n = d.next_int()?;
    let entry = &KIND_TABLE[n % KIND_TABLE.len()];
    let req = (entry.select)(d)?;
    env.attach(req)?;
    tracing::trace!(kind = %entry.kind, "selected request");
    Ok(entry.kind)
}

/// Builds a fresh envelope around one selected request.
pub fn select_envelope(d: &mut Decoder<'_>) -> Result<InternalRaftRequest, SelectError> {
    let mut env = InternalRaftRequest::default();
    select_request(d, &mut env)?;
    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_lists_every_kind_once_in_order() {
        let kinds: Vec<CommandKind> = KIND_TABLE.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, CommandKind::ALL.to_vec());
    }

    #[test]
    fn selector_byte_wraps_modulo_table_length() {
        // 29 maps back to Range; a zeroed Range has an empty key.
        let data = [29u8, 0, 0, 0, 0];
        let err = select_envelope(&mut Decoder::new(&data)).unwrap_err();
        assert_eq!(err, SelectError::Invalid(ValidationError::Empty { kind: CommandKind::Range, field: "key" }));
    }

    #[test]
    fn request_without_required_fields_selects() {
        // Index 9 is AuthEnable, which has no fields to check.
        let env = select_envelope(&mut Decoder::new(&[9, 0])).unwrap();
        assert_eq!(env.kind(), Some(CommandKind::AuthEnable));
        assert_eq!(env.populated_slots(), 1);
    }

    #[test]
    fn second_selection_into_same_envelope_is_refused() {
        let mut env = InternalRaftRequest::default();
        select_request(&mut Decoder::new(&[9, 0]), &mut env).unwrap();
        let err = select_request(&mut Decoder::new(&[10, 0]), &mut env).unwrap_err();
        assert!(matches!(err, SelectError::Occupied(_)));
        assert_eq!(env.kind(), Some(CommandKind::AuthEnable));
    }

    #[test]
    fn missing_kind_payload_is_a_decode_error() {
        let err = select_envelope(&mut Decoder::new(&[9])).unwrap_err();
        assert_eq!(err, SelectError::Decode(DecodeError::Exhausted));
    }

    #[cfg(not(feature = "strict-lease-revoke"))]
    #[test]
    fn lease_revoke_is_always_rejected() {
        let valid = LeaseRevokeRequest { id: 42 };
        assert_eq!(validate_lease_revoke(&valid), Err(ValidationError::Rejected(CommandKind::LeaseRevoke)));
    }

    #[cfg(feature = "strict-lease-revoke")]
    #[test]
    fn strict_lease_revoke_needs_an_id() {
        let err = ValidationError::Empty { kind: CommandKind::LeaseRevoke, field: "id" };
        assert_eq!(validate_lease_revoke(&LeaseRevokeRequest { id: 0 }), Err(err));
        assert_eq!(validate_lease_revoke(&LeaseRevokeRequest { id: 42 }), Ok(()));
        let env = select_envelope(&mut Decoder::new(&[6, 42, 0, 0, 0, 0, 0, 0, 0])).unwrap();
        assert_eq!(env.kind(), Some(CommandKind::LeaseRevoke));
    }

    #[test]
    fn zeroed_requests_name_their_first_missing_field() {
        let cases = [
            (validate_range(&Default::default()), CommandKind::Range, "key"),
            (validate_put(&Default::default()), CommandKind::Put, "key"),
            (validate_delete_range(&Default::default()), CommandKind::DeleteRange, "key"),
            (validate_txn(&Default::default()), CommandKind::Txn, "compare"),
            (validate_lease_grant(&Default::default()), CommandKind::LeaseGrant, "ttl"),
            (validate_lease_checkpoint(&Default::default()), CommandKind::LeaseCheckpoint, "checkpoints"),
            (validate_authenticate(&Default::default()), CommandKind::Authenticate, "name"),
            (validate_user_add(&Default::default()), CommandKind::AuthUserAdd, "name"),
            (validate_user_delete(&Default::default()), CommandKind::AuthUserDelete, "name"),
            (validate_user_get(&Default::default()), CommandKind::AuthUserGet, "name"),
            (validate_user_change_password(&Default::default()), CommandKind::AuthUserChangePassword, "name"),
            (validate_user_grant_role(&Default::default()), CommandKind::AuthUserGrantRole, "user"),
            (validate_user_revoke_role(&Default::default()), CommandKind::AuthUserRevokeRole, "name"),
            (validate_role_add(&Default::default()), CommandKind::AuthRoleAdd, "name"),
            (validate_role_delete(&Default::default()), CommandKind::AuthRoleDelete, "role"),
            (validate_role_get(&Default::default()), CommandKind::AuthRoleGet, "role"),
            (validate_role_revoke_permission(&Default::default()), CommandKind::AuthRoleRevokePermission, "role"),
            (validate_cluster_version_set(&Default::default()), CommandKind::ClusterVersionSet, "ver"),
            (
                validate_cluster_member_attr_set(&Default::default()),
                CommandKind::ClusterMemberAttrSet,
                "member_attributes",
            ),
            (validate_downgrade_info_set(&Default::default()), CommandKind::DowngradeInfoSet, "ver"),
        ];
        for (result, kind, field) in cases {
            assert_eq!(result, Err(ValidationError::Empty { kind, field }), "{kind}");
        }

        // A named role without a permission.
        let grant = AuthRoleGrantPermissionRequest { name: "r".into(), ..Default::default() };
        assert_eq!(
            validate_role_grant_permission(&grant),
            Err(ValidationError::Empty { kind: CommandKind::AuthRoleGrantPermission, field: "perm" })
        );
    }

    #[test]
    fn lease_grant_needs_ttl_and_id() {
        assert!(validate_lease_grant(&LeaseGrantRequest { ttl: 5, id: 0 }).is_err());
        assert!(validate_lease_grant(&LeaseGrantRequest { ttl: 0, id: 5 }).is_err());
        assert!(validate_lease_grant(&LeaseGrantRequest { ttl: 5, id: 5 }).is_ok());
    }
}
