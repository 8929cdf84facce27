//! Request messages carried inside an `InternalRaftRequest`.
//!
//! Every request derives `Arbitrary`, which is the type-directed rule the
//! harness decoder uses to populate a zero value from fuzz bytes. Enumerated
//! fields stay raw `i32` tags so out-of-range values reach the apply layer.

use arbitrary::Arbitrary;
use serde::{Deserialize, Serialize};

use crate::primitives::Attributes;
use crate::types::{LeaseId, MemberId, Revision};

// --- Key space ----------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct RangeRequest {
    #[serde(with = "serde_bytes")]
    pub key: Vec<u8>,
    /// Empty: single key. `[0]`: every key >= `key`. Otherwise `[key, range_end)`.
    #[serde(with = "serde_bytes")]
    pub range_end: Vec<u8>,
    pub limit: i64,
    pub revision: Revision,
    pub sort_order: i32,
    pub sort_target: i32,
    pub serializable: bool,
    pub keys_only: bool,
    pub count_only: bool,
    pub min_mod_revision: Revision,
    pub max_mod_revision: Revision,
    pub min_create_revision: Revision,
    pub max_create_revision: Revision,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct PutRequest {
    #[serde(with = "serde_bytes")]
    pub key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub value: Vec<u8>,
    pub lease: LeaseId,
    pub prev_kv: bool,
    pub ignore_value: bool,
    pub ignore_lease: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct DeleteRangeRequest {
    #[serde(with = "serde_bytes")]
    pub key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub range_end: Vec<u8>,
    pub prev_kv: bool,
}

/// Right-hand side of a txn comparison.
#[derive(Debug, Clone, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub enum CompareTarget {
    Version(i64),
    CreateRevision(Revision),
    ModRevision(Revision),
    Value(#[serde(with = "serde_bytes")] Vec<u8>),
    Lease(LeaseId),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct Compare {
    /// Raw `CompareResult` tag.
    pub result: i32,
    #[serde(with = "serde_bytes")]
    pub key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub range_end: Vec<u8>,
    pub target: Option<CompareTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub enum OpRequest {
    Range(RangeRequest),
    Put(PutRequest),
    DeleteRange(DeleteRangeRequest),
    Txn(TxnRequest),
}

/// One branch operation of a txn. An empty union is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct RequestOp {
    pub request: Option<OpRequest>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct TxnRequest {
    pub compare: Vec<Compare>,
    pub success: Vec<RequestOp>,
    pub failure: Vec<RequestOp>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct CompactionRequest {
    pub revision: Revision,
    pub physical: bool,
}

// --- Leases and alarms --------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct LeaseGrantRequest {
    pub ttl: i64,
    pub id: LeaseId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct LeaseRevokeRequest {
    pub id: LeaseId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct LeaseCheckpoint {
    pub id: LeaseId,
    pub remaining_ttl: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct LeaseCheckpointRequest {
    pub checkpoints: Vec<LeaseCheckpoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct AlarmRequest {
    /// Raw `AlarmAction` tag.
    pub action: i32,
    /// Zero addresses every member on `Get`.
    pub member_id: MemberId,
    /// Raw `AlarmType` tag.
    pub alarm: i32,
}

// --- Auth ---------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct AuthEnableRequest {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct AuthDisableRequest {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct AuthStatusRequest {}

/// Authentication as replicated through the log: the leader has already
/// checked the password and minted `simple_token`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct InternalAuthenticateRequest {
    pub name: String,
    pub password: String,
    pub simple_token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct UserAddOptions {
    pub no_password: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct AuthUserAddRequest {
    pub name: String,
    pub password: String,
    pub options: Option<UserAddOptions>,
    pub hashed_password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct AuthUserDeleteRequest {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct AuthUserGetRequest {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct AuthUserChangePasswordRequest {
    pub name: String,
    pub password: String,
    pub hashed_password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct AuthUserGrantRoleRequest {
    pub user: String,
    pub role: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct AuthUserRevokeRoleRequest {
    pub name: String,
    pub role: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct AuthUserListRequest {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct AuthRoleListRequest {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct AuthRoleAddRequest {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct AuthRoleDeleteRequest {
    pub role: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct AuthRoleGetRequest {
    pub role: String,
}

/// Permission as it appears on the wire; `perm_type` is a raw tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct Permission {
    pub perm_type: i32,
    #[serde(with = "serde_bytes")]
    pub key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub range_end: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct AuthRoleGrantPermissionRequest {
    pub name: String,
    pub perm: Option<Permission>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct AuthRoleRevokePermissionRequest {
    pub role: String,
    #[serde(with = "serde_bytes")]
    pub key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub range_end: Vec<u8>,
}

// --- Cluster metadata ---------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct ClusterVersionSetRequest {
    pub ver: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct ClusterMemberAttrSetRequest {
    pub member_id: MemberId,
    pub member_attributes: Option<Attributes>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct DowngradeInfoSetRequest {
    pub enabled: bool,
    pub ver: String,
}
