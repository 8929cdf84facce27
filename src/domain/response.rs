//! Results returned by the apply layer.

use crate::error::ServerError;
use crate::primitives::{KeyValue, Member};
use crate::types::{AlarmType, LeaseId, MemberId, Revision};

use super::request::Permission;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeader {
    pub member_id: MemberId,
    /// Store revision after the request was applied.
    pub revision: Revision,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeResponse {
    pub kvs: Vec<KeyValue>,
    pub more: bool,
    pub count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutResponse {
    pub prev_kv: Option<KeyValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteRangeResponse {
    pub deleted: i64,
    pub prev_kvs: Vec<KeyValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOp {
    Range(RangeResponse),
    Put(PutResponse),
    DeleteRange(DeleteRangeResponse),
    Txn(TxnResponse),
    /// Reply to an empty op union.
    Empty,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxnResponse {
    pub succeeded: bool,
    pub responses: Vec<ResponseOp>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmMember {
    pub member_id: MemberId,
    pub alarm: AlarmType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    Range(RangeResponse),
    Put(PutResponse),
    DeleteRange(DeleteRangeResponse),
    Txn(TxnResponse),
    LeaseGrant { id: LeaseId, ttl: i64 },
    Alarm(Vec<AlarmMember>),
    AuthStatus { enabled: bool, auth_revision: u64 },
    Authenticate { token: String },
    UserGet { roles: Vec<String> },
    UserList { users: Vec<String> },
    RoleGet { perms: Vec<Permission> },
    RoleList { roles: Vec<String> },
    Members(Vec<Member>),
    /// Acknowledgement for requests without a payload.
    Ack,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub header: ResponseHeader,
    pub body: ResponseBody,
}

/// Outcome of applying one envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyResult {
    pub resp: Option<Response>,
    pub err: Option<ServerError>,
}

impl ApplyResult {
    pub fn ok(resp: Response) -> Self {
        ApplyResult { resp: Some(resp), err: None }
    }

    pub fn err(err: ServerError) -> Self {
        ApplyResult { resp: None, err: Some(err) }
    }

    pub fn from_result(result: Result<Response, ServerError>) -> Self {
        match result {
            Ok(resp) => ApplyResult::ok(resp),
            Err(err) => ApplyResult::err(err),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.err.is_none()
    }
}
