//! The command envelope replicated through the raft log.

use std::fmt;

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::request::*;

/// Identity of one of the 29 state-machine commands.
///
/// `CommandKind::ALL` is the selection table used by the harness. Its order
/// decides which kind a given fuzz byte maps to, so reordering it invalidates
/// every existing corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CommandKind {
    Range,
    Put,
    DeleteRange,
    Txn,
    Compaction,
    LeaseGrant,
    LeaseRevoke,
    Alarm,
    LeaseCheckpoint,
    AuthEnable,
    AuthDisable,
    AuthStatus,
    Authenticate,
    AuthUserAdd,
    AuthUserDelete,
    AuthUserGet,
    AuthUserChangePassword,
    AuthUserGrantRole,
    AuthUserRevokeRole,
    AuthUserList,
    AuthRoleList,
    AuthRoleAdd,
    AuthRoleDelete,
    AuthRoleGet,
    AuthRoleGrantPermission,
    AuthRoleRevokePermission,
    ClusterVersionSet,
    ClusterMemberAttrSet,
    DowngradeInfoSet,
}

impl CommandKind {
    pub const COUNT: usize = 29;

    pub const ALL: [CommandKind; CommandKind::COUNT] = [
        CommandKind::Range,
        CommandKind::Put,
        CommandKind::DeleteRange,
        CommandKind::Txn,
        CommandKind::Compaction,
        CommandKind::LeaseGrant,
        CommandKind::LeaseRevoke,
        CommandKind::Alarm,
        CommandKind::LeaseCheckpoint,
        CommandKind::AuthEnable,
        CommandKind::AuthDisable,
        CommandKind::AuthStatus,
        CommandKind::Authenticate,
        CommandKind::AuthUserAdd,
        CommandKind::AuthUserDelete,
        CommandKind::AuthUserGet,
        CommandKind::AuthUserChangePassword,
        CommandKind::AuthUserGrantRole,
        CommandKind::AuthUserRevokeRole,
        CommandKind::AuthUserList,
        CommandKind::AuthRoleList,
        CommandKind::AuthRoleAdd,
        CommandKind::AuthRoleDelete,
        CommandKind::AuthRoleGet,
        CommandKind::AuthRoleGrantPermission,
        CommandKind::AuthRoleRevokePermission,
        CommandKind::ClusterVersionSet,
        CommandKind::ClusterMemberAttrSet,
        CommandKind::DowngradeInfoSet,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CommandKind::Range => "Range",
            CommandKind::Put => "Put",
            CommandKind::DeleteRange => "DeleteRange",
            CommandKind::Txn => "Txn",
            CommandKind::Compaction => "Compaction",
            CommandKind::LeaseGrant => "LeaseGrant",
            CommandKind::LeaseRevoke => "LeaseRevoke",
            CommandKind::Alarm => "Alarm",
            CommandKind::LeaseCheckpoint => "LeaseCheckpoint",
            CommandKind::AuthEnable => "AuthEnable",
            CommandKind::AuthDisable => "AuthDisable",
            CommandKind::AuthStatus => "AuthStatus",
            CommandKind::Authenticate => "Authenticate",
            CommandKind::AuthUserAdd => "AuthUserAdd",
            CommandKind::AuthUserDelete => "AuthUserDelete",
            CommandKind::AuthUserGet => "AuthUserGet",
            CommandKind::AuthUserChangePassword => "AuthUserChangePassword",
            CommandKind::AuthUserGrantRole => "AuthUserGrantRole",
            CommandKind::AuthUserRevokeRole => "AuthUserRevokeRole",
            CommandKind::AuthUserList => "AuthUserList",
            CommandKind::AuthRoleList => "AuthRoleList",
            CommandKind::AuthRoleAdd => "AuthRoleAdd",
            CommandKind::AuthRoleDelete => "AuthRoleDelete",
            CommandKind::AuthRoleGet => "AuthRoleGet",
            CommandKind::AuthRoleGrantPermission => "AuthRoleGrantPermission",
            CommandKind::AuthRoleRevokePermission => "AuthRoleRevokePermission",
            CommandKind::ClusterVersionSet => "ClusterVersionSet",
            CommandKind::ClusterMemberAttrSet => "ClusterMemberAttrSet",
            CommandKind::DowngradeInfoSet => "DowngradeInfoSet",
        }
    }

    /// Kinds that only read state and may skip the apply loop when nobody
    /// waits for their result.
    pub fn is_read_only(self) -> bool {
        matches!(
            self,
            CommandKind::Range
                | CommandKind::AuthStatus
                | CommandKind::AuthUserGet
                | CommandKind::AuthUserList
                | CommandKind::AuthRoleGet
                | CommandKind::AuthRoleList
        )
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The single populated slot of an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Range(RangeRequest),
    Put(PutRequest),
    DeleteRange(DeleteRangeRequest),
    Txn(TxnRequest),
    Compaction(CompactionRequest),
    LeaseGrant(LeaseGrantRequest),
    LeaseRevoke(LeaseRevokeRequest),
    Alarm(AlarmRequest),
    LeaseCheckpoint(LeaseCheckpointRequest),
    AuthEnable(AuthEnableRequest),
    AuthDisable(AuthDisableRequest),
    AuthStatus(AuthStatusRequest),
    Authenticate(InternalAuthenticateRequest),
    AuthUserAdd(AuthUserAddRequest),
    AuthUserDelete(AuthUserDeleteRequest),
    AuthUserGet(AuthUserGetRequest),
    AuthUserChangePassword(AuthUserChangePasswordRequest),
    AuthUserGrantRole(AuthUserGrantRoleRequest),
    AuthUserRevokeRole(AuthUserRevokeRoleRequest),
    AuthUserList(AuthUserListRequest),
    AuthRoleList(AuthRoleListRequest),
    AuthRoleAdd(AuthRoleAddRequest),
    AuthRoleDelete(AuthRoleDeleteRequest),
    AuthRoleGet(AuthRoleGetRequest),
    AuthRoleGrantPermission(AuthRoleGrantPermissionRequest),
    AuthRoleRevokePermission(AuthRoleRevokePermissionRequest),
    ClusterVersionSet(ClusterVersionSetRequest),
    ClusterMemberAttrSet(ClusterMemberAttrSetRequest),
    DowngradeInfoSet(DowngradeInfoSetRequest),
}

impl Request {
    pub fn kind(&self) -> CommandKind {
        match self {
            Request::Range(_) => CommandKind::Range,
            Request::Put(_) => CommandKind::Put,
            Request::DeleteRange(_) => CommandKind::DeleteRange,
            Request::Txn(_) => CommandKind::Txn,
            Request::Compaction(_) => CommandKind::Compaction,
            Request::LeaseGrant(_) => CommandKind::LeaseGrant,
            Request::LeaseRevoke(_) => CommandKind::LeaseRevoke,
            Request::Alarm(_) => CommandKind::Alarm,
            Request::LeaseCheckpoint(_) => CommandKind::LeaseCheckpoint,
            Request::AuthEnable(_) => CommandKind::AuthEnable,
            Request::AuthDisable(_) => CommandKind::AuthDisable,
            Request::AuthStatus(_) => CommandKind::AuthStatus,
            Request::Authenticate(_) => CommandKind::Authenticate,
            Request::AuthUserAdd(_) => CommandKind::AuthUserAdd,
            Request::AuthUserDelete(_) => CommandKind::AuthUserDelete,
            Request::AuthUserGet(_) => CommandKind::AuthUserGet,
            Request::AuthUserChangePassword(_) => CommandKind::AuthUserChangePassword,
            Request::AuthUserGrantRole(_) => CommandKind::AuthUserGrantRole,
            Request::AuthUserRevokeRole(_) => CommandKind::AuthUserRevokeRole,
            Request::AuthUserList(_) => CommandKind::AuthUserList,
            Request::AuthRoleList(_) => CommandKind::AuthRoleList,
            Request::AuthRoleAdd(_) => CommandKind::AuthRoleAdd,
            Request::AuthRoleDelete(_) => CommandKind::AuthRoleDelete,
            Request::AuthRoleGet(_) => CommandKind::AuthRoleGet,
            Request::AuthRoleGrantPermission(_) => CommandKind::AuthRoleGrantPermission,
            Request::AuthRoleRevokePermission(_) => CommandKind::AuthRoleRevokePermission,
            Request::ClusterVersionSet(_) => CommandKind::ClusterVersionSet,
            Request::ClusterMemberAttrSet(_) => CommandKind::ClusterMemberAttrSet,
            Request::DowngradeInfoSet(_) => CommandKind::DowngradeInfoSet,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    pub id: u64,
    /// Authenticated user on whose behalf the request runs; empty when auth is off.
    pub username: String,
    pub auth_revision: u64,
}

/// Container holding at most one command, the unit handed to the applier.
///
/// On the wire an envelope is a tuple: the id, a slot byte, the request body
/// when the slot is non-zero, then the header when there is one. Slot `0` is
/// an empty envelope; any other value `s` selects `CommandKind::ALL[(s - 1) % 29]`.
/// A missing or undecodable header reads as none.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InternalRaftRequest {
    pub header: Option<RequestHeader>,
    pub id: u64,
    request: Option<Request>,
}

/// Returned when a second command is attached to an envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("envelope already carries a {existing} request; refusing {rejected}")]
pub struct SlotOccupied {
    pub existing: CommandKind,
    pub rejected: CommandKind,
}

impl InternalRaftRequest {
    pub fn new(request: Request) -> Self {
        InternalRaftRequest { request: Some(request), ..Self::default() }
    }

    /// Fills the envelope's slot. The slot is chosen once and never replaced.
    pub fn attach(&mut self, request: Request) -> Result<(), SlotOccupied> {
        if let Some(existing) = &self.request {
            return Err(SlotOccupied { existing: existing.kind(), rejected: request.kind() });
        }
        self.request = Some(request);
        Ok(())
    }

    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    pub fn txn_mut(&mut self) -> Option<&mut TxnRequest> {
        match &mut self.request {
            Some(Request::Txn(txn)) => Some(txn),
            _ => None,
        }
    }

    pub fn kind(&self) -> Option<CommandKind> {
        self.request.as_ref().map(Request::kind)
    }

    pub fn populated_slots(&self) -> usize {
        usize::from(self.request.is_some())
    }

    pub fn header_id(&self) -> u64 {
        self.header.as_ref().map_or(self.id, |h| h.id)
    }

    pub fn username(&self) -> &str {
        self.header.as_ref().map_or("", |h| h.username.as_str())
    }
}

const ENVELOPE_FIELDS: usize = 4;

fn slot_kind(slot: u8) -> Option<CommandKind> {
    let index = usize::from(slot.checked_sub(1)?);
    Some(CommandKind::ALL[index % CommandKind::COUNT])
}

fn next_body<'de, A: SeqAccess<'de>, T: Deserialize<'de>>(seq: &mut A) -> Result<T, A::Error> {
    seq.next_element()?.ok_or_else(|| de::Error::custom("envelope ends before its request body"))
}

macro_rules! request_codec {
    ($($kind:ident),* $(,)?) => {
        fn serialize_body<T: SerializeTuple>(t: &mut T, request: &Request) -> Result<(), T::Error> {
            match request {
                $(Request::$kind(body) => t.serialize_element(body),)*
            }
        }

        fn deserialize_body<'de, A: SeqAccess<'de>>(seq: &mut A, kind: CommandKind) -> Result<Request, A::Error> {
            Ok(match kind {
                $(CommandKind::$kind => Request::$kind(next_body(seq)?),)*
            })
        }
    };
}

request_codec!(
    Range,
    Put,
    DeleteRange,
    Txn,
    Compaction,
    LeaseGrant,
    LeaseRevoke,
    Alarm,
    LeaseCheckpoint,
    AuthEnable,
    AuthDisable,
    AuthStatus,
    Authenticate,
    AuthUserAdd,
    AuthUserDelete,
    AuthUserGet,
    AuthUserChangePassword,
    AuthUserGrantRole,
    AuthUserRevokeRole,
    AuthUserList,
    AuthRoleList,
    AuthRoleAdd,
    AuthRoleDelete,
    AuthRoleGet,
    AuthRoleGrantPermission,
    AuthRoleRevokePermission,
    ClusterVersionSet,
    ClusterMemberAttrSet,
    DowngradeInfoSet,
);

impl Serialize for InternalRaftRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = 2 + usize::from(self.request.is_some()) + usize::from(self.header.is_some());
        let mut t = serializer.serialize_tuple(len)?;
        t.serialize_element(&self.id)?;
        // `ALL` lists the kinds in declaration order.
        let slot = self.request.as_ref().map_or(0, |r| r.kind() as u8 + 1);
        t.serialize_element(&slot)?;
        if let Some(request) = &self.request {
            serialize_body(&mut t, request)?;
        }
        if let Some(header) = &self.header {
            t.serialize_element(header)?;
        }
        t.end()
    }
}

struct EnvelopeVisitor;

impl<'de> Visitor<'de> for EnvelopeVisitor {
    type Value = InternalRaftRequest;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an internal raft request tuple")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<InternalRaftRequest, A::Error> {
        let id = seq.next_element()?.ok_or_else(|| de::Error::invalid_length(0, &self))?;
        let slot: u8 = seq.next_element()?.ok_or_else(|| de::Error::invalid_length(1, &self))?;
        let request = match slot_kind(slot) {
            Some(kind) => Some(deserialize_body(&mut seq, kind)?),
            None => None,
        };
        let header = seq.next_element::<RequestHeader>().ok().flatten();
        Ok(InternalRaftRequest { header, id, request })
    }
}

impl<'de> Deserialize<'de> for InternalRaftRequest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_tuple(ENVELOPE_FIELDS, EnvelopeVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_lists_kinds_in_declaration_order() {
        for (i, kind) in CommandKind::ALL.iter().enumerate() {
            assert_eq!(*kind as usize, i, "{kind}");
        }
    }

    #[test]
    fn slot_byte_wraps_over_the_kind_table() {
        assert_eq!(slot_kind(0), None);
        assert_eq!(slot_kind(1), Some(CommandKind::Range));
        assert_eq!(slot_kind(29), Some(CommandKind::DowngradeInfoSet));
        assert_eq!(slot_kind(30), Some(CommandKind::Range));
        assert_eq!(slot_kind(255), Some(CommandKind::ALL[254 % 29]));
    }

    #[test]
    fn envelope_survives_the_entry_codec() {
        let mut env = InternalRaftRequest::new(Request::Put(PutRequest {
            key: b"k".to_vec(),
            value: b"v".to_vec(),
            ..PutRequest::default()
        }));
        env.id = 42;
        env.header = Some(RequestHeader { id: 42, username: "alice".into(), auth_revision: 3 });
        let raw = crate::server::marshal(&env).unwrap();
        let back: InternalRaftRequest = crate::server::must_unmarshal(&raw);
        assert_eq!(back, env);

        let empty = InternalRaftRequest::default();
        assert_eq!(crate::server::marshal(&empty).unwrap(), vec![0, 0]);
    }

    #[test]
    fn bodiless_kinds_decode_from_two_bytes() {
        let env: InternalRaftRequest = crate::server::must_unmarshal(&[7, 10]);
        assert_eq!(env.id, 7);
        assert_eq!(env.kind(), Some(CommandKind::AuthEnable));
        assert_eq!(env.header, None);

        let env: InternalRaftRequest = crate::server::must_unmarshal(&[7, 0, 0xff]);
        assert_eq!(env.kind(), None);
    }

    #[test]
    fn truncated_header_reads_as_none() {
        // AuthStatus, then a header whose username runs past the end.
        let env: InternalRaftRequest = crate::server::must_unmarshal(&[1, 12, 5, 200]);
        assert_eq!(env.kind(), Some(CommandKind::AuthStatus));
        assert_eq!(env.header, None);
    }
}
