//!
//! Defines error types for the server layer driven by the harness.
//!
//! Domain errors travel inside `ApplyResult` rather than unwinding; a request
//! that a correct server rejects is not a finding.

use crate::types::{LeaseId, MemberId};

/// Failures of the bucketed backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The named bucket was never created.
    #[error("bucket {0} does not exist")]
    BucketNotFound(&'static str),
    /// Writing the on-disk snapshot failed.
    #[error("failed to persist backend snapshot: {0}")]
    Persist(String),
    /// The temporary backend directory could not be created.
    #[error("failed to create backend directory: {0}")]
    TempDir(String),
}

/// Errors produced while parsing a `major.minor.patch` version string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    /// The input does not have three dot-separated parts.
    #[error("{0} is not in dotted-tri format")]
    NotDottedTri(String),
    /// One of the numeric parts is not a number.
    #[error("{input}: invalid version number {part:?}")]
    InvalidNumber { input: String, part: String },
    /// A pre-release or build identifier is empty or uses characters outside `[0-9A-Za-z-]`.
    #[error("{0} is not a valid semver identifier")]
    InvalidIdentifier(String),
}

/// Errors returned by the apply layer and the stores behind it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServerError {
    // mvcc
    /// The requested revision was compacted away.
    #[error("mvcc: required revision has been compacted")]
    Compacted,
    /// The requested revision is newer than the current one.
    #[error("mvcc: required revision is a future revision")]
    FutureRev,
    /// No key matched where one was required.
    #[error("etcdserver: key not found")]
    KeyNotFound,

    // lease
    /// The lease does not exist.
    #[error("lease not found: {0}")]
    LeaseNotFound(LeaseId),
    /// The requested TTL exceeds `MAX_LEASE_TTL`.
    #[error("lease TTL {0} is out of range")]
    LeaseTtlOutOfRange(i64),

    // auth
    /// Name or password did not match.
    #[error("auth: authentication failed, invalid user ID or password")]
    AuthFailed,
    /// The operation needs auth turned on.
    #[error("auth: not enabled")]
    AuthNotEnabled,
    /// Auth cannot be enabled without a `root` user.
    #[error("auth: root user does not exist")]
    RootUserNotExist,
    /// The `root` user lacks the `root` role.
    #[error("auth: root user does not have root role")]
    RootRoleNotExist,
    /// A user name was required.
    #[error("auth: user name is empty")]
    UserEmpty,
    /// The user is already registered.
    #[error("auth: user already exists")]
    UserAlreadyExist,
    /// The user is not registered.
    #[error("auth: user name not found")]
    UserNotFound,
    /// A role name was required.
    #[error("auth: role name is empty")]
    RoleEmpty,
    /// The role is already registered.
    #[error("auth: role already exists")]
    RoleAlreadyExist,
    /// The role is not registered.
    #[error("auth: role name not found")]
    RoleNotFound,
    /// The user does not hold the role being revoked.
    #[error("auth: role is not granted to the user")]
    RoleNotGranted,
    /// A grant request carried no permission.
    #[error("auth: permission not given")]
    PermissionNotGiven,
    /// The role holds no permission for the key range being revoked.
    #[error("auth: permission is not granted to the role")]
    PermissionNotGranted,
    /// The caller lacks the permission the request needs.
    #[error("auth: permission denied")]
    PermissionDenied,
    /// The change would strip `root` of its role.
    #[error("auth: invalid auth management")]
    InvalidAuthManagement,
    /// The user was created without a password.
    #[error("auth: authentication is not allowed for a user without password")]
    NoPasswordUser,
    /// The request was authorized against an older auth revision.
    #[error("auth: revision in header is old")]
    AuthOldRevision,

    // membership
    /// The member was removed earlier and cannot return.
    #[error("membership: ID removed")]
    IdRemoved(MemberId),
    /// A member with this ID is already present.
    #[error("membership: ID exists")]
    IdExists(MemberId),
    /// No member has this ID.
    #[error("membership: ID not found")]
    IdNotFound(MemberId),
    /// Another member already advertises one of the peer URLs.
    #[error("membership: peerURL exists")]
    PeerUrlExists,
    /// The conf change and its context name different members.
    #[error("membership: ID mismatch between entry and context")]
    IdMismatch,
    /// Adding the learner would exceed the learner limit.
    #[error("membership: too many learner members in cluster")]
    TooManyLearners,
    /// Only a learner can be promoted.
    #[error("membership: can only promote a learner member")]
    MemberNotLearner,

    // alarms
    /// The alarm type tag is not a known alarm.
    #[error("alarm: unsupported alarm type {0}")]
    UnsupportedAlarm(i32),
    /// The alarm action tag is not a known action.
    #[error("alarm: unsupported alarm action {0}")]
    UnsupportedAlarmAction(i32),

    /// The NOSPACE alarm blocks the request.
    #[error("etcdserver: mvcc: database space exceeded")]
    NoSpace,
    /// The CORRUPT alarm blocks the request.
    #[error("etcdserver: corrupt cluster")]
    Corrupt,

    /// The envelope carries no request.
    #[error("etcdserver: request is empty")]
    EmptyRequest,
    /// The backend failed underneath a store.
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// A stored or requested version did not parse.
    #[error(transparent)]
    Version(#[from] VersionError),
}
