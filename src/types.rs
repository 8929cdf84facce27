//!
//! Wire-level numeric types shared by requests, records and the stores.
//!
//! Requests carry their enumerations as raw `i32` tags, the same way they
//! travel on the wire. Fuzzed requests routinely hold tags outside the known
//! range, so every enum here is decoded with `TryFrom<i32>` at the point of use.

/// Raft member identity.
pub type MemberId = u64;

/// MVCC main revision.
pub type Revision = i64;

/// Lease identity. `NO_LEASE` marks keys without a lease.
pub type LeaseId = i64;

pub const NO_LEASE: LeaseId = 0;

/// Raft log entry types.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum EntryType {
    Normal = 0,
    ConfChange = 1,
    ConfChangeV2 = 2,
}

impl TryFrom<i32> for EntryType {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EntryType::Normal),
            1 => Ok(EntryType::ConfChange),
            2 => Ok(EntryType::ConfChangeV2),
            other => Err(other),
        }
    }
}

/// Membership change carried by a `ConfChange` entry.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ConfChangeType {
    AddNode = 0,
    RemoveNode = 1,
    UpdateNode = 2,
    AddLearnerNode = 3,
}

impl TryFrom<i32> for ConfChangeType {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ConfChangeType::AddNode),
            1 => Ok(ConfChangeType::RemoveNode),
            2 => Ok(ConfChangeType::UpdateNode),
            3 => Ok(ConfChangeType::AddLearnerNode),
            other => Err(other),
        }
    }
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortOrder {
    None = 0,
    Ascend = 1,
    Descend = 2,
}

impl TryFrom<i32> for SortOrder {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SortOrder::None),
            1 => Ok(SortOrder::Ascend),
            2 => Ok(SortOrder::Descend),
            other => Err(other),
        }
    }
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortTarget {
    Key = 0,
    Version = 1,
    Create = 2,
    Mod = 3,
    Value = 4,
}

impl TryFrom<i32> for SortTarget {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SortTarget::Key),
            1 => Ok(SortTarget::Version),
            2 => Ok(SortTarget::Create),
            3 => Ok(SortTarget::Mod),
            4 => Ok(SortTarget::Value),
            other => Err(other),
        }
    }
}

/// Comparison operator of a txn guard.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareResult {
    Equal = 0,
    Greater = 1,
    Less = 2,
    NotEqual = 3,
}

impl TryFrom<i32> for CompareResult {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CompareResult::Equal),
            1 => Ok(CompareResult::Greater),
            2 => Ok(CompareResult::Less),
            3 => Ok(CompareResult::NotEqual),
            other => Err(other),
        }
    }
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum AlarmAction {
    Get = 0,
    Activate = 1,
    Deactivate = 2,
}

impl TryFrom<i32> for AlarmAction {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AlarmAction::Get),
            1 => Ok(AlarmAction::Activate),
            2 => Ok(AlarmAction::Deactivate),
            other => Err(other),
        }
    }
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum AlarmType {
    None = 0,
    NoSpace = 1,
    Corrupt = 2,
}

impl TryFrom<i32> for AlarmType {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AlarmType::None),
            1 => Ok(AlarmType::NoSpace),
            2 => Ok(AlarmType::Corrupt),
            other => Err(other),
        }
    }
}

/// Access granted by a role permission.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PermissionType {
    Read = 0,
    Write = 1,
    ReadWrite = 2,
}

impl TryFrom<i32> for PermissionType {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PermissionType::Read),
            1 => Ok(PermissionType::Write),
            2 => Ok(PermissionType::ReadWrite),
            other => Err(other),
        }
    }
}

impl PermissionType {
    pub fn allows_read(self) -> bool {
        matches!(self, PermissionType::Read | PermissionType::ReadWrite)
    }

    pub fn allows_write(self) -> bool {
        matches!(self, PermissionType::Write | PermissionType::ReadWrite)
    }
}
