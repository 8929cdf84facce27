use arbitrary::Arbitrary;
use serde::{Deserialize, Serialize};

use crate::types::{LeaseId, MemberId, Revision};

// --- Raft log -----------------------------------------------------------------

/// A committed raft log entry as handed to the apply loop.
/// `entry_type` stays a raw tag; see `types::EntryType`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct Entry {
    pub term: u64,
    pub index: u64,
    pub entry_type: i32,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

/// Voter and learner sets after the latest applied configuration change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfState {
    pub voters: Vec<MemberId>,
    pub learners: Vec<MemberId>,
}

/// Payload of a `ConfChange` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct ConfChange {
    pub id: u64,
    pub change_type: i32,
    pub node_id: MemberId,
    /// JSON-encoded `ConfChangeContext`.
    #[serde(with = "serde_bytes")]
    pub context: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfChangeContext {
    pub member: Member,
    pub is_promote: bool,
}

// --- Membership ---------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct RaftAttributes {
    pub peer_urls: Vec<String>,
    pub is_learner: bool,
}

/// Attributes a member publishes about itself once it has joined.
#[derive(Debug, Clone, Default, PartialEq, Eq, Arbitrary, Serialize, Deserialize)]
pub struct Attributes {
    pub name: String,
    pub client_urls: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub raft_attributes: RaftAttributes,
    pub attributes: Attributes,
}

impl Member {
    pub fn new(id: MemberId) -> Self {
        Member { id, ..Member::default() }
    }

    pub fn is_started(&self) -> bool {
        !self.attributes.name.is_empty()
    }
}

// --- Key space ----------------------------------------------------------------

/// A key at one revision of the MVCC key space.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    #[serde(with = "serde_bytes")]
    pub key: Vec<u8>,
    pub create_revision: Revision,
    pub mod_revision: Revision,
    /// Number of modifications since creation; reset by deletion.
    pub version: i64,
    #[serde(with = "serde_bytes")]
    pub value: Vec<u8>,
    pub lease: LeaseId,
}
