//! The apply side of a server: the apply loop over committed raft entries, the
//! applier stack, and the context every applier runs against.

mod applier;
mod auth_applier;
mod kv;
pub mod raft;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::alarm::AlarmStore;
use crate::auth::AuthStore;
use crate::backend::Backend;
use crate::cindex::ConsistentIndex;
use crate::domain::{ApplyResult, InternalRaftRequest, Response, ResponseBody, ResponseHeader};
use crate::error::ServerError;
use crate::lease::Lessor;
use crate::membership::{decode_context, RaftCluster};
use crate::mvcc::KvStore;
use crate::primitives::{ConfChange, ConfState, Entry};
use crate::types::{ConfChangeType, EntryType, MemberId, Revision};
use crate::wait::{Applied, Wait};

pub use applier::{Applier, BackendApplier, InternalApplier};
pub use auth_applier::AuthApplier;
use raft::{RaftNode, NO_NODE};

/// Entry payload codec: varint integers, trailing bytes ignored, and no
/// allocation larger than the payload itself.
fn entry_codec(limit: usize) -> impl Options {
    bincode::DefaultOptions::new().with_limit(limit as u64).allow_trailing_bytes()
}

/// Decodes an entry payload that a correct proposer always encodes.
///
/// # Panics
/// When `data` does not decode as `T`.
pub fn must_unmarshal<T: DeserializeOwned>(data: &[u8]) -> T {
    match entry_codec(data.len()).deserialize(data) {
        Ok(v) => v,
        Err(e) => panic!("unmarshal should never fail ({e})"),
    }
}

/// Encodes an entry payload the way `must_unmarshal` reads it.
pub fn marshal<T: Serialize>(v: &T) -> Result<Vec<u8>, bincode::Error> {
    bincode::DefaultOptions::new().allow_trailing_bytes().serialize(v)
}

/// Everything an applier may read or mutate.
#[derive(Debug)]
pub struct ServerContext {
    pub id: MemberId,
    pub be: Arc<Backend>,
    pub cluster: RaftCluster,
    pub consist_index: Arc<ConsistentIndex>,
    pub auth: AuthStore,
    pub alarms: AlarmStore,
    pub lessor: Box<dyn Lessor>,
    pub kv: KvStore,
    pub wait: Wait,
    pub raft: RaftNode,
    pub applied_index: u64,
    pub applied_term: u64,
}

impl ServerContext {
    pub fn header(&self, rev: Revision) -> ResponseHeader {
        ResponseHeader { member_id: self.id, revision: rev }
    }

    /// Wraps `body` with a header stamped at the current store revision.
    pub fn respond(&self, body: ResponseBody) -> Response {
        Response { header: self.header(self.kv.rev()), body }
    }
}

/// The applier stack: `server` checks permissions before reaching the
/// backend layer, `backend` applies without checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct Appliers {
    pub internal: InternalApplier,
    pub backend: BackendApplier,
    pub server: AuthApplier<BackendApplier>,
}

impl Appliers {
    pub fn new() -> Self {
        let internal = InternalApplier;
        let backend = BackendApplier::new(internal);
        Appliers { internal, backend, server: AuthApplier::new(backend) }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppliedProgress {
    pub term: u64,
    pub index: u64,
    /// Set once this member has been removed from the cluster.
    pub should_stop: bool,
}

#[derive(Debug)]
pub struct Server {
    pub ctx: ServerContext,
    pub appliers: Appliers,
}

impl Server {
    pub fn new(ctx: ServerContext) -> Self {
        Server { ctx, appliers: Appliers::new() }
    }

    /// Applies committed entries in order.
    ///
    /// # Panics
    /// On an entry type other than normal or conf change, and on entry data
    /// that does not decode.
    pub fn apply(&mut self, entries: &[Entry], conf_state: &mut ConfState) -> AppliedProgress {
        let mut progress = AppliedProgress::default();
        for e in entries {
            match EntryType::try_from(e.entry_type) {
                Ok(EntryType::Normal) => self.apply_entry_normal(e),
                Ok(EntryType::ConfChange) => {
                    let should_apply_v3 = self.advance_consistent_index(e);
                    let cc: ConfChange = must_unmarshal(&e.data);
                    let (removed_self, err) = match self.apply_conf_change(&cc, conf_state, should_apply_v3) {
                        Ok(removed_self) => (removed_self, None),
                        Err(err) => (false, Some(err)),
                    };
                    progress.should_stop |= removed_self;
                    let members = self.ctx.cluster.members().len();
                    self.ctx.wait.trigger(cc.id, Applied::ConfChange { members, err });
                }
                Ok(EntryType::ConfChangeV2) | Err(_) => {
                    tracing::error!(entry_type = e.entry_type, index = e.index, "unknown entry type");
                    panic!("unknown entry type; must be either EntryNormal or EntryConfChange");
                }
            }
            self.ctx.applied_index = e.index;
            self.ctx.applied_term = e.term;
            progress.index = e.index;
            progress.term = e.term;
        }
        progress
    }

    /// Moves the consistent index to `e` if it is newer; returns whether the
    /// entry's v3 effects still have to be applied.
    fn advance_consistent_index(&self, e: &Entry) -> bool {
        if e.index > self.ctx.consist_index.consistent_index() {
            self.ctx.consist_index.set_consistent_index(e.index, e.term);
            return true;
        }
        false
    }

    fn apply_entry_normal(&mut self, e: &Entry) {
        let should_apply_v3 = self.advance_consistent_index(e);
        if e.data.is_empty() {
            tracing::debug!(index = e.index, "applied noop entry");
            return;
        }
        let mut req: InternalRaftRequest = must_unmarshal(&e.data);
        let id = if req.id != 0 { req.id } else { req.header_id() };
        let need_result = self.ctx.wait.is_registered(id);
        let has_side_effects = req.kind().is_some_and(|k| !k.is_read_only());
        if !need_result && !has_side_effects {
            return;
        }
        if !need_result {
            if let Some(txn) = req.txn_mut() {
                kv::remove_needless_range_reqs(txn);
            }
        }
        let ar: ApplyResult = self.appliers.server.apply(&mut self.ctx, &req, should_apply_v3);
        if !should_apply_v3 {
            return;
        }
        if let Some(err) = &ar.err {
            tracing::debug!(id, error = %err, "request failed");
        }
        self.ctx.wait.trigger(id, Applied::Request(ar));
    }

    /// Returns whether the change removed this member.
    fn apply_conf_change(
        &mut self,
        cc: &ConfChange,
        conf_state: &mut ConfState,
        should_apply_v3: bool,
    ) -> Result<bool, ServerError> {
        if let Err(e) = self.ctx.cluster.validate_configuration_change(cc) {
            tracing::warn!(node = cc.node_id, error = %e, "rejected conf change");
            self.ctx.raft.apply_conf_change(&ConfChange { node_id: NO_NODE, ..cc.clone() });
            return Err(e);
        }
        *conf_state = self.ctx.raft.apply_conf_change(cc);
        let cluster = &mut self.ctx.cluster;
        match ConfChangeType::try_from(cc.change_type) {
            Ok(ConfChangeType::AddNode | ConfChangeType::AddLearnerNode) => {
                let ctx = decode_context(&cc.context);
                if ctx.is_promote {
                    cluster.promote_member(cc.node_id, should_apply_v3)?;
                } else {
                    cluster.add_member(ctx.member, should_apply_v3)?;
                }
            }
            Ok(ConfChangeType::RemoveNode) => {
                cluster.remove_member(cc.node_id, should_apply_v3)?;
                if cc.node_id == self.ctx.id {
                    return Ok(true);
                }
            }
            Ok(ConfChangeType::UpdateNode) => {
                let ctx = decode_context(&cc.context);
                cluster.update_raft_attributes(cc.node_id, ctx.member.raft_attributes, should_apply_v3)?;
            }
            // Validation has already refused unknown types.
            Err(_) => {}
        }
        Ok(false)
    }
}
