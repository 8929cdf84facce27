//! Cluster membership table.
//!
//! Tracks members, the removed-id tombstones, the agreed cluster version and
//! downgrade state. Every mutation takes a `should_apply_v3` flag: the
//! in-memory table is always updated, the backend only when the entry is
//! newer than the consistent index.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::{Backend, Bucket};
use crate::error::{BackendError, ServerError};
use crate::primitives::{Attributes, ConfChange, ConfChangeContext, Member, RaftAttributes};
use crate::types::{ConfChangeType, MemberId};
use crate::version::Version;

const CLUSTER_VERSION_KEY: &[u8] = b"clusterVersion";
const DOWNGRADE_KEY: &[u8] = b"downgrade";

pub const DEFAULT_MAX_LEARNERS: usize = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DowngradeInfo {
    pub enabled: bool,
    /// Only meaningful when `enabled`.
    pub target_version: String,
}

#[derive(Debug)]
pub struct RaftCluster {
    local_id: MemberId,
    server_version: Version,
    be: Option<Arc<Backend>>,
    members: BTreeMap<MemberId, Member>,
    removed: BTreeSet<MemberId>,
    version: Option<Version>,
    downgrade: DowngradeInfo,
    max_learners: usize,
}

impl RaftCluster {
    pub fn new(local_id: MemberId, server_version: Version) -> Self {
        RaftCluster {
            local_id,
            server_version,
            be: None,
            members: BTreeMap::new(),
            removed: BTreeSet::new(),
            version: None,
            downgrade: DowngradeInfo::default(),
            max_learners: DEFAULT_MAX_LEARNERS,
        }
    }

    /// Binds the table to a backend and creates its buckets.
    pub fn set_backend(&mut self, be: Arc<Backend>) {
        {
            let mut tx = be.batch_tx();
            tx.create_bucket(Bucket::Members);
            tx.create_bucket(Bucket::MembersRemoved);
            tx.create_bucket(Bucket::Cluster);
        }
        self.be = Some(be);
    }

    pub fn local_id(&self) -> MemberId {
        self.local_id
    }

    pub fn member(&self, id: MemberId) -> Option<&Member> {
        self.members.get(&id)
    }

    pub fn members(&self) -> Vec<Member> {
        self.members.values().cloned().collect()
    }

    pub fn is_removed(&self, id: MemberId) -> bool {
        self.removed.contains(&id)
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    pub fn downgrade_info(&self) -> &DowngradeInfo {
        &self.downgrade
    }

    pub fn add_member(&mut self, member: Member, should_apply_v3: bool) -> Result<(), ServerError> {
        if should_apply_v3 {
            self.save_member(&member)?;
        }
        tracing::info!(member = member.id, learner = member.raft_attributes.is_learner, "added member");
        self.members.insert(member.id, member);
        Ok(())
    }

    pub fn remove_member(&mut self, id: MemberId, should_apply_v3: bool) -> Result<(), ServerError> {
        if should_apply_v3 {
            if let Some(be) = &self.be {
                let mut tx = be.batch_tx();
                tx.delete(Bucket::Members, id_key(id).as_bytes())?;
                tx.put(Bucket::MembersRemoved, id_key(id).as_bytes(), b"removed")?;
            }
        }
        if self.members.remove(&id).is_none() {
            tracing::warn!(member = id, "removed unknown member");
        }
        self.removed.insert(id);
        Ok(())
    }

    pub fn update_raft_attributes(
        &mut self,
        id: MemberId,
        raft: RaftAttributes,
        should_apply_v3: bool,
    ) -> Result<(), ServerError> {
        let member = self.members.get_mut(&id).ok_or(ServerError::IdNotFound(id))?;
        member.raft_attributes = raft;
        let snapshot = member.clone();
        if should_apply_v3 {
            self.save_member(&snapshot)?;
        }
        Ok(())
    }

    pub fn promote_member(&mut self, id: MemberId, should_apply_v3: bool) -> Result<(), ServerError> {
        let member = self.members.get_mut(&id).ok_or(ServerError::IdNotFound(id))?;
        member.raft_attributes.is_learner = false;
        let snapshot = member.clone();
        if should_apply_v3 {
            self.save_member(&snapshot)?;
        }
        tracing::info!(member = id, "promoted learner");
        Ok(())
    }

    /// Updates the published attributes of a member. Attributes of a removed
    /// member are ignored.
    pub fn update_attributes(
        &mut self,
        id: MemberId,
        attr: Attributes,
        should_apply_v3: bool,
    ) -> Result<(), ServerError> {
        if let Some(member) = self.members.get_mut(&id) {
            member.attributes = attr;
            let snapshot = member.clone();
            if should_apply_v3 {
                self.save_member(&snapshot)?;
            }
            return Ok(());
        }
        if self.removed.contains(&id) {
            tracing::warn!(member = id, "skipped updating attributes of removed member");
            return Ok(());
        }
        Err(ServerError::IdNotFound(id))
    }

    /// Sets the cluster version and re-checks the downgrade constraints
    /// against this server's version.
    ///
    /// # Panics
    /// When this server may no longer run the cluster at the new version.
    pub fn set_version(&mut self, ver: Version, should_apply_v3: bool) -> Result<(), ServerError> {
        match &self.version {
            Some(old) => tracing::info!(from = %old, to = %ver, "updated cluster version"),
            None => tracing::info!(to = %ver, "set initial cluster version"),
        }
        if should_apply_v3 {
            if let Some(be) = &self.be {
                be.batch_tx().put(Bucket::Cluster, CLUSTER_VERSION_KEY, ver.to_string().as_bytes())?;
            }
        }
        self.version = Some(ver);
        self.detect_downgrade();
        Ok(())
    }

    pub fn set_downgrade_info(&mut self, info: DowngradeInfo, should_apply_v3: bool) -> Result<(), ServerError> {
        if should_apply_v3 {
            if let Some(be) = &self.be {
                let raw = serde_json::to_vec(&info).map_err(|e| BackendError::Persist(e.to_string()))?;
                be.batch_tx().put(Bucket::Cluster, DOWNGRADE_KEY, &raw)?;
            }
        }
        if info.enabled {
            tracing::info!(target_version = %info.target_version, "cluster is ready to downgrade");
        }
        self.downgrade = info;
        Ok(())
    }

    fn detect_downgrade(&self) {
        let local = self.server_version.major_minor();
        if self.downgrade.enabled && !self.downgrade.target_version.is_empty() {
            let target = Version::must_parse(&self.downgrade.target_version);
            if local == target {
                return;
            }
            tracing::error!(%local, %target, "server version is not allowed to join when downgrade is enabled");
            panic!("invalid downgrade; server version is not allowed to join when downgrade is enabled");
        }
        if let Some(cluster) = &self.version {
            if local < *cluster {
                tracing::error!(%local, %cluster, "server version is lower than the cluster version");
                panic!("invalid downgrade; server version is lower than determined cluster version");
            }
        }
    }

    /// Checks a committed conf change against the current table.
    ///
    /// # Panics
    /// When the change carries an undecodable context or an unknown type.
    pub fn validate_configuration_change(&self, cc: &ConfChange) -> Result<(), ServerError> {
        let id = cc.node_id;
        if self.removed.contains(&id) {
            return Err(ServerError::IdRemoved(id));
        }
        match ConfChangeType::try_from(cc.change_type) {
            Ok(ConfChangeType::AddNode | ConfChangeType::AddLearnerNode) => {
                let ctx = decode_context(&cc.context);
                if ctx.member.id != id {
                    return Err(ServerError::IdMismatch);
                }
                if ctx.is_promote {
                    let member = self.members.get(&id).ok_or(ServerError::IdNotFound(id))?;
                    if !member.raft_attributes.is_learner {
                        return Err(ServerError::MemberNotLearner);
                    }
                    return Ok(());
                }
                if self.members.contains_key(&id) {
                    return Err(ServerError::IdExists(id));
                }
                self.check_peer_urls(ctx.member.id, &ctx.member.raft_attributes.peer_urls)?;
                if cc.change_type == ConfChangeType::AddLearnerNode as i32 {
                    let learners = self.members.values().filter(|m| m.raft_attributes.is_learner).count();
                    if learners + 1 > self.max_learners {
                        return Err(ServerError::TooManyLearners);
                    }
                }
                Ok(())
            }
            Ok(ConfChangeType::RemoveNode) => {
                if !self.members.contains_key(&id) {
                    return Err(ServerError::IdNotFound(id));
                }
                Ok(())
            }
            Ok(ConfChangeType::UpdateNode) => {
                if !self.members.contains_key(&id) {
                    return Err(ServerError::IdNotFound(id));
                }
                let ctx = decode_context(&cc.context);
                if ctx.member.id != id {
                    return Err(ServerError::IdMismatch);
                }
                self.check_peer_urls(id, &ctx.member.raft_attributes.peer_urls)
            }
            Err(tag) => {
                tracing::error!(change_type = tag, "unknown ConfChange type");
                panic!("unknown ConfChange type {tag}");
            }
        }
    }

    fn check_peer_urls(&self, id: MemberId, urls: &[String]) -> Result<(), ServerError> {
        let taken: BTreeSet<&str> = self
            .members
            .values()
            .filter(|m| m.id != id)
            .flat_map(|m| m.raft_attributes.peer_urls.iter().map(String::as_str))
            .collect();
        if urls.iter().any(|u| taken.contains(u.as_str())) {
            return Err(ServerError::PeerUrlExists);
        }
        Ok(())
    }

    fn save_member(&self, member: &Member) -> Result<(), ServerError> {
        if let Some(be) = &self.be {
            let raw = serde_json::to_vec(member).map_err(|e| BackendError::Persist(e.to_string()))?;
            be.batch_tx().put(Bucket::Members, id_key(member.id).as_bytes(), &raw)?;
        }
        Ok(())
    }
}

/// Decodes the JSON context of a committed conf change.
///
/// # Panics
/// On malformed context bytes.
pub fn decode_context(raw: &[u8]) -> ConfChangeContext {
    match serde_json::from_slice(raw) {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!(error = %e, "conf change context is malformed");
            panic!("failed to unmarshal confChangeContext: {e}");
        }
    }
}

fn id_key(id: MemberId) -> String {
    format!("{id:x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DEFAULT_BATCH_LIMIT;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    fn cluster() -> RaftCluster {
        let mut cl = RaftCluster::new(1, Version::new(3, 5, 0));
        cl.set_backend(Arc::new(Backend::new_tmp(DEFAULT_BATCH_LIMIT).unwrap()));
        cl.add_member(Member::new(1), true).unwrap();
        cl
    }

    fn change(change_type: ConfChangeType, node_id: MemberId, ctx: &ConfChangeContext) -> ConfChange {
        ConfChange {
            id: 1,
            change_type: change_type as i32,
            node_id,
            context: serde_json::to_vec(ctx).unwrap(),
        }
    }

    fn panic_text(f: impl FnOnce()) -> String {
        let payload = catch_unwind(AssertUnwindSafe(f)).unwrap_err();
        payload
            .downcast_ref::<String>()
            .cloned()
            .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
            .unwrap()
    }

    #[test]
    fn add_existing_member_is_rejected() {
        let cl = cluster();
        let ctx = ConfChangeContext { member: Member::new(1), is_promote: false };
        assert_eq!(
            cl.validate_configuration_change(&change(ConfChangeType::AddNode, 1, &ctx)),
            Err(ServerError::IdExists(1))
        );
    }

    #[test]
    fn removed_id_cannot_return() {
        let mut cl = cluster();
        cl.add_member(Member::new(2), true).unwrap();
        cl.remove_member(2, true).unwrap();
        let ctx = ConfChangeContext { member: Member::new(2), is_promote: false };
        assert_eq!(
            cl.validate_configuration_change(&change(ConfChangeType::AddNode, 2, &ctx)),
            Err(ServerError::IdRemoved(2))
        );
    }

    #[test]
    fn promote_requires_a_learner() {
        let mut cl = cluster();
        let ctx = ConfChangeContext { member: Member::new(1), is_promote: true };
        assert_eq!(
            cl.validate_configuration_change(&change(ConfChangeType::AddNode, 1, &ctx)),
            Err(ServerError::MemberNotLearner)
        );
        let mut learner = Member::new(3);
        learner.raft_attributes.is_learner = true;
        cl.add_member(learner, true).unwrap();
        let ctx = ConfChangeContext { member: Member::new(3), is_promote: true };
        assert!(cl.validate_configuration_change(&change(ConfChangeType::AddNode, 3, &ctx)).is_ok());
    }

    #[test]
    fn undecodable_context_and_unknown_type_panic() {
        let cl = cluster();
        let bad = ConfChange { id: 0, change_type: 0, node_id: 9, context: b"\xff".to_vec() };
        assert!(panic_text(|| {
            let _ = cl.validate_configuration_change(&bad);
        })
        .contains("failed to unmarshal confChangeContext"));

        let unknown = ConfChange { id: 0, change_type: 17, node_id: 9, context: Vec::new() };
        assert!(panic_text(|| {
            let _ = cl.validate_configuration_change(&unknown);
        })
        .contains("unknown ConfChange type"));
    }

    #[test]
    fn newer_cluster_version_than_server_panics() {
        let mut cl = cluster();
        cl.set_version(Version::new(3, 5, 0), true).unwrap();
        assert!(panic_text(|| {
            let _ = cl.set_version(Version::new(3, 6, 0), true);
        })
        .contains("invalid downgrade; server version is lower than determined cluster version"));
    }

    #[test]
    fn downgrade_to_server_version_is_allowed() {
        let mut cl = cluster();
        cl.set_downgrade_info(DowngradeInfo { enabled: true, target_version: "3.5.0".into() }, true)
            .unwrap();
        cl.set_version(Version::new(3, 6, 0), true).unwrap();
        assert_eq!(cl.version(), Some(&Version::new(3, 6, 0)));
    }

    #[test]
    fn attributes_of_unknown_member_are_an_error() {
        let mut cl = cluster();
        let attr = Attributes { name: "m1".into(), client_urls: vec![] };
        assert_eq!(cl.update_attributes(5, attr.clone(), true), Err(ServerError::IdNotFound(5)));
        cl.update_attributes(1, attr, true).unwrap();
        assert!(cl.member(1).unwrap().is_started());
    }
}
