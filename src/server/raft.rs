//! Stand-in for the raft node: tracks the voter and learner sets that
//! committed conf changes produce.

use crate::primitives::{ConfChange, ConfState};
use crate::types::{ConfChangeType, MemberId};

/// Node id raft uses for "no node"; a conf change carrying it is a no-op.
pub const NO_NODE: MemberId = 0;

#[derive(Debug, Clone, Default)]
pub struct RaftNode {
    conf_state: ConfState,
}

impl RaftNode {
    pub fn new(voters: impl IntoIterator<Item = MemberId>) -> Self {
        let mut voters: Vec<MemberId> = voters.into_iter().collect();
        voters.sort_unstable();
        voters.dedup();
        RaftNode { conf_state: ConfState { voters, learners: Vec::new() } }
    }

    pub fn conf_state(&self) -> &ConfState {
        &self.conf_state
    }

    pub fn apply_conf_change(&mut self, cc: &ConfChange) -> ConfState {
        if cc.node_id == NO_NODE {
            return self.conf_state.clone();
        }
        let id = cc.node_id;
        let cs = &mut self.conf_state;
        match ConfChangeType::try_from(cc.change_type) {
            Ok(ConfChangeType::AddNode) => {
                cs.learners.retain(|m| *m != id);
                insert_sorted(&mut cs.voters, id);
            }
            Ok(ConfChangeType::AddLearnerNode) => {
                if !cs.voters.contains(&id) {
                    insert_sorted(&mut cs.learners, id);
                }
            }
            Ok(ConfChangeType::RemoveNode) => {
                cs.voters.retain(|m| *m != id);
                cs.learners.retain(|m| *m != id);
            }
            Ok(ConfChangeType::UpdateNode) | Err(_) => {}
        }
        cs.clone()
    }
}

fn insert_sorted(ids: &mut Vec<MemberId>, id: MemberId) {
    if let Err(pos) = ids.binary_search(&id) {
        ids.insert(pos, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cc(change_type: ConfChangeType, node_id: MemberId) -> ConfChange {
        ConfChange { id: 0, change_type: change_type as i32, node_id, context: Vec::new() }
    }

    #[test]
    fn learners_promote_and_leave() {
        let mut node = RaftNode::new([1]);
        node.apply_conf_change(&cc(ConfChangeType::AddLearnerNode, 2));
        assert_eq!(node.conf_state().learners, vec![2]);
        let cs = node.apply_conf_change(&cc(ConfChangeType::AddNode, 2));
        assert_eq!(cs.voters, vec![1, 2]);
        assert!(cs.learners.is_empty());
        let cs = node.apply_conf_change(&cc(ConfChangeType::RemoveNode, 1));
        assert_eq!(cs.voters, vec![2]);
    }

    #[test]
    fn change_for_no_node_is_ignored() {
        let mut node = RaftNode::new([1]);
        assert_eq!(node.apply_conf_change(&cc(ConfChangeType::RemoveNode, NO_NODE)).voters, vec![1]);
    }
}
