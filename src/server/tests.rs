use super::*;
use crate::domain::*;
use crate::harness::{HarnessConfig, HarnessContext};
use crate::primitives::{ConfChangeContext, Member, RaftAttributes};
use crate::types::{AlarmAction, AlarmType};

fn server() -> Server {
    HarnessContext::bootstrap(&HarnessConfig::default()).unwrap().server
}

fn normal(index: u64, req: Request) -> Entry {
    let mut env = InternalRaftRequest::new(req);
    env.id = index;
    Entry { term: 1, index, entry_type: EntryType::Normal as i32, data: marshal(&env).unwrap() }
}

fn conf(index: u64, cc: &ConfChange) -> Entry {
    Entry { term: 1, index, entry_type: EntryType::ConfChange as i32, data: marshal(cc).unwrap() }
}

fn put(key: &[u8], value: &[u8]) -> Request {
    Request::Put(PutRequest { key: key.to_vec(), value: value.to_vec(), ..PutRequest::default() })
}

fn range(key: &[u8]) -> Request {
    Request::Range(RangeRequest { key: key.to_vec(), ..RangeRequest::default() })
}

fn add_node(id: u64, node_id: u64, peer: &str) -> ConfChange {
    let member = Member {
        id: node_id,
        raft_attributes: RaftAttributes { peer_urls: vec![peer.to_owned()], is_learner: false },
        ..Member::default()
    };
    let ctx = ConfChangeContext { member, is_promote: false };
    ConfChange { id, change_type: ConfChangeType::AddNode as i32, node_id, context: serde_json::to_vec(&ctx).unwrap() }
}

fn remove_node(id: u64, node_id: u64) -> ConfChange {
    ConfChange { id, change_type: ConfChangeType::RemoveNode as i32, node_id, context: Vec::new() }
}

#[test]
fn put_then_range_reaches_the_waiter() {
    let mut s = server();
    let rx = s.ctx.wait.register(2);
    let mut cs = ConfState::default();
    let progress = s.apply(&[normal(1, put(b"a", b"1")), normal(2, range(b"a"))], &mut cs);
    assert_eq!(progress, AppliedProgress { term: 1, index: 2, should_stop: false });
    assert_eq!(s.ctx.applied_index, 2);

    let Applied::Request(ar) = rx.try_recv().unwrap() else { panic!("expected a request result") };
    let Some(Response { body: ResponseBody::Range(r), .. }) = ar.resp else { panic!("unexpected result {ar:?}") };
    assert_eq!(r.kvs.len(), 1);
    assert_eq!(r.kvs[0].value, b"1".to_vec());
}

#[test]
fn replayed_entry_is_not_reapplied() {
    let mut s = server();
    let mut cs = ConfState::default();
    s.apply(&[normal(5, put(b"k", b"new"))], &mut cs);
    let rev = s.ctx.kv.rev();
    s.apply(&[normal(3, put(b"k", b"old"))], &mut cs);
    assert_eq!(s.ctx.kv.rev(), rev);
    assert_eq!(s.ctx.consist_index.consistent_index(), 5);
}

#[test]
fn empty_entry_only_advances_the_index() {
    let mut s = server();
    let noop = Entry { term: 2, index: 4, entry_type: EntryType::Normal as i32, data: Vec::new() };
    let rev = s.ctx.kv.rev();
    let progress = s.apply(&[noop], &mut ConfState::default());
    assert_eq!(progress.index, 4);
    assert_eq!(s.ctx.kv.rev(), rev);
    assert_eq!(s.ctx.consist_index.term(), 2);
}

#[test]
fn added_member_joins_conf_state() {
    let mut s = server();
    let rx = s.ctx.wait.register(9);
    let mut cs = ConfState::default();
    s.apply(&[conf(1, &add_node(9, 2, "http://10.0.0.2:2380"))], &mut cs);
    assert_eq!(cs.voters, vec![1, 2]);
    assert!(s.ctx.cluster.member(2).is_some());
    assert_eq!(rx.try_recv().unwrap(), Applied::ConfChange { members: 2, err: None });
}

#[test]
fn rejected_conf_change_reports_and_keeps_conf_state() {
    let mut s = server();
    let rx = s.ctx.wait.register(3);
    let mut cs = ConfState::default();
    s.apply(&[conf(1, &remove_node(3, 7))], &mut cs);
    assert_eq!(cs, ConfState::default());
    assert_eq!(s.ctx.raft.conf_state().voters, vec![1]);
    assert_eq!(rx.try_recv().unwrap(), Applied::ConfChange { members: 1, err: Some(ServerError::IdNotFound(7)) });
}

#[test]
fn removing_self_requests_stop() {
    let mut s = server();
    let mut cs = ConfState::default();
    let progress = s.apply(&[conf(1, &remove_node(1, 1))], &mut cs);
    assert!(progress.should_stop);
    assert!(cs.voters.is_empty());
    assert!(s.ctx.cluster.is_removed(1));
}

#[test]
#[should_panic(expected = "unknown entry type; must be either EntryNormal or EntryConfChange")]
fn conf_change_v2_entries_panic() {
    let e = Entry { term: 1, index: 1, entry_type: EntryType::ConfChangeV2 as i32, data: vec![1] };
    server().apply(&[e], &mut ConfState::default());
}

#[test]
#[should_panic(expected = "unmarshal should never fail")]
fn undecodable_entry_data_panics() {
    let e = Entry { term: 1, index: 1, entry_type: EntryType::Normal as i32, data: b"\x07garbage".to_vec() };
    server().apply(&[e], &mut ConfState::default());
}

#[test]
fn nospace_alarm_blocks_writes_but_not_reads() {
    let mut s = server();
    let be = s.appliers.backend;
    let raise = InternalRaftRequest::new(Request::Alarm(AlarmRequest {
        action: AlarmAction::Activate as i32,
        member_id: 1,
        alarm: AlarmType::NoSpace as i32,
    }));
    let ar = be.apply(&mut s.ctx, &raise, true);
    assert!(matches!(ar.resp.map(|r| r.body), Some(ResponseBody::Alarm(raised)) if raised.len() == 1));

    let ar = be.apply(&mut s.ctx, &InternalRaftRequest::new(put(b"a", b"1")), true);
    assert_eq!(ar.err, Some(ServerError::NoSpace));
    assert!(be.apply(&mut s.ctx, &InternalRaftRequest::new(range(b"a")), true).is_ok());
}

#[test]
fn corrupt_alarm_blocks_reads() {
    let mut s = server();
    let be = s.appliers.backend;
    let raise = InternalRaftRequest::new(Request::Alarm(AlarmRequest {
        action: AlarmAction::Activate as i32,
        member_id: 1,
        alarm: AlarmType::Corrupt as i32,
    }));
    assert!(be.apply(&mut s.ctx, &raise, true).is_ok());
    let ar = be.apply(&mut s.ctx, &InternalRaftRequest::new(range(b"a")), true);
    assert_eq!(ar.err, Some(ServerError::Corrupt));
}

#[test]
fn unknown_alarm_type_is_an_error() {
    let mut s = server();
    let be = s.appliers.backend;
    let req = InternalRaftRequest::new(Request::Alarm(AlarmRequest { action: 0, member_id: 1, alarm: 42 }));
    assert_eq!(be.apply(&mut s.ctx, &req, true).err, Some(ServerError::UnsupportedAlarm(42)));
}

#[test]
fn envelope_without_request_is_empty() {
    let mut s = server();
    let be = s.appliers.backend;
    let ar = be.apply(&mut s.ctx, &InternalRaftRequest::default(), true);
    assert_eq!(ar.err, Some(ServerError::EmptyRequest));
}

fn enable_auth(s: &mut Server) {
    let be = s.appliers.backend;
    let steps = [
        Request::AuthUserAdd(AuthUserAddRequest { name: "root".into(), password: "pw".into(), ..Default::default() }),
        Request::AuthUserGrantRole(AuthUserGrantRoleRequest { user: "root".into(), role: "root".into() }),
        Request::AuthEnable(AuthEnableRequest {}),
    ];
    for req in steps {
        let ar = be.apply(&mut s.ctx, &InternalRaftRequest::new(req), true);
        assert!(ar.is_ok(), "{ar:?}");
    }
}

#[test]
fn checked_layer_refuses_anonymous_writes_once_auth_is_on() {
    let mut s = server();
    enable_auth(&mut s);
    let checked = s.appliers.server;

    let anonymous = InternalRaftRequest::new(put(b"a", b"1"));
    assert_eq!(checked.apply(&mut s.ctx, &anonymous, true).err, Some(ServerError::UserEmpty));

    let mut as_root = InternalRaftRequest::new(put(b"a", b"1"));
    as_root.header = Some(RequestHeader { id: 1, username: "root".into(), auth_revision: s.ctx.auth.revision() });
    assert!(checked.apply(&mut s.ctx, &as_root, true).is_ok());

    let mut stale = as_root.clone();
    if let Some(h) = stale.header.as_mut() {
        h.auth_revision = 0;
    }
    assert_eq!(checked.apply(&mut s.ctx, &stale, true).err, Some(ServerError::AuthOldRevision));
}

#[test]
fn skipped_backend_apply_leaves_state_alone() {
    let mut s = server();
    let be = s.appliers.backend;
    let ar = be.apply(&mut s.ctx, &InternalRaftRequest::new(put(b"a", b"1")), false);
    assert_eq!(ar, ApplyResult::default());
    assert_eq!(s.ctx.kv.rev(), 1);
}

#[test]
#[should_panic(expected = "invalid downgrade; server version is lower than determined cluster version")]
fn cluster_version_above_server_version_panics() {
    let mut s = server();
    let be = s.appliers.backend;
    let req = InternalRaftRequest::new(Request::ClusterVersionSet(ClusterVersionSetRequest { ver: "3.6.0".into() }));
    be.apply(&mut s.ctx, &req, true);
}

#[test]
#[should_panic(expected = "is not in dotted-tri format")]
fn malformed_cluster_version_panics() {
    let mut s = server();
    let be = s.appliers.backend;
    let req = InternalRaftRequest::new(Request::ClusterVersionSet(ClusterVersionSetRequest { ver: "3.5".into() }));
    be.apply(&mut s.ctx, &req, true);
}

#[test]
fn downgrade_info_is_recorded() {
    let mut s = server();
    let be = s.appliers.backend;
    let req = InternalRaftRequest::new(Request::DowngradeInfoSet(DowngradeInfoSetRequest {
        enabled: true,
        ver: "3.5.0".into(),
    }));
    assert!(be.apply(&mut s.ctx, &req, true).is_ok());
    assert!(s.ctx.cluster.downgrade_info().enabled);
}
