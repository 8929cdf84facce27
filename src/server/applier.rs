//! Apply layers.
//!
//! `BackendApplier` executes every command kind against the server context.
//! Cluster metadata and auth management go through `InternalApplier`.
//! `AuthApplier` wraps another layer and refuses requests the header's user
//! may not issue.

use crate::domain::{
    AlarmRequest, ApplyResult, AuthRoleGrantPermissionRequest, AuthUserAddRequest, ClusterMemberAttrSetRequest,
    ClusterVersionSetRequest, CompactionRequest, DowngradeInfoSetRequest, InternalAuthenticateRequest,
    InternalRaftRequest, Request, Response, ResponseBody,
};
use crate::error::ServerError;
use crate::lease::apply_checkpoints;
use crate::membership::DowngradeInfo;
use crate::types::{AlarmAction, AlarmType};
use crate::version::Version;

use super::{kv, ServerContext};

/// One layer of the apply pipeline.
pub trait Applier {
    /// Applies the envelope's command. `should_apply_v3` is false when the
    /// entry was already reflected in the backend before a restart.
    fn apply(&self, ctx: &mut ServerContext, r: &InternalRaftRequest, should_apply_v3: bool) -> ApplyResult;
}

/// Cluster metadata and auth management operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct InternalApplier;

impl InternalApplier {
    /// # Panics
    /// On a malformed version, or when the new version is one this server
    /// cannot run.
    pub fn cluster_version_set(
        &self,
        ctx: &mut ServerContext,
        r: &ClusterVersionSetRequest,
        should_apply_v3: bool,
    ) -> Result<Response, ServerError> {
        let ver = Version::must_parse(&r.ver);
        ctx.cluster.set_version(ver, should_apply_v3)?;
        Ok(ctx.respond(ResponseBody::Ack))
    }

    pub fn cluster_member_attr_set(
        &self,
        ctx: &mut ServerContext,
        r: &ClusterMemberAttrSetRequest,
        should_apply_v3: bool,
    ) -> Result<Response, ServerError> {
        let attr = r.member_attributes.clone().ok_or(ServerError::EmptyRequest)?;
        ctx.cluster.update_attributes(r.member_id, attr, should_apply_v3)?;
        Ok(ctx.respond(ResponseBody::Ack))
    }

    pub fn downgrade_info_set(
        &self,
        ctx: &mut ServerContext,
        r: &DowngradeInfoSetRequest,
        should_apply_v3: bool,
    ) -> Result<Response, ServerError> {
        let info = if r.enabled {
            DowngradeInfo { enabled: true, target_version: r.ver.clone() }
        } else {
            DowngradeInfo::default()
        };
        ctx.cluster.set_downgrade_info(info, should_apply_v3)?;
        Ok(ctx.respond(ResponseBody::Ack))
    }

    pub fn authenticate(
        &self,
        ctx: &mut ServerContext,
        r: &InternalAuthenticateRequest,
    ) -> Result<Response, ServerError> {
        let index = ctx.consist_index.consistent_index();
        let token = ctx.auth.authenticate(&r.name, &r.simple_token, index)?;
        Ok(ctx.respond(ResponseBody::Authenticate { token }))
    }

    pub fn user_add(&self, ctx: &mut ServerContext, r: &AuthUserAddRequest) -> Result<Response, ServerError> {
        let no_password = r.options.as_ref().is_some_and(|o| o.no_password);
        ctx.auth.user_add(&r.name, &r.password, &r.hashed_password, no_password)?;
        Ok(ctx.respond(ResponseBody::Ack))
    }

    pub fn role_grant_permission(
        &self,
        ctx: &mut ServerContext,
        r: &AuthRoleGrantPermissionRequest,
    ) -> Result<Response, ServerError> {
        let perm = r.perm.as_ref().ok_or(ServerError::PermissionNotGiven)?;
        ctx.auth.role_grant_permission(&r.name, perm)?;
        Ok(ctx.respond(ResponseBody::Ack))
    }

    /// Auth operations whose request maps directly onto one store call.
    fn auth(&self, ctx: &mut ServerContext, req: &Request) -> Result<Response, ServerError> {
        let auth = &mut ctx.auth;
        let body = match req {
            Request::AuthEnable(_) => auth.auth_enable().map(|()| ResponseBody::Ack),
            Request::AuthDisable(_) => auth.auth_disable().map(|()| ResponseBody::Ack),
            Request::AuthStatus(_) => {
                Ok(ResponseBody::AuthStatus { enabled: auth.is_enabled(), auth_revision: auth.revision() })
            }
            Request::AuthUserDelete(r) => auth.user_delete(&r.name).map(|()| ResponseBody::Ack),
            Request::AuthUserGet(r) => auth.user_get(&r.name).map(|roles| ResponseBody::UserGet { roles }),
            Request::AuthUserChangePassword(r) => {
                auth.user_change_password(&r.name, &r.password, &r.hashed_password).map(|()| ResponseBody::Ack)
            }
            Request::AuthUserGrantRole(r) => auth.user_grant_role(&r.user, &r.role).map(|()| ResponseBody::Ack),
            Request::AuthUserRevokeRole(r) => auth.user_revoke_role(&r.name, &r.role).map(|()| ResponseBody::Ack),
            Request::AuthUserList(_) => auth.user_list().map(|users| ResponseBody::UserList { users }),
            Request::AuthRoleList(_) => auth.role_list().map(|roles| ResponseBody::RoleList { roles }),
            Request::AuthRoleAdd(r) => auth.role_add(&r.name).map(|()| ResponseBody::Ack),
            Request::AuthRoleDelete(r) => auth.role_delete(&r.role).map(|()| ResponseBody::Ack),
            Request::AuthRoleGet(r) => auth.role_get(&r.role).map(|perms| ResponseBody::RoleGet { perms }),
            Request::AuthRoleRevokePermission(r) => {
                auth.role_revoke_permission(&r.role, &r.key, &r.range_end).map(|()| ResponseBody::Ack)
            }
            other => {
                tracing::warn!(kind = %other.kind(), "not an auth management request");
                Err(ServerError::EmptyRequest)
            }
        }?;
        Ok(ctx.respond(body))
    }
}

/// Applies requests directly against the backend-backed stores.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendApplier {
    internal: InternalApplier,
}

impl BackendApplier {
    pub fn new(internal: InternalApplier) -> Self {
        BackendApplier { internal }
    }

    fn dispatch(&self, ctx: &mut ServerContext, req: &Request, should_apply_v3: bool) -> Result<Response, ServerError> {
        let internal = &self.internal;
        match req {
            Request::Range(r) => kv::range(ctx, r),
            Request::Put(r) => kv::put(ctx, r),
            Request::DeleteRange(r) => kv::delete_range(ctx, r),
            Request::Txn(r) => kv::txn(ctx, r),
            Request::Compaction(r) => self.compaction(ctx, r),
            Request::LeaseGrant(r) => {
                let lease = ctx.lessor.grant(r.id, r.ttl)?;
                Ok(ctx.respond(ResponseBody::LeaseGrant { id: lease.id, ttl: lease.ttl }))
            }
            Request::LeaseRevoke(r) => {
                ctx.lessor.revoke(r.id)?;
                Ok(ctx.respond(ResponseBody::Ack))
            }
            Request::Alarm(r) => self.alarm(ctx, r),
            Request::LeaseCheckpoint(r) => {
                apply_checkpoints(&mut *ctx.lessor, &r.checkpoints)?;
                Ok(ctx.respond(ResponseBody::Ack))
            }
            Request::Authenticate(r) => internal.authenticate(ctx, r),
            Request::AuthUserAdd(r) => internal.user_add(ctx, r),
            Request::AuthRoleGrantPermission(r) => internal.role_grant_permission(ctx, r),
            Request::ClusterVersionSet(r) => internal.cluster_version_set(ctx, r, should_apply_v3),
            Request::ClusterMemberAttrSet(r) => internal.cluster_member_attr_set(ctx, r, should_apply_v3),
            Request::DowngradeInfoSet(r) => internal.downgrade_info_set(ctx, r, should_apply_v3),
            Request::AuthEnable(_)
            | Request::AuthDisable(_)
            | Request::AuthStatus(_)
            | Request::AuthUserDelete(_)
            | Request::AuthUserGet(_)
            | Request::AuthUserChangePassword(_)
            | Request::AuthUserGrantRole(_)
            | Request::AuthUserRevokeRole(_)
            | Request::AuthUserList(_)
            | Request::AuthRoleList(_)
            | Request::AuthRoleAdd(_)
            | Request::AuthRoleDelete(_)
            | Request::AuthRoleGet(_)
            | Request::AuthRoleRevokePermission(_) => internal.auth(ctx, req),
        }
    }

    fn compaction(&self, ctx: &mut ServerContext, r: &CompactionRequest) -> Result<Response, ServerError> {
        ctx.kv.compact(r.revision)?;
        Ok(ctx.respond(ResponseBody::Ack))
    }

    fn alarm(&self, ctx: &mut ServerContext, r: &AlarmRequest) -> Result<Response, ServerError> {
        let alarm = AlarmType::try_from(r.alarm).map_err(ServerError::UnsupportedAlarm)?;
        let action = AlarmAction::try_from(r.action).map_err(ServerError::UnsupportedAlarmAction)?;
        let alarms = match action {
            AlarmAction::Get => ctx.alarms.get(alarm),
            AlarmAction::Activate => ctx.alarms.activate(r.member_id, alarm)?.into_iter().collect(),
            AlarmAction::Deactivate => ctx.alarms.deactivate(r.member_id, alarm)?.into_iter().collect(),
        };
        Ok(ctx.respond(ResponseBody::Alarm(alarms)))
    }
}

/// Requests refused while an alarm is raised: everything touching the key
/// space under `Corrupt`, anything that grows the database under `NoSpace`.
fn alarm_gate(ctx: &ServerContext, req: &Request) -> Result<(), ServerError> {
    if !ctx.alarms.get(AlarmType::Corrupt).is_empty()
        && matches!(
            req,
            Request::Range(_)
                | Request::Put(_)
                | Request::DeleteRange(_)
                | Request::Txn(_)
                | Request::Compaction(_)
                | Request::LeaseGrant(_)
                | Request::LeaseRevoke(_)
        )
    {
        return Err(ServerError::Corrupt);
    }
    if !ctx.alarms.get(AlarmType::NoSpace).is_empty() {
        let grows = match req {
            Request::Put(_) | Request::LeaseGrant(_) => true,
            Request::Txn(t) => !kv::is_txn_read_only(t),
            _ => false,
        };
        if grows {
            return Err(ServerError::NoSpace);
        }
    }
    Ok(())
}

impl Applier for BackendApplier {
    fn apply(&self, ctx: &mut ServerContext, r: &InternalRaftRequest, should_apply_v3: bool) -> ApplyResult {
        let Some(req) = r.request() else {
            tracing::warn!(id = r.id, "envelope carries no request");
            return ApplyResult::err(ServerError::EmptyRequest);
        };
        tracing::debug!(kind = %req.kind(), id = r.header_id(), should_apply_v3, "applying request");
        // Entries already reflected in the backend only replay cluster metadata.
        let cluster_meta = matches!(
            req,
            Request::ClusterVersionSet(_) | Request::ClusterMemberAttrSet(_) | Request::DowngradeInfoSet(_)
        );
        if !should_apply_v3 && !cluster_meta {
            return ApplyResult::default();
        }
        if let Err(e) = alarm_gate(ctx, req) {
            return ApplyResult::err(e);
        }
        ApplyResult::from_result(self.dispatch(ctx, req, should_apply_v3))
    }
}
