//! Permission-checking apply layer. Every request is authorized against the
//! auth store before it reaches the wrapped applier.

use crate::auth::AuthStore;
use crate::domain::{ApplyResult, InternalRaftRequest, OpRequest, Request, TxnRequest};
use crate::error::ServerError;

use super::applier::Applier;
use super::ServerContext;

/// Permission-checking layer in front of another applier.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthApplier<A> {
    inner: A,
}

impl<A: Applier> AuthApplier<A> {
    pub fn new(inner: A) -> Self {
        AuthApplier { inner }
    }
}

fn needs_admin(req: &Request) -> bool {
    matches!(
        req,
        Request::AuthEnable(_)
            | Request::AuthDisable(_)
            | Request::AuthStatus(_)
            | Request::AuthUserAdd(_)
            | Request::AuthUserDelete(_)
            | Request::AuthUserChangePassword(_)
            | Request::AuthUserGrantRole(_)
            | Request::AuthUserRevokeRole(_)
            | Request::AuthUserList(_)
            | Request::AuthRoleAdd(_)
            | Request::AuthRoleDelete(_)
            | Request::AuthRoleGrantPermission(_)
            | Request::AuthRoleRevokePermission(_)
            | Request::AuthRoleList(_)
    )
}

fn check_txn(auth: &AuthStore, user: &str, rev: u64, rt: &TxnRequest) -> Result<(), ServerError> {
    for c in &rt.compare {
        auth.is_range_permitted(user, rev, &c.key, &c.range_end)?;
    }
    for op in rt.success.iter().chain(&rt.failure) {
        match &op.request {
            None => {}
            Some(OpRequest::Range(r)) => auth.is_range_permitted(user, rev, &r.key, &r.range_end)?,
            Some(OpRequest::Put(p)) => check_put(auth, user, rev, &p.key, p.prev_kv)?,
            Some(OpRequest::DeleteRange(d)) => check_delete(auth, user, rev, &d.key, &d.range_end, d.prev_kv)?,
            Some(OpRequest::Txn(inner)) => check_txn(auth, user, rev, inner)?,
        }
    }
    Ok(())
}

fn check_put(auth: &AuthStore, user: &str, rev: u64, key: &[u8], prev_kv: bool) -> Result<(), ServerError> {
    auth.is_put_permitted(user, rev, key)?;
    if prev_kv {
        auth.is_range_permitted(user, rev, key, &[])?;
    }
    Ok(())
}

fn check_delete(
    auth: &AuthStore,
    user: &str,
    rev: u64,
    key: &[u8],
    range_end: &[u8],
    prev_kv: bool,
) -> Result<(), ServerError> {
    auth.is_delete_range_permitted(user, rev, key, range_end)?;
    if prev_kv {
        auth.is_range_permitted(user, rev, key, range_end)?;
    }
    Ok(())
}

/// Refuses `req` when the header's user may not issue it.
fn check(auth: &AuthStore, r: &InternalRaftRequest, req: &Request) -> Result<(), ServerError> {
    let user = r.username();
    let rev = r.header.as_ref().map_or(0, |h| h.auth_revision);
    match req {
        Request::Range(q) => auth.is_range_permitted(user, rev, &q.key, &q.range_end),
        Request::Put(p) => check_put(auth, user, rev, &p.key, p.prev_kv),
        Request::DeleteRange(d) => check_delete(auth, user, rev, &d.key, &d.range_end, d.prev_kv),
        Request::Txn(t) => check_txn(auth, user, rev, t),
        Request::AuthUserGet(g) if g.name != user => auth.is_admin_permitted(user, rev),
        Request::AuthRoleGet(g) => match auth.is_admin_permitted(user, rev) {
            Err(ServerError::PermissionDenied) if auth.user_get(user).is_ok_and(|roles| roles.contains(&g.role)) => {
                Ok(())
            }
            other => other,
        },
        req if needs_admin(req) => auth.is_admin_permitted(user, rev),
        _ => Ok(()),
    }
}

impl<A: Applier> Applier for AuthApplier<A> {
    fn apply(&self, ctx: &mut ServerContext, r: &InternalRaftRequest, should_apply_v3: bool) -> ApplyResult {
        if let Some(req) = r.request() {
            if let Err(e) = check(&ctx.auth, r, req) {
                tracing::debug!(kind = %req.kind(), user = r.username(), error = %e, "request refused by auth");
                return ApplyResult::err(e);
            }
        }
        self.inner.apply(ctx, r, should_apply_v3)
    }
}
