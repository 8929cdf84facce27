//!
//! Auth store: users, roles, permissions and the enabled flag, kept in the
//! auth buckets of the backend.
//!
//! Every mutation bumps the auth revision. Requests stamped with an older
//! revision than the current one are refused by the permission checks.

pub mod authpb;
pub mod token;

use std::sync::Arc;

use crate::backend::{Backend, Bucket};
use crate::domain::Permission;
use crate::error::{BackendError, ServerError};
use crate::types::PermissionType;

use authpb::{Role, User, UserOptions};
use token::TokenProvider;

pub const ROOT_USER: &str = "root";
pub const ROOT_ROLE: &str = "root";

const ENABLED_KEY: &[u8] = b"authEnabled";
const REVISION_KEY: &[u8] = b"authRevision";

/// Digest a password the way the store compares it.
pub fn hash_password(password: &str, rounds: u32) -> String {
    let mut digest = blake3::hash(password.as_bytes());
    for _ in 1..rounds.max(1) {
        digest = blake3::hash(digest.as_bytes());
    }
    digest.to_hex().to_string()
}

#[derive(Debug)]
pub struct AuthStore {
    be: Arc<Backend>,
    enabled: bool,
    revision: u64,
    tokens: TokenProvider,
    hash_rounds: u32,
}

impl AuthStore {
    /// Opens the store over `be`, creating the auth buckets and restoring the
    /// enabled flag and revision.
    pub fn new(be: Arc<Backend>, tokens: TokenProvider, hash_rounds: u32) -> Result<Self, BackendError> {
        let (enabled, revision) = {
            let mut tx = be.batch_tx();
            tx.create_bucket(Bucket::Auth);
            tx.create_bucket(Bucket::AuthUsers);
            tx.create_bucket(Bucket::AuthRoles);
            let enabled = tx.get(Bucket::Auth, ENABLED_KEY)?.is_some_and(|v| v == [1]);
            let revision = tx
                .get(Bucket::Auth, REVISION_KEY)?
                .and_then(|v| <[u8; 8]>::try_from(v.as_slice()).ok())
                .map_or(0, u64::from_be_bytes);
            (enabled, revision)
        };
        let mut store = AuthStore { be, enabled, revision, tokens, hash_rounds };
        if store.enabled {
            store.tokens.enable();
        }
        Ok(store)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn commit_revision(&mut self) -> Result<(), ServerError> {
        self.revision += 1;
        self.be.batch_tx().put(Bucket::Auth, REVISION_KEY, &self.revision.to_be_bytes())?;
        Ok(())
    }

    fn get_user(&self, name: &str) -> Result<Option<User>, ServerError> {
        let raw = self.be.batch_tx().get(Bucket::AuthUsers, name.as_bytes())?;
        Ok(raw.map(|raw| authpb::decode_user(&raw)))
    }

    fn get_role(&self, name: &str) -> Result<Option<Role>, ServerError> {
        let raw = self.be.batch_tx().get(Bucket::AuthRoles, name.as_bytes())?;
        Ok(raw.map(|raw| authpb::decode_role(&raw)))
    }

    fn put_user(&self, user: &User) -> Result<(), ServerError> {
        let raw = authpb::encode(user).map_err(|e| BackendError::Persist(e.to_string()))?;
        self.be.batch_tx().put(Bucket::AuthUsers, user.name.as_bytes(), &raw)?;
        Ok(())
    }

    fn put_role(&self, role: &Role) -> Result<(), ServerError> {
        let raw = authpb::encode(role).map_err(|e| BackendError::Persist(e.to_string()))?;
        self.be.batch_tx().put(Bucket::AuthRoles, role.name.as_bytes(), &raw)?;
        Ok(())
    }

    fn all_users(&self) -> Result<Vec<User>, ServerError> {
        let pairs = self.be.batch_tx().scan(Bucket::AuthUsers)?;
        Ok(pairs.iter().map(|(_, raw)| authpb::decode_user(raw)).collect())
    }

    pub fn auth_enable(&mut self) -> Result<(), ServerError> {
        if self.enabled {
            tracing::debug!("auth is already enabled");
            return Ok(());
        }
        let root = self.get_user(ROOT_USER)?.ok_or(ServerError::RootUserNotExist)?;
        if !root.has_role(ROOT_ROLE) {
            return Err(ServerError::RootRoleNotExist);
        }
        self.be.batch_tx().put(Bucket::Auth, ENABLED_KEY, &[1])?;
        self.enabled = true;
        self.tokens.enable();
        self.commit_revision()?;
        tracing::info!(revision = self.revision, "enabled authentication");
        Ok(())
    }

    pub fn auth_disable(&mut self) -> Result<(), ServerError> {
        if !self.enabled {
            return Ok(());
        }
        self.be.batch_tx().put(Bucket::Auth, ENABLED_KEY, &[0])?;
        self.enabled = false;
        self.tokens.disable();
        self.commit_revision()?;
        tracing::info!(revision = self.revision, "disabled authentication");
        Ok(())
    }

    /// Replicated half of authentication: the password was checked by the
    /// proposer, so only the user's existence is re-checked here.
    pub fn authenticate(&mut self, name: &str, simple_token: &str, index: u64) -> Result<String, ServerError> {
        if !self.enabled {
            return Err(ServerError::AuthNotEnabled);
        }
        let user = self.get_user(name)?.ok_or(ServerError::AuthFailed)?;
        if user.options.no_password {
            return Err(ServerError::AuthFailed);
        }
        let token = self.tokens.assign(simple_token, index, name);
        tracing::debug!(user = name, "authenticated user");
        Ok(token)
    }

    pub fn user_add(
        &mut self,
        name: &str,
        password: &str,
        hashed_password: &str,
        no_password: bool,
    ) -> Result<(), ServerError> {
        if name.is_empty() {
            return Err(ServerError::UserEmpty);
        }
        if self.get_user(name)?.is_some() {
            return Err(ServerError::UserAlreadyExist);
        }
        let password = if no_password {
            String::new()
        } else if hashed_password.is_empty() {
            hash_password(password, self.hash_rounds)
        } else {
            hashed_password.to_owned()
        };
        let user = User { name: name.to_owned(), password, roles: Vec::new(), options: UserOptions { no_password } };
        self.put_user(&user)?;
        self.commit_revision()?;
        tracing::debug!(user = name, "added user");
        Ok(())
    }

    pub fn user_delete(&mut self, name: &str) -> Result<(), ServerError> {
        if self.enabled && name == ROOT_USER {
            return Err(ServerError::InvalidAuthManagement);
        }
        if self.get_user(name)?.is_none() {
            return Err(ServerError::UserNotFound);
        }
        self.be.batch_tx().delete(Bucket::AuthUsers, name.as_bytes())?;
        self.commit_revision()?;
        self.tokens.invalidate_user(name);
        tracing::debug!(user = name, "deleted user");
        Ok(())
    }

    pub fn user_change_password(
        &mut self,
        name: &str,
        password: &str,
        hashed_password: &str,
    ) -> Result<(), ServerError> {
        let mut user = self.get_user(name)?.ok_or(ServerError::UserNotFound)?;
        if user.options.no_password {
            return Err(ServerError::NoPasswordUser);
        }
        user.password = if hashed_password.is_empty() {
            hash_password(password, self.hash_rounds)
        } else {
            hashed_password.to_owned()
        };
        self.put_user(&user)?;
        self.commit_revision()?;
        self.tokens.invalidate_user(name);
        Ok(())
    }

    pub fn user_grant_role(&mut self, name: &str, role: &str) -> Result<(), ServerError> {
        let mut user = self.get_user(name)?.ok_or(ServerError::UserNotFound)?;
        if role != ROOT_ROLE && self.get_role(role)?.is_none() {
            return Err(ServerError::RoleNotFound);
        }
        match user.roles.binary_search_by(|r| r.as_str().cmp(role)) {
            Ok(_) => {
                tracing::warn!(user = name, role, "ignored grant of an already granted role");
                return Ok(());
            }
            Err(pos) => user.roles.insert(pos, role.to_owned()),
        }
        self.put_user(&user)?;
        self.commit_revision()?;
        tracing::debug!(user = name, role, "granted role");
        Ok(())
    }

    pub fn user_get(&self, name: &str) -> Result<Vec<String>, ServerError> {
        Ok(self.get_user(name)?.ok_or(ServerError::UserNotFound)?.roles)
    }

    pub fn user_list(&self) -> Result<Vec<String>, ServerError> {
        Ok(self.all_users()?.into_iter().map(|u| u.name).collect())
    }

    pub fn user_revoke_role(&mut self, name: &str, role: &str) -> Result<(), ServerError> {
        if self.enabled && name == ROOT_USER && role == ROOT_ROLE {
            return Err(ServerError::InvalidAuthManagement);
        }
        let mut user = self.get_user(name)?.ok_or(ServerError::UserNotFound)?;
        let pos = user
            .roles
            .binary_search_by(|r| r.as_str().cmp(role))
            .map_err(|_| ServerError::RoleNotGranted)?;
        user.roles.remove(pos);
        self.put_user(&user)?;
        self.commit_revision()?;
        Ok(())
    }

    pub fn role_add(&mut self, name: &str) -> Result<(), ServerError> {
        if name.is_empty() {
            return Err(ServerError::RoleEmpty);
        }
        if self.get_role(name)?.is_some() {
            return Err(ServerError::RoleAlreadyExist);
        }
        self.put_role(&Role { name: name.to_owned(), key_permission: Vec::new() })?;
        self.commit_revision()?;
        tracing::debug!(role = name, "added role");
        Ok(())
    }

    /// Deletes a role and strips it from every user holding it.
    pub fn role_delete(&mut self, name: &str) -> Result<(), ServerError> {
        if self.enabled && name == ROOT_ROLE {
            return Err(ServerError::InvalidAuthManagement);
        }
        if self.get_role(name)?.is_none() {
            return Err(ServerError::RoleNotFound);
        }
        self.be.batch_tx().delete(Bucket::AuthRoles, name.as_bytes())?;
        for mut user in self.all_users()? {
            if let Ok(pos) = user.roles.binary_search_by(|r| r.as_str().cmp(name)) {
                user.roles.remove(pos);
                self.put_user(&user)?;
                self.tokens.invalidate_user(&user.name);
            }
        }
        self.commit_revision()?;
        Ok(())
    }

    pub fn role_get(&self, name: &str) -> Result<Vec<Permission>, ServerError> {
        Ok(self.get_role(name)?.ok_or(ServerError::RoleNotFound)?.key_permission)
    }

    pub fn role_list(&self) -> Result<Vec<String>, ServerError> {
        let pairs = self.be.batch_tx().scan(Bucket::AuthRoles)?;
        Ok(pairs.iter().map(|(_, raw)| authpb::decode_role(raw).name).collect())
    }

    /// Grants `perm` to `name`; a permission on the same interval is replaced.
    pub fn role_grant_permission(&mut self, name: &str, perm: &Permission) -> Result<(), ServerError> {
        let mut role = self.get_role(name)?.ok_or(ServerError::RoleNotFound)?;
        let same_interval = |p: &Permission| p.key == perm.key && p.range_end == perm.range_end;
        match role.key_permission.iter_mut().find(|p| same_interval(p)) {
            Some(existing) => existing.perm_type = perm.perm_type,
            None => {
                let pos = role.key_permission.partition_point(|p| p.key < perm.key);
                role.key_permission.insert(pos, perm.clone());
            }
        }
        self.put_role(&role)?;
        self.commit_revision()?;
        Ok(())
    }

    pub fn role_revoke_permission(&mut self, name: &str, key: &[u8], range_end: &[u8]) -> Result<(), ServerError> {
        let mut role = self.get_role(name)?.ok_or(ServerError::RoleNotFound)?;
        let before = role.key_permission.len();
        role.key_permission.retain(|p| !(p.key == key && p.range_end == range_end));
        if role.key_permission.len() == before {
            return Err(ServerError::PermissionNotGranted);
        }
        self.put_role(&role)?;
        self.commit_revision()?;
        Ok(())
    }

    /// Admin operations require the root role once auth is enabled.
    pub fn is_admin_permitted(&self, username: &str, revision: u64) -> Result<(), ServerError> {
        if !self.enabled {
            return Ok(());
        }
        if username.is_empty() {
            return Err(ServerError::UserEmpty);
        }
        if revision < self.revision {
            return Err(ServerError::AuthOldRevision);
        }
        let user = self.get_user(username)?.ok_or(ServerError::UserNotFound)?;
        if !user.has_role(ROOT_ROLE) {
            return Err(ServerError::PermissionDenied);
        }
        Ok(())
    }

    pub fn is_range_permitted(
        &self,
        username: &str,
        revision: u64,
        key: &[u8],
        range_end: &[u8],
    ) -> Result<(), ServerError> {
        self.is_op_permitted(username, revision, key, range_end, PermissionType::allows_read)
    }

    pub fn is_put_permitted(&self, username: &str, revision: u64, key: &[u8]) -> Result<(), ServerError> {
        self.is_op_permitted(username, revision, key, &[], PermissionType::allows_write)
    }

    pub fn is_delete_range_permitted(
        &self,
        username: &str,
        revision: u64,
        key: &[u8],
        range_end: &[u8],
    ) -> Result<(), ServerError> {
        self.is_op_permitted(username, revision, key, range_end, PermissionType::allows_write)
    }

    fn is_op_permitted(
        &self,
        username: &str,
        revision: u64,
        key: &[u8],
        range_end: &[u8],
        allows: fn(PermissionType) -> bool,
    ) -> Result<(), ServerError> {
        if !self.enabled {
            return Ok(());
        }
        if username.is_empty() {
            return Err(ServerError::UserEmpty);
        }
        if revision < self.revision {
            return Err(ServerError::AuthOldRevision);
        }
        let user = self.get_user(username)?.ok_or(ServerError::PermissionDenied)?;
        if user.has_role(ROOT_ROLE) {
            return Ok(());
        }
        for role_name in &user.roles {
            let Some(role) = self.get_role(role_name)? else { continue };
            let granted = role.key_permission.iter().any(|p| {
                PermissionType::try_from(p.perm_type).is_ok_and(allows) && covers(&p.key, &p.range_end, key, range_end)
            });
            if granted {
                return Ok(());
            }
        }
        Err(ServerError::PermissionDenied)
    }

    /// Overwrites a user record with bytes that do not decode.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn corrupt_user_record(&self, name: &str) {
        let _ = self.be.batch_tx().put(Bucket::AuthUsers, name.as_bytes(), b"\x00not-a-user");
    }
}

enum End<'a> {
    Single,
    Unbounded,
    Exclusive(&'a [u8]),
}

fn end_of(range_end: &[u8]) -> End<'_> {
    match range_end {
        [] => End::Single,
        [0] => End::Unbounded,
        end => End::Exclusive(end),
    }
}

/// Whether the permission interval `[pkey, pend)` contains the request
/// interval `[key, end)`, both with the single-key and `[0]` conventions.
fn covers(pkey: &[u8], pend: &[u8], key: &[u8], end: &[u8]) -> bool {
    match (end_of(pend), end_of(end)) {
        (End::Single, End::Single) => pkey == key,
        (End::Single, _) => false,
        (End::Unbounded, _) => pkey <= key,
        (End::Exclusive(pe), End::Single) => pkey <= key && key < pe,
        (End::Exclusive(_), End::Unbounded) => false,
        (End::Exclusive(pe), End::Exclusive(e)) => pkey <= key && e <= pe,
    }
}
