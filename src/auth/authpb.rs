//! Records persisted in the auth buckets.

use serde::{Deserialize, Serialize};

use crate::domain::Permission;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserOptions {
    pub no_password: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    /// Hex digest; empty for users created without a password.
    pub password: String,
    /// Kept sorted.
    pub roles: Vec<String>,
    pub options: UserOptions,
}

impl User {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.binary_search_by(|r| r.as_str().cmp(role)).is_ok()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    /// Kept sorted by key.
    pub key_permission: Vec<Permission>,
}

/// # Panics
/// When the stored bytes are not a user record.
pub fn decode_user(raw: &[u8]) -> User {
    serde_json::from_slice(raw).unwrap_or_else(|e| {
        tracing::error!(error = %e, "stored user record is corrupt");
        panic!("failed to unmarshal 'authpb.User': {e}")
    })
}

/// # Panics
/// When the stored bytes are not a role record.
pub fn decode_role(raw: &[u8]) -> Role {
    serde_json::from_slice(raw).unwrap_or_else(|e| {
        tracing::error!(error = %e, "stored role record is corrupt");
        panic!("failed to unmarshal 'authpb.Role': {e}")
    })
}

pub fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(record)
}
