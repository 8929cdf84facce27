//! Errors raised while setting up the harness.

use crate::auth::token::TokenError;
use crate::error::{BackendError, ServerError, VersionError};

/// Failures building the harness context. These are harness bugs, never
/// findings in the applier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HarnessError {
    /// The temporary backend could not be created or seeded.
    #[error("backend: {0}")]
    Backend(#[from] BackendError),
    /// The configured token provider is unknown or misconfigured.
    #[error("token provider: {0}")]
    Token(#[from] TokenError),
    /// `server_version` is not a dotted-tri version.
    #[error("server version: {0}")]
    Version(#[from] VersionError),
    /// Registering the local member failed.
    #[error("cluster setup: {0}")]
    Cluster(#[from] ServerError),
    /// A config field is out of range or the JSON is malformed.
    #[error("invalid harness config: {0}")]
    Config(String),
}
