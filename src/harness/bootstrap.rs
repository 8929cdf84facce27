//! Builds the minimal server the drivers apply against.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::alarm::AlarmStore;
use crate::auth::token::{TokenProvider, DEFAULT_SIMPLE_TOKEN_TTL, TOKEN_TYPE_SIMPLE};
use crate::auth::AuthStore;
use crate::backend::{Backend, DEFAULT_BATCH_LIMIT};
use crate::cindex::{create_meta_bucket, BackendHooks, ConsistentIndex};
use crate::domain::{ApplyResult, InternalRaftRequest};
use crate::lease::FakeLessor;
use crate::membership::RaftCluster;
use crate::mvcc::KvStore;
use crate::primitives::Member;
use crate::server::raft::RaftNode;
use crate::server::{Applier, Server, ServerContext};
use crate::types::MemberId;
use crate::version::Version;
use crate::wait::Wait;

use super::error::HarnessError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub member_id: MemberId,
    pub token_type: String,
    pub token_ttl_secs: u64,
    /// Entry batches hold `n % max_entries` entries.
    pub max_entries: usize,
    pub password_hash_rounds: u32,
    pub server_version: String,
    pub batch_limit: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            member_id: 1,
            token_type: TOKEN_TYPE_SIMPLE.to_owned(),
            token_ttl_secs: DEFAULT_SIMPLE_TOKEN_TTL.as_secs(),
            max_entries: 20,
            password_hash_rounds: 1,
            server_version: "3.5.0".to_owned(),
            batch_limit: DEFAULT_BATCH_LIMIT,
        }
    }
}

impl HarnessConfig {
    /// Parses a config; missing fields take their defaults.
    pub fn from_json(raw: &str) -> Result<Self, HarnessError> {
        let cfg: HarnessConfig = serde_json::from_str(raw).map_err(|e| HarnessError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.member_id == 0 {
            return Err(HarnessError::Config("member_id must be non-zero".into()));
        }
        if self.max_entries == 0 {
            return Err(HarnessError::Config("max_entries must be positive".into()));
        }
        Ok(())
    }
}

/// A bootstrapped single-member server plus the config it was built from.
#[derive(Debug)]
pub struct HarnessContext {
    pub server: Server,
    config: HarnessConfig,
}

impl HarnessContext {
    /// Builds every store over one fresh temporary backend. Each step relies
    /// on the ones before it.
    pub fn bootstrap(cfg: &HarnessConfig) -> Result<Self, HarnessError> {
        cfg.validate()?;
        let server_version = Version::parse(&cfg.server_version)?;

        let be = Arc::new(Backend::new_tmp(cfg.batch_limit)?);
        create_meta_bucket(&mut be.batch_tx());

        let mut cluster = RaftCluster::new(cfg.member_id, server_version);
        cluster.add_member(Member::new(cfg.member_id), true)?;
        cluster.set_backend(Arc::clone(&be));

        let consist_index = Arc::new(ConsistentIndex::new(&be)?);
        be.set_hooks(Arc::new(BackendHooks::new(Arc::clone(&consist_index))));

        let tokens = TokenProvider::new(&cfg.token_type, cfg.token_ttl())?;
        let auth = AuthStore::new(Arc::clone(&be), tokens, cfg.password_hash_rounds)?;
        let alarms = AlarmStore::new(Arc::clone(&be))?;
        let kv = KvStore::new(Arc::clone(&be), Box::new(FakeLessor))?;

        let ctx = ServerContext {
            id: cfg.member_id,
            be,
            cluster,
            consist_index,
            auth,
            alarms,
            lessor: Box::new(FakeLessor),
            kv,
            wait: Wait::new(),
            raft: RaftNode::new([cfg.member_id]),
            applied_index: 0,
            applied_term: 0,
        };
        tracing::debug!(member = cfg.member_id, "harness context bootstrapped");
        Ok(HarnessContext { server: Server::new(ctx), config: cfg.clone() })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn ctx(&mut self) -> &mut ServerContext {
        &mut self.server.ctx
    }

    /// Applies through the backend layer, bypassing permission checks.
    pub fn apply_backend(&mut self, r: &InternalRaftRequest, should_apply_v3: bool) -> ApplyResult {
        let applier = self.server.appliers.backend;
        applier.apply(&mut self.server.ctx, r, should_apply_v3)
    }

    /// Applies through the permission-checking layer.
    pub fn apply_checked(&mut self, r: &InternalRaftRequest, should_apply_v3: bool) -> ApplyResult {
        let applier = self.server.appliers.server;
        applier.apply(&mut self.server.ctx, r, should_apply_v3)
    }
}

static SHARED: OnceLock<Mutex<HarnessContext>> = OnceLock::new();

/// The process-wide context, bootstrapped with the default config by the
/// first caller; concurrent first callers wait for that one build. State
/// accumulates across callers and a poisoned lock is taken over as is.
///
/// # Panics
/// When the bootstrap fails.
pub fn shared_context() -> MutexGuard<'static, HarnessContext> {
    let cell = SHARED.get_or_init(|| match HarnessContext::bootstrap(&HarnessConfig::default()) {
        Ok(ctx) => Mutex::new(ctx),
        Err(e) => {
            tracing::error!(error = %e, "shared harness context failed to bootstrap");
            panic!("harness bootstrap failed: {e}")
        }
    });
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_context_is_built_once() {
        let backends: Vec<usize> = (0..4)
            .map(|_| std::thread::spawn(|| Arc::as_ptr(&shared_context().server.ctx.be) as usize))
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();
        assert!(backends.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn bootstrap_rejects_invalid_config() {
        let cfg = HarnessConfig { member_id: 0, ..HarnessConfig::default() };
        assert!(matches!(HarnessContext::bootstrap(&cfg), Err(HarnessError::Config(_))));
        let cfg = HarnessConfig { server_version: "3.5".into(), ..HarnessConfig::default() };
        assert!(matches!(HarnessContext::bootstrap(&cfg), Err(HarnessError::Version(_))));
    }
}
