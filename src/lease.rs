//! Lease management seam.
//!
//! The harness only needs a lessor that is structurally complete, so the one
//! implementation here is `FakeLessor`. Grants and revocations succeed but
//! nothing is tracked, so no lease can be looked up afterwards.

use crate::domain::LeaseCheckpoint;
use crate::error::ServerError;
use crate::types::LeaseId;

pub const MAX_LEASE_TTL: i64 = 9_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub id: LeaseId,
    pub ttl: i64,
}

pub trait Lessor: Send + Sync + std::fmt::Debug {
    fn grant(&mut self, id: LeaseId, ttl: i64) -> Result<Lease, ServerError>;
    fn revoke(&mut self, id: LeaseId) -> Result<(), ServerError>;
    fn checkpoint(&mut self, id: LeaseId, remaining_ttl: i64) -> Result<(), ServerError>;
    fn lookup(&self, id: LeaseId) -> Option<Lease>;
    /// Associates keys with a lease so revocation can delete them.
    fn attach(&mut self, id: LeaseId, keys: &[Vec<u8>]) -> Result<(), ServerError>;
    fn detach(&mut self, id: LeaseId, keys: &[Vec<u8>]) -> Result<(), ServerError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FakeLessor;

impl Lessor for FakeLessor {
    fn grant(&mut self, id: LeaseId, ttl: i64) -> Result<Lease, ServerError> {
        if ttl > MAX_LEASE_TTL {
            return Err(ServerError::LeaseTtlOutOfRange(ttl));
        }
        tracing::debug!(lease = id, ttl, "fake lessor grant");
        Ok(Lease { id, ttl })
    }

    fn revoke(&mut self, _id: LeaseId) -> Result<(), ServerError> {
        Ok(())
    }

    fn checkpoint(&mut self, _id: LeaseId, _remaining_ttl: i64) -> Result<(), ServerError> {
        Ok(())
    }

    fn lookup(&self, _id: LeaseId) -> Option<Lease> {
        None
    }

    fn attach(&mut self, _id: LeaseId, _keys: &[Vec<u8>]) -> Result<(), ServerError> {
        Ok(())
    }

    fn detach(&mut self, _id: LeaseId, _keys: &[Vec<u8>]) -> Result<(), ServerError> {
        Ok(())
    }
}

/// Applies every checkpoint of a request, stopping at the first failure.
pub fn apply_checkpoints(lessor: &mut dyn Lessor, checkpoints: &[LeaseCheckpoint]) -> Result<(), ServerError> {
    for cp in checkpoints {
        lessor.checkpoint(cp.id, cp.remaining_ttl)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_lessor_accepts_without_tracking() {
        let mut lessor = FakeLessor;
        assert_eq!(lessor.grant(7, 10), Ok(Lease { id: 7, ttl: 10 }));
        assert_eq!(lessor.lookup(7), None);
        // Revoking an unknown lease succeeds.
        assert_eq!(lessor.revoke(7), Ok(()));
        assert_eq!(lessor.revoke(8), Ok(()));
    }

    #[test]
    fn grant_rejects_ttl_above_the_maximum() {
        let err = FakeLessor.grant(1, MAX_LEASE_TTL + 1).unwrap_err();
        assert_eq!(err, ServerError::LeaseTtlOutOfRange(MAX_LEASE_TTL + 1));
    }

    #[test]
    fn checkpoints_apply_in_order() {
        let cps = [LeaseCheckpoint { id: 1, remaining_ttl: 5 }, LeaseCheckpoint { id: 2, remaining_ttl: 3 }];
        assert_eq!(apply_checkpoints(&mut FakeLessor, &cps), Ok(()));
    }
}
