//! Consistent index: the raft index of the last entry whose effects are in
//! the backend. Replays of entries at or below it skip their v3 effects.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::backend::{Backend, BatchTx, Bucket, Hooks};
use crate::error::BackendError;

const CONSISTENT_INDEX_KEY: &[u8] = b"consistent_index";
const TERM_KEY: &[u8] = b"term";

/// Creates the meta bucket every other store expects to exist.
pub fn create_meta_bucket(tx: &mut BatchTx<'_>) {
    tx.create_bucket(Bucket::Meta);
}

#[derive(Debug, Default)]
pub struct ConsistentIndex {
    index: AtomicU64,
    term: AtomicU64,
}

impl ConsistentIndex {
    /// Loads the persisted index and term from `be`.
    pub fn new(be: &Backend) -> Result<Self, BackendError> {
        let tx = be.batch_tx();
        let read = |key: &[u8]| -> Result<u64, BackendError> {
            Ok(tx.get(Bucket::Meta, key)?.map(|raw| decode_u64(&raw)).unwrap_or(0))
        };
        let ci = ConsistentIndex {
            index: AtomicU64::new(read(CONSISTENT_INDEX_KEY)?),
            term: AtomicU64::new(read(TERM_KEY)?),
        };
        Ok(ci)
    }

    pub fn consistent_index(&self) -> u64 {
        self.index.load(Ordering::SeqCst)
    }

    pub fn term(&self) -> u64 {
        self.term.load(Ordering::SeqCst)
    }

    pub fn set_consistent_index(&self, index: u64, term: u64) {
        self.index.store(index, Ordering::SeqCst);
        self.term.store(term, Ordering::SeqCst);
    }

    /// Writes index and term into the open transaction. The index never moves
    /// backwards on disk.
    pub fn unsafe_save(&self, tx: &mut BatchTx<'_>) -> Result<(), BackendError> {
        let index = self.consistent_index();
        if index == 0 {
            return Ok(());
        }
        let persisted = tx.get(Bucket::Meta, CONSISTENT_INDEX_KEY)?.map(|raw| decode_u64(&raw)).unwrap_or(0);
        if index < persisted {
            return Ok(());
        }
        tx.put(Bucket::Meta, CONSISTENT_INDEX_KEY, &index.to_be_bytes())?;
        tx.put(Bucket::Meta, TERM_KEY, &self.term().to_be_bytes())
    }
}

fn decode_u64(raw: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let n = raw.len().min(8);
    buf[8 - n..].copy_from_slice(&raw[raw.len() - n..]);
    u64::from_be_bytes(buf)
}

/// Backend hooks persisting the consistent index on every commit.
#[derive(Debug, Clone)]
pub struct BackendHooks {
    ci: Arc<ConsistentIndex>,
}

impl BackendHooks {
    pub fn new(ci: Arc<ConsistentIndex>) -> Self {
        BackendHooks { ci }
    }
}

impl Hooks for BackendHooks {
    fn on_pre_commit(&self, tx: &mut BatchTx<'_>) {
        if let Err(e) = self.ci.unsafe_save(tx) {
            tracing::error!(error = %e, "failed to save consistent index");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DEFAULT_BATCH_LIMIT;

    #[test]
    fn index_survives_commit_and_reload() {
        let be = Backend::new_tmp(DEFAULT_BATCH_LIMIT).unwrap();
        create_meta_bucket(&mut be.batch_tx());
        let ci = Arc::new(ConsistentIndex::new(&be).unwrap());
        assert_eq!(ci.consistent_index(), 0);
        be.set_hooks(Arc::new(BackendHooks::new(ci.clone())));

        ci.set_consistent_index(42, 3);
        be.force_commit().unwrap();

        let reloaded = ConsistentIndex::new(&be).unwrap();
        assert_eq!(reloaded.consistent_index(), 42);
        assert_eq!(reloaded.term(), 3);
    }

    #[test]
    fn saved_index_never_regresses() {
        let be = Backend::new_tmp(DEFAULT_BATCH_LIMIT).unwrap();
        create_meta_bucket(&mut be.batch_tx());
        let ci = ConsistentIndex::new(&be).unwrap();
        ci.set_consistent_index(10, 1);
        ci.unsafe_save(&mut be.batch_tx()).unwrap();
        ci.set_consistent_index(5, 1);
        ci.unsafe_save(&mut be.batch_tx()).unwrap();
        assert_eq!(ConsistentIndex::new(&be).unwrap().consistent_index(), 10);
    }
}
