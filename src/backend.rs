//! Bucketed key/value backend shared by every store of the server.
//!
//! Data lives in memory and is snapshotted into a file inside a temporary
//! directory whenever the pending write count reaches the batch limit or a
//! commit is forced. The directory is removed when the backend is dropped.

use std::collections::BTreeMap;
use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use serde_bytes::ByteBuf;
use tempfile::TempDir;

use crate::error::BackendError;

pub const DEFAULT_BATCH_LIMIT: usize = 10_000;

const SNAPSHOT_FILE: &str = "db";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bucket {
    Key,
    Meta,
    Lease,
    Alarm,
    Cluster,
    Members,
    MembersRemoved,
    Auth,
    AuthUsers,
    AuthRoles,
}

impl Bucket {
    pub fn name(self) -> &'static str {
        match self {
            Bucket::Key => "key",
            Bucket::Meta => "meta",
            Bucket::Lease => "lease",
            Bucket::Alarm => "alarm",
            Bucket::Cluster => "cluster",
            Bucket::Members => "members",
            Bucket::MembersRemoved => "members_removed",
            Bucket::Auth => "auth",
            Bucket::AuthUsers => "authUsers",
            Bucket::AuthRoles => "authRoles",
        }
    }
}

/// Callback run under the write lock right before pending writes are committed.
pub trait Hooks: Send + Sync {
    fn on_pre_commit(&self, tx: &mut BatchTx<'_>);
}

#[derive(Debug, Default)]
struct BackendState {
    buckets: BTreeMap<Bucket, BTreeMap<Vec<u8>, Vec<u8>>>,
    pending: usize,
    commits: u64,
}

pub struct Backend {
    // Held for its Drop: removes the directory with the backend.
    _dir: TempDir,
    path: PathBuf,
    batch_limit: usize,
    state: Mutex<BackendState>,
    hooks: OnceLock<Arc<dyn Hooks>>,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("path", &self.path)
            .field("batch_limit", &self.batch_limit)
            .finish_non_exhaustive()
    }
}

impl Backend {
    /// Backend rooted in a fresh temporary directory.
    pub fn new_tmp(batch_limit: usize) -> Result<Self, BackendError> {
        let dir = tempfile::Builder::new()
            .prefix("applyfuzz-backend")
            .tempdir()
            .map_err(|e| BackendError::TempDir(e.to_string()))?;
        let path = dir.path().join(SNAPSHOT_FILE);
        tracing::debug!(path = %path.display(), "created temporary backend");
        Ok(Backend {
            _dir: dir,
            path,
            batch_limit: batch_limit.max(1),
            state: Mutex::new(BackendState::default()),
            hooks: OnceLock::new(),
        })
    }

    /// Installs the pre-commit hooks. Only the first call has an effect.
    pub fn set_hooks(&self, hooks: Arc<dyn Hooks>) -> bool {
        self.hooks.set(hooks).is_ok()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the batch transaction. A guard dropped with a full batch commits.
    pub fn batch_tx(&self) -> BatchTx<'_> {
        // A panic while the lock was held leaves the maps consistent at the
        // granularity of single operations, which is all the stores rely on.
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        BatchTx { backend: self, state }
    }

    /// Commits pending writes now, regardless of the batch limit.
    pub fn force_commit(&self) -> Result<(), BackendError> {
        self.batch_tx().commit()
    }

    pub fn commits(&self) -> u64 {
        self.batch_tx().state.commits
    }
}

/// Exclusive access to the backend maps.
pub struct BatchTx<'a> {
    backend: &'a Backend,
    state: MutexGuard<'a, BackendState>,
}

impl BatchTx<'_> {
    pub fn create_bucket(&mut self, bucket: Bucket) {
        self.state.buckets.entry(bucket).or_default();
    }

    pub fn has_bucket(&self, bucket: Bucket) -> bool {
        self.state.buckets.contains_key(&bucket)
    }

    fn bucket(&self, bucket: Bucket) -> Result<&BTreeMap<Vec<u8>, Vec<u8>>, BackendError> {
        self.state.buckets.get(&bucket).ok_or(BackendError::BucketNotFound(bucket.name()))
    }

    fn bucket_mut(&mut self, bucket: Bucket) -> Result<&mut BTreeMap<Vec<u8>, Vec<u8>>, BackendError> {
        let state = self.state.deref_mut();
        state.pending += 1;
        state.buckets.get_mut(&bucket).ok_or(BackendError::BucketNotFound(bucket.name()))
    }

    pub fn put(&mut self, bucket: Bucket, key: &[u8], value: &[u8]) -> Result<(), BackendError> {
        self.bucket_mut(bucket)?.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    pub fn delete(&mut self, bucket: Bucket, key: &[u8]) -> Result<bool, BackendError> {
        Ok(self.bucket_mut(bucket)?.remove(key).is_some())
    }

    pub fn get(&self, bucket: Bucket, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError> {
        Ok(self.bucket(bucket)?.get(key).cloned())
    }

    /// Pairs with `start <= key < end`; `end == None` reads the single key
    /// `start`. A `limit` of zero is unbounded.
    pub fn range(
        &self,
        bucket: Bucket,
        start: &[u8],
        end: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, BackendError> {
        let map = self.bucket(bucket)?;
        let Some(end) = end else {
            return Ok(map.get(start).map(|v| vec![(start.to_vec(), v.clone())]).unwrap_or_default());
        };
        let limit = if limit == 0 { usize::MAX } else { limit };
        Ok(map
            .range(start.to_vec()..)
            .take_while(|(k, _)| k.as_slice() < end)
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    /// Every pair of the bucket in key order.
    pub fn scan(&self, bucket: Bucket) -> Result<Vec<(Vec<u8>, Vec<u8>)>, BackendError> {
        Ok(self.bucket(bucket)?.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    pub fn pending(&self) -> usize {
        self.state.pending
    }

    /// Runs the hooks and writes the snapshot.
    pub fn commit(mut self) -> Result<(), BackendError> {
        self.commit_locked()
    }

    fn commit_locked(&mut self) -> Result<(), BackendError> {
        if let Some(hooks) = self.backend.hooks.get().cloned() {
            hooks.on_pre_commit(self);
        }
        let snapshot: BTreeMap<&'static str, Vec<(ByteBuf, ByteBuf)>> = self
            .state
            .buckets
            .iter()
            .map(|(bucket, pairs)| {
                let pairs = pairs
                    .iter()
                    .map(|(k, v)| (ByteBuf::from(k.clone()), ByteBuf::from(v.clone())))
                    .collect();
                (bucket.name(), pairs)
            })
            .collect();
        let bytes = serde_json::to_vec(&snapshot).map_err(|e| BackendError::Persist(e.to_string()))?;
        fs::write(&self.backend.path, bytes).map_err(|e| BackendError::Persist(e.to_string()))?;
        let state = self.state.deref_mut();
        state.pending = 0;
        state.commits += 1;
        Ok(())
    }
}

impl Drop for BatchTx<'_> {
    fn drop(&mut self) {
        if self.state.deref().pending >= self.backend.batch_limit {
            if let Err(e) = self.commit_locked() {
                tracing::error!(error = %e, "backend batch commit failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn missing_bucket_is_an_error() {
        let be = Backend::new_tmp(DEFAULT_BATCH_LIMIT).unwrap();
        let mut tx = be.batch_tx();
        assert_eq!(tx.put(Bucket::Key, b"k", b"v"), Err(BackendError::BucketNotFound("key")));
        assert!(!tx.has_bucket(Bucket::Key));
        tx.create_bucket(Bucket::Key);
        assert!(tx.has_bucket(Bucket::Key));
        tx.put(Bucket::Key, b"k", b"v").unwrap();
        assert_eq!(tx.get(Bucket::Key, b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn range_respects_bounds_and_limit() {
        let be = Backend::new_tmp(DEFAULT_BATCH_LIMIT).unwrap();
        let mut tx = be.batch_tx();
        tx.create_bucket(Bucket::Key);
        for k in [b"a", b"b", b"c", b"d"] {
            tx.put(Bucket::Key, k, b"x").unwrap();
        }
        let keys = |pairs: Vec<(Vec<u8>, Vec<u8>)>| pairs.into_iter().map(|(k, _)| k).collect::<Vec<_>>();
        assert_eq!(keys(tx.range(Bucket::Key, b"b", Some(b"d"), 0).unwrap()), vec![b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(keys(tx.range(Bucket::Key, b"a", Some(b"z"), 1).unwrap()), vec![b"a".to_vec()]);
        assert_eq!(keys(tx.range(Bucket::Key, b"c", None, 0).unwrap()), vec![b"c".to_vec()]);
    }

    struct CountingHooks(AtomicUsize);

    impl Hooks for CountingHooks {
        fn on_pre_commit(&self, tx: &mut BatchTx<'_>) {
            self.0.fetch_add(1, Ordering::SeqCst);
            tx.put(Bucket::Meta, b"hooked", b"1").unwrap();
        }
    }

    #[test]
    fn full_batch_commits_on_drop_and_runs_hooks() {
        let be = Backend::new_tmp(2).unwrap();
        let hooks = Arc::new(CountingHooks(AtomicUsize::new(0)));
        assert!(be.set_hooks(hooks.clone()));
        {
            let mut tx = be.batch_tx();
            tx.create_bucket(Bucket::Meta);
            tx.put(Bucket::Meta, b"a", b"1").unwrap();
            tx.put(Bucket::Meta, b"b", b"2").unwrap();
        }
        assert_eq!(hooks.0.load(Ordering::SeqCst), 1);
        assert_eq!(be.commits(), 1);
        assert!(be.path().exists());
        assert_eq!(be.batch_tx().get(Bucket::Meta, b"hooked").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn dropping_the_backend_removes_its_directory() {
        let be = Backend::new_tmp(DEFAULT_BATCH_LIMIT).unwrap();
        be.batch_tx().create_bucket(Bucket::Alarm);
        be.force_commit().unwrap();
        let dir = be.path().parent().map(Path::to_path_buf).unwrap();
        assert!(be.path().ends_with(SNAPSHOT_FILE));
        assert!(dir.exists());
        drop(be);
        assert!(!dir.exists());
    }
}
