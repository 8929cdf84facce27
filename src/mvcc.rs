//!
//! Multi-version key space.
//!
//! Every write transaction that changes something advances the store by one
//! main revision; the changes inside it are ordered by sub revision. Reads
//! address any revision between the compaction point and the current one.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::{Backend, Bucket};
use crate::error::{BackendError, ServerError};
use crate::lease::Lessor;
use crate::primitives::KeyValue;
use crate::types::{LeaseId, Revision, NO_LEASE};

const FINISHED_COMPACT_REV_KEY: &[u8] = b"finishedCompactRev";
const TOMBSTONE_MARK: u8 = b't';

/// Interval addressed by a `(key, range_end)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRange<'a> {
    /// Empty `range_end`: exactly `key`.
    Single(&'a [u8]),
    /// `range_end == [0]`: every key `>= key`.
    From(&'a [u8]),
    /// `[key, range_end)`.
    Between(&'a [u8], &'a [u8]),
}

impl<'a> KeyRange<'a> {
    pub fn new(key: &'a [u8], range_end: &'a [u8]) -> Self {
        match range_end {
            [] => KeyRange::Single(key),
            [0] => KeyRange::From(key),
            end => KeyRange::Between(key, end),
        }
    }

    fn bounds(&self) -> Option<(Bound<&'a [u8]>, Bound<&'a [u8]>)> {
        match *self {
            KeyRange::Single(k) => Some((Bound::Included(k), Bound::Included(k))),
            KeyRange::From(k) => Some((Bound::Included(k), Bound::Unbounded)),
            // BTreeMap::range rejects inverted bounds.
            KeyRange::Between(k, end) if k >= end => None,
            KeyRange::Between(k, end) => Some((Bound::Included(k), Bound::Excluded(end))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeOptions {
    /// Zero or negative: unlimited.
    pub limit: i64,
    /// Zero or negative: the current revision.
    pub rev: Revision,
    pub count_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeResult {
    pub kvs: Vec<KeyValue>,
    /// Revision of the store the read ran against.
    pub rev: Revision,
    /// Matching keys before the limit was applied.
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Record {
    main: Revision,
    sub: i64,
    /// `None` marks a deletion.
    kv: Option<KeyValue>,
}

#[derive(Serialize, Deserialize)]
struct StoredRecord {
    kv: KeyValue,
}

#[derive(Debug)]
pub struct KvStore {
    be: Arc<Backend>,
    lessor: Box<dyn Lessor>,
    index: BTreeMap<Vec<u8>, Vec<Record>>,
    current_rev: Revision,
    compact_rev: Revision,
}

fn record_key(main: Revision, sub: i64, tombstone: bool) -> Vec<u8> {
    let mut key = Vec::with_capacity(18);
    key.extend_from_slice(&main.to_be_bytes());
    key.push(b'_');
    key.extend_from_slice(&sub.to_be_bytes());
    if tombstone {
        key.push(TOMBSTONE_MARK);
    }
    key
}

fn parse_record_key(raw: &[u8]) -> Option<(Revision, i64, bool)> {
    let main = Revision::from_be_bytes(raw.get(..8)?.try_into().ok()?);
    let sub = i64::from_be_bytes(raw.get(9..17)?.try_into().ok()?);
    Some((main, sub, raw.get(17) == Some(&TOMBSTONE_MARK)))
}

impl KvStore {
    /// Opens the key space over `be`, rebuilding the index from the key bucket.
    pub fn new(be: Arc<Backend>, lessor: Box<dyn Lessor>) -> Result<Self, BackendError> {
        let mut store = KvStore { be, lessor, index: BTreeMap::new(), current_rev: 1, compact_rev: -1 };
        let (pairs, compacted) = {
            let mut tx = store.be.batch_tx();
            tx.create_bucket(Bucket::Key);
            tx.create_bucket(Bucket::Meta);
            (tx.scan(Bucket::Key)?, tx.get(Bucket::Meta, FINISHED_COMPACT_REV_KEY)?)
        };
        for (raw_key, raw_value) in pairs {
            let Some((main, sub, tombstone)) = parse_record_key(&raw_key) else { continue };
            let Ok(stored) = serde_json::from_slice::<StoredRecord>(&raw_value) else {
                tracing::warn!(main, sub, "skipping undecodable key record");
                continue;
            };
            let key = stored.kv.key.clone();
            let kv = (!tombstone).then_some(stored.kv);
            store.index.entry(key).or_default().push(Record { main, sub, kv });
            store.current_rev = store.current_rev.max(main);
        }
        if let Some(raw) = compacted.and_then(|v| <[u8; 8]>::try_from(v.as_slice()).ok()) {
            store.compact_rev = Revision::from_be_bytes(raw);
        }
        Ok(store)
    }

    pub fn rev(&self) -> Revision {
        self.current_rev
    }

    /// Oldest readable revision.
    pub fn first_rev(&self) -> Revision {
        self.compact_rev
    }

    pub fn write(&mut self) -> TxnWrite<'_> {
        let begin_rev = self.current_rev;
        TxnWrite { store: self, begin_rev, changes: 0 }
    }

    /// Drops history older than `rev`, keeping the newest live version of
    /// each key at or below it.
    pub fn compact(&mut self, rev: Revision) -> Result<(), ServerError> {
        if rev <= self.compact_rev {
            return Err(ServerError::Compacted);
        }
        if rev > self.current_rev {
            return Err(ServerError::FutureRev);
        }
        let mut tx = self.be.batch_tx();
        self.index.retain(|_, records| {
            let keep_from = records.iter().rposition(|r| r.main <= rev).unwrap_or(0);
            let drop_upto = match records.get(keep_from) {
                Some(r) if r.main <= rev && r.kv.is_none() => keep_from + 1,
                _ => keep_from,
            };
            for r in records.drain(..drop_upto) {
                if let Err(e) = tx.delete(Bucket::Key, &record_key(r.main, r.sub, r.kv.is_none())) {
                    tracing::error!(error = %e, "failed to drop compacted record");
                }
            }
            !records.is_empty()
        });
        tx.put(Bucket::Meta, FINISHED_COMPACT_REV_KEY, &rev.to_be_bytes())?;
        drop(tx);
        self.compact_rev = rev;
        tracing::debug!(rev, "compacted key space");
        Ok(())
    }

    fn latest_at(records: &[Record], rev: Revision) -> Option<&KeyValue> {
        records.iter().rev().find(|r| r.main <= rev).and_then(|r| r.kv.as_ref())
    }
}

/// Write transaction over the key space. Reads inside it observe its own
/// writes.
#[derive(Debug)]
pub struct TxnWrite<'a> {
    store: &'a mut KvStore,
    begin_rev: Revision,
    changes: i64,
}

impl TxnWrite<'_> {
    /// Revision reads inside this transaction run against.
    pub fn rev(&self) -> Revision {
        if self.changes > 0 {
            self.begin_rev + 1
        } else {
            self.begin_rev
        }
    }

    pub fn first_rev(&self) -> Revision {
        self.store.compact_rev
    }

    pub fn changes(&self) -> i64 {
        self.changes
    }

    pub fn range(&self, range: KeyRange<'_>, opts: RangeOptions) -> Result<RangeResult, ServerError> {
        let cur = self.rev();
        let rev = opts.rev;
        if rev > cur {
            return Err(ServerError::FutureRev);
        }
        let rev = if rev <= 0 { cur } else { rev };
        if rev < self.store.compact_rev {
            return Err(ServerError::Compacted);
        }
        let Some(bounds) = range.bounds() else {
            return Ok(RangeResult { kvs: Vec::new(), rev: cur, count: 0 });
        };
        let live = self
            .store
            .index
            .range::<[u8], _>(bounds)
            .filter_map(|(_, records)| KvStore::latest_at(records, rev));
        if opts.count_only {
            return Ok(RangeResult { kvs: Vec::new(), rev: cur, count: live.count() as i64 });
        }
        let matched: Vec<&KeyValue> = live.collect();
        let count = matched.len() as i64;
        let limit = if opts.limit <= 0 { matched.len() } else { (opts.limit as usize).min(matched.len()) };
        Ok(RangeResult { kvs: matched[..limit].iter().map(|kv| (*kv).clone()).collect(), rev: cur, count })
    }

    /// Writes `key` at the transaction's revision and returns that revision.
    pub fn put(&mut self, key: &[u8], value: &[u8], lease: LeaseId) -> Result<Revision, ServerError> {
        let main = self.begin_rev + 1;
        let sub = self.changes;
        let prev = self.store.index.get(key).and_then(|records| records.last()).and_then(|r| r.kv.clone());
        let (create_revision, version) = match &prev {
            Some(kv) => (kv.create_revision, kv.version + 1),
            None => (main, 1),
        };
        let kv = KeyValue {
            key: key.to_vec(),
            create_revision,
            mod_revision: main,
            version,
            value: value.to_vec(),
            lease,
        };
        self.persist(main, sub, &kv, false)?;

        if let Some(old) = prev.as_ref().filter(|kv| kv.lease != NO_LEASE && kv.lease != lease) {
            self.store.lessor.detach(old.lease, std::slice::from_ref(&old.key))?;
        }
        if lease != NO_LEASE {
            self.store.lessor.attach(lease, std::slice::from_ref(&kv.key))?;
        }

        self.store.index.entry(key.to_vec()).or_default().push(Record { main, sub, kv: Some(kv) });
        self.changes += 1;
        Ok(main)
    }

    /// Deletes every live key in `range`; returns the number deleted and the
    /// transaction's revision.
    pub fn delete_range(&mut self, range: KeyRange<'_>) -> Result<(i64, Revision), ServerError> {
        let Some(bounds) = range.bounds() else {
            return Ok((0, self.rev()));
        };
        let doomed: Vec<KeyValue> = self
            .store
            .index
            .range::<[u8], _>(bounds)
            .filter_map(|(_, records)| records.last().and_then(|r| r.kv.clone()))
            .collect();
        let main = self.begin_rev + 1;
        for kv in &doomed {
            let sub = self.changes;
            self.persist(main, sub, kv, true)?;
            if kv.lease != NO_LEASE {
                self.store.lessor.detach(kv.lease, std::slice::from_ref(&kv.key))?;
            }
            if let Some(records) = self.store.index.get_mut(&kv.key) {
                records.push(Record { main, sub, kv: None });
            }
            self.changes += 1;
        }
        Ok((doomed.len() as i64, self.rev()))
    }

    fn persist(&self, main: Revision, sub: i64, kv: &KeyValue, tombstone: bool) -> Result<(), ServerError> {
        let raw =
            serde_json::to_vec(&StoredRecord { kv: kv.clone() }).map_err(|e| BackendError::Persist(e.to_string()))?;
        self.store.be.batch_tx().put(Bucket::Key, &record_key(main, sub, tombstone), &raw)?;
        Ok(())
    }

    /// Closes the transaction and returns the store's current revision.
    pub fn end(self) -> Revision {
        if self.changes > 0 {
            self.store.current_rev = self.begin_rev + 1;
        }
        self.store.current_rev
    }
}
