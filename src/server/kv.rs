//! Key-space requests: range, put, delete-range and txn.

use std::cmp::Ordering;

use crate::domain::{
    Compare, CompareTarget, DeleteRangeRequest, DeleteRangeResponse, OpRequest, PutRequest, PutResponse,
    RangeRequest, RangeResponse, Response, ResponseBody, ResponseOp, TxnRequest, TxnResponse,
};
use crate::error::ServerError;
use crate::lease::Lessor;
use crate::mvcc::{KeyRange, RangeOptions, TxnWrite};
use crate::primitives::KeyValue;
use crate::types::{CompareResult, Revision, SortOrder, SortTarget, NO_LEASE};

use super::ServerContext;

pub(crate) fn range(ctx: &mut ServerContext, r: &RangeRequest) -> Result<Response, ServerError> {
    let txn = ctx.kv.write();
    let result = range_in(&txn, r);
    txn.end();
    let (resp, rev) = result?;
    Ok(Response { header: ctx.header(rev), body: ResponseBody::Range(resp) })
}

pub(crate) fn put(ctx: &mut ServerContext, p: &PutRequest) -> Result<Response, ServerError> {
    if p.lease != NO_LEASE && ctx.lessor.lookup(p.lease).is_none() {
        return Err(ServerError::LeaseNotFound(p.lease));
    }
    let mut txn = ctx.kv.write();
    let result = put_in(&mut txn, p);
    let rev = txn.end();
    let resp = result?;
    Ok(Response { header: ctx.header(rev), body: ResponseBody::Put(resp) })
}

pub(crate) fn delete_range(ctx: &mut ServerContext, d: &DeleteRangeRequest) -> Result<Response, ServerError> {
    let mut txn = ctx.kv.write();
    let result = delete_in(&mut txn, d);
    let rev = txn.end();
    let resp = result?;
    Ok(Response { header: ctx.header(rev), body: ResponseBody::DeleteRange(resp) })
}

/// Evaluates every guard against the state before the txn, runs the
/// pre-checks of the chosen branches, then applies them in one revision.
///
/// # Panics
/// If an operation fails after the pre-checks passed; some writes of the
/// txn may already be applied at that point.
pub(crate) fn txn(ctx: &mut ServerContext, rt: &TxnRequest) -> Result<Response, ServerError> {
    let is_write = !is_txn_read_only(rt);
    let lessor = &*ctx.lessor;
    let mut txn = ctx.kv.write();
    let path = compare_to_path(&txn, rt);

    if let Err(e) = precheck(lessor, &txn, rt, &path, is_write) {
        txn.end();
        return Err(e);
    }

    let resp = match apply_txn(&mut txn, rt, &path) {
        Ok(resp) => resp,
        Err(e) => {
            tracing::error!(error = %e, "txn operation failed after its pre-checks");
            panic!("unexpected error during txn: {e}");
        }
    };
    let rev = txn.rev();
    txn.end();
    Ok(Response { header: ctx.header(rev), body: ResponseBody::Txn(resp) })
}

fn precheck(
    lessor: &dyn Lessor,
    txn: &TxnWrite<'_>,
    rt: &TxnRequest,
    path: &TxnPath,
    is_write: bool,
) -> Result<(), ServerError> {
    if is_write {
        check_requests(txn, rt, path, &|t, op| check_put(lessor, t, op))?;
    }
    check_requests(txn, rt, path, &check_range)
}

fn range_in(txn: &TxnWrite<'_>, r: &RangeRequest) -> Result<(RangeResponse, Revision), ServerError> {
    let filtered = r.min_mod_revision != 0
        || r.max_mod_revision != 0
        || r.min_create_revision != 0
        || r.max_create_revision != 0;
    // Sorting and filtering need every match; otherwise fetch one extra for `more`.
    let mut limit = if r.sort_order != SortOrder::None as i32 || filtered { 0 } else { r.limit };
    if limit > 0 {
        limit = limit.saturating_add(1);
    }
    let rr = txn.range(
        KeyRange::new(&r.key, &r.range_end),
        RangeOptions { limit, rev: r.revision, count_only: r.count_only },
    )?;

    let mut kvs = rr.kvs;
    if r.max_mod_revision != 0 {
        kvs.retain(|kv| kv.mod_revision <= r.max_mod_revision);
    }
    if r.min_mod_revision != 0 {
        kvs.retain(|kv| kv.mod_revision >= r.min_mod_revision);
    }
    if r.max_create_revision != 0 {
        kvs.retain(|kv| kv.create_revision <= r.max_create_revision);
    }
    if r.min_create_revision != 0 {
        kvs.retain(|kv| kv.create_revision >= r.min_create_revision);
    }
    sort_kvs(&mut kvs, r.sort_order, r.sort_target);

    let mut more = false;
    if r.limit > 0 && kvs.len() as i64 > r.limit {
        kvs.truncate(r.limit as usize);
        more = true;
    }
    if r.keys_only {
        kvs.iter_mut().for_each(|kv| kv.value.clear());
    }
    Ok((RangeResponse { kvs, more, count: rr.count }, rr.rev))
}

/// The store returns keys in ascending order, so `KEY`/`ASCEND` is a no-op
/// and any other target without an order defaults to ascending.
///
/// # Panics
/// On a sort target outside the known set whenever sorting is in effect.
fn sort_kvs(kvs: &mut [KeyValue], sort_order: i32, sort_target: i32) {
    let by_key = sort_target == SortTarget::Key as i32;
    let order = match SortOrder::try_from(sort_order) {
        Ok(SortOrder::None) if !by_key => Ok(SortOrder::Ascend),
        Ok(SortOrder::Ascend) if by_key => Ok(SortOrder::None),
        other => other,
    };
    if order == Ok(SortOrder::None) {
        return;
    }
    let cmp: fn(&KeyValue, &KeyValue) -> Ordering = match SortTarget::try_from(sort_target) {
        Ok(SortTarget::Key) => |a, b| a.key.cmp(&b.key),
        Ok(SortTarget::Version) => |a, b| a.version.cmp(&b.version),
        Ok(SortTarget::Create) => |a, b| a.create_revision.cmp(&b.create_revision),
        Ok(SortTarget::Mod) => |a, b| a.mod_revision.cmp(&b.mod_revision),
        Ok(SortTarget::Value) => |a, b| a.value.cmp(&b.value),
        Err(target) => {
            tracing::error!(sort_target = target, "unexpected sort target");
            panic!("unexpected sort target {target}");
        }
    };
    match order {
        Ok(SortOrder::Ascend) => kvs.sort_by(cmp),
        Ok(SortOrder::Descend) => kvs.sort_by(|a, b| cmp(b, a)),
        Ok(SortOrder::None) | Err(_) => {}
    }
}

fn put_in(txn: &mut TxnWrite<'_>, p: &PutRequest) -> Result<PutResponse, ServerError> {
    let existing = if p.ignore_value || p.ignore_lease || p.prev_kv {
        txn.range(KeyRange::Single(&p.key), RangeOptions::default())?.kvs.into_iter().next()
    } else {
        None
    };
    let (mut value, mut lease) = (p.value.as_slice(), p.lease);
    if p.ignore_value || p.ignore_lease {
        let prev = existing.as_ref().ok_or(ServerError::KeyNotFound)?;
        if p.ignore_value {
            value = prev.value.as_slice();
        }
        if p.ignore_lease {
            lease = prev.lease;
        }
    }
    txn.put(&p.key, value, lease)?;
    Ok(PutResponse { prev_kv: existing.filter(|_| p.prev_kv) })
}

fn delete_in(txn: &mut TxnWrite<'_>, d: &DeleteRangeRequest) -> Result<DeleteRangeResponse, ServerError> {
    let range = KeyRange::new(&d.key, &d.range_end);
    let prev_kvs = if d.prev_kv { txn.range(range, RangeOptions::default())?.kvs } else { Vec::new() };
    let (deleted, _) = txn.delete_range(range)?;
    Ok(DeleteRangeResponse { deleted, prev_kvs })
}

/// Branch decisions of a txn and of the txns nested in its chosen branch.
#[derive(Debug)]
struct TxnPath {
    succeeded: bool,
    nested: Vec<TxnPath>,
}

fn chosen_ops<'r>(rt: &'r TxnRequest, path: &TxnPath) -> &'r [crate::domain::RequestOp] {
    if path.succeeded {
        &rt.success
    } else {
        &rt.failure
    }
}

fn compare_to_path(txn: &TxnWrite<'_>, rt: &TxnRequest) -> TxnPath {
    let succeeded = rt.compare.iter().all(|c| apply_compare(txn, c));
    let ops = if succeeded { &rt.success } else { &rt.failure };
    let nested = ops
        .iter()
        .filter_map(|op| match &op.request {
            Some(OpRequest::Txn(inner)) => Some(compare_to_path(txn, inner)),
            _ => None,
        })
        .collect();
    TxnPath { succeeded, nested }
}

fn apply_compare(txn: &TxnWrite<'_>, c: &Compare) -> bool {
    let Ok(rr) = txn.range(KeyRange::new(&c.key, &c.range_end), RangeOptions::default()) else {
        return false;
    };
    if rr.kvs.is_empty() {
        // A missing key has no value to compare against.
        if matches!(c.target, Some(CompareTarget::Value(_))) {
            return false;
        }
        return compare_kv(c, &KeyValue::default());
    }
    rr.kvs.iter().all(|kv| compare_kv(c, kv))
}

fn compare_kv(c: &Compare, kv: &KeyValue) -> bool {
    let ord = match &c.target {
        Some(CompareTarget::Value(v)) => kv.value.as_slice().cmp(v.as_slice()),
        Some(CompareTarget::CreateRevision(rev)) => kv.create_revision.cmp(rev),
        Some(CompareTarget::ModRevision(rev)) => kv.mod_revision.cmp(rev),
        Some(CompareTarget::Lease(lease)) => kv.lease.cmp(lease),
        Some(CompareTarget::Version(v)) => kv.version.cmp(v),
        None => kv.version.cmp(&0),
    };
    match CompareResult::try_from(c.result) {
        Ok(CompareResult::Equal) => ord == Ordering::Equal,
        Ok(CompareResult::NotEqual) => ord != Ordering::Equal,
        Ok(CompareResult::Greater) => ord == Ordering::Greater,
        Ok(CompareResult::Less) => ord == Ordering::Less,
        Err(_) => true,
    }
}

type OpCheck<'c> = dyn Fn(&TxnWrite<'_>, &OpRequest) -> Result<(), ServerError> + 'c;

fn check_requests(txn: &TxnWrite<'_>, rt: &TxnRequest, path: &TxnPath, check: &OpCheck<'_>) -> Result<(), ServerError> {
    let mut nested = path.nested.iter();
    for op in chosen_ops(rt, path) {
        match &op.request {
            None => {}
            Some(OpRequest::Txn(inner)) => {
                if let Some(inner_path) = nested.next() {
                    check_requests(txn, inner, inner_path, check)?;
                }
            }
            Some(req) => check(txn, req)?,
        }
    }
    Ok(())
}

fn check_put(lessor: &dyn Lessor, txn: &TxnWrite<'_>, op: &OpRequest) -> Result<(), ServerError> {
    let OpRequest::Put(p) = op else { return Ok(()) };
    if p.ignore_value || p.ignore_lease {
        let rr = txn.range(KeyRange::Single(&p.key), RangeOptions::default())?;
        if rr.kvs.is_empty() {
            return Err(ServerError::KeyNotFound);
        }
    }
    if p.lease != NO_LEASE && lessor.lookup(p.lease).is_none() {
        return Err(ServerError::LeaseNotFound(p.lease));
    }
    Ok(())
}

fn check_range(txn: &TxnWrite<'_>, op: &OpRequest) -> Result<(), ServerError> {
    let OpRequest::Range(r) = op else { return Ok(()) };
    if r.revision == 0 {
        return Ok(());
    }
    if r.revision > txn.rev() {
        return Err(ServerError::FutureRev);
    }
    if r.revision < txn.first_rev() {
        return Err(ServerError::Compacted);
    }
    Ok(())
}

fn apply_txn(txn: &mut TxnWrite<'_>, rt: &TxnRequest, path: &TxnPath) -> Result<TxnResponse, ServerError> {
    let ops = chosen_ops(rt, path);
    let mut nested = path.nested.iter();
    let mut responses = Vec::with_capacity(ops.len());
    for op in ops {
        let resp = match &op.request {
            None => ResponseOp::Empty,
            Some(OpRequest::Range(r)) => ResponseOp::Range(range_in(txn, r)?.0),
            Some(OpRequest::Put(p)) => ResponseOp::Put(put_in(txn, p)?),
            Some(OpRequest::DeleteRange(d)) => ResponseOp::DeleteRange(delete_in(txn, d)?),
            Some(OpRequest::Txn(inner)) => match nested.next() {
                Some(inner_path) => ResponseOp::Txn(apply_txn(txn, inner, inner_path)?),
                None => ResponseOp::Empty,
            },
        };
        responses.push(resp);
    }
    Ok(TxnResponse { succeeded: path.succeeded, responses })
}

pub(crate) fn is_txn_read_only(rt: &TxnRequest) -> bool {
    rt.success.iter().chain(&rt.failure).all(|op| match &op.request {
        None | Some(OpRequest::Range(_)) => true,
        Some(OpRequest::Txn(inner)) => is_txn_read_only(inner),
        Some(OpRequest::Put(_) | OpRequest::DeleteRange(_)) => false,
    })
}

/// Drops range operations whose results nobody will read.
pub(crate) fn remove_needless_range_reqs(rt: &mut TxnRequest) {
    let keep = |op: &crate::domain::RequestOp| !matches!(op.request, Some(OpRequest::Range(_)));
    rt.success.retain(keep);
    rt.failure.retain(keep);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(key: &[u8], version: i64, value: &[u8]) -> KeyValue {
        KeyValue { key: key.to_vec(), version, value: value.to_vec(), ..KeyValue::default() }
    }

    #[test]
    fn non_key_target_without_order_sorts_ascending() {
        let mut kvs = vec![kv(b"a", 3, b""), kv(b"b", 1, b"")];
        sort_kvs(&mut kvs, SortOrder::None as i32, SortTarget::Version as i32);
        assert_eq!(kvs[0].key, b"b".to_vec());
        sort_kvs(&mut kvs, SortOrder::Descend as i32, SortTarget::Version as i32);
        assert_eq!(kvs[0].key, b"a".to_vec());
    }

    #[test]
    fn unknown_order_leaves_input_untouched() {
        let mut kvs = vec![kv(b"b", 1, b""), kv(b"a", 1, b"")];
        sort_kvs(&mut kvs, 9, SortTarget::Key as i32);
        assert_eq!(kvs[0].key, b"b".to_vec());
    }

    #[test]
    #[should_panic(expected = "unexpected sort target")]
    fn unknown_target_panics() {
        sort_kvs(&mut [kv(b"a", 1, b"")], SortOrder::None as i32, 42);
    }

    #[test]
    fn compare_rules() {
        let c = |result: CompareResult, target: CompareTarget| Compare {
            result: result as i32,
            key: b"k".to_vec(),
            range_end: Vec::new(),
            target: Some(target),
        };
        let stored = kv(b"k", 2, b"m");
        assert!(compare_kv(&c(CompareResult::Equal, CompareTarget::Version(2)), &stored));
        assert!(compare_kv(&c(CompareResult::Greater, CompareTarget::Value(b"a".to_vec())), &stored));
        assert!(compare_kv(&c(CompareResult::Less, CompareTarget::ModRevision(1)), &stored));
        assert!(compare_kv(&c(CompareResult::NotEqual, CompareTarget::Lease(7)), &stored));
        let unknown = Compare { result: 99, ..c(CompareResult::Equal, CompareTarget::Version(5)) };
        assert!(compare_kv(&unknown, &stored));
    }

    #[test]
    fn needless_ranges_are_stripped() {
        let range = crate::domain::RequestOp { request: Some(OpRequest::Range(RangeRequest::default())) };
        let put = crate::domain::RequestOp { request: Some(OpRequest::Put(PutRequest::default())) };
        let mut rt = TxnRequest { compare: vec![], success: vec![range.clone(), put.clone()], failure: vec![range] };
        assert!(!is_txn_read_only(&rt));
        remove_needless_range_reqs(&mut rt);
        assert_eq!(rt.success, vec![put]);
        assert!(rt.failure.is_empty());
    }
}
