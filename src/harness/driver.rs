//! Apply drivers: turn one fuzz buffer into an apply call and an `Outcome`.

use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use crate::domain::InternalRaftRequest;
use crate::primitives::{ConfState, Entry};

use super::bootstrap::{HarnessConfig, HarnessContext};
use super::classify::{classify, panic_message, Driver, Verdict};
use super::decoder::{DecodeError, Decoder};
use super::error::HarnessError;
use super::select::{select_envelope, SelectError};

/// Why an iteration never reached the applier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Discard {
    #[error(transparent)]
    Select(#[from] SelectError),
    #[error("entry batch is empty")]
    EmptyBatch,
}

impl From<DecodeError> for Discard {
    fn from(e: DecodeError) -> Self {
        Discard::Select(SelectError::Decode(e))
    }
}

/// A panic the driver's allow-list does not cover.
pub struct Finding {
    pub driver: Driver,
    pub message: Option<String>,
    pub payload: Box<dyn Any + Send>,
}

impl std::fmt::Debug for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Finding")
            .field("driver", &self.driver)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum Outcome {
    Discarded(Discard),
    Completed,
    /// Benign panic; carries the message that matched.
    Suppressed(String),
    Reportable(Finding),
    HarnessFault(HarnessError),
}

impl Outcome {
    pub fn is_reportable(&self) -> bool {
        matches!(self, Outcome::Reportable(_))
    }

    /// Status for the fuzz engine: 1 when the applier ran to completion,
    /// 0 otherwise.
    ///
    /// # Panics
    /// Re-raises a reportable panic with its original payload, and panics on
    /// a harness fault.
    pub fn into_status(self) -> i32 {
        match self {
            Outcome::Discarded(_) | Outcome::Suppressed(_) => 0,
            Outcome::Completed => 1,
            Outcome::Reportable(finding) => {
                tracing::error!(
                    driver = finding.driver.name(),
                    message = ?finding.message,
                    "unexpected panic in applier"
                );
                panic::resume_unwind(finding.payload)
            }
            Outcome::HarnessFault(e) => panic!("harness bootstrap failed: {e}"),
        }
    }
}

thread_local! {
    static GUARDED: Cell<bool> = const { Cell::new(false) };
}

static QUIET_HOOK: Once = Once::new();

/// Silences panic output on threads inside a guarded apply; every other panic
/// goes to the hook that was installed before.
fn install_quiet_hook() {
    QUIET_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if !GUARDED.with(Cell::get) {
                previous(info);
            }
        }));
    });
}

fn run_guarded(driver: Driver, f: impl FnOnce()) -> Outcome {
    install_quiet_hook();
    GUARDED.with(|g| g.set(true));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    GUARDED.with(|g| g.set(false));
    let Err(payload) = result else { return Outcome::Completed };
    let message = panic_message(payload.as_ref());
    match classify(message.as_deref(), driver.allow_list()) {
        Verdict::Benign(known) => {
            tracing::debug!(driver = driver.name(), known, "suppressed benign panic");
            Outcome::Suppressed(message.unwrap_or_default())
        }
        Verdict::Unknown => Outcome::Reportable(Finding { driver, message, payload }),
    }
}

/// Reads `n % max_entries` entries, keeping only those that carry data.
fn decode_entries(d: &mut Decoder<'_>, max_entries: usize) -> Result<Vec<Entry>, Discard> {
    let n = d.next_int()? % max_entries.max(1);
    let mut entries = Vec::with_capacity(n);
    for _ in 0..n {
        let e: Entry = d.populate()?;
        if !e.data.is_empty() {
            entries.push(e);
        }
    }
    if entries.is_empty() {
        return Err(Discard::EmptyBatch);
    }
    Ok(entries)
}

/// Entry-level driver over a freshly bootstrapped default context.
pub fn apply_entries(data: &[u8]) -> Outcome {
    apply_entries_with(&HarnessConfig::default(), data)
}

pub fn apply_entries_with(cfg: &HarnessConfig, data: &[u8]) -> Outcome {
    match decode_entries(&mut Decoder::new(data), cfg.max_entries) {
        Ok(entries) => apply_batch(cfg, &entries),
        Err(reason) => Outcome::Discarded(reason),
    }
}

/// Applies an already decoded batch to a fresh context.
pub fn apply_batch(cfg: &HarnessConfig, entries: &[Entry]) -> Outcome {
    let mut ctx = match HarnessContext::bootstrap(cfg) {
        Ok(ctx) => ctx,
        Err(e) => return Outcome::HarnessFault(e),
    };
    run_guarded(Driver::Entries, || {
        let mut conf_state = ConfState::default();
        ctx.server.apply(entries, &mut conf_state);
    })
}

/// Backend-level driver: one selected request, applied with persistence on.
pub fn backend_apply(ctx: &mut HarnessContext, data: &[u8]) -> Outcome {
    match select_envelope(&mut Decoder::new(data)) {
        Ok(env) => backend_apply_envelope(ctx, &env),
        Err(e) => Outcome::Discarded(e.into()),
    }
}

pub fn backend_apply_envelope(ctx: &mut HarnessContext, env: &InternalRaftRequest) -> Outcome {
    run_guarded(Driver::Backend, || {
        ctx.apply_backend(env, true);
    })
}

/// Like `backend_apply`, through the permission-checking layer.
pub fn checked_apply(ctx: &mut HarnessContext, data: &[u8]) -> Outcome {
    match select_envelope(&mut Decoder::new(data)) {
        Ok(env) => checked_apply_envelope(ctx, &env),
        Err(e) => Outcome::Discarded(e.into()),
    }
}

pub fn checked_apply_envelope(ctx: &mut HarnessContext, env: &InternalRaftRequest) -> Outcome {
    run_guarded(Driver::Checked, || {
        ctx.apply_checked(env, true);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_discarded() {
        let out = apply_entries(&[]);
        assert!(matches!(out, Outcome::Discarded(Discard::Select(SelectError::Decode(DecodeError::Exhausted)))));
        assert_eq!(out.into_status(), 0);
    }

    #[test]
    fn zero_batch_size_is_an_empty_batch() {
        // 20 % 20 == 0 entries.
        assert!(matches!(apply_entries(&[20, 1, 2, 3]), Outcome::Discarded(Discard::EmptyBatch)));
    }

    #[test]
    fn benign_panic_is_suppressed() {
        let out = run_guarded(Driver::Entries, || panic!("unmarshal should never fail (eof)"));
        match out {
            Outcome::Suppressed(msg) => assert!(msg.contains("should never fail")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn unlisted_panic_is_reportable_and_rethrown() {
        let out = run_guarded(Driver::Backend, || panic!("index out of bounds"));
        assert!(out.is_reportable());
        let rethrown = panic::catch_unwind(AssertUnwindSafe(|| out.into_status())).unwrap_err();
        assert_eq!(panic_message(rethrown.as_ref()).as_deref(), Some("index out of bounds"));
    }

    #[test]
    fn non_text_payload_is_reportable() {
        let out = run_guarded(Driver::Entries, || panic::panic_any(5u8));
        match out {
            Outcome::Reportable(f) => assert!(f.message.is_none()),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn guard_flag_is_cleared_after_apply() {
        let _ = run_guarded(Driver::Entries, || panic!("should never fail"));
        assert!(!GUARDED.with(Cell::get));
    }
}
