//! Registry pairing proposal ids with the callers waiting for their result.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, Sender};

use crate::domain::ApplyResult;

/// What a proposer receives once its entry has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Request(ApplyResult),
    ConfChange { members: usize, err: Option<crate::error::ServerError> },
}

#[derive(Debug, Default)]
pub struct Wait {
    pending: BTreeMap<u64, Sender<Applied>>,
}

impl Wait {
    pub fn new() -> Self {
        Wait::default()
    }

    /// Registers interest in `id`. Registering the same id twice replaces the
    /// first waiter, whose receiver then disconnects.
    pub fn register(&mut self, id: u64) -> Receiver<Applied> {
        let (tx, rx) = mpsc::channel();
        self.pending.insert(id, tx);
        rx
    }

    pub fn is_registered(&self, id: u64) -> bool {
        self.pending.contains_key(&id)
    }

    /// Delivers `value` to the waiter for `id`, if any.
    pub fn trigger(&mut self, id: u64, value: Applied) {
        if let Some(tx) = self.pending.remove(&id) {
            // The waiter may have given up; that is not an apply failure.
            let _ = tx.send(value);
        }
    }
}
