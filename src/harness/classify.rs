//! Crash classification: a recovered panic is benign only when its message
//! contains one of the driver's known substrings.

use std::any::Any;
use std::error::Error;

use crate::error::ServerError;

/// Messages the entry-level apply loop raises on malformed entries.
pub const ENTRY_ALLOW_LIST: &[&str] = &[
    "unknown entry type; must be either EntryNormal or EntryConfChange",
    "should never fail",
    "failed to unmarshal confChangeContext",
    "unknown ConfChange type",
];

/// Messages the backend applier raises on nonsensical request fields.
pub const BACKEND_ALLOW_LIST: &[&str] = &[
    "is not in dotted-tri format",
    "invalid version number",
    "is not a valid semver identifier",
    "invalid downgrade; server version is lower than determined cluster version",
    "unexpected sort target",
    "failed to unmarshal 'authpb.User'",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Entries,
    Backend,
    /// The permission-checking layer; it ends in the backend applier.
    Checked,
}

impl Driver {
    pub fn allow_list(self) -> &'static [&'static str] {
        match self {
            Driver::Entries => ENTRY_ALLOW_LIST,
            Driver::Backend | Driver::Checked => BACKEND_ALLOW_LIST,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Driver::Entries => "apply_entries",
            Driver::Backend => "backend_apply",
            Driver::Checked => "checked_apply",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Matched the allow-list entry carried here.
    Benign(&'static str),
    Unknown,
}

/// Message of a recovered panic payload, for the payload shapes a panic
/// actually carries. `None` for anything else.
pub fn panic_message(payload: &(dyn Any + Send)) -> Option<String> {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        return Some((*s).to_owned());
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return Some(s.clone());
    }
    if let Some(e) = payload.downcast_ref::<Box<dyn Error + Send + Sync>>() {
        return Some(e.to_string());
    }
    payload.downcast_ref::<ServerError>().map(ToString::to_string)
}

/// Unclassifiable payloads are never benign.
pub fn classify(message: Option<&str>, allow_list: &[&'static str]) -> Verdict {
    let Some(message) = message else { return Verdict::Unknown };
    allow_list.iter().copied().find(|known| message.contains(known)).map_or(Verdict::Unknown, Verdict::Benign)
}
