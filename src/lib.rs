#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![deny(deprecated)]

//!
//! applyfuzz-core drives the command-apply pipeline of an etcd-style
//! replicated key-value store with structured fuzz input.
//!
//! The `server` layer and the stores below it form a compact, deterministic
//! apply side: backend, membership, consistent index, auth, alarms, leases and
//! the MVCC key space. The `harness` turns fuzz bytes into commands and entry
//! batches, applies them, and separates benign panics from findings.

// Wire-level numeric types and tag enums.
pub mod types;

// Raft entries, membership records and key-value records.
pub mod primitives;

pub use primitives::*;

pub mod error;

pub mod version;

// Requests, the command envelope and apply results.
pub mod domain;

// Stores the server applies against.
pub mod alarm;
pub mod auth;
pub mod backend;
pub mod cindex;
pub mod lease;
pub mod membership;
pub mod mvcc;
pub mod wait;

pub mod server;

pub mod harness;
