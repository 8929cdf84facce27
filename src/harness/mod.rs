//! Structured-fuzzing harness for the apply pipeline.
//!
//! A fuzz buffer flows through the decoder, the command selector, a
//! bootstrapped server context and a guarded apply call. The result is an
//! `Outcome` whose status the fuzz target reports.

pub mod bootstrap;
pub mod classify;
pub mod decoder;
pub mod driver;
pub mod error;
pub mod select;

pub use bootstrap::{shared_context, HarnessConfig, HarnessContext};
pub use classify::{classify, panic_message, Driver, Verdict, BACKEND_ALLOW_LIST, ENTRY_ALLOW_LIST};
pub use decoder::{DecodeError, Decoder};
pub use driver::{
    apply_batch, apply_entries, apply_entries_with, backend_apply, backend_apply_envelope, checked_apply,
    checked_apply_envelope, Discard, Finding, Outcome,
};
pub use error::HarnessError;
pub use select::{select_envelope, select_request, KindEntry, SelectError, ValidationError, KIND_TABLE};

/// Installs an error-level subscriber writing to stderr. Calling it again is
/// a no-op.
#[cfg(feature = "log-subscriber")]
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::ERROR)
        .with_writer(std::io::stderr)
        .try_init();
}
