//! Domain-level messages: requests, the command envelope and apply results.

pub mod envelope;
pub mod request;
pub mod response;

pub use envelope::*;
pub use request::*;
pub use response::*;
