//! Shared error-context helpers and time utilities used across all autodelete crates.

pub mod error;
pub mod time;

pub use error::FromMessage;
