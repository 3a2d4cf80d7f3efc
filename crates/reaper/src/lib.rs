//! Time-ordered scheduling of reap passes and backlog loads across all
//! managed channels.

pub mod service;

pub use service::{ReapQueue, ReaperStatus};
