//! Per-channel message retention.
//!
//! A [`ManagedChannel`] tracks the messages of one chat channel that are
//! candidates for deletion (the live-set) and the ones that must never be
//! deleted (the keep-set: pins plus a configured list). It decides when the
//! next deletion is due and which messages go, deletes them through a
//! [`MessageSource`], and hands timing decisions to a [`ReapScheduler`].

mod backlog;
pub mod channel;
pub mod error;
mod evaluator;
mod events;
pub mod gate;
pub mod live_set;
mod reap;
pub mod registry;
pub mod scheduler;
pub mod source;
pub mod state;
pub mod store;
pub mod store_file;
pub mod store_memory;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use {
    channel::{ChannelContext, ManagedChannel},
    error::{Context, Error, Result, SourceError, SourceResult},
    evaluator::Collected,
    live_set::LiveMessage,
    reap::ReapReport,
    registry::ChannelRegistry,
    scheduler::ReapScheduler,
    source::{ChannelInfo, MessageSource, RemoteMessage},
    state::RetentionPolicy,
    store::{ChannelRecord, ChannelStore},
    store_file::FileStore,
    store_memory::InMemoryStore,
};
