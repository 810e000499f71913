//! Tandem Test Harness - in-memory client/server log replication
//!
//! This crate provides:
//! - A test server with channels, resend rules, undo injection and freeze
//! - Test clients that connect, sync and subscribe against it
//! - Shared log handles for inspecting either side
//!
//! Everything runs in one process on a shared logical clock, so every id
//! and every delivery order is reproducible.

mod hub;

pub mod client;
pub mod handle;
pub mod server;

#[cfg(test)]
mod scenarios;

pub use client::*;
pub use handle::*;
pub use server::*;

pub use tandem_core::{
    Action, ActionId, AddOptions, Meta, MetaOverride, NodeId, TandemError, TandemResult, UndoError,
};
pub use tandem_sync::{ChannelContent, LinkState, LinkStats, UndoRule};
