//! Tandem Sync - the reconciliation engine's building blocks
//!
//! Log-to-log synchronization between clients and one server.
//!
//! Key concepts:
//! - Link: the per-client channel with id-ordered outboxes in both directions
//! - Registry: who subscribed to which channel, what a channel delivers on
//!   join, and which actions are rebroadcast to a channel
//! - Control: undo injection and the freeze barrier
//!
//! Nothing here owns a log. The harness in `tandem-test` wires these pieces
//! to the logs and drives delivery.

pub mod control;
pub mod link;
pub mod registry;

pub use control::*;
pub use link::*;
pub use registry::*;
