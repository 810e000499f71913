//! Tandem Core - Fundamental types and primitives
//!
//! This crate defines the core types used throughout the tandem harness:
//! - Identifiers (NodeId, ActionId) and node id allocation
//! - Logical time shared by every log of one harness
//! - Actions, metadata and routing scope
//! - Error taxonomy

pub mod id;
pub mod time;
pub mod action;
pub mod meta;
pub mod error;

pub use id::*;
pub use time::*;
pub use action::*;
pub use meta::*;
pub use error::*;
