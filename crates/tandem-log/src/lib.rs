//! Tandem Log - per-node action storage
//!
//! This crate implements the action log each participant owns:
//! - Local authoring with logical-time ids
//! - Idempotent application of delivered entries
//! - Id-ordered and insertion-ordered projections
//! - Keep-none / keep-all retention with sync holds

pub mod log;

pub use log::*;
