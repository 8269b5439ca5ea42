//! # amisync-common
//!
//! Shared error definitions, configuration models, constants, and the
//! JSON store abstraction used across the entire amisync workspace.
//!
//! This crate is the leaf of the dependency graph. It depends on no other
//! internal crate and provides the primitives that the image resolution
//! and template patching crates build upon.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod store;
