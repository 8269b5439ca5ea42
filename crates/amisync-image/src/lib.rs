//! # amisync-image
//!
//! Resolution of versioned virtual-machine images for amisync.
//!
//! Handles:
//! - **Version**: Coercion of free-form version strings into canonical keys.
//! - **Artifact**: Image records, variants, and inventory-name parsing.
//! - **Lookup**: The external inventory service seam and its AWS CLI adapter.
//! - **Cache**: TTL-bound, write-through snapshot of resolved images.
//! - **Resolver**: Cache-first resolution with batched back-fill.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod artifact;
pub mod cache;
pub mod lookup;
pub mod resolver;
pub mod version;
