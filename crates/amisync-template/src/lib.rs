//! # amisync-template
//!
//! Patching of deployment templates with resolved images.
//!
//! Handles:
//! - **Tree path**: Reading and writing values at dot-separated paths.
//! - **Task**: Declarative patch instructions and their validation.
//! - **Patcher**: Grouping tasks by template, warming the image cache
//!   concurrently, and applying patches in task order.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod patcher;
pub mod task;
pub mod tree_path;
