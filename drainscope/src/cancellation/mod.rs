//! Cancellation scopes and structured task groups.
//!
//! This module provides:
//! - DeadlineScope, a tree of cancellation tokens with deadlines
//! - CancelHandle, the idempotent cancel function for one scope
//! - TaskGroup for running related tasks under one scope

mod scope;
mod task_group;

pub use scope::{CancelHandle, DeadlineScope};
pub use task_group::TaskGroup;
