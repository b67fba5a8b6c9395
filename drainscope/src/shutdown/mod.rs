//! Admission gate and ordered graceful shutdown for the worker pool.

mod coordinator;
mod state;

pub use coordinator::{ShutdownCoordinator, ShutdownReport};
pub use state::PoolState;
