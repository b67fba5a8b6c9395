//! Bounded work queue and the worker pool that drains it.
//!
//! - [`TaskQueue`]: FIFO admission gate with a fixed capacity
//! - [`WorkerPool`]: fixed set of workers applying a [`Processor`]
//! - [`PoolMetrics`]: counters shared by both

mod item;
mod metrics;
mod queue;
mod worker;

pub use item::{AdmissionTicket, WorkItem};
pub use metrics::PoolMetrics;
pub use queue::TaskQueue;
pub use worker::{FnProcessor, Processor, WorkerPool, WorkerStatus};
