//! # Drainscope
//!
//! Cancellation-aware concurrency building blocks for request-serving code.
//!
//! Drainscope provides:
//!
//! - **Deadline scopes**: a tree of cancellation tokens with inherited deadlines
//! - **Fan-out aggregation**: concurrent fetches merged all-or-nothing under one deadline
//! - **Bounded worker pool**: an admission-gated FIFO queue drained by fixed workers
//! - **Graceful shutdown**: an ordered, deadline-bounded stop sequence that never
//!   abandons an item mid-processing
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use drainscope::prelude::*;
//!
//! let (root, _cancel) = DeadlineScope::root();
//!
//! // Fan out two fetches under a 3 second deadline
//! let aggregator = FanOutAggregator::new(&CoreConfig::default(), vec![profile, orders])?;
//! let result = aggregator.aggregate(&root, "42").await?;
//!
//! // Run a worker pool and drain it on shutdown
//! let coordinator = ShutdownCoordinator::start(&root, CoreConfig::default(), processor, warmer, sink)?;
//! coordinator.submit("/work", serde_json::Value::Null).await?;
//! coordinator.shutdown().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod aggregator;
pub mod cancellation;
pub mod config;
pub mod errors;
pub mod events;
pub mod observability;
pub mod periodic;
pub mod pool;
pub mod shutdown;
pub mod testing;


/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::aggregator::{AggregationResult, FanOutAggregator, Fetcher, FnFetcher};
    pub use crate::cancellation::{CancelHandle, DeadlineScope, TaskGroup};
    pub use crate::config::{AdmissionPolicy, CoreConfig, UnstartedItemPolicy};
    pub use crate::errors::{BoxError, CoreError, ErrorKind, ScopeError};
    pub use crate::events::{
        CollectingErrorSink, ErrorSink, FailureReport, FailureSource, LoggingErrorSink,
        NoOpErrorSink,
    };
    pub use crate::periodic::{FnAction, PeriodicAction, PeriodicHandle, PeriodicTask};
    pub use crate::pool::{
        AdmissionTicket, FnProcessor, PoolMetrics, Processor, TaskQueue, WorkItem, WorkerPool,
        WorkerStatus,
    };
    pub use crate::shutdown::{PoolState, ShutdownCoordinator, ShutdownReport};
}
