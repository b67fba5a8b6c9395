//! Test doubles for drainscope components.
//!
//! This module provides:
//! - A delayed, cancellation-aware fetcher
//! - Recording and failing processors
//! - A counting periodic action

mod mocks;

pub use mocks::{CountingAction, DelayedFetcher, FailingProcessor, RecordingProcessor};
