//! Forward-only lifecycle state of the pool.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a [`ShutdownCoordinator`](super::ShutdownCoordinator).
///
/// Transitions only move forward: `Accepting -> Draining -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    /// Admitting new work.
    Accepting,
    /// Admission closed; previously accepted work is finishing.
    Draining,
    /// Every worker has exited.
    Stopped,
}

impl PoolState {
    /// Returns true if new work may be admitted.
    #[must_use]
    pub const fn is_accepting(self) -> bool {
        matches!(self, Self::Accepting)
    }

    /// Returns true once the pool has fully stopped.
    #[must_use]
    pub const fn is_stopped(self) -> bool {
        matches!(self, Self::Stopped)
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Accepting => 0,
            Self::Draining => 1,
            Self::Stopped => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Accepting,
            1 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepting => write!(f, "accepting"),
            Self::Draining => write!(f, "draining"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Atomic cell holding a [`PoolState`].
#[derive(Debug)]
pub(crate) struct AtomicPoolState(AtomicU8);

impl AtomicPoolState {
    pub(crate) const fn new(state: PoolState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub(crate) fn load(&self) -> PoolState {
        PoolState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves from `from` to `to`, returning the observed state on failure.
    pub(crate) fn transition(&self, from: PoolState, to: PoolState) -> Result<(), PoolState> {
        debug_assert!(from < to);
        self.0
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(PoolState::from_u8)
    }
}
