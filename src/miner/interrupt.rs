//! Commit interruption signals.
//!
//! Each new-work request carries a shared atomic flag. The build
//! pipeline loads it before every transaction; the new-work loop
//! stores the superseding signal into the previous request's flag
//! right before publishing the next request, so a build observes
//! exactly one prevailing signal.

use super::error::BuildError;
use std::sync::atomic::{AtomicI32, Ordering};

/// Why an in-flight build should stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum InterruptSignal {
    /// Keep building.
    None = 0,
    /// A new chain head arrived; discard the build.
    NewHead = 1,
    /// The resubmit timer fired; seal the partial block.
    Resubmit = 2,
    /// The payload deadline passed; seal the partial block.
    Timeout = 3,
}

impl InterruptSignal {
    fn from_raw(raw: i32) -> Self {
        match raw {
            1 => Self::NewHead,
            2 => Self::Resubmit,
            3 => Self::Timeout,
            _ => Self::None,
        }
    }

    /// Map the signal to the error `commit_transactions` returns;
    /// `None` for the non-signal.
    pub fn to_build_error(self) -> Option<BuildError> {
        match self {
            Self::None => None,
            Self::NewHead => Some(BuildError::InterruptedByNewHead),
            Self::Resubmit => Some(BuildError::InterruptedByRecommit),
            Self::Timeout => Some(BuildError::InterruptedByTimeout),
        }
    }
}

/// Shared interrupt flag of one new-work request.
#[derive(Debug, Default)]
pub struct InterruptFlag(AtomicI32);

impl InterruptFlag {
    /// Publish a signal to the owning build.
    pub fn store(&self, signal: InterruptSignal) {
        self.0.store(signal as i32, Ordering::SeqCst);
    }

    /// The prevailing signal.
    pub fn load(&self) -> InterruptSignal {
        InterruptSignal::from_raw(self.0.load(Ordering::SeqCst))
    }
}
