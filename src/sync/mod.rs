//! Fence, semaphore and event emulation.
//!
//! The backends behind this crate execute everything in order on one context
//! and offer at most a non-blocking completion query. Every primitive here is
//! a small tri-state cell; anything that has to block polls that cell (and,
//! for fences, the backend marker) with [`backoff::Backoff`].

pub mod backoff;
pub mod event;
pub mod fence;
pub mod semaphore;

use std::sync::atomic::{AtomicU8, Ordering};

pub use backoff::Backoff;
pub use event::{Event, EventStatus};
pub use fence::Fence;
pub use semaphore::Semaphore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SyncStatus {
    Unsignalled = 0,
    Signalled = 1,
    Error = 2,
}

impl SyncStatus {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => SyncStatus::Signalled,
            2 => SyncStatus::Error,
            _ => SyncStatus::Unsignalled,
        }
    }
}

/// Outcome of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitResult {
    Success,
    TimedOut,
    Error,
}

/// Lock-free tri-state shared by every primitive.
#[derive(Debug)]
pub(crate) struct SyncCell {
    status: AtomicU8,
}

impl SyncCell {
    pub(crate) fn new(status: SyncStatus) -> Self {
        Self {
            status: AtomicU8::new(status as u8),
        }
    }

    pub(crate) fn get(&self) -> SyncStatus {
        SyncStatus::from_raw(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, status: SyncStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Moves Signalled to Unsignalled. Returns the status seen before.
    pub(crate) fn consume(&self) -> SyncStatus {
        match self.status.compare_exchange(
            SyncStatus::Signalled as u8,
            SyncStatus::Unsignalled as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(prev) | Err(prev) => SyncStatus::from_raw(prev),
        }
    }
}
