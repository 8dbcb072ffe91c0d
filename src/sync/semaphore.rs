use std::sync::Arc;
use std::time::Duration;

use super::{Backoff, SyncCell, SyncStatus, WaitResult};
use crate::gpu::error::Result;

#[derive(Debug)]
struct SemaphoreInner {
    debug_name: String,
    cell: SyncCell,
}

/// Binary semaphore between submissions.
///
/// Signalled when the producing submission's replay finishes; a waiting
/// submission consumes the signal before it replays anything.
#[derive(Debug, Clone)]
pub struct Semaphore {
    inner: Arc<SemaphoreInner>,
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}

impl Semaphore {
    pub fn new() -> Self {
        Self::named("")
    }

    pub fn named(debug_name: &str) -> Self {
        Self {
            inner: Arc::new(SemaphoreInner {
                debug_name: debug_name.to_string(),
                cell: SyncCell::new(SyncStatus::Unsignalled),
            }),
        }
    }

    pub fn debug_name(&self) -> &str {
        &self.inner.debug_name
    }

    pub fn status(&self) -> SyncStatus {
        self.inner.cell.get()
    }

    pub fn is_signalled(&self) -> bool {
        self.status() == SyncStatus::Signalled
    }

    pub fn ptr_eq(&self, other: &Semaphore) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Signals from the host, as an external producer would.
    pub fn signal(&self) {
        self.inner.cell.set(SyncStatus::Signalled);
    }

    pub(crate) fn mark_error(&self) {
        self.inner.cell.set(SyncStatus::Error);
    }

    /// Blocks until the semaphore is signalled, then consumes the signal.
    pub fn wait(&self, timeout: Option<Duration>, backoff: Backoff) -> Result<WaitResult> {
        let result = backoff.poll(timeout, || {
            Ok(match self.inner.cell.consume() {
                SyncStatus::Signalled => Some(WaitResult::Success),
                SyncStatus::Error => Some(WaitResult::Error),
                SyncStatus::Unsignalled => None,
            })
        })?;
        Ok(result.unwrap_or(WaitResult::TimedOut))
    }

    /// Blocks until every semaphore in `semaphores` is signalled at once,
    /// then consumes all of them. A timeout or error consumes nothing.
    pub fn wait_all(
        semaphores: &[&Semaphore],
        timeout: Option<Duration>,
        backoff: Backoff,
    ) -> Result<WaitResult> {
        let result = backoff.poll(timeout, || {
            let mut all_signalled = true;
            for sem in semaphores {
                match sem.status() {
                    SyncStatus::Error => return Ok(Some(WaitResult::Error)),
                    SyncStatus::Unsignalled => all_signalled = false,
                    SyncStatus::Signalled => {}
                }
            }
            if !all_signalled {
                return Ok(None);
            }
            Ok(Self::consume_all(semaphores).then_some(WaitResult::Success))
        })?;
        Ok(result.unwrap_or(WaitResult::TimedOut))
    }

    /// Consumes every signal, or none of them if another waiter raced in.
    fn consume_all(semaphores: &[&Semaphore]) -> bool {
        for (i, sem) in semaphores.iter().enumerate() {
            if sem.inner.cell.consume() != SyncStatus::Signalled {
                for taken in &semaphores[..i] {
                    taken.signal();
                }
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> Backoff {
        Backoff::new(Duration::from_micros(10), Duration::from_micros(100))
    }

    #[test]
    fn wait_consumes_signal() {
        let sem = Semaphore::new();
        sem.signal();
        assert_eq!(sem.wait(Some(Duration::ZERO), backoff()).unwrap(), WaitResult::Success);
        assert_eq!(
            sem.wait(Some(Duration::ZERO), backoff()).unwrap(),
            WaitResult::TimedOut
        );
    }

    #[test]
    fn wait_all_takes_nothing_until_every_signal_is_present() {
        let (a, b) = (Semaphore::new(), Semaphore::new());
        a.signal();
        assert_eq!(
            Semaphore::wait_all(&[&a, &b], Some(Duration::from_millis(1)), backoff()).unwrap(),
            WaitResult::TimedOut
        );
        assert!(a.is_signalled());

        b.signal();
        assert_eq!(
            Semaphore::wait_all(&[&a, &b], Some(Duration::ZERO), backoff()).unwrap(),
            WaitResult::Success
        );
        assert!(!a.is_signalled());
        assert!(!b.is_signalled());
    }

    #[test]
    fn wait_all_reports_an_error_without_consuming() {
        let (a, b) = (Semaphore::new(), Semaphore::new());
        a.signal();
        b.mark_error();
        assert_eq!(
            Semaphore::wait_all(&[&a, &b], None, backoff()).unwrap(),
            WaitResult::Error
        );
        assert!(a.is_signalled());
    }

    #[test]
    fn error_is_sticky() {
        let sem = Semaphore::new();
        sem.mark_error();
        assert_eq!(sem.wait(None, backoff()).unwrap(), WaitResult::Error);
        assert_eq!(sem.status(), SyncStatus::Error);
    }
}
