use std::time::{Duration, Instant};

use crate::gpu::error::Result;

/// Sleep schedule for completion polling: starts at `min` and doubles up to
/// `max`, so short waits stay responsive and long ones stop burning a core.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            current: min.min(max),
            max,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Sleeps for the current interval, but never past `deadline`.
    pub fn snooze(&mut self, deadline: Option<Instant>) {
        let mut nap = self.current;
        if let Some(deadline) = deadline {
            nap = nap.min(deadline.saturating_duration_since(Instant::now()));
        }
        if nap.is_zero() {
            std::thread::yield_now();
        } else {
            std::thread::sleep(nap);
        }
        self.current = (self.current * 2).min(self.max);
    }

    /// Calls `probe` until it yields a value or `timeout` elapses. A zero
    /// timeout probes exactly once; `None` waits forever. Returns `Ok(None)`
    /// on timeout.
    pub fn poll<T>(
        mut self,
        timeout: Option<Duration>,
        mut probe: impl FnMut() -> Result<Option<T>>,
    ) -> Result<Option<T>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(value) = probe()? {
                return Ok(Some(value));
            }
            if deadline.map_or(false, |d| Instant::now() >= d) {
                return Ok(None);
            }
            self.snooze(deadline);
        }
    }
}
