use super::{SyncCell, SyncStatus};
use crate::gpu::error::ResultCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventStatus {
    Set,
    Reset,
    Error,
}

impl EventStatus {
    pub fn code(self) -> ResultCode {
        match self {
            EventStatus::Set => ResultCode::EventSet,
            EventStatus::Reset => ResultCode::EventReset,
            EventStatus::Error => ResultCode::ErrorDeviceLost,
        }
    }
}

/// Event settable from the host or from replayed `SetEvent`/`ResetEvent`.
#[derive(Debug)]
pub struct Event {
    debug_name: String,
    cell: SyncCell,
}

impl Event {
    pub fn new(debug_name: &str) -> Self {
        Self {
            debug_name: debug_name.to_string(),
            cell: SyncCell::new(SyncStatus::Unsignalled),
        }
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    pub fn status(&self) -> EventStatus {
        match self.cell.get() {
            SyncStatus::Signalled => EventStatus::Set,
            SyncStatus::Unsignalled => EventStatus::Reset,
            SyncStatus::Error => EventStatus::Error,
        }
    }

    pub fn set(&self) {
        self.cell.set(SyncStatus::Signalled);
    }

    pub fn reset(&self) {
        self.cell.set(SyncStatus::Unsignalled);
    }

    /// Puts the event in the error state, as a lost device would.
    pub fn mark_error(&self) {
        self.cell.set(SyncStatus::Error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_reset_cycle() {
        let event = Event::new("e");
        assert_eq!(event.status(), EventStatus::Reset);
        event.set();
        assert_eq!(event.status().code(), ResultCode::EventSet);
        event.reset();
        assert_eq!(event.status(), EventStatus::Reset);
        event.mark_error();
        assert_eq!(event.status(), EventStatus::Error);
    }
}
