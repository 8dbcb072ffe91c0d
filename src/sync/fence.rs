use std::sync::Arc;

use parking_lot::Mutex;

use super::{SyncCell, SyncStatus};
use crate::gpu::backend::Backend;
use crate::gpu::driver::types::NativeSync;
use crate::gpu::error::Result;

#[derive(Debug)]
struct FenceInner {
    debug_name: String,
    cell: SyncCell,
    native: Mutex<Option<NativeSync>>,
}

/// Host-visible completion flag for one submission.
///
/// When the backend has completion markers the queue attaches one at submit
/// time and the fence flips to signalled once a query sees it complete.
/// Cloning shares the same fence.
#[derive(Debug, Clone)]
pub struct Fence {
    inner: Arc<FenceInner>,
}

impl Fence {
    pub fn new(signalled: bool) -> Self {
        Self::named("", signalled)
    }

    pub fn named(debug_name: &str, signalled: bool) -> Self {
        let status = if signalled {
            SyncStatus::Signalled
        } else {
            SyncStatus::Unsignalled
        };
        Self {
            inner: Arc::new(FenceInner {
                debug_name: debug_name.to_string(),
                cell: SyncCell::new(status),
                native: Mutex::new(None),
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

    pub fn ptr_eq(&self, other: &Fence) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn signal(&self) {
        self.inner.cell.set(SyncStatus::Signalled);
    }

    pub(crate) fn mark_error(&self) {
        self.inner.cell.set(SyncStatus::Error);
    }

    /// Hands the fence a backend marker to watch. Returns a marker that was
    /// still attached, which the caller must delete.
    pub(crate) fn attach(&self, sync: NativeSync) -> Option<NativeSync> {
        self.inner.native.lock().replace(sync)
    }

    /// Back to unsignalled. Returns the marker the caller must delete.
    pub(crate) fn reset(&self) -> Option<NativeSync> {
        let stale = self.inner.native.lock().take();
        self.inner.cell.set(SyncStatus::Unsignalled);
        stale
    }

    /// One non-blocking completion check. Issues no backend call when the
    /// fence already left the unsignalled state or has no marker attached.
    pub(crate) fn query<B: Backend>(&self, backend: &mut B) -> Result<SyncStatus> {
        let status = self.status();
        if status != SyncStatus::Unsignalled {
            return Ok(status);
        }
        let mut native = self.inner.native.lock();
        let Some(sync) = *native else {
            return Ok(SyncStatus::Unsignalled);
        };
        let done = backend.query_fence(sync).map_err(|err| {
            self.mark_error();
            err
        })?;
        if !done {
            return Ok(SyncStatus::Unsignalled);
        }
        *native = None;
        self.signal();
        backend.delete_fence(sync)?;
        Ok(SyncStatus::Signalled)
    }
}
