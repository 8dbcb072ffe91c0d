use std::sync::Arc;

use parking_lot::Mutex;

use crate::gpu::backend::{Backend, DefaultBackend, Features};
use crate::gpu::cmd::CommandBuffer;
use crate::gpu::device::DeviceShared;
use crate::gpu::driver::types::{Handle, Image};
use crate::gpu::error::{GPUError, Result};
use crate::ir::{ReplayContext, Replayer};
use crate::sync::{Fence, Semaphore, SyncStatus, WaitResult};

/// One batch of command buffers with the semaphores around it.
#[derive(Default, Clone, Copy)]
pub struct SubmitInfo<'a> {
    pub wait_semaphores: &'a [&'a Semaphore],
    pub command_buffers: &'a [&'a CommandBuffer],
    pub signal_semaphores: &'a [&'a Semaphore],
}

#[derive(Default, Clone, Copy)]
pub struct PresentInfo<'a> {
    pub wait_semaphores: &'a [&'a Semaphore],
    pub images: &'a [Handle<Image>],
}

/// Ordered execution stream onto the device's single backend context.
///
/// Submissions replay synchronously on the calling thread while it holds
/// the context, so two submissions never interleave.
pub struct Queue<B: Backend = DefaultBackend> {
    index: u32,
    shared: Arc<DeviceShared>,
    context: Arc<Mutex<ReplayContext<B>>>,
}

impl<B: Backend> Queue<B> {
    pub(crate) fn new(
        index: u32,
        shared: Arc<DeviceShared>,
        context: Arc<Mutex<ReplayContext<B>>>,
    ) -> Self {
        Self {
            index,
            shared,
            context,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Blocks until every semaphore in `semaphores` is signalled, then
    /// consumes them together. On timeout or error no signal is taken, so a
    /// retry still sees what the producers sent. Nothing is locked while
    /// waiting.
    fn wait_semaphores(&self, semaphores: &[&Semaphore]) -> Result<()> {
        let info = &self.shared.info;
        match Semaphore::wait_all(semaphores, Some(info.semaphore_wait_timeout), info.backoff())? {
            WaitResult::Success => Ok(()),
            WaitResult::TimedOut => {
                let pending: Vec<&str> = semaphores
                    .iter()
                    .filter(|sem| !sem.is_signalled())
                    .map(|sem| sem.debug_name())
                    .collect();
                log::warn!(
                    "queue {}: semaphores {:?} not signalled after {:?}",
                    self.index,
                    pending,
                    info.semaphore_wait_timeout
                );
                Err(GPUError::Timeout)
            }
            WaitResult::Error => {
                let name = semaphores
                    .iter()
                    .find(|sem| sem.status() == SyncStatus::Error)
                    .map_or("", |sem| sem.debug_name());
                Err(GPUError::DeviceLost(format!(
                    "semaphore '{name}' reported an error"
                )))
            }
        }
    }

    fn replay(&self, ctx: &mut ReplayContext<B>, buffer: &CommandBuffer) -> Result<()> {
        log::debug!(
            "queue {}: replaying '{}' ({} commands)",
            self.index,
            buffer.debug_name(),
            buffer.list().len()
        );
        let result = Replayer::new(ctx, &self.shared).replay(buffer.list());
        if let Err(err) = &result {
            ctx.state.unwind();
            log::error!(
                "queue {}: replay of '{}' aborted: {err}",
                self.index,
                buffer.debug_name()
            );
        }
        result
    }

    /// Replays every batch in order. Each batch waits for its semaphores
    /// before touching the context and signals its own right after its last
    /// command buffer replays. The fence signals once all batches complete,
    /// through a backend marker when the backend has one.
    ///
    /// Batches are not atomic as a group. If batch `k` fails (a semaphore
    /// timeout, say), batches `0..k` have already replayed and signalled
    /// their semaphores, while the fence stays unsignalled. Only the wait
    /// semaphores of the failing batch are left untouched. Wait semaphores of
    /// later batches may be signalled by earlier ones, so they cannot be
    /// checked up front.
    pub fn submit(&self, submits: &[SubmitInfo], fence: Option<&Fence>) -> Result<()> {
        self.shared.check_lost()?;
        for submit in submits {
            for buffer in submit.command_buffers {
                buffer.validate_submit()?;
            }
        }
        if let Some(fence) = fence {
            if fence.is_signalled() {
                return Err(GPUError::InvalidState("submitting with a signalled fence"));
            }
        }

        for (i, submit) in submits.iter().enumerate() {
            self.wait_semaphores(submit.wait_semaphores)?;
            log::debug!(
                "queue {}: submit batch {i} with {} command buffers",
                self.index,
                submit.command_buffers.len()
            );

            let mut ctx = self.context.lock();
            let result = submit
                .command_buffers
                .iter()
                .try_for_each(|buffer| -> Result<()> {
                    self.replay(&mut ctx, buffer)?;
                    buffer.mark_submitted();
                    Ok(())
                })
                .and_then(|_| ctx.backend.flush());
            drop(ctx);
            if let Err(err) = result {
                if err.is_fatal() {
                    self.shared.mark_lost();
                    if let Some(fence) = fence {
                        fence.mark_error();
                    }
                    for sem in submit.signal_semaphores {
                        sem.mark_error();
                    }
                }
                return Err(err);
            }

            for sem in submit.signal_semaphores {
                sem.signal();
            }
        }

        if let Some(fence) = fence {
            let mut ctx = self.context.lock();
            if self.shared.caps.supports(Features::FENCE_SYNC) {
                let marker = ctx.backend.insert_fence()?;
                if let Some(stale) = fence.attach(marker) {
                    ctx.backend.delete_fence(stale)?;
                }
            } else {
                ctx.backend.finish()?;
                fence.signal();
            }
        }
        Ok(())
    }

    /// Waits `info.wait_semaphores`, then presents each image.
    pub fn present(&self, info: &PresentInfo) -> Result<()> {
        self.shared.check_lost()?;
        self.wait_semaphores(info.wait_semaphores)?;
        let natives = info
            .images
            .iter()
            .map(|&h| self.shared.image(h).map(|d| d.native))
            .collect::<Result<Vec<_>>>()?;
        let mut ctx = self.context.lock();
        for native in natives {
            ctx.backend.present(native)?;
        }
        Ok(())
    }

    /// Blocks until everything submitted so far has completed. With
    /// completion markers this polls one fresh marker, releasing the context
    /// between polls; otherwise it calls the backend's blocking finish.
    pub fn wait_idle(&self) -> Result<()> {
        self.shared.check_lost()?;
        if !self.shared.caps.supports(Features::FENCE_SYNC) {
            return self.context.lock().backend.finish();
        }
        let marker = self.context.lock().backend.insert_fence()?;
        let done = self.shared.info.backoff().poll(None, || {
            Ok(self
                .context
                .lock()
                .backend
                .query_fence(marker)?
                .then_some(()))
        });
        self.context.lock().backend.delete_fence(marker)?;
        done.map(|_| ())
    }
}
