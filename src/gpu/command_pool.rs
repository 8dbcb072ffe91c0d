use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::gpu::cmd::{CommandBuffer, CommandBufferLevel};
use crate::gpu::device::DeviceShared;
use crate::gpu::error::{GPUError, Result};
use crate::utils::{Handle, Pool};

#[derive(Debug, Clone, Copy, Default)]
pub struct CommandPoolInfo<'a> {
    pub debug_name: &'a str,
}

/// Owns the command buffers allocated from it, and through them every
/// recorded command list.
///
/// A pool may move between threads but is not shared; recording into
/// buffers of different pools can proceed in parallel.
pub struct CommandPool {
    debug_name: String,
    shared: Arc<DeviceShared>,
    buffers: Pool<CommandBuffer>,
    // make !Sync
    _not_sync: PhantomData<UnsafeCell<()>>,
}

impl CommandPool {
    pub(crate) fn new(shared: Arc<DeviceShared>, info: &CommandPoolInfo) -> Self {
        log::debug!("created command pool '{}'", info.debug_name);
        Self {
            debug_name: info.debug_name.to_string(),
            shared,
            buffers: Pool::new(8),
            _not_sync: PhantomData,
        }
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    pub fn allocate_command_buffers(
        &mut self,
        level: CommandBufferLevel,
        count: usize,
    ) -> Result<Vec<Handle<CommandBuffer>>> {
        let mut handles = Vec::with_capacity(count);
        for i in 0..count {
            let name = format!("{}[{}]", self.debug_name, self.buffers.len() + i);
            let buffer = CommandBuffer::new(self.shared.clone(), level, &name);
            match self.buffers.insert(buffer) {
                Some(h) => handles.push(h),
                None => {
                    for h in handles {
                        self.buffers.release(h);
                    }
                    return Err(GPUError::OutOfHostMemory);
                }
            }
        }
        Ok(handles)
    }

    /// Dropping a buffer drops its command list.
    pub fn free_command_buffers(&mut self, handles: &[Handle<CommandBuffer>]) {
        for &h in handles {
            if self.buffers.release(h).is_none() {
                log::warn!("pool '{}': freeing unknown command buffer {:?}", self.debug_name, h);
            }
        }
    }

    /// Returns every buffer to the initial state.
    pub fn reset(&mut self) {
        self.buffers.for_each_occupied_mut(|b| b.reset());
    }

    pub fn buffer(&self, handle: Handle<CommandBuffer>) -> Option<&CommandBuffer> {
        self.buffers.get_ref(handle)
    }

    pub fn buffer_mut(&mut self, handle: Handle<CommandBuffer>) -> Option<&mut CommandBuffer> {
        self.buffers.get_mut_ref(handle)
    }

    /// `cmd_execute_commands` for a primary and secondaries that live in this
    /// same pool.
    pub fn record_execute(
        &mut self,
        primary: Handle<CommandBuffer>,
        secondaries: &[Handle<CommandBuffer>],
    ) -> Result<()> {
        if secondaries.contains(&primary) {
            return Err(GPUError::InvalidState("a command buffer cannot execute itself"));
        }
        let mut target = self
            .buffers
            .checkout(primary)
            .ok_or(GPUError::InvalidHandle("command buffer"))?;
        let result = {
            let refs: Option<Vec<&CommandBuffer>> =
                secondaries.iter().map(|&h| self.buffers.get_ref(h)).collect();
            match refs {
                Some(refs) => target.cmd_execute_commands(&refs),
                None => Err(GPUError::InvalidHandle("secondary command buffer")),
            }
        };
        self.buffers.checkin(primary, target);
        result
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}
