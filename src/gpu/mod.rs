//! Explicit command-submission API over an implicit, stateful backend.
//!
//! Clients create a [`Device`] over some [`Backend`], record into
//! [`CommandBuffer`]s allocated from a [`CommandPool`], and submit them to a
//! [`Queue`], which replays the recorded opcodes against the backend.
//!
//! # Examples
//! ```
//! use dashi_emu::gpu::*;
//!
//! let device = Device::headless(&DeviceInfo::default())?;
//! let mut pool = device.create_command_pool(&CommandPoolInfo::default());
//! let cb = pool.allocate_command_buffers(CommandBufferLevel::Primary, 1)?[0];
//! let buffer = pool.buffer_mut(cb).ok_or(GPUError::InvalidHandle("command buffer"))?;
//! buffer.begin(&BeginInfo::default())?;
//! buffer.end()?;
//!
//! let fence = device.create_fence(false);
//! let buffers = [&*buffer];
//! device.queue(0)?.submit(
//!     &[SubmitInfo {
//!         command_buffers: &buffers,
//!         ..Default::default()
//!     }],
//!     Some(&fence),
//! )?;
//! device.wait_for_fences(&[&fence], true, None)?;
//! # Ok::<(), GPUError>(())
//! ```

pub mod backend;
pub mod cmd;
pub mod command_pool;
#[cfg(feature = "dashi-serde")]
pub mod config;
#[cfg(feature = "dashi-vulkan")]
pub mod conversions;
pub mod device;
pub mod driver;
pub mod error;
pub mod framebuffer;
pub mod pipeline;
pub mod queue;
pub mod render_pass;
pub mod structs;

pub use backend::{Backend, Capabilities, DefaultBackend, Features, NullBackend};
pub use cmd::{
    BeginInfo, CommandBuffer, CommandBufferLevel, CommandBufferState, Inheritance,
    MemoryBarrier, RenderPassBegin,
};
pub use command_pool::{CommandPool, CommandPoolInfo};
pub use device::{Device, DeviceInfo, DeviceShared};
pub use driver::types::{
    Buffer, BufferInfo, Image, ImageInfo, ImageView, ImageViewInfo, NativeId, NativeSync,
    ResourceDesc, ResourceKind, ResourceRegistry, ResourceTable, UsageBits,
};
pub use error::{GPUError, Result, ResultCode};
pub use framebuffer::{Framebuffer, FramebufferInfo};
pub use pipeline::{
    ComputePipeline, ComputePipelineInfo, GraphicsPipeline, GraphicsPipelineInfo,
    PipelineLayout, PipelineLayoutInfo, PushConstantRange,
};
pub use queue::{PresentInfo, Queue, SubmitInfo};
pub use render_pass::{
    AttachmentDescription, PassState, RenderPass, RenderPassInfo, SubpassDependency,
    SubpassDescription,
};
pub use structs::*;

pub use crate::sync::{Event, EventStatus, Fence, Semaphore, SyncStatus, WaitResult};
pub use crate::utils::Handle;
