//! Call table for implicit, stateful GPU contexts.
//!
//! Everything above this trait speaks the explicit model: recorded command
//! lists, render pass instances and sync objects. A [`Backend`] only sees the
//! flattened result, a sequence of immediate state changes and work calls
//! against a single current context.

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::gpu::driver::command::{Dispatch, DispatchIndirect, Draw, DrawIndexed, DrawIndirect};
use crate::gpu::driver::types::{NativeId, NativeSync};
use crate::gpu::error::Result;
use crate::gpu::structs::*;

pub mod null;

pub use null::NullBackend;

/// Backend used when none is named.
pub type DefaultBackend = NullBackend;

bitflags! {
    /// Optional backend features. Commands that need a missing feature are
    /// rejected with `ErrorFeatureNotPresent` when recorded or created.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "dashi-serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct Features: u32 {
        const DRAW_INDIRECT = 1 << 0;
        const MULTI_DRAW_INDIRECT = 1 << 1;
        const INDIRECT_FIRST_INSTANCE = 1 << 2;
        const COMPUTE = 1 << 3;
        const TESSELLATION = 1 << 4;
        const GEOMETRY_SHADER = 1 << 5;
        const FENCE_SYNC = 1 << 6;
        const MULTISAMPLE_RESOLVE = 1 << 7;
        const DEPTH_RESOLVE = 1 << 8;
        const WIDE_LINES = 1 << 9;
        const DEPTH_BIAS_CLAMP = 1 << 10;
        const MULTI_VIEWPORT = 1 << 11;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "dashi-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Capabilities {
    pub features: Features,
    pub origin: Origin,
    pub max_color_attachments: u32,
    pub max_viewports: u32,
    pub max_vertex_bindings: u32,
    pub max_push_constant_size: u32,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            features: Features::all(),
            origin: Origin::BottomLeft,
            max_color_attachments: 8,
            max_viewports: 4,
            max_vertex_bindings: 16,
            max_push_constant_size: 128,
        }
    }
}

impl Capabilities {
    pub fn supports(&self, features: Features) -> bool {
        self.features.contains(features)
    }
}

/// Attachment slot inside the currently bound backend framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentSlot {
    Color(u32),
    DepthStencil,
}

/// How an attachment's contents start out when a render pass first touches
/// it. `stencil_op` only matters for formats with a stencil aspect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttachmentLoad {
    pub op: LoadOp,
    pub stencil_op: LoadOp,
    pub clear: Option<ClearValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentStore {
    pub op: StoreOp,
    pub stencil_op: StoreOp,
}

impl AttachmentStore {
    pub fn keeps_contents(&self) -> bool {
        self.op == StoreOp::Store || self.stencil_op == StoreOp::Store
    }
}

/// A set of image views to build one backend framebuffer object from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FramebufferTarget {
    pub colors: SmallVec<[NativeId; 8]>,
    pub depth_stencil: Option<NativeId>,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilDynamic {
    Reference,
    CompareMask,
    WriteMask,
}

pub trait Backend: Send {
    fn name(&self) -> &'static str;
    fn capabilities(&self) -> &Capabilities;

    //===------------------------------------------------------------------===//
    // Pipeline and dynamic state
    //===------------------------------------------------------------------===//

    fn use_program(&mut self, program: NativeId) -> Result<()>;
    fn set_blend_state(&mut self, state: &BlendState) -> Result<()>;
    fn set_depth_stencil_state(&mut self, state: &DepthStencilState) -> Result<()>;
    fn set_raster_state(&mut self, state: &RasterState) -> Result<()>;
    fn set_viewport(&mut self, index: u32, viewport: &Viewport) -> Result<()>;
    fn set_scissor(&mut self, index: u32, rect: &Rect2D) -> Result<()>;
    fn set_line_width(&mut self, width: f32) -> Result<()>;
    fn set_depth_bias(&mut self, bias: &DepthBias) -> Result<()>;
    fn set_blend_constants(&mut self, constants: [f32; 4]) -> Result<()>;
    fn set_stencil_value(
        &mut self,
        which: StencilDynamic,
        faces: StencilFaces,
        value: u32,
    ) -> Result<()>;

    fn bind_vertex_buffer(&mut self, binding: u32, buffer: NativeId, offset: u64) -> Result<()>;
    fn bind_index_buffer(&mut self, buffer: NativeId, offset: u64, ty: IndexType) -> Result<()>;
    fn bind_descriptor_set(
        &mut self,
        bind_point: BindPoint,
        index: u32,
        set: NativeId,
        dynamic_offsets: &[u32],
    ) -> Result<()>;
    fn push_constants(&mut self, stages: ShaderStages, offset: u32, data: &[u8]) -> Result<()>;

    //===------------------------------------------------------------------===//
    // Framebuffers and attachments
    //===------------------------------------------------------------------===//

    fn create_framebuffer(&mut self, target: &FramebufferTarget) -> Result<NativeId>;
    fn destroy_framebuffer(&mut self, framebuffer: NativeId) -> Result<()>;
    /// `NativeId::NONE` binds the default framebuffer.
    fn bind_framebuffer(&mut self, framebuffer: NativeId) -> Result<()>;
    /// Applies a load op to one attachment of the bound framebuffer, limited
    /// to `area` (backend coordinates).
    fn load_attachment(&mut self, slot: AttachmentSlot, load: &AttachmentLoad, area: &Rect2D)
        -> Result<()>;
    fn store_attachment(&mut self, slot: AttachmentSlot, store: &AttachmentStore) -> Result<()>;
    /// Resolves slot zero (or depth) of `src` into `dst`. Leaves the bound
    /// framebuffer unchanged.
    fn resolve_framebuffer(
        &mut self,
        src: NativeId,
        dst: NativeId,
        aspect: AspectMask,
        area: &Rect2D,
    ) -> Result<()>;
    fn clear_attachment(&mut self, slot: AttachmentSlot, value: &ClearValue, rect: &Rect2D)
        -> Result<()>;

    //===------------------------------------------------------------------===//
    // Work
    //===------------------------------------------------------------------===//

    fn draw(&mut self, topology: Topology, cmd: &Draw) -> Result<()>;
    fn draw_indexed(&mut self, topology: Topology, ty: IndexType, cmd: &DrawIndexed)
        -> Result<()>;
    fn draw_indirect(&mut self, topology: Topology, cmd: &DrawIndirect) -> Result<()>;
    fn draw_indexed_indirect(
        &mut self,
        topology: Topology,
        ty: IndexType,
        cmd: &DrawIndirect,
    ) -> Result<()>;
    fn dispatch(&mut self, cmd: &Dispatch) -> Result<()>;
    fn dispatch_indirect(&mut self, cmd: &DispatchIndirect) -> Result<()>;

    //===------------------------------------------------------------------===//
    // Transfer
    //===------------------------------------------------------------------===//

    fn copy_buffer(&mut self, src: NativeId, dst: NativeId, region: &BufferCopy) -> Result<()>;
    fn copy_image(&mut self, src: NativeId, dst: NativeId, region: &ImageCopy) -> Result<()>;
    fn copy_buffer_to_image(
        &mut self,
        buffer: NativeId,
        image: NativeId,
        region: &BufferImageCopy,
    ) -> Result<()>;
    fn copy_image_to_buffer(
        &mut self,
        image: NativeId,
        buffer: NativeId,
        region: &BufferImageCopy,
    ) -> Result<()>;
    fn blit_image(
        &mut self,
        src: NativeId,
        dst: NativeId,
        region: &ImageBlit,
        filter: Filter,
    ) -> Result<()>;
    fn resolve_image(&mut self, src: NativeId, dst: NativeId, region: &ImageResolve)
        -> Result<()>;
    fn update_buffer(&mut self, dst: NativeId, offset: u64, data: &[u8]) -> Result<()>;
    fn fill_buffer(&mut self, dst: NativeId, offset: u64, size: u64, value: u32) -> Result<()>;
    fn clear_image(
        &mut self,
        image: NativeId,
        value: &ClearValue,
        range: &SubresourceRange,
    ) -> Result<()>;

    fn memory_barrier(&mut self, bits: BarrierBits) -> Result<()>;
    fn push_debug_group(&mut self, label: &str) -> Result<()>;
    fn pop_debug_group(&mut self) -> Result<()>;

    //===------------------------------------------------------------------===//
    // Completion
    //===------------------------------------------------------------------===//

    /// Inserts a completion marker after everything issued so far. Only
    /// called when the backend reports [`Features::FENCE_SYNC`].
    fn insert_fence(&mut self) -> Result<NativeSync>;
    /// Non-blocking completion query.
    fn query_fence(&mut self, sync: NativeSync) -> Result<bool>;
    fn delete_fence(&mut self, sync: NativeSync) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
    /// Blocks until all issued work has completed.
    fn finish(&mut self) -> Result<()>;
    fn present(&mut self, image: NativeId) -> Result<()>;
}
