//! Headless backend that records every call it receives.
//!
//! Nothing is rendered. Instead the backend keeps a call log and a coarse
//! model of each image's contents, which is enough to check what a replay
//! would have done to a real context.

use std::collections::HashMap;

use crate::gpu::driver::command::{Dispatch, DispatchIndirect, Draw, DrawIndexed, DrawIndirect};
use crate::gpu::driver::types::{NativeId, NativeSync};
use crate::gpu::error::{GPUError, Result};
use crate::gpu::structs::*;

use super::{
    AttachmentLoad, AttachmentSlot, AttachmentStore, Backend, Capabilities, FramebufferTarget,
    StencilDynamic,
};

/// One backend call, as seen by [`NullBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    UseProgram(NativeId),
    SetBlendState(BlendState),
    SetDepthStencilState(DepthStencilState),
    SetRasterState(RasterState),
    SetViewport(u32, Viewport),
    SetScissor(u32, Rect2D),
    SetLineWidth(f32),
    SetDepthBias(DepthBias),
    SetBlendConstants([f32; 4]),
    SetStencilValue(StencilDynamic, StencilFaces, u32),
    BindVertexBuffer {
        binding: u32,
        buffer: NativeId,
        offset: u64,
    },
    BindIndexBuffer {
        buffer: NativeId,
        offset: u64,
        ty: IndexType,
    },
    BindDescriptorSet {
        bind_point: BindPoint,
        index: u32,
        set: NativeId,
        dynamic_offsets: Vec<u32>,
    },
    PushConstants {
        stages: ShaderStages,
        offset: u32,
        data: Vec<u8>,
    },
    CreateFramebuffer(NativeId, FramebufferTarget),
    DestroyFramebuffer(NativeId),
    BindFramebuffer(NativeId),
    Load {
        image: NativeId,
        slot: AttachmentSlot,
        load: AttachmentLoad,
        area: Rect2D,
    },
    Store {
        image: NativeId,
        slot: AttachmentSlot,
        store: AttachmentStore,
    },
    Resolve {
        src: NativeId,
        dst: NativeId,
        aspect: AspectMask,
        area: Rect2D,
    },
    ClearAttachment {
        image: NativeId,
        value: ClearValue,
        rect: Rect2D,
    },
    Draw(Topology, Draw),
    DrawIndexed(Topology, IndexType, DrawIndexed),
    DrawIndirect(Topology, DrawIndirect),
    DrawIndexedIndirect(Topology, IndexType, DrawIndirect),
    Dispatch(Dispatch),
    DispatchIndirect(DispatchIndirect),
    CopyBuffer(NativeId, NativeId, BufferCopy),
    CopyImage(NativeId, NativeId, ImageCopy),
    CopyBufferToImage(NativeId, NativeId, BufferImageCopy),
    CopyImageToBuffer(NativeId, NativeId, BufferImageCopy),
    BlitImage(NativeId, NativeId, ImageBlit, Filter),
    ResolveImage(NativeId, NativeId, ImageResolve),
    UpdateBuffer {
        dst: NativeId,
        offset: u64,
        data: Vec<u8>,
    },
    FillBuffer {
        dst: NativeId,
        offset: u64,
        size: u64,
        value: u32,
    },
    ClearImage(NativeId, ClearValue),
    MemoryBarrier(BarrierBits),
    PushDebugGroup(String),
    PopDebugGroup,
    InsertFence(NativeSync),
    QueryFence(NativeSync),
    DeleteFence(NativeSync),
    Flush,
    Finish,
    Present(NativeId),
}

impl Call {
    pub fn is_work(&self) -> bool {
        matches!(
            self,
            Call::Draw(..)
                | Call::DrawIndexed(..)
                | Call::DrawIndirect(..)
                | Call::DrawIndexedIndirect(..)
                | Call::Dispatch(_)
                | Call::DispatchIndirect(_)
        )
    }
}

/// What an image would hold after the calls seen so far.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Contents {
    Undefined,
    Solid(ClearValue),
    Rendered,
}

pub struct NullBackend {
    caps: Capabilities,
    calls: Vec<Call>,
    next_name: u64,
    framebuffers: HashMap<NativeId, FramebufferTarget>,
    bound: NativeId,
    contents: HashMap<NativeId, Contents>,
    fences: HashMap<NativeSync, u32>,
    fence_latency: u32,
    fault: Option<(usize, GPUError)>,
    rasterizer_discard: bool,
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl NullBackend {
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities::default())
    }

    pub fn with_capabilities(caps: Capabilities) -> Self {
        Self {
            caps,
            calls: Vec::new(),
            next_name: 1,
            framebuffers: HashMap::new(),
            bound: NativeId::NONE,
            contents: HashMap::new(),
            fences: HashMap::new(),
            fence_latency: 0,
            fault: None,
            rasterizer_discard: false,
        }
    }

    /// Every fence inserted from now on needs `polls` unsuccessful queries
    /// before it reports completion.
    pub fn set_fence_latency(&mut self, polls: u32) {
        self.fence_latency = polls;
    }

    /// Makes the call after the next `calls` calls fail with `error`.
    pub fn fail_after(&mut self, calls: usize, error: GPUError) {
        self.fault = Some((calls, error));
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<Call> {
        std::mem::take(&mut self.calls)
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn count_calls(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn contents(&self, image: NativeId) -> Contents {
        self.contents
            .get(&image)
            .copied()
            .unwrap_or(Contents::Undefined)
    }

    pub fn set_contents(&mut self, image: NativeId, contents: Contents) {
        self.contents.insert(image, contents);
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn live_fences(&self) -> usize {
        self.fences.len()
    }

    pub fn bound_framebuffer(&self) -> NativeId {
        self.bound
    }

    fn record(&mut self, call: Call) -> Result<()> {
        log::trace!("NullBackend: {:?}", call);
        self.calls.push(call);
        match self.fault.take() {
            Some((0, err)) => Err(err),
            Some((n, err)) => {
                self.fault = Some((n - 1, err));
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn image_at(&self, slot: AttachmentSlot) -> NativeId {
        let Some(target) = self.framebuffers.get(&self.bound) else {
            return NativeId::NONE;
        };
        match slot {
            AttachmentSlot::Color(i) => target
                .colors
                .get(i as usize)
                .copied()
                .unwrap_or(NativeId::NONE),
            AttachmentSlot::DepthStencil => target.depth_stencil.unwrap_or(NativeId::NONE),
        }
    }

    fn primary_image(&self, framebuffer: NativeId, aspect: AspectMask) -> NativeId {
        let Some(target) = self.framebuffers.get(&framebuffer) else {
            return NativeId::NONE;
        };
        if aspect.contains(AspectMask::COLOR) {
            target.colors.first().copied().unwrap_or(NativeId::NONE)
        } else {
            target.depth_stencil.unwrap_or(NativeId::NONE)
        }
    }

    fn mark_rendered(&mut self) {
        if self.rasterizer_discard {
            return;
        }
        if let Some(target) = self.framebuffers.get(&self.bound) {
            let images: Vec<NativeId> = target
                .colors
                .iter()
                .copied()
                .chain(target.depth_stencil)
                .collect();
            for image in images {
                self.contents.insert(image, Contents::Rendered);
            }
        }
    }

    fn copy_contents(&mut self, src: NativeId, dst: NativeId) {
        let value = self.contents(src);
        self.contents.insert(dst, value);
    }

    fn next_id(&mut self) -> u64 {
        let n = self.next_name;
        self.next_name += 1;
        n
    }
}

impl Backend for NullBackend {
    fn name(&self) -> &'static str {
        "Null Backend"
    }

    fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    fn use_program(&mut self, program: NativeId) -> Result<()> {
        self.record(Call::UseProgram(program))
    }

    fn set_blend_state(&mut self, state: &BlendState) -> Result<()> {
        self.record(Call::SetBlendState(*state))
    }

    fn set_depth_stencil_state(&mut self, state: &DepthStencilState) -> Result<()> {
        self.record(Call::SetDepthStencilState(*state))
    }

    fn set_raster_state(&mut self, state: &RasterState) -> Result<()> {
        self.rasterizer_discard = state.rasterizer_discard;
        self.record(Call::SetRasterState(*state))
    }

    fn set_viewport(&mut self, index: u32, viewport: &Viewport) -> Result<()> {
        self.record(Call::SetViewport(index, *viewport))
    }

    fn set_scissor(&mut self, index: u32, rect: &Rect2D) -> Result<()> {
        self.record(Call::SetScissor(index, *rect))
    }

    fn set_line_width(&mut self, width: f32) -> Result<()> {
        self.record(Call::SetLineWidth(width))
    }

    fn set_depth_bias(&mut self, bias: &DepthBias) -> Result<()> {
        self.record(Call::SetDepthBias(*bias))
    }

    fn set_blend_constants(&mut self, constants: [f32; 4]) -> Result<()> {
        self.record(Call::SetBlendConstants(constants))
    }

    fn set_stencil_value(
        &mut self,
        which: StencilDynamic,
        faces: StencilFaces,
        value: u32,
    ) -> Result<()> {
        self.record(Call::SetStencilValue(which, faces, value))
    }

    fn bind_vertex_buffer(&mut self, binding: u32, buffer: NativeId, offset: u64) -> Result<()> {
        self.record(Call::BindVertexBuffer {
            binding,
            buffer,
            offset,
        })
    }

    fn bind_index_buffer(&mut self, buffer: NativeId, offset: u64, ty: IndexType) -> Result<()> {
        self.record(Call::BindIndexBuffer { buffer, offset, ty })
    }

    fn bind_descriptor_set(
        &mut self,
        bind_point: BindPoint,
        index: u32,
        set: NativeId,
        dynamic_offsets: &[u32],
    ) -> Result<()> {
        self.record(Call::BindDescriptorSet {
            bind_point,
            index,
            set,
            dynamic_offsets: dynamic_offsets.to_vec(),
        })
    }

    fn push_constants(&mut self, stages: ShaderStages, offset: u32, data: &[u8]) -> Result<()> {
        self.record(Call::PushConstants {
            stages,
            offset,
            data: data.to_vec(),
        })
    }

    fn create_framebuffer(&mut self, target: &FramebufferTarget) -> Result<NativeId> {
        let id = NativeId(self.next_id());
        self.framebuffers.insert(id, target.clone());
        self.record(Call::CreateFramebuffer(id, target.clone()))?;
        Ok(id)
    }

    fn destroy_framebuffer(&mut self, framebuffer: NativeId) -> Result<()> {
        self.framebuffers.remove(&framebuffer);
        if self.bound == framebuffer {
            self.bound = NativeId::NONE;
        }
        self.record(Call::DestroyFramebuffer(framebuffer))
    }

    fn bind_framebuffer(&mut self, framebuffer: NativeId) -> Result<()> {
        if !framebuffer.is_none() && !self.framebuffers.contains_key(&framebuffer) {
            return Err(GPUError::Validation(format!(
                "framebuffer {} does not exist",
                framebuffer.0
            )));
        }
        self.bound = framebuffer;
        self.record(Call::BindFramebuffer(framebuffer))
    }

    fn load_attachment(
        &mut self,
        slot: AttachmentSlot,
        load: &AttachmentLoad,
        area: &Rect2D,
    ) -> Result<()> {
        let image = self.image_at(slot);
        match (load.op, load.clear) {
            (LoadOp::Clear, Some(value)) => {
                self.contents.insert(image, Contents::Solid(value));
            }
            (LoadOp::DontCare, _) => {
                self.contents.insert(image, Contents::Undefined);
            }
            _ => {}
        }
        self.record(Call::Load {
            image,
            slot,
            load: *load,
            area: *area,
        })
    }

    fn store_attachment(&mut self, slot: AttachmentSlot, store: &AttachmentStore) -> Result<()> {
        let image = self.image_at(slot);
        if !store.keeps_contents() {
            self.contents.insert(image, Contents::Undefined);
        }
        self.record(Call::Store {
            image,
            slot,
            store: *store,
        })
    }

    fn resolve_framebuffer(
        &mut self,
        src: NativeId,
        dst: NativeId,
        aspect: AspectMask,
        area: &Rect2D,
    ) -> Result<()> {
        let src = self.primary_image(src, aspect);
        let dst = self.primary_image(dst, aspect);
        self.copy_contents(src, dst);
        self.record(Call::Resolve {
            src,
            dst,
            aspect,
            area: *area,
        })
    }

    fn clear_attachment(
        &mut self,
        slot: AttachmentSlot,
        value: &ClearValue,
        rect: &Rect2D,
    ) -> Result<()> {
        let image = self.image_at(slot);
        let full = self
            .framebuffers
            .get(&self.bound)
            .map(|t| Rect2D::new(0, 0, t.width, t.height))
            .map_or(false, |r| rect.contains(&r));
        let contents = if full {
            Contents::Solid(*value)
        } else {
            Contents::Rendered
        };
        self.contents.insert(image, contents);
        self.record(Call::ClearAttachment {
            image,
            value: *value,
            rect: *rect,
        })
    }

    fn draw(&mut self, topology: Topology, cmd: &Draw) -> Result<()> {
        self.mark_rendered();
        self.record(Call::Draw(topology, *cmd))
    }

    fn draw_indexed(
        &mut self,
        topology: Topology,
        ty: IndexType,
        cmd: &DrawIndexed,
    ) -> Result<()> {
        self.mark_rendered();
        self.record(Call::DrawIndexed(topology, ty, *cmd))
    }

    fn draw_indirect(&mut self, topology: Topology, cmd: &DrawIndirect) -> Result<()> {
        self.mark_rendered();
        self.record(Call::DrawIndirect(topology, *cmd))
    }

    fn draw_indexed_indirect(
        &mut self,
        topology: Topology,
        ty: IndexType,
        cmd: &DrawIndirect,
    ) -> Result<()> {
        self.mark_rendered();
        self.record(Call::DrawIndexedIndirect(topology, ty, *cmd))
    }

    fn dispatch(&mut self, cmd: &Dispatch) -> Result<()> {
        self.record(Call::Dispatch(*cmd))
    }

    fn dispatch_indirect(&mut self, cmd: &DispatchIndirect) -> Result<()> {
        self.record(Call::DispatchIndirect(*cmd))
    }

    fn copy_buffer(&mut self, src: NativeId, dst: NativeId, region: &BufferCopy) -> Result<()> {
        self.record(Call::CopyBuffer(src, dst, *region))
    }

    fn copy_image(&mut self, src: NativeId, dst: NativeId, region: &ImageCopy) -> Result<()> {
        self.copy_contents(src, dst);
        self.record(Call::CopyImage(src, dst, *region))
    }

    fn copy_buffer_to_image(
        &mut self,
        buffer: NativeId,
        image: NativeId,
        region: &BufferImageCopy,
    ) -> Result<()> {
        self.contents.insert(image, Contents::Rendered);
        self.record(Call::CopyBufferToImage(buffer, image, *region))
    }

    fn copy_image_to_buffer(
        &mut self,
        image: NativeId,
        buffer: NativeId,
        region: &BufferImageCopy,
    ) -> Result<()> {
        self.record(Call::CopyImageToBuffer(image, buffer, *region))
    }

    fn blit_image(
        &mut self,
        src: NativeId,
        dst: NativeId,
        region: &ImageBlit,
        filter: Filter,
    ) -> Result<()> {
        self.copy_contents(src, dst);
        self.record(Call::BlitImage(src, dst, *region, filter))
    }

    fn resolve_image(
        &mut self,
        src: NativeId,
        dst: NativeId,
        region: &ImageResolve,
    ) -> Result<()> {
        self.copy_contents(src, dst);
        self.record(Call::ResolveImage(src, dst, *region))
    }

    fn update_buffer(&mut self, dst: NativeId, offset: u64, data: &[u8]) -> Result<()> {
        self.record(Call::UpdateBuffer {
            dst,
            offset,
            data: data.to_vec(),
        })
    }

    fn fill_buffer(&mut self, dst: NativeId, offset: u64, size: u64, value: u32) -> Result<()> {
        self.record(Call::FillBuffer {
            dst,
            offset,
            size,
            value,
        })
    }

    fn clear_image(
        &mut self,
        image: NativeId,
        value: &ClearValue,
        _range: &SubresourceRange,
    ) -> Result<()> {
        self.contents.insert(image, Contents::Solid(*value));
        self.record(Call::ClearImage(image, *value))
    }

    fn memory_barrier(&mut self, bits: BarrierBits) -> Result<()> {
        self.record(Call::MemoryBarrier(bits))
    }

    fn push_debug_group(&mut self, label: &str) -> Result<()> {
        self.record(Call::PushDebugGroup(label.to_string()))
    }

    fn pop_debug_group(&mut self) -> Result<()> {
        self.record(Call::PopDebugGroup)
    }

    fn insert_fence(&mut self) -> Result<NativeSync> {
        let sync = NativeSync(self.next_id());
        self.fences.insert(sync, self.fence_latency);
        self.record(Call::InsertFence(sync))?;
        Ok(sync)
    }

    fn query_fence(&mut self, sync: NativeSync) -> Result<bool> {
        self.record(Call::QueryFence(sync))?;
        match self.fences.get_mut(&sync) {
            Some(0) => Ok(true),
            Some(remaining) => {
                *remaining -= 1;
                Ok(false)
            }
            None => Err(GPUError::Validation(format!("unknown fence {}", sync.0))),
        }
    }

    fn delete_fence(&mut self, sync: NativeSync) -> Result<()> {
        self.fences.remove(&sync);
        self.record(Call::DeleteFence(sync))
    }

    fn flush(&mut self) -> Result<()> {
        self.record(Call::Flush)
    }

    fn finish(&mut self) -> Result<()> {
        for remaining in self.fences.values_mut() {
            *remaining = 0;
        }
        self.record(Call::Finish)
    }

    fn present(&mut self, image: NativeId) -> Result<()> {
        self.record(Call::Present(image))
    }
}
