//! Command buffer recording.
//!
//! Every `cmd_*` call validates against the device's registries and the
//! buffer's own recording state, then appends opcodes to a [`CommandList`].
//! Nothing here touches a backend; buffers can be recorded on any thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;

use crate::gpu::backend::Features;
use crate::gpu::device::DeviceShared;
use crate::gpu::driver::command::{self as ops, CommandList, Op};
use crate::gpu::driver::state::{MAX_DESCRIPTOR_SETS, MAX_VERTEX_BINDINGS, MAX_VIEWPORTS};
use crate::gpu::driver::types::{Buffer, Handle, Image, NativeId, ResourceDesc};
use crate::gpu::error::{GPUError, Result};
use crate::gpu::framebuffer::Framebuffer;
use crate::gpu::pipeline::{ComputePipeline, GraphicsPipeline, PipelineLayout};
use crate::gpu::render_pass::RenderPass;
use crate::gpu::structs::*;
use crate::sync::Event;

/// Largest payload `cmd_update_buffer` accepts.
pub const MAX_UPDATE_SIZE: usize = 65536;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CommandBufferLevel {
    #[default]
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandBufferState {
    Initial,
    Recording,
    Executable,
    Invalid,
}

/// Render pass a secondary buffer continues.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inheritance {
    pub render_pass: Handle<RenderPass>,
    pub subpass: u32,
    pub framebuffer: Option<Handle<Framebuffer>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BeginInfo {
    pub one_time_submit: bool,
    pub inheritance: Option<Inheritance>,
}

#[derive(Debug, Clone, Copy)]
pub struct RenderPassBegin<'a> {
    pub render_pass: Handle<RenderPass>,
    pub framebuffer: Handle<Framebuffer>,
    pub render_area: Rect2D,
    pub clear_values: &'a [ClearValue],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MemoryBarrier {
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
}

fn barrier_bits(barriers: &[MemoryBarrier]) -> BarrierBits {
    barriers
        .iter()
        .fold(BarrierBits::empty(), |bits, b| {
            bits | BarrierBits::from_dst_access(b.dst_access)
        })
}

#[derive(Debug, Clone)]
struct ActivePass {
    render_pass: Arc<RenderPass>,
    subpass: u32,
    contents: SubpassContents,
    inherited: bool,
}

/// What recording needs to remember between calls to validate the next one.
#[derive(Debug, Default)]
struct RecordTracker {
    pass: Option<ActivePass>,
    graphics: Option<Arc<GraphicsPipeline>>,
    compute: Option<Arc<ComputePipeline>>,
    index_bound: bool,
    markers: u32,
}

pub struct CommandBuffer {
    debug_name: String,
    level: CommandBufferLevel,
    state: CommandBufferState,
    list: CommandList,
    shared: Arc<DeviceShared>,
    one_time_submit: bool,
    inheritance: Option<(Arc<RenderPass>, u32)>,
    consumed: AtomicBool,
    tracker: RecordTracker,
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("debug_name", &self.debug_name)
            .field("level", &self.level)
            .field("state", &self.state())
            .field("ops", &self.list.len())
            .finish()
    }
}

impl CommandBuffer {
    pub(crate) fn new(shared: Arc<DeviceShared>, level: CommandBufferLevel, debug_name: &str) -> Self {
        Self {
            debug_name: debug_name.to_string(),
            level,
            state: CommandBufferState::Initial,
            list: CommandList::new(),
            shared,
            one_time_submit: false,
            inheritance: None,
            consumed: AtomicBool::new(false),
            tracker: RecordTracker::default(),
        }
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    pub fn level(&self) -> CommandBufferLevel {
        self.level
    }

    pub fn state(&self) -> CommandBufferState {
        if self.consumed.load(Ordering::Acquire) {
            CommandBufferState::Invalid
        } else {
            self.state
        }
    }

    pub fn list(&self) -> &CommandList {
        &self.list
    }

    pub fn begin(&mut self, info: &BeginInfo) -> Result<()> {
        if self.state == CommandBufferState::Recording {
            return Err(GPUError::InvalidState("command buffer is already recording"));
        }
        let inheritance = match (self.level, info.inheritance) {
            (CommandBufferLevel::Secondary, Some(inh)) => {
                let pass = self.shared.render_pass(inh.render_pass)?;
                if inh.subpass as usize >= pass.subpasses().len() {
                    return Err(GPUError::Validation(format!(
                        "inherited subpass {} out of range",
                        inh.subpass
                    )));
                }
                if let Some(fb) = inh.framebuffer {
                    if !self.shared.framebuffer(fb)?.is_compatible(&pass) {
                        return Err(GPUError::Validation(
                            "inherited framebuffer is not compatible".into(),
                        ));
                    }
                }
                Some((pass, inh.subpass))
            }
            (CommandBufferLevel::Primary, Some(_)) => {
                return Err(GPUError::Validation(
                    "primary command buffers cannot inherit a render pass".into(),
                ))
            }
            (_, None) => None,
        };

        self.reset();
        self.one_time_submit = info.one_time_submit;
        self.tracker.pass = inheritance.as_ref().map(|(pass, subpass)| ActivePass {
            render_pass: pass.clone(),
            subpass: *subpass,
            contents: SubpassContents::Inline,
            inherited: true,
        });
        self.inheritance = inheritance;
        self.state = CommandBufferState::Recording;
        Ok(())
    }

    pub fn end(&mut self) -> Result<()> {
        self.record("end", |cb| {
            if cb.tracker.pass.as_ref().map_or(false, |p| !p.inherited) {
                return Err(GPUError::InvalidState("render pass still active at end"));
            }
            if cb.tracker.markers != 0 {
                return Err(GPUError::InvalidState("unbalanced debug markers at end"));
            }
            Ok(())
        })?;
        self.state = CommandBufferState::Executable;
        log::debug!(
            "command buffer '{}' recorded {} ops",
            self.debug_name,
            self.list.len()
        );
        Ok(())
    }

    /// Drops the recorded list and returns to the initial state.
    pub fn reset(&mut self) {
        self.list.reset();
        self.tracker = RecordTracker::default();
        self.inheritance = None;
        self.one_time_submit = false;
        self.consumed.store(false, Ordering::Release);
        self.state = CommandBufferState::Initial;
    }

    /// Checks the buffer can go into a queue submission.
    pub(crate) fn validate_submit(&self) -> Result<()> {
        if self.level != CommandBufferLevel::Primary {
            return Err(GPUError::InvalidState(
                "secondary command buffers cannot be submitted",
            ));
        }
        if self.state() != CommandBufferState::Executable {
            return Err(GPUError::InvalidState("command buffer is not executable"));
        }
        Ok(())
    }

    /// One-time buffers become invalid after their first submission.
    pub(crate) fn mark_submitted(&self) {
        if self.one_time_submit {
            self.consumed.store(true, Ordering::Release);
        }
    }

    fn record(&mut self, what: &'static str, f: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        let result = if self.state() == CommandBufferState::Recording {
            f(self)
        } else {
            Err(GPUError::InvalidState("command buffer is not recording"))
        };
        if let Err(err) = &result {
            if !err.preserves_recording() {
                log::warn!(
                    "command buffer '{}': {} failed, buffer invalidated: {}",
                    self.debug_name,
                    what,
                    err
                );
                self.state = CommandBufferState::Invalid;
            }
        }
        result
    }

    //===------------------------------------------------------------------===//
    // Validation helpers
    //===------------------------------------------------------------------===//

    fn require_feature(&self, feature: Features, name: &'static str) -> Result<()> {
        if self.shared.caps.supports(feature) {
            Ok(())
        } else {
            Err(GPUError::FeatureNotPresent(name))
        }
    }

    fn active_pass(&self) -> Result<&ActivePass> {
        self.tracker
            .pass
            .as_ref()
            .ok_or(GPUError::InvalidState("command requires an active render pass"))
    }

    fn outside_pass(&self) -> Result<()> {
        match self.tracker.pass {
            Some(_) => Err(GPUError::InvalidState(
                "command is not allowed inside a render pass",
            )),
            None => Ok(()),
        }
    }

    fn inline_pass(&self) -> Result<&ActivePass> {
        let pass = self.active_pass()?;
        if pass.contents == SubpassContents::SecondaryCommandBuffers {
            return Err(GPUError::InvalidState(
                "subpass contents are recorded in secondary command buffers",
            ));
        }
        Ok(pass)
    }

    fn require_draw(&self, indexed: bool) -> Result<Arc<GraphicsPipeline>> {
        let pass = self.inline_pass()?;
        let pipeline = self
            .tracker
            .graphics
            .clone()
            .ok_or(GPUError::InvalidState("no graphics pipeline bound"))?;
        if &pipeline.signature != pass.render_pass.signature() || pipeline.subpass != pass.subpass
        {
            return Err(GPUError::Validation(format!(
                "pipeline '{}' does not match the current subpass",
                pipeline.debug_name
            )));
        }
        if indexed && !self.tracker.index_bound {
            return Err(GPUError::InvalidState("no index buffer bound"));
        }
        Ok(pipeline)
    }

    fn buffer(&self, handle: Handle<Buffer>) -> Result<ResourceDesc> {
        self.shared.buffer(handle)
    }

    fn image(&self, handle: Handle<Image>) -> Result<ResourceDesc> {
        self.shared.image(handle)
    }

    fn check_range(desc: &ResourceDesc, offset: u64, size: u64, what: &str) -> Result<()> {
        match offset.checked_add(size) {
            Some(end) if end <= desc.size => Ok(()),
            _ => Err(GPUError::Validation(format!(
                "{what} range {offset}+{size} exceeds buffer size {}",
                desc.size
            ))),
        }
    }

    fn non_empty<T>(items: &[T], what: &str) -> Result<()> {
        if items.is_empty() {
            Err(GPUError::Validation(format!("{what} needs at least one region")))
        } else {
            Ok(())
        }
    }

    //===------------------------------------------------------------------===//
    // Pipelines and bindings
    //===------------------------------------------------------------------===//

    pub fn cmd_bind_graphics_pipeline(&mut self, pipeline: Handle<GraphicsPipeline>) -> Result<()> {
        self.record("bind graphics pipeline", |cb| {
            let p = cb.shared.graphics_pipeline(pipeline)?;
            cb.list.push(
                Op::BindGraphicsPipeline,
                &ops::BindGraphicsPipeline {
                    program: p.program,
                    pipeline: pipeline.to_raw(),
                    topology: p.topology as u32,
                    blend: p.blend.pack(),
                    depth_stencil: p.depth_stencil.pack(),
                    raster: p.raster.pack(),
                },
            );
            cb.tracker.graphics = Some(p);
            Ok(())
        })
    }

    pub fn cmd_bind_compute_pipeline(&mut self, pipeline: Handle<ComputePipeline>) -> Result<()> {
        self.record("bind compute pipeline", |cb| {
            let p = cb.shared.compute_pipeline(pipeline)?;
            cb.list.push(
                Op::BindComputePipeline,
                &ops::BindComputePipeline {
                    program: p.program,
                    pipeline: pipeline.to_raw(),
                    padding: 0,
                },
            );
            cb.tracker.compute = Some(p);
            Ok(())
        })
    }

    pub fn cmd_bind_vertex_buffers(
        &mut self,
        first_binding: u32,
        buffers: &[(Handle<Buffer>, u64)],
    ) -> Result<()> {
        self.record("bind vertex buffers", |cb| {
            let limit = cb.shared.caps.max_vertex_bindings.min(MAX_VERTEX_BINDINGS as u32);
            let end = u64::from(first_binding) + buffers.len() as u64;
            if buffers.is_empty() || end > u64::from(limit) {
                return Err(GPUError::Validation(format!(
                    "vertex bindings {first_binding}..{end} exceed the limit of {limit}"
                )));
            }
            let mut bindings: SmallVec<[ops::VertexBufferBinding; 8]> = SmallVec::new();
            for &(handle, offset) in buffers {
                let desc = cb.buffer(handle)?;
                bindings.push(ops::VertexBufferBinding {
                    buffer: desc.native,
                    offset,
                    handle: handle.to_raw(),
                    padding: 0,
                });
            }
            let range = cb.list.push_slice(&bindings);
            cb.list.push(
                Op::BindVertexBuffers,
                &ops::BindVertexBuffers {
                    first_binding,
                    padding: 0,
                    bindings: range,
                },
            );
            Ok(())
        })
    }

    pub fn cmd_bind_index_buffer(
        &mut self,
        buffer: Handle<Buffer>,
        offset: u64,
        index_type: IndexType,
    ) -> Result<()> {
        self.record("bind index buffer", |cb| {
            let desc = cb.buffer(buffer)?;
            if offset % index_type.size() != 0 {
                return Err(GPUError::Validation(
                    "index buffer offset must be aligned to the index size".into(),
                ));
            }
            cb.list.push(
                Op::BindIndexBuffer,
                &ops::BindIndexBuffer {
                    buffer: desc.native,
                    offset,
                    handle: buffer.to_raw(),
                    index_type: index_type as u32,
                },
            );
            cb.tracker.index_bound = true;
            Ok(())
        })
    }

    /// `set` is the descriptor collaborator's native binding object.
    pub fn cmd_bind_descriptor_set(
        &mut self,
        bind_point: BindPoint,
        layout: Handle<PipelineLayout>,
        index: u32,
        set: NativeId,
        dynamic_offsets: &[u32],
    ) -> Result<()> {
        self.record("bind descriptor set", |cb| {
            let layout = cb.shared.pipeline_layout(layout)?;
            if index >= layout.set_count || index as usize >= MAX_DESCRIPTOR_SETS {
                return Err(GPUError::Validation(format!(
                    "descriptor set {index} outside layout '{}'",
                    layout.debug_name
                )));
            }
            let range = cb.list.push_slice(dynamic_offsets);
            cb.list.push(
                Op::BindDescriptorSet,
                &ops::BindDescriptorSet {
                    set,
                    index,
                    bind_point: bind_point as u32,
                    dynamic_offsets: range,
                },
            );
            Ok(())
        })
    }

    pub fn cmd_push_constants(
        &mut self,
        layout: Handle<PipelineLayout>,
        stages: ShaderStages,
        offset: u32,
        data: &[u8],
    ) -> Result<()> {
        self.record("push constants", |cb| {
            let layout = cb.shared.pipeline_layout(layout)?;
            if data.is_empty()
                || data.len() % 4 != 0
                || offset % 4 != 0
                || !layout.covers_push_constants(stages, offset, data.len() as u64)
            {
                return Err(GPUError::Validation(format!(
                    "push constants {}+{} not covered by layout '{}'",
                    offset,
                    data.len(),
                    layout.debug_name
                )));
            }
            let range = cb.list.push_bytes(data);
            cb.list.push(
                Op::PushConstants,
                &ops::PushConstants {
                    offset,
                    stages: stages.bits(),
                    data: range,
                },
            );
            Ok(())
        })
    }

    //===------------------------------------------------------------------===//
    // Dynamic state
    //===------------------------------------------------------------------===//

    fn check_viewport_range(&self, first: u32, count: usize) -> Result<()> {
        if first > 0 || count > 1 {
            self.require_feature(Features::MULTI_VIEWPORT, "multiple viewports")?;
        }
        let limit = self.shared.caps.max_viewports.min(MAX_VIEWPORTS as u32);
        let end = u64::from(first) + count as u64;
        if count == 0 || end > u64::from(limit) {
            return Err(GPUError::Validation(format!(
                "viewport range {first}..{end} exceeds the limit of {limit}"
            )));
        }
        Ok(())
    }

    pub fn cmd_set_viewport(&mut self, first: u32, viewports: &[Viewport]) -> Result<()> {
        self.record("set viewport", |cb| {
            cb.check_viewport_range(first, viewports.len())?;
            let range = cb.list.push_slice(viewports);
            cb.list.push(
                Op::SetViewport,
                &ops::SetViewports {
                    first,
                    padding: 0,
                    values: range,
                },
            );
            Ok(())
        })
    }

    pub fn cmd_set_scissor(&mut self, first: u32, scissors: &[Rect2D]) -> Result<()> {
        self.record("set scissor", |cb| {
            cb.check_viewport_range(first, scissors.len())?;
            if scissors.iter().any(|s| s.x < 0 || s.y < 0) {
                return Err(GPUError::Validation("scissor offsets must be non-negative".into()));
            }
            let range = cb.list.push_slice(scissors);
            cb.list.push(
                Op::SetScissor,
                &ops::SetViewports {
                    first,
                    padding: 0,
                    values: range,
                },
            );
            Ok(())
        })
    }

    pub fn cmd_set_line_width(&mut self, width: f32) -> Result<()> {
        self.record("set line width", |cb| {
            if width != 1.0 {
                cb.require_feature(Features::WIDE_LINES, "wide lines")?;
            }
            if !(width > 0.0) {
                return Err(GPUError::Validation(format!("invalid line width {width}")));
            }
            cb.list.push(Op::SetLineWidth, &ops::SetLineWidth { width });
            Ok(())
        })
    }

    pub fn cmd_set_depth_bias(&mut self, bias: DepthBias) -> Result<()> {
        self.record("set depth bias", |cb| {
            if bias.clamp != 0.0 {
                cb.require_feature(Features::DEPTH_BIAS_CLAMP, "depth bias clamp")?;
            }
            cb.list.push(Op::SetDepthBias, &bias);
            Ok(())
        })
    }

    pub fn cmd_set_blend_constants(&mut self, constants: [f32; 4]) -> Result<()> {
        self.record("set blend constants", |cb| {
            cb.list
                .push(Op::SetBlendConstants, &ops::SetBlendConstants { constants });
            Ok(())
        })
    }

    fn stencil_value(&mut self, op: Op, faces: StencilFaces, value: u32) -> Result<()> {
        self.record("set stencil value", |cb| {
            if faces.is_empty() {
                return Err(GPUError::Validation("stencil faces must not be empty".into()));
            }
            cb.list.push(
                op,
                &ops::SetStencilValue {
                    faces: faces.bits(),
                    value,
                },
            );
            Ok(())
        })
    }

    pub fn cmd_set_stencil_reference(&mut self, faces: StencilFaces, reference: u32) -> Result<()> {
        self.stencil_value(Op::SetStencilReference, faces, reference)
    }

    pub fn cmd_set_stencil_compare_mask(&mut self, faces: StencilFaces, mask: u32) -> Result<()> {
        self.stencil_value(Op::SetStencilCompareMask, faces, mask)
    }

    pub fn cmd_set_stencil_write_mask(&mut self, faces: StencilFaces, mask: u32) -> Result<()> {
        self.stencil_value(Op::SetStencilWriteMask, faces, mask)
    }

    //===------------------------------------------------------------------===//
    // Draws and dispatches
    //===------------------------------------------------------------------===//

    pub fn cmd_draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<()> {
        self.record("draw", |cb| {
            cb.require_draw(false)?;
            cb.list.push(
                Op::Draw,
                &ops::Draw {
                    vertex_count,
                    instance_count,
                    first_vertex,
                    first_instance,
                },
            );
            Ok(())
        })
    }

    pub fn cmd_draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> Result<()> {
        self.record("draw indexed", |cb| {
            cb.require_draw(true)?;
            cb.list.push(
                Op::DrawIndexed,
                &ops::DrawIndexed {
                    index_count,
                    instance_count,
                    first_index,
                    vertex_offset,
                    first_instance,
                    padding: 0,
                },
            );
            Ok(())
        })
    }

    fn indirect_draw(
        &mut self,
        op: Op,
        buffer: Handle<Buffer>,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> Result<()> {
        let indexed = op == Op::DrawIndexedIndirect;
        self.record("indirect draw", |cb| {
            cb.require_feature(Features::DRAW_INDIRECT, "indirect draws")?;
            if draw_count > 1 {
                cb.require_feature(Features::MULTI_DRAW_INDIRECT, "multi-draw indirect")?;
            }
            cb.require_draw(indexed)?;
            let desc = cb.buffer(buffer)?;
            let record = if indexed { 20 } else { 16 };
            if offset % 4 != 0 || (draw_count > 1 && (stride < record || stride % 4 != 0)) {
                return Err(GPUError::Validation(
                    "indirect offset/stride must be 4-byte aligned and cover a record".into(),
                ));
            }
            let span = match draw_count {
                0 => 0,
                n => (n as u64 - 1) * stride as u64 + record as u64,
            };
            Self::check_range(&desc, offset, span, "indirect")?;
            cb.list.push(
                op,
                &ops::DrawIndirect {
                    buffer: desc.native,
                    offset,
                    handle: buffer.to_raw(),
                    draw_count,
                    stride,
                    padding: 0,
                },
            );
            Ok(())
        })
    }

    pub fn cmd_draw_indirect(
        &mut self,
        buffer: Handle<Buffer>,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> Result<()> {
        self.indirect_draw(Op::DrawIndirect, buffer, offset, draw_count, stride)
    }

    pub fn cmd_draw_indexed_indirect(
        &mut self,
        buffer: Handle<Buffer>,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> Result<()> {
        self.indirect_draw(Op::DrawIndexedIndirect, buffer, offset, draw_count, stride)
    }

    fn require_dispatch(&self) -> Result<()> {
        self.require_feature(Features::COMPUTE, "compute")?;
        self.outside_pass()?;
        if self.tracker.compute.is_none() {
            return Err(GPUError::InvalidState("no compute pipeline bound"));
        }
        Ok(())
    }

    pub fn cmd_dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        self.record("dispatch", |cb| {
            cb.require_dispatch()?;
            cb.list
                .push(Op::Dispatch, &ops::Dispatch { x, y, z, padding: 0 });
            Ok(())
        })
    }

    pub fn cmd_dispatch_indirect(&mut self, buffer: Handle<Buffer>, offset: u64) -> Result<()> {
        self.record("dispatch indirect", |cb| {
            cb.require_dispatch()?;
            let desc = cb.buffer(buffer)?;
            if offset % 4 != 0 {
                return Err(GPUError::Validation("indirect offset must be 4-byte aligned".into()));
            }
            Self::check_range(&desc, offset, 12, "indirect dispatch")?;
            cb.list.push(
                Op::DispatchIndirect,
                &ops::DispatchIndirect {
                    buffer: desc.native,
                    offset,
                    handle: buffer.to_raw(),
                    padding: 0,
                },
            );
            Ok(())
        })
    }

    //===------------------------------------------------------------------===//
    // Transfers
    //===------------------------------------------------------------------===//

    fn push_transfer<R: bytemuck::Pod>(
        &mut self,
        op: Op,
        src: (ResourceDesc, u32),
        dst: (ResourceDesc, u32),
        regions: &[R],
    ) -> ops::Transfer {
        let range = self.list.push_slice(regions);
        let transfer = ops::Transfer {
            src: src.0.native,
            dst: dst.0.native,
            src_handle: src.1,
            dst_handle: dst.1,
            regions: range,
        };
        if op != Op::BlitImage {
            self.list.push(op, &transfer);
        }
        transfer
    }

    pub fn cmd_copy_buffer(
        &mut self,
        src: Handle<Buffer>,
        dst: Handle<Buffer>,
        regions: &[BufferCopy],
    ) -> Result<()> {
        self.record("copy buffer", |cb| {
            cb.outside_pass()?;
            Self::non_empty(regions, "buffer copy")?;
            let (s, d) = (cb.buffer(src)?, cb.buffer(dst)?);
            for r in regions {
                Self::check_range(&s, r.src_offset, r.size, "copy source")?;
                Self::check_range(&d, r.dst_offset, r.size, "copy destination")?;
            }
            cb.push_transfer(Op::CopyBuffer, (s, src.to_raw()), (d, dst.to_raw()), regions);
            Ok(())
        })
    }

    pub fn cmd_copy_image(
        &mut self,
        src: Handle<Image>,
        dst: Handle<Image>,
        regions: &[ImageCopy],
    ) -> Result<()> {
        self.record("copy image", |cb| {
            cb.outside_pass()?;
            Self::non_empty(regions, "image copy")?;
            let (s, d) = (cb.image(src)?, cb.image(dst)?);
            if s.samples != d.samples {
                return Err(GPUError::Validation(
                    "image copies need matching sample counts".into(),
                ));
            }
            cb.push_transfer(Op::CopyImage, (s, src.to_raw()), (d, dst.to_raw()), regions);
            Ok(())
        })
    }

    pub fn cmd_copy_buffer_to_image(
        &mut self,
        buffer: Handle<Buffer>,
        image: Handle<Image>,
        regions: &[BufferImageCopy],
    ) -> Result<()> {
        self.record("copy buffer to image", |cb| {
            cb.outside_pass()?;
            Self::non_empty(regions, "buffer to image copy")?;
            let (b, i) = (cb.buffer(buffer)?, cb.image(image)?);
            cb.push_transfer(
                Op::CopyBufferToImage,
                (b, buffer.to_raw()),
                (i, image.to_raw()),
                regions,
            );
            Ok(())
        })
    }

    pub fn cmd_copy_image_to_buffer(
        &mut self,
        image: Handle<Image>,
        buffer: Handle<Buffer>,
        regions: &[BufferImageCopy],
    ) -> Result<()> {
        self.record("copy image to buffer", |cb| {
            cb.outside_pass()?;
            Self::non_empty(regions, "image to buffer copy")?;
            let (i, b) = (cb.image(image)?, cb.buffer(buffer)?);
            cb.push_transfer(
                Op::CopyImageToBuffer,
                (i, image.to_raw()),
                (b, buffer.to_raw()),
                regions,
            );
            Ok(())
        })
    }

    pub fn cmd_blit_image(
        &mut self,
        src: Handle<Image>,
        dst: Handle<Image>,
        regions: &[ImageBlit],
        filter: Filter,
    ) -> Result<()> {
        self.record("blit image", |cb| {
            cb.outside_pass()?;
            Self::non_empty(regions, "blit")?;
            let (s, d) = (cb.image(src)?, cb.image(dst)?);
            if s.samples != SampleCount::S1 || d.samples != SampleCount::S1 {
                return Err(GPUError::Validation(
                    "blits need single-sampled images".into(),
                ));
            }
            if filter == Filter::Linear && s.format.is_integer() {
                return Err(GPUError::FormatNotSupported(s.format));
            }
            let transfer =
                cb.push_transfer(Op::BlitImage, (s, src.to_raw()), (d, dst.to_raw()), regions);
            cb.list.push(
                Op::BlitImage,
                &ops::BlitImage {
                    transfer,
                    filter: filter as u32,
                    padding: 0,
                },
            );
            Ok(())
        })
    }

    pub fn cmd_resolve_image(
        &mut self,
        src: Handle<Image>,
        dst: Handle<Image>,
        regions: &[ImageResolve],
    ) -> Result<()> {
        self.record("resolve image", |cb| {
            cb.outside_pass()?;
            Self::non_empty(regions, "resolve")?;
            let (s, d) = (cb.image(src)?, cb.image(dst)?);
            if s.samples == SampleCount::S1 || d.samples != SampleCount::S1 {
                return Err(GPUError::Validation(
                    "resolve goes from a multisampled to a single-sampled image".into(),
                ));
            }
            if s.format != d.format {
                return Err(GPUError::Validation("resolve cannot change format".into()));
            }
            cb.push_transfer(Op::ResolveImage, (s, src.to_raw()), (d, dst.to_raw()), regions);
            Ok(())
        })
    }

    pub fn cmd_update_buffer(&mut self, dst: Handle<Buffer>, offset: u64, data: &[u8]) -> Result<()> {
        self.record("update buffer", |cb| {
            cb.outside_pass()?;
            let desc = cb.buffer(dst)?;
            if data.is_empty() || data.len() > MAX_UPDATE_SIZE || data.len() % 4 != 0 || offset % 4 != 0
            {
                return Err(GPUError::Validation(format!(
                    "update of {} bytes at {} is not a valid inline update",
                    data.len(),
                    offset
                )));
            }
            Self::check_range(&desc, offset, data.len() as u64, "update")?;
            let range = cb.list.push_bytes(data);
            cb.list.push(
                Op::UpdateBuffer,
                &ops::UpdateBuffer {
                    dst: desc.native,
                    offset,
                    handle: dst.to_raw(),
                    padding: 0,
                    data: range,
                },
            );
            Ok(())
        })
    }

    /// `size == u64::MAX` fills to the end of the buffer.
    pub fn cmd_fill_buffer(
        &mut self,
        dst: Handle<Buffer>,
        offset: u64,
        size: u64,
        value: u32,
    ) -> Result<()> {
        self.record("fill buffer", |cb| {
            cb.outside_pass()?;
            let desc = cb.buffer(dst)?;
            let size = if size == u64::MAX {
                desc.size.saturating_sub(offset) & !3
            } else {
                size
            };
            if offset % 4 != 0 || size % 4 != 0 || size == 0 {
                return Err(GPUError::Validation(
                    "fill offset and size must be non-zero multiples of 4".into(),
                ));
            }
            Self::check_range(&desc, offset, size, "fill")?;
            cb.list.push(
                Op::FillBuffer,
                &ops::FillBuffer {
                    dst: desc.native,
                    offset,
                    size,
                    handle: dst.to_raw(),
                    value,
                },
            );
            Ok(())
        })
    }

    fn clear_image(
        &mut self,
        op: Op,
        image: Handle<Image>,
        value: ClearValue,
        ranges: &[SubresourceRange],
    ) -> Result<()> {
        let color = op == Op::ClearColorImage;
        self.record("clear image", |cb| {
            cb.outside_pass()?;
            Self::non_empty(ranges, "image clear")?;
            let desc = cb.image(image)?;
            if value.is_color() != color || desc.format.is_color() != color {
                return Err(GPUError::Validation(
                    "clear value does not match the image aspect".into(),
                ));
            }
            let range = cb.list.push_slice(ranges);
            cb.list.push(
                op,
                &ops::ClearImage {
                    image: desc.native,
                    handle: image.to_raw(),
                    padding: 0,
                    value: value.to_raw(),
                    ranges: range,
                },
            );
            Ok(())
        })
    }

    pub fn cmd_clear_color_image(
        &mut self,
        image: Handle<Image>,
        value: ClearValue,
        ranges: &[SubresourceRange],
    ) -> Result<()> {
        self.clear_image(Op::ClearColorImage, image, value, ranges)
    }

    pub fn cmd_clear_depth_stencil_image(
        &mut self,
        image: Handle<Image>,
        value: ClearValue,
        ranges: &[SubresourceRange],
    ) -> Result<()> {
        self.clear_image(Op::ClearDepthStencilImage, image, value, ranges)
    }

    //===------------------------------------------------------------------===//
    // Render passes
    //===------------------------------------------------------------------===//

    /// Clear values are checked here, not when the pass replays.
    pub fn cmd_begin_render_pass(
        &mut self,
        begin: &RenderPassBegin,
        contents: SubpassContents,
    ) -> Result<()> {
        self.record("begin render pass", |cb| {
            if cb.level != CommandBufferLevel::Primary {
                return Err(GPUError::InvalidState(
                    "render passes begin in primary command buffers",
                ));
            }
            cb.outside_pass()?;
            let pass = cb.shared.render_pass(begin.render_pass)?;
            let fb = cb.shared.framebuffer(begin.framebuffer)?;
            if !fb.is_compatible(&pass) {
                return Err(GPUError::Validation(format!(
                    "framebuffer '{}' is not compatible with render pass '{}'",
                    fb.debug_name(),
                    pass.debug_name()
                )));
            }
            pass.validate_clear_values(begin.clear_values)?;
            let area = begin.render_area;
            if area.w == 0 || area.h == 0 || !fb.area().contains(&area) {
                return Err(GPUError::Validation(
                    "render area must be non-empty and inside the framebuffer".into(),
                ));
            }

            let raw: SmallVec<[RawClearValue; 8]> =
                begin.clear_values.iter().map(ClearValue::to_raw).collect();
            let range = cb.list.push_slice(&raw);
            cb.list.push(
                Op::BeginRenderPass,
                &ops::BeginRenderPass {
                    render_pass: begin.render_pass.to_raw(),
                    framebuffer: begin.framebuffer.to_raw(),
                    render_area: area,
                    clear_values: range,
                },
            );
            cb.tracker.pass = Some(ActivePass {
                render_pass: pass,
                subpass: 0,
                contents,
                inherited: false,
            });
            Ok(())
        })
    }

    pub fn cmd_next_subpass(&mut self, contents: SubpassContents) -> Result<()> {
        self.record("next subpass", |cb| {
            let pass = cb.active_pass()?;
            if pass.inherited {
                return Err(GPUError::InvalidState(
                    "secondary command buffers cannot advance an inherited pass",
                ));
            }
            if pass.subpass as usize + 1 >= pass.render_pass.subpasses().len() {
                return Err(GPUError::InvalidState("no subpass left to advance to"));
            }
            cb.list.push(
                Op::NextSubpass,
                &ops::NextSubpass {
                    contents: contents as u32,
                    padding: 0,
                },
            );
            if let Some(pass) = cb.tracker.pass.as_mut() {
                pass.subpass += 1;
                pass.contents = contents;
            }
            Ok(())
        })
    }

    pub fn cmd_end_render_pass(&mut self) -> Result<()> {
        self.record("end render pass", |cb| {
            let pass = cb.active_pass()?;
            if pass.inherited {
                return Err(GPUError::InvalidState(
                    "secondary command buffers cannot end an inherited pass",
                ));
            }
            if pass.subpass as usize + 1 != pass.render_pass.subpasses().len() {
                return Err(GPUError::InvalidState(
                    "render pass ended before its last subpass",
                ));
            }
            cb.list
                .push(Op::EndRenderPass, &ops::EndRenderPass::default());
            cb.tracker.pass = None;
            Ok(())
        })
    }

    /// Attachments are resolved against the current subpass when replayed.
    pub fn cmd_clear_attachments(
        &mut self,
        attachments: &[ClearAttachment],
        rects: &[ClearRect],
    ) -> Result<()> {
        self.record("clear attachments", |cb| {
            let pass = cb.inline_pass()?;
            let subpass = &pass.render_pass.subpasses()[pass.subpass as usize];
            if attachments.is_empty() || rects.is_empty() {
                return Err(GPUError::Validation(
                    "clear attachments needs attachments and rects".into(),
                ));
            }
            for a in attachments {
                let ok = if a.aspect.contains(AspectMask::COLOR) {
                    a.value.is_color()
                        && (a.color_attachment as usize) < subpass.color_attachments.len()
                } else {
                    !a.value.is_color() && subpass.depth_stencil_attachment.is_some()
                };
                if !ok {
                    return Err(GPUError::Validation(format!(
                        "clear of {:?} does not match the current subpass",
                        a.aspect
                    )));
                }
            }
            let packed: SmallVec<[ops::PackedClearAttachment; 8]> = attachments
                .iter()
                .map(|a| ops::PackedClearAttachment {
                    aspect: a.aspect.bits(),
                    color_attachment: a.color_attachment,
                    value: a.value.to_raw(),
                })
                .collect();
            let attachments = cb.list.push_slice(&packed);
            let rects = cb.list.push_slice(rects);
            cb.list.push(
                Op::ClearAttachments,
                &ops::ClearAttachments { attachments, rects },
            );
            Ok(())
        })
    }

    //===------------------------------------------------------------------===//
    // Synchronization
    //===------------------------------------------------------------------===//

    pub fn cmd_pipeline_barrier(
        &mut self,
        src_stages: PipelineStages,
        dst_stages: PipelineStages,
        barriers: &[MemoryBarrier],
    ) -> Result<()> {
        self.record("pipeline barrier", |cb| {
            cb.list.push(
                Op::PipelineBarrier,
                &ops::PipelineBarrier {
                    src_stages: src_stages.bits(),
                    dst_stages: dst_stages.bits(),
                    barriers: barrier_bits(barriers).bits(),
                    padding: 0,
                },
            );
            Ok(())
        })
    }

    fn event_op(&mut self, op: Op, event: Handle<Event>, stages: PipelineStages) -> Result<()> {
        self.record("event", |cb| {
            cb.outside_pass()?;
            cb.shared.event(event)?;
            cb.list.push(
                op,
                &ops::EventOp {
                    event: event.to_raw(),
                    stages: stages.bits(),
                },
            );
            Ok(())
        })
    }

    pub fn cmd_set_event(&mut self, event: Handle<Event>, stages: PipelineStages) -> Result<()> {
        self.event_op(Op::SetEvent, event, stages)
    }

    pub fn cmd_reset_event(&mut self, event: Handle<Event>, stages: PipelineStages) -> Result<()> {
        self.event_op(Op::ResetEvent, event, stages)
    }

    pub fn cmd_wait_events(
        &mut self,
        events: &[Handle<Event>],
        src_stages: PipelineStages,
        dst_stages: PipelineStages,
        barriers: &[MemoryBarrier],
    ) -> Result<()> {
        self.record("wait events", |cb| {
            let mut raw: SmallVec<[u32; 8]> = SmallVec::new();
            for &event in events {
                cb.shared.event(event)?;
                raw.push(event.to_raw());
            }
            let range = cb.list.push_slice(&raw);
            cb.list.push(
                Op::WaitEvents,
                &ops::WaitEvents {
                    events: range,
                    src_stages: src_stages.bits(),
                    dst_stages: dst_stages.bits(),
                    barriers: barrier_bits(barriers).bits(),
                    padding: 0,
                },
            );
            Ok(())
        })
    }

    //===------------------------------------------------------------------===//
    // Secondary buffers and debug markers
    //===------------------------------------------------------------------===//

    /// Copies each secondary's list into this buffer. Later changes to the
    /// secondaries do not affect what was recorded here.
    pub fn cmd_execute_commands(&mut self, secondaries: &[&CommandBuffer]) -> Result<()> {
        self.record("execute commands", |cb| {
            if cb.level != CommandBufferLevel::Primary {
                return Err(GPUError::InvalidState(
                    "only primary command buffers execute secondaries",
                ));
            }
            if let Some(pass) = cb.tracker.pass.as_ref() {
                if pass.contents != SubpassContents::SecondaryCommandBuffers {
                    return Err(GPUError::InvalidState(
                        "subpass was begun with inline contents",
                    ));
                }
            }
            for secondary in secondaries {
                if secondary.level != CommandBufferLevel::Secondary
                    || secondary.state() != CommandBufferState::Executable
                {
                    return Err(GPUError::InvalidState(
                        "execute commands needs executable secondary buffers",
                    ));
                }
                match (&cb.tracker.pass, &secondary.inheritance) {
                    (Some(pass), Some((inherited, subpass))) => {
                        if !inherited.is_compatible(&pass.render_pass) || *subpass != pass.subpass
                        {
                            return Err(GPUError::Validation(format!(
                                "secondary '{}' continues a different subpass",
                                secondary.debug_name
                            )));
                        }
                    }
                    (None, None) => {}
                    _ => {
                        return Err(GPUError::Validation(format!(
                            "secondary '{}' render pass continuation does not match",
                            secondary.debug_name
                        )))
                    }
                }
            }
            let (first, count) = cb
                .list
                .nest(secondaries.iter().map(|s| s.list.clone()));
            cb.list
                .push(Op::ExecuteCommands, &ops::ExecuteCommands { first, count });
            for secondary in secondaries {
                secondary.mark_submitted();
            }
            // Bound state after a secondary is undefined for later commands.
            cb.tracker.graphics = None;
            cb.tracker.compute = None;
            cb.tracker.index_bound = false;
            Ok(())
        })
    }

    pub fn cmd_begin_debug_marker(&mut self, label: &str, color: [f32; 4]) -> Result<()> {
        self.record("begin debug marker", |cb| {
            let range = cb.list.push_bytes(label.as_bytes());
            cb.list.push(
                Op::DebugMarkerBegin,
                &ops::DebugMarkerBegin {
                    label: range,
                    color,
                },
            );
            cb.tracker.markers += 1;
            Ok(())
        })
    }

    pub fn cmd_end_debug_marker(&mut self) -> Result<()> {
        self.record("end debug marker", |cb| {
            if cb.tracker.markers == 0 {
                return Err(GPUError::InvalidState("no debug marker to end"));
            }
            cb.list
                .push(Op::DebugMarkerEnd, &ops::DebugMarkerEnd::default());
            cb.tracker.markers -= 1;
            Ok(())
        })
    }
}
