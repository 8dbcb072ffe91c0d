use std::sync::Arc;

use smallvec::SmallVec;

use crate::gpu::backend::{Backend, StencilDynamic};
use crate::gpu::device::DeviceShared;
use crate::gpu::driver::command::{self as ops, Command, CommandList, Op};
use crate::gpu::driver::state::{
    ContextStateStack, DescriptorBinding, IndexBinding, VertexBinding,
};
use crate::gpu::driver::types::{NativeId, ResourceKind};
use crate::gpu::error::{GPUError, Result};
use crate::gpu::framebuffer::{FrameBufferMapping, MappingKey};
use crate::gpu::render_pass::{PassState, RenderPassInstance};
use crate::gpu::structs::*;
use crate::sync::{Backoff, Event, EventStatus};
use crate::utils::Handle;

/// The backend context and the state cache shadowing it. Owned by the
/// device behind one lock; whoever holds it is the only thread driving the
/// context.
pub struct ReplayContext<B: Backend> {
    pub backend: B,
    pub state: ContextStateStack,
}

impl<B: Backend> ReplayContext<B> {
    pub fn new(backend: B) -> Self {
        let origin = backend.capabilities().origin;
        Self {
            backend,
            state: ContextStateStack::new(origin),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct GraphicsBinding {
    program: NativeId,
    topology: Topology,
}

/// Pipeline intent that `ExecuteCommands` saves and restores around a
/// secondary list.
#[derive(Debug, Clone, Copy, Default)]
struct Bindings {
    graphics: Option<GraphicsBinding>,
    compute: Option<NativeId>,
}

type ApplyFn<'a, B> = fn(&mut Replayer<'a, B>, &CommandList, &Command<'_>) -> Result<()>;

/// Walks command lists and turns each opcode into backend calls.
pub struct Replayer<'a, B: Backend> {
    ctx: &'a mut ReplayContext<B>,
    shared: &'a DeviceShared,
    pass: Option<RenderPassInstance>,
    bindings: Bindings,
    trace: bool,
}

fn corrupt(what: &str) -> GPUError {
    GPUError::Validation(format!("corrupt {what} operand"))
}

impl<'a, B: Backend> Replayer<'a, B> {
    /// Indexed by `Op as usize`.
    const TABLE: [ApplyFn<'a, B>; Op::COUNT] = [
        Self::bind_graphics_pipeline,
        Self::bind_compute_pipeline,
        Self::bind_vertex_buffers,
        Self::bind_index_buffer,
        Self::bind_descriptor_set,
        Self::push_constants,
        Self::set_viewport,
        Self::set_scissor,
        Self::set_line_width,
        Self::set_depth_bias,
        Self::set_blend_constants,
        Self::set_stencil_reference,
        Self::set_stencil_compare_mask,
        Self::set_stencil_write_mask,
        Self::draw,
        Self::draw_indexed,
        Self::draw_indirect,
        Self::draw_indexed_indirect,
        Self::dispatch,
        Self::dispatch_indirect,
        Self::copy_buffer,
        Self::copy_image,
        Self::copy_buffer_to_image,
        Self::copy_image_to_buffer,
        Self::blit_image,
        Self::resolve_image,
        Self::update_buffer,
        Self::fill_buffer,
        Self::clear_image,
        Self::clear_image,
        Self::begin_render_pass,
        Self::next_subpass,
        Self::end_render_pass,
        Self::clear_attachments,
        Self::pipeline_barrier,
        Self::set_event,
        Self::reset_event,
        Self::wait_events,
        Self::execute_commands,
        Self::debug_marker_begin,
        Self::debug_marker_end,
    ];

    pub fn new(ctx: &'a mut ReplayContext<B>, shared: &'a DeviceShared) -> Self {
        Self {
            ctx,
            shared,
            pass: None,
            bindings: Bindings::default(),
            trace: shared.info.trace_replay,
        }
    }

    /// Replays `list` in recorded order, stopping at the first failure.
    pub fn replay(&mut self, list: &CommandList) -> Result<()> {
        for cmd in list.iter() {
            if self.trace {
                log::trace!("replay {:?}", cmd.op);
            }
            (Self::TABLE[cmd.op as usize])(self, list, &cmd)?;
        }
        Ok(())
    }

    pub fn pass_state(&self) -> Option<PassState> {
        self.pass.as_ref().map(RenderPassInstance::state)
    }

    //===------------------------------------------------------------------===//
    // Helpers
    //===------------------------------------------------------------------===//

    fn check(&self, kind: ResourceKind, raw: u32) -> Result<()> {
        if self.shared.resources.is_valid(kind, raw) {
            Ok(())
        } else {
            Err(GPUError::Validation(format!(
                "{kind:?} {:?} was destroyed before replay",
                Handle::<()>::from_raw(raw)
            )))
        }
    }

    fn require_subpass(&self) -> Result<()> {
        match &self.pass {
            Some(instance) => instance.current_subpass().map(|_| ()),
            None => Err(GPUError::InvalidState("no render pass instance is active")),
        }
    }

    fn prepare_draw(&mut self) -> Result<Topology> {
        self.require_subpass()?;
        let graphics = self
            .bindings
            .graphics
            .ok_or(GPUError::InvalidState("no graphics pipeline bound"))?;
        self.ctx
            .state
            .use_program(&mut self.ctx.backend, graphics.program)?;
        Ok(graphics.topology)
    }

    fn prepare_dispatch(&mut self) -> Result<()> {
        let program = self
            .bindings
            .compute
            .ok_or(GPUError::InvalidState("no compute pipeline bound"))?;
        self.ctx.state.use_program(&mut self.ctx.backend, program)
    }

    fn event(&self, raw: u32) -> Result<Arc<Event>> {
        self.shared
            .events
            .get(Handle::from_raw(raw))
            .ok_or(GPUError::InvalidHandle("event"))
    }

    //===------------------------------------------------------------------===//
    // Pipelines and bindings
    //===------------------------------------------------------------------===//

    fn bind_graphics_pipeline(&mut self, _: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let p: ops::BindGraphicsPipeline = cmd.payload();
        let blend = BlendState::unpack(&p.blend).ok_or_else(|| corrupt("blend state"))?;
        let ds = DepthStencilState::unpack(&p.depth_stencil)
            .ok_or_else(|| corrupt("depth/stencil state"))?;
        let raster = RasterState::unpack(&p.raster).ok_or_else(|| corrupt("raster state"))?;
        let topology = Topology::from_raw(p.topology).ok_or_else(|| corrupt("topology"))?;

        let ctx = &mut *self.ctx;
        ctx.state.use_program(&mut ctx.backend, p.program)?;
        ctx.state
            .set_pipeline_state(&mut ctx.backend, &blend, &ds, &raster)?;
        self.bindings.graphics = Some(GraphicsBinding {
            program: p.program,
            topology,
        });
        Ok(())
    }

    fn bind_compute_pipeline(&mut self, _: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let p: ops::BindComputePipeline = cmd.payload();
        self.bindings.compute = Some(p.program);
        Ok(())
    }

    fn bind_vertex_buffers(&mut self, list: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let p: ops::BindVertexBuffers = cmd.payload();
        let bindings = list.slice::<ops::VertexBufferBinding>(p.bindings);
        for b in &bindings {
            self.check(ResourceKind::Buffer, b.handle)?;
        }
        let ctx = &mut *self.ctx;
        for (i, b) in bindings.iter().enumerate() {
            ctx.state.bind_vertex_buffer(
                &mut ctx.backend,
                p.first_binding + i as u32,
                VertexBinding {
                    buffer: b.buffer,
                    offset: b.offset,
                },
            )?;
        }
        Ok(())
    }

    fn bind_index_buffer(&mut self, _: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let p: ops::BindIndexBuffer = cmd.payload();
        self.check(ResourceKind::Buffer, p.handle)?;
        let ty = IndexType::from_raw(p.index_type).ok_or_else(|| corrupt("index type"))?;
        let ctx = &mut *self.ctx;
        ctx.state.bind_index_buffer(
            &mut ctx.backend,
            IndexBinding {
                buffer: p.buffer,
                offset: p.offset,
                ty,
            },
        )
    }

    fn bind_descriptor_set(&mut self, list: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let p: ops::BindDescriptorSet = cmd.payload();
        let bind_point = BindPoint::from_raw(p.bind_point).ok_or_else(|| corrupt("bind point"))?;
        let offsets = list.slice::<u32>(p.dynamic_offsets);
        let ctx = &mut *self.ctx;
        ctx.state.bind_descriptor_set(
            &mut ctx.backend,
            p.index,
            DescriptorBinding {
                bind_point,
                set: p.set,
                dynamic_offsets: offsets.iter().copied().collect(),
            },
        )
    }

    fn push_constants(&mut self, list: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let p: ops::PushConstants = cmd.payload();
        let stages = ShaderStages::from_bits_truncate(p.stages);
        self.ctx
            .backend
            .push_constants(stages, p.offset, list.bytes(p.data))
    }

    //===------------------------------------------------------------------===//
    // Dynamic state
    //===------------------------------------------------------------------===//

    fn set_viewport(&mut self, list: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let p: ops::SetViewports = cmd.payload();
        let values = list.slice::<Viewport>(p.values);
        let ctx = &mut *self.ctx;
        ctx.state.set_viewports(&mut ctx.backend, p.first, &values)
    }

    fn set_scissor(&mut self, list: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let p: ops::SetViewports = cmd.payload();
        let values = list.slice::<Rect2D>(p.values);
        let ctx = &mut *self.ctx;
        ctx.state.set_scissors(&mut ctx.backend, p.first, &values)
    }

    fn set_line_width(&mut self, _: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let p: ops::SetLineWidth = cmd.payload();
        let ctx = &mut *self.ctx;
        ctx.state.set_line_width(&mut ctx.backend, p.width)
    }

    fn set_depth_bias(&mut self, _: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let bias: DepthBias = cmd.payload();
        let ctx = &mut *self.ctx;
        ctx.state.set_depth_bias(&mut ctx.backend, bias)
    }

    fn set_blend_constants(&mut self, _: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let p: ops::SetBlendConstants = cmd.payload();
        let ctx = &mut *self.ctx;
        ctx.state.set_blend_constants(&mut ctx.backend, p.constants)
    }

    fn stencil(&mut self, which: StencilDynamic, cmd: &Command<'_>) -> Result<()> {
        let p: ops::SetStencilValue = cmd.payload();
        let faces = StencilFaces::from_bits_truncate(p.faces);
        let ctx = &mut *self.ctx;
        ctx.state
            .set_stencil_value(&mut ctx.backend, which, faces, p.value)
    }

    fn set_stencil_reference(&mut self, _: &CommandList, cmd: &Command<'_>) -> Result<()> {
        self.stencil(StencilDynamic::Reference, cmd)
    }

    fn set_stencil_compare_mask(&mut self, _: &CommandList, cmd: &Command<'_>) -> Result<()> {
        self.stencil(StencilDynamic::CompareMask, cmd)
    }

    fn set_stencil_write_mask(&mut self, _: &CommandList, cmd: &Command<'_>) -> Result<()> {
        self.stencil(StencilDynamic::WriteMask, cmd)
    }

    //===------------------------------------------------------------------===//
    // Work
    //===------------------------------------------------------------------===//

    fn draw(&mut self, _: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let topology = self.prepare_draw()?;
        self.ctx.backend.draw(topology, &cmd.payload())
    }

    fn index_type(&self) -> Result<IndexType> {
        self.ctx
            .state
            .current()
            .index_buffer
            .as_ref()
            .map(|b| b.ty)
            .ok_or(GPUError::InvalidState("no index buffer bound"))
    }

    fn draw_indexed(&mut self, _: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let topology = self.prepare_draw()?;
        let ty = self.index_type()?;
        self.ctx.backend.draw_indexed(topology, ty, &cmd.payload())
    }

    fn draw_indirect(&mut self, _: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let p: ops::DrawIndirect = cmd.payload();
        self.check(ResourceKind::Buffer, p.handle)?;
        let topology = self.prepare_draw()?;
        self.ctx.backend.draw_indirect(topology, &p)
    }

    fn draw_indexed_indirect(&mut self, _: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let p: ops::DrawIndirect = cmd.payload();
        self.check(ResourceKind::Buffer, p.handle)?;
        let topology = self.prepare_draw()?;
        let ty = self.index_type()?;
        self.ctx.backend.draw_indexed_indirect(topology, ty, &p)
    }

    fn dispatch(&mut self, _: &CommandList, cmd: &Command<'_>) -> Result<()> {
        self.prepare_dispatch()?;
        self.ctx.backend.dispatch(&cmd.payload())
    }

    fn dispatch_indirect(&mut self, _: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let p: ops::DispatchIndirect = cmd.payload();
        self.check(ResourceKind::Buffer, p.handle)?;
        self.prepare_dispatch()?;
        self.ctx.backend.dispatch_indirect(&p)
    }

    //===------------------------------------------------------------------===//
    // Transfers
    //===------------------------------------------------------------------===//

    fn transfer(&self, cmd: &Command<'_>, src: ResourceKind, dst: ResourceKind) -> Result<ops::Transfer> {
        let t: ops::Transfer = cmd.payload();
        self.check(src, t.src_handle)?;
        self.check(dst, t.dst_handle)?;
        Ok(t)
    }

    fn copy_buffer(&mut self, list: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let t = self.transfer(cmd, ResourceKind::Buffer, ResourceKind::Buffer)?;
        for region in list.slice::<BufferCopy>(t.regions) {
            self.ctx.backend.copy_buffer(t.src, t.dst, &region)?;
        }
        Ok(())
    }

    fn copy_image(&mut self, list: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let t = self.transfer(cmd, ResourceKind::Image, ResourceKind::Image)?;
        for region in list.slice::<ImageCopy>(t.regions) {
            self.ctx.backend.copy_image(t.src, t.dst, &region)?;
        }
        Ok(())
    }

    fn copy_buffer_to_image(&mut self, list: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let t = self.transfer(cmd, ResourceKind::Buffer, ResourceKind::Image)?;
        for region in list.slice::<BufferImageCopy>(t.regions) {
            self.ctx.backend.copy_buffer_to_image(t.src, t.dst, &region)?;
        }
        Ok(())
    }

    fn copy_image_to_buffer(&mut self, list: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let t = self.transfer(cmd, ResourceKind::Image, ResourceKind::Buffer)?;
        for region in list.slice::<BufferImageCopy>(t.regions) {
            self.ctx.backend.copy_image_to_buffer(t.src, t.dst, &region)?;
        }
        Ok(())
    }

    fn blit_image(&mut self, list: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let p: ops::BlitImage = cmd.payload();
        let t = p.transfer;
        self.check(ResourceKind::Image, t.src_handle)?;
        self.check(ResourceKind::Image, t.dst_handle)?;
        let filter = Filter::from_raw(p.filter).ok_or_else(|| corrupt("filter"))?;
        for region in list.slice::<ImageBlit>(t.regions) {
            self.ctx.backend.blit_image(t.src, t.dst, &region, filter)?;
        }
        Ok(())
    }

    fn resolve_image(&mut self, list: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let t = self.transfer(cmd, ResourceKind::Image, ResourceKind::Image)?;
        for region in list.slice::<ImageResolve>(t.regions) {
            self.ctx.backend.resolve_image(t.src, t.dst, &region)?;
        }
        Ok(())
    }

    fn update_buffer(&mut self, list: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let p: ops::UpdateBuffer = cmd.payload();
        self.check(ResourceKind::Buffer, p.handle)?;
        self.ctx
            .backend
            .update_buffer(p.dst, p.offset, list.bytes(p.data))
    }

    fn fill_buffer(&mut self, _: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let p: ops::FillBuffer = cmd.payload();
        self.check(ResourceKind::Buffer, p.handle)?;
        self.ctx.backend.fill_buffer(p.dst, p.offset, p.size, p.value)
    }

    fn clear_image(&mut self, list: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let p: ops::ClearImage = cmd.payload();
        self.check(ResourceKind::Image, p.handle)?;
        let value = ClearValue::from_raw(&p.value).ok_or_else(|| corrupt("clear value"))?;
        for range in list.slice::<SubresourceRange>(p.ranges) {
            self.ctx.backend.clear_image(p.image, &value, &range)?;
        }
        Ok(())
    }

    //===------------------------------------------------------------------===//
    // Render passes
    //===------------------------------------------------------------------===//

    fn begin_render_pass(&mut self, list: &CommandList, cmd: &Command<'_>) -> Result<()> {
        if let Some(PassState::InSubpass(_)) = self.pass_state() {
            return Err(GPUError::InvalidState("render pass begun inside another"));
        }
        let p: ops::BeginRenderPass = cmd.payload();
        let pass = self
            .shared
            .render_passes
            .get(Handle::from_raw(p.render_pass))
            .ok_or(GPUError::InvalidHandle("render pass"))?;
        let framebuffer = self
            .shared
            .framebuffers
            .get(Handle::from_raw(p.framebuffer))
            .ok_or(GPUError::InvalidHandle("framebuffer"))?;
        if !framebuffer.views_valid(self.shared.resources.as_ref()) {
            return Err(GPUError::Validation(format!(
                "framebuffer '{}' references a destroyed view",
                framebuffer.debug_name()
            )));
        }
        if !framebuffer.is_compatible(&pass) {
            return Err(GPUError::Validation(
                "framebuffer is not compatible with the render pass".into(),
            ));
        }

        let clear_values: Option<SmallVec<[ClearValue; 8]>> = list
            .slice::<RawClearValue>(p.clear_values)
            .iter()
            .map(ClearValue::from_raw)
            .collect();
        let clear_values = clear_values.ok_or_else(|| corrupt("clear value"))?;

        let ctx = &mut *self.ctx;
        let mapping = self
            .shared
            .framebuffer_cache
            .get_or_create(MappingKey::new(&pass, &framebuffer), || {
                FrameBufferMapping::build(&mut ctx.backend, &pass, &framebuffer)
            })?;

        let mut instance = RenderPassInstance::new(pass, mapping, p.render_area, &clear_values);
        let result = instance.begin(&mut ctx.state, &mut ctx.backend);
        self.pass = Some(instance);
        result
    }

    fn next_subpass(&mut self, _: &CommandList, _: &Command<'_>) -> Result<()> {
        let instance = self
            .pass
            .as_mut()
            .ok_or(GPUError::InvalidState("no render pass instance is active"))?;
        instance.next_subpass(&mut self.ctx.state, &mut self.ctx.backend)
    }

    fn end_render_pass(&mut self, _: &CommandList, _: &Command<'_>) -> Result<()> {
        let instance = self
            .pass
            .as_mut()
            .ok_or(GPUError::InvalidState("no render pass instance is active"))?;
        instance.end(&mut self.ctx.state, &mut self.ctx.backend)
    }

    fn clear_attachments(&mut self, list: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let p: ops::ClearAttachments = cmd.payload();
        let mut attachments: SmallVec<[ClearAttachment; 8]> = SmallVec::new();
        for a in list.slice::<ops::PackedClearAttachment>(p.attachments) {
            attachments.push(ClearAttachment {
                aspect: AspectMask::from_bits_truncate(a.aspect),
                color_attachment: a.color_attachment,
                value: ClearValue::from_raw(&a.value).ok_or_else(|| corrupt("clear value"))?,
            });
        }
        let rects = list.slice::<ClearRect>(p.rects);
        let instance = self
            .pass
            .as_ref()
            .ok_or(GPUError::InvalidState("no render pass instance is active"))?;
        instance.clear_attachments(&mut self.ctx.state, &mut self.ctx.backend, &attachments, &rects)
    }

    //===------------------------------------------------------------------===//
    // Synchronization
    //===------------------------------------------------------------------===//

    fn pipeline_barrier(&mut self, _: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let p: ops::PipelineBarrier = cmd.payload();
        let bits = BarrierBits::from_bits_truncate(p.barriers);
        if bits.is_empty() {
            return Ok(());
        }
        self.ctx.backend.memory_barrier(bits)
    }

    fn set_event(&mut self, _: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let p: ops::EventOp = cmd.payload();
        self.event(p.event)?.set();
        Ok(())
    }

    fn reset_event(&mut self, _: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let p: ops::EventOp = cmd.payload();
        self.event(p.event)?.reset();
        Ok(())
    }

    /// Polls every event until each one is set or errored. There is no
    /// backend primitive for an in-stream event wait, so this blocks the
    /// replaying thread with a bounded backoff.
    fn wait_events(&mut self, list: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let p: ops::WaitEvents = cmd.payload();
        let raw = list.slice::<u32>(p.events);
        if raw.is_empty() {
            return Ok(());
        }
        let events = raw
            .iter()
            .map(|&r| self.event(r))
            .collect::<Result<SmallVec<[Arc<Event>; 8]>>>()?;

        let info = &self.shared.info;
        let backoff = Backoff::new(info.poll_interval_min, info.poll_interval_max);
        let done = backoff.poll(Some(info.event_wait_timeout), || {
            Ok(events
                .iter()
                .all(|e| e.status() != EventStatus::Reset)
                .then_some(()))
        })?;
        if done.is_none() {
            return Err(GPUError::DeviceLost(format!(
                "wait on {} events timed out after {:?}",
                events.len(),
                info.event_wait_timeout
            )));
        }

        for event in events.iter().filter(|e| e.status() == EventStatus::Error) {
            if info.event_error_is_fatal {
                return Err(GPUError::DeviceLost(format!(
                    "event '{}' reported an error",
                    event.debug_name()
                )));
            }
            log::warn!(
                "event '{}' reported an error; treating it as set",
                event.debug_name()
            );
        }

        let bits = BarrierBits::from_bits_truncate(p.barriers);
        if !bits.is_empty() {
            self.ctx.backend.memory_barrier(bits)?;
        }
        Ok(())
    }

    //===------------------------------------------------------------------===//
    // Nesting and debug
    //===------------------------------------------------------------------===//

    /// Secondary lists run inside a pushed state scope. Popping restores the
    /// primary's context whatever the secondaries changed.
    fn execute_commands(&mut self, list: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let p: ops::ExecuteCommands = cmd.payload();
        let saved = self.bindings;
        for nested in list.nested(p.first, p.count) {
            self.ctx.state.push();
            let result = self.replay(nested);
            let ctx = &mut *self.ctx;
            let restored = ctx.state.pop(&mut ctx.backend);
            self.bindings = saved;
            result?;
            restored?;
        }
        Ok(())
    }

    fn debug_marker_begin(&mut self, list: &CommandList, cmd: &Command<'_>) -> Result<()> {
        let p: ops::DebugMarkerBegin = cmd.payload();
        let label = String::from_utf8_lossy(list.bytes(p.label));
        self.ctx.backend.push_debug_group(&label)
    }

    fn debug_marker_end(&mut self, _: &CommandList, _: &Command<'_>) -> Result<()> {
        self.ctx.backend.pop_debug_group()
    }
}
