//! Shadow copy of the backend context's mutable state.
//!
//! Every state-changing opcode goes through [`ContextStateStack`], which
//! compares the requested value with what was last applied and only talks to
//! the backend when they differ. Secondary command lists run inside a
//! pushed scope; popping diff-applies the saved parent state so the primary
//! list continues with the context it expects.

use smallvec::SmallVec;

use crate::gpu::backend::{Backend, StencilDynamic};
use crate::gpu::error::Result;
use crate::gpu::structs::*;

use super::types::NativeId;

pub const MAX_VIEWPORTS: usize = 4;
pub const MAX_VERTEX_BINDINGS: usize = 16;
pub const MAX_DESCRIPTOR_SETS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundFramebuffer {
    pub id: NativeId,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexBinding {
    pub buffer: NativeId,
    pub offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexBinding {
    pub buffer: NativeId,
    pub offset: u64,
    pub ty: IndexType,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DescriptorBinding {
    pub bind_point: BindPoint,
    pub set: NativeId,
    pub dynamic_offsets: SmallVec<[u32; 4]>,
}

/// Last successfully applied value of each state slot. `None` means the
/// slot has never been applied and its backend value is unknown.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContextState {
    pub program: Option<NativeId>,
    pub blend: Option<BlendState>,
    pub depth_stencil: Option<DepthStencilState>,
    pub raster: Option<RasterState>,
    /// Backend-space values, after any origin flip.
    pub viewports: [Option<Viewport>; MAX_VIEWPORTS],
    pub scissors: [Option<Rect2D>; MAX_VIEWPORTS],
    pub vertex_buffers: [Option<VertexBinding>; MAX_VERTEX_BINDINGS],
    pub index_buffer: Option<IndexBinding>,
    pub descriptor_sets: [Option<DescriptorBinding>; MAX_DESCRIPTOR_SETS],
    pub line_width: Option<f32>,
    pub depth_bias: Option<DepthBias>,
    pub blend_constants: Option<[f32; 4]>,
    /// Indexed by [`StencilDynamic`], then face (front, back).
    pub stencil: [[Option<u32>; 2]; 3],
    pub framebuffer: Option<BoundFramebuffer>,
}

/// Viewports and scissors as the client specified them.
#[derive(Debug, Clone, PartialEq, Default)]
struct ClientRects {
    viewports: [Option<Viewport>; MAX_VIEWPORTS],
    scissors: [Option<Rect2D>; MAX_VIEWPORTS],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateStats {
    pub issued: u64,
    pub elided: u64,
}

fn stencil_row(which: StencilDynamic) -> usize {
    match which {
        StencilDynamic::Reference => 0,
        StencilDynamic::CompareMask => 1,
        StencilDynamic::WriteMask => 2,
    }
}

/// Applies `value` to `slot` through `emit` unless it is already current.
///
/// The cache takes the new value even when `emit` fails, so a failed call is
/// never retried against a stale assumption.
fn apply_slot<T: PartialEq + Clone>(
    slot: &mut Option<T>,
    value: &T,
    stats: &mut StateStats,
    emit: impl FnOnce() -> Result<()>,
) -> Result<()> {
    if slot.as_ref() == Some(value) {
        stats.elided += 1;
        return Ok(());
    }
    stats.issued += 1;
    let result = emit();
    *slot = Some(value.clone());
    result
}

pub struct ContextStateStack {
    origin: Origin,
    current: ContextState,
    client: ClientRects,
    saved: Vec<(ContextState, ClientRects)>,
    stats: StateStats,
}

impl ContextStateStack {
    pub fn new(origin: Origin) -> Self {
        Self {
            origin,
            current: ContextState::default(),
            client: ClientRects::default(),
            saved: Vec::new(),
            stats: StateStats::default(),
        }
    }

    pub fn current(&self) -> &ContextState {
        &self.current
    }

    pub fn stats(&self) -> StateStats {
        self.stats
    }

    pub fn depth(&self) -> usize {
        self.saved.len()
    }

    /// Forgets everything known about the backend, so the next request for
    /// each slot is issued unconditionally.
    pub fn invalidate(&mut self) {
        self.current = ContextState::default();
        self.client = ClientRects::default();
        self.saved.clear();
    }

    /// Drops scopes left open by an aborted replay.
    pub fn unwind(&mut self) {
        if !self.saved.is_empty() {
            log::debug!("discarding {} unbalanced state scopes", self.saved.len());
            self.saved.clear();
        }
    }

    //===------------------------------------------------------------------===//
    // Pipeline state
    //===------------------------------------------------------------------===//

    pub fn use_program<B: Backend>(&mut self, backend: &mut B, program: NativeId) -> Result<()> {
        apply_slot(&mut self.current.program, &program, &mut self.stats, || {
            backend.use_program(program)
        })
    }

    /// Applies a graphics pipeline's fixed-function state. The slots are
    /// independent, so a failing slot does not stop the others.
    pub fn set_pipeline_state<B: Backend>(
        &mut self,
        backend: &mut B,
        blend: &BlendState,
        depth_stencil: &DepthStencilState,
        raster: &RasterState,
    ) -> Result<()> {
        let b = apply_slot(&mut self.current.blend, blend, &mut self.stats, || {
            backend.set_blend_state(blend)
        });
        let d = apply_slot(
            &mut self.current.depth_stencil,
            depth_stencil,
            &mut self.stats,
            || backend.set_depth_stencil_state(depth_stencil),
        );
        let r = apply_slot(&mut self.current.raster, raster, &mut self.stats, || {
            backend.set_raster_state(raster)
        });
        b.and(d).and(r)
    }

    //===------------------------------------------------------------------===//
    // Viewports, scissors and framebuffer
    //===------------------------------------------------------------------===//

    fn to_backend_viewport(&self, vp: &Viewport) -> Option<Viewport> {
        let fb = self.current.framebuffer?;
        Some(match self.origin {
            Origin::TopLeft => *vp,
            Origin::BottomLeft => vp.flipped(fb.height),
        })
    }

    fn to_backend_scissor(&self, rect: &Rect2D) -> Option<Rect2D> {
        let fb = self.current.framebuffer?;
        Some(match self.origin {
            Origin::TopLeft => *rect,
            Origin::BottomLeft => rect.flipped(fb.height),
        })
    }

    fn apply_viewport<B: Backend>(&mut self, backend: &mut B, index: usize) -> Result<()> {
        let Some(client) = self.client.viewports[index] else {
            return Ok(());
        };
        let Some(vp) = self.to_backend_viewport(&client) else {
            return Ok(());
        };
        apply_slot(&mut self.current.viewports[index], &vp, &mut self.stats, || {
            backend.set_viewport(index as u32, &vp)
        })
    }

    fn apply_scissor<B: Backend>(&mut self, backend: &mut B, index: usize) -> Result<()> {
        let Some(client) = self.client.scissors[index] else {
            return Ok(());
        };
        let Some(rect) = self.to_backend_scissor(&client) else {
            return Ok(());
        };
        apply_slot(&mut self.current.scissors[index], &rect, &mut self.stats, || {
            backend.set_scissor(index as u32, &rect)
        })
    }

    /// Viewports are kept in client space and converted against whichever
    /// framebuffer is current, now or once one gets bound.
    pub fn set_viewports<B: Backend>(
        &mut self,
        backend: &mut B,
        first: u32,
        viewports: &[Viewport],
    ) -> Result<()> {
        for (i, vp) in viewports.iter().enumerate() {
            let index = first as usize + i;
            if index >= MAX_VIEWPORTS {
                break;
            }
            self.client.viewports[index] = Some(*vp);
            self.apply_viewport(backend, index)?;
        }
        Ok(())
    }

    pub fn set_scissors<B: Backend>(
        &mut self,
        backend: &mut B,
        first: u32,
        scissors: &[Rect2D],
    ) -> Result<()> {
        for (i, rect) in scissors.iter().enumerate() {
            let index = first as usize + i;
            if index >= MAX_VIEWPORTS {
                break;
            }
            self.client.scissors[index] = Some(*rect);
            self.apply_scissor(backend, index)?;
        }
        Ok(())
    }

    pub fn bind_framebuffer<B: Backend>(
        &mut self,
        backend: &mut B,
        framebuffer: BoundFramebuffer,
    ) -> Result<()> {
        let previous = self.current.framebuffer;
        apply_slot(
            &mut self.current.framebuffer,
            &framebuffer,
            &mut self.stats,
            || backend.bind_framebuffer(framebuffer.id),
        )?;
        if previous.map(|f| f.height) != Some(framebuffer.height) {
            for i in 0..MAX_VIEWPORTS {
                self.apply_viewport(backend, i)?;
                self.apply_scissor(backend, i)?;
            }
        }
        Ok(())
    }

    //===------------------------------------------------------------------===//
    // Resource bindings
    //===------------------------------------------------------------------===//

    pub fn bind_vertex_buffer<B: Backend>(
        &mut self,
        backend: &mut B,
        binding: u32,
        value: VertexBinding,
    ) -> Result<()> {
        let Some(slot) = self.current.vertex_buffers.get_mut(binding as usize) else {
            return Ok(());
        };
        apply_slot(slot, &value, &mut self.stats, || {
            backend.bind_vertex_buffer(binding, value.buffer, value.offset)
        })
    }

    pub fn bind_index_buffer<B: Backend>(
        &mut self,
        backend: &mut B,
        value: IndexBinding,
    ) -> Result<()> {
        apply_slot(&mut self.current.index_buffer, &value, &mut self.stats, || {
            backend.bind_index_buffer(value.buffer, value.offset, value.ty)
        })
    }

    pub fn bind_descriptor_set<B: Backend>(
        &mut self,
        backend: &mut B,
        index: u32,
        value: DescriptorBinding,
    ) -> Result<()> {
        let Some(slot) = self.current.descriptor_sets.get_mut(index as usize) else {
            return Ok(());
        };
        apply_slot(slot, &value, &mut self.stats, || {
            backend.bind_descriptor_set(value.bind_point, index, value.set, &value.dynamic_offsets)
        })
    }

    //===------------------------------------------------------------------===//
    // Dynamic state
    //===------------------------------------------------------------------===//

    pub fn set_line_width<B: Backend>(&mut self, backend: &mut B, width: f32) -> Result<()> {
        apply_slot(&mut self.current.line_width, &width, &mut self.stats, || {
            backend.set_line_width(width)
        })
    }

    pub fn set_depth_bias<B: Backend>(&mut self, backend: &mut B, bias: DepthBias) -> Result<()> {
        apply_slot(&mut self.current.depth_bias, &bias, &mut self.stats, || {
            backend.set_depth_bias(&bias)
        })
    }

    pub fn set_blend_constants<B: Backend>(
        &mut self,
        backend: &mut B,
        constants: [f32; 4],
    ) -> Result<()> {
        apply_slot(
            &mut self.current.blend_constants,
            &constants,
            &mut self.stats,
            || backend.set_blend_constants(constants),
        )
    }

    /// Only faces whose cached value differs are sent.
    pub fn set_stencil_value<B: Backend>(
        &mut self,
        backend: &mut B,
        which: StencilDynamic,
        faces: StencilFaces,
        value: u32,
    ) -> Result<()> {
        let row = &mut self.current.stencil[stencil_row(which)];
        let mut differing = StencilFaces::empty();
        if faces.contains(StencilFaces::FRONT) && row[0] != Some(value) {
            differing |= StencilFaces::FRONT;
        }
        if faces.contains(StencilFaces::BACK) && row[1] != Some(value) {
            differing |= StencilFaces::BACK;
        }
        if differing.is_empty() {
            self.stats.elided += 1;
            return Ok(());
        }

        self.stats.issued += 1;
        let result = backend.set_stencil_value(which, differing, value);
        if differing.contains(StencilFaces::FRONT) {
            row[0] = Some(value);
        }
        if differing.contains(StencilFaces::BACK) {
            row[1] = Some(value);
        }
        result
    }

    //===------------------------------------------------------------------===//
    // Scopes
    //===------------------------------------------------------------------===//

    pub fn push(&mut self) {
        self.saved.push((self.current.clone(), self.client.clone()));
    }

    /// Restores the state saved by the matching [`push`](Self::push),
    /// touching only slots that differ from what is current.
    pub fn pop<B: Backend>(&mut self, backend: &mut B) -> Result<()> {
        let Some((parent, client)) = self.saved.pop() else {
            return Ok(());
        };
        self.client = client;
        self.apply(backend, &parent)
    }

    /// Diff-applies every slot `target` knows a value for. Slots `target`
    /// never set keep whatever the backend currently has.
    pub fn apply<B: Backend>(&mut self, backend: &mut B, target: &ContextState) -> Result<()> {
        if let Some(fb) = target.framebuffer {
            apply_slot(&mut self.current.framebuffer, &fb, &mut self.stats, || {
                backend.bind_framebuffer(fb.id)
            })?;
        }
        if let Some(program) = target.program {
            self.use_program(backend, program)?;
        }
        if let Some(blend) = target.blend {
            apply_slot(&mut self.current.blend, &blend, &mut self.stats, || {
                backend.set_blend_state(&blend)
            })?;
        }
        if let Some(ds) = target.depth_stencil {
            apply_slot(&mut self.current.depth_stencil, &ds, &mut self.stats, || {
                backend.set_depth_stencil_state(&ds)
            })?;
        }
        if let Some(raster) = target.raster {
            apply_slot(&mut self.current.raster, &raster, &mut self.stats, || {
                backend.set_raster_state(&raster)
            })?;
        }
        for i in 0..MAX_VIEWPORTS {
            if let Some(vp) = target.viewports[i] {
                apply_slot(&mut self.current.viewports[i], &vp, &mut self.stats, || {
                    backend.set_viewport(i as u32, &vp)
                })?;
            }
            if let Some(rect) = target.scissors[i] {
                apply_slot(&mut self.current.scissors[i], &rect, &mut self.stats, || {
                    backend.set_scissor(i as u32, &rect)
                })?;
            }
        }
        for (i, binding) in target.vertex_buffers.iter().enumerate() {
            if let Some(binding) = binding {
                self.bind_vertex_buffer(backend, i as u32, *binding)?;
            }
        }
        if let Some(index) = target.index_buffer {
            self.bind_index_buffer(backend, index)?;
        }
        for (i, set) in target.descriptor_sets.iter().enumerate() {
            if let Some(set) = set {
                self.bind_descriptor_set(backend, i as u32, set.clone())?;
            }
        }
        if let Some(width) = target.line_width {
            self.set_line_width(backend, width)?;
        }
        if let Some(bias) = target.depth_bias {
            self.set_depth_bias(backend, bias)?;
        }
        if let Some(constants) = target.blend_constants {
            self.set_blend_constants(backend, constants)?;
        }
        let kinds = [
            StencilDynamic::Reference,
            StencilDynamic::CompareMask,
            StencilDynamic::WriteMask,
        ];
        for which in kinds {
            let row = target.stencil[stencil_row(which)];
            if let Some(front) = row[0] {
                self.set_stencil_value(backend, which, StencilFaces::FRONT, front)?;
            }
            if let Some(back) = row[1] {
                self.set_stencil_value(backend, which, StencilFaces::BACK, back)?;
            }
        }
        Ok(())
    }
}
