use std::sync::Arc;

use smallvec::SmallVec;

#[cfg(feature = "dashi-serde")]
use serde::{Deserialize, Serialize};

use super::backend::{
    AttachmentLoad, AttachmentSlot, AttachmentStore, Backend, Capabilities, Features,
};
use super::driver::state::{BoundFramebuffer, ContextStateStack};
use super::driver::types::NativeId;
use super::error::{GPUError, Result};
use super::framebuffer::FrameBufferMapping;
use super::structs::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "dashi-serde", serde(default))]
pub struct AttachmentDescription {
    pub format: Format,
    pub samples: SampleCount,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub stencil_load_op: LoadOp,
    pub stencil_store_op: StoreOp,
    pub initial_layout: Layout,
    pub final_layout: Layout,
}

impl Default for AttachmentDescription {
    fn default() -> Self {
        Self {
            format: Format::RGBA8Unorm,
            samples: SampleCount::S1,
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
            stencil_load_op: LoadOp::DontCare,
            stencil_store_op: StoreOp::DontCare,
            initial_layout: Layout::Undefined,
            final_layout: Layout::ColorAttachment,
        }
    }
}

impl AttachmentDescription {
    /// Whether beginning the pass needs a clear value for this attachment.
    pub fn needs_clear_value(&self) -> bool {
        self.load_op == LoadOp::Clear
            || (self.format.has_stencil() && self.stencil_load_op == LoadOp::Clear)
    }
}

/// Attachment references are indices into the render pass attachment list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "dashi-serde", serde(default))]
pub struct SubpassDescription {
    pub input_attachments: Vec<u32>,
    pub color_attachments: Vec<u32>,
    /// Empty, or one optional resolve target per color attachment.
    pub resolve_attachments: Vec<Option<u32>>,
    pub depth_stencil_attachment: Option<u32>,
    pub depth_stencil_resolve: Option<u32>,
    pub preserve_attachments: Vec<u32>,
}

impl SubpassDescription {
    fn references(&self, attachment: u32) -> bool {
        self.input_attachments.contains(&attachment)
            || self.color_attachments.contains(&attachment)
            || self.resolve_attachments.contains(&Some(attachment))
            || self.depth_stencil_attachment == Some(attachment)
            || self.depth_stencil_resolve == Some(attachment)
    }
}

/// `None` on either side means "outside the render pass".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "dashi-serde", serde(default))]
pub struct SubpassDependency {
    pub src_subpass: Option<u32>,
    pub dst_subpass: Option<u32>,
    pub src_stages: PipelineStages,
    pub dst_stages: PipelineStages,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderPassInfo<'a> {
    pub debug_name: &'a str,
    pub attachments: &'a [AttachmentDescription],
    pub subpasses: &'a [SubpassDescription],
    pub dependencies: &'a [SubpassDependency],
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SubpassShape {
    colors: SmallVec<[u32; 8]>,
    resolves: SmallVec<[Option<u32>; 8]>,
    depth_stencil: Option<u32>,
    depth_stencil_resolve: Option<u32>,
}

/// Everything two render passes must agree on to share framebuffers and
/// framebuffer mappings. Load/store ops and layouts are not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderPassSignature {
    attachments: SmallVec<[(Format, SampleCount); 8]>,
    subpasses: SmallVec<[SubpassShape; 2]>,
}

impl RenderPassSignature {
    pub fn attachments(&self) -> &[(Format, SampleCount)] {
        &self.attachments
    }
}

/// Immutable render pass description, validated at creation.
#[derive(Debug, Clone)]
pub struct RenderPass {
    debug_name: String,
    attachments: Vec<AttachmentDescription>,
    subpasses: Vec<SubpassDescription>,
    dependencies: Vec<SubpassDependency>,
    signature: RenderPassSignature,
    first_use: Vec<Option<u32>>,
}

fn invalid(msg: String) -> GPUError {
    GPUError::Validation(msg)
}

impl RenderPass {
    pub fn new(info: &RenderPassInfo, caps: &Capabilities) -> Result<Self> {
        let count = info.attachments.len() as u32;
        if info.subpasses.is_empty() {
            return Err(invalid("render pass needs at least one subpass".into()));
        }

        let check = |index: u32, what: &str| -> Result<()> {
            if index >= count {
                return Err(invalid(format!(
                    "{what} attachment {index} out of range ({count} attachments)"
                )));
            }
            Ok(())
        };

        for (s, sub) in info.subpasses.iter().enumerate() {
            if sub.color_attachments.len() as u32 > caps.max_color_attachments {
                return Err(invalid(format!(
                    "subpass {s} uses {} color attachments, backend allows {}",
                    sub.color_attachments.len(),
                    caps.max_color_attachments
                )));
            }
            for &a in &sub.color_attachments {
                check(a, "color")?;
                if !info.attachments[a as usize].format.is_color() {
                    return Err(invalid(format!("color attachment {a} has a depth format")));
                }
            }
            for &a in sub.input_attachments.iter().chain(&sub.preserve_attachments) {
                check(a, "input/preserve")?;
            }
            if let Some(d) = sub.depth_stencil_attachment {
                check(d, "depth")?;
                if info.attachments[d as usize].format.is_color() {
                    return Err(invalid(format!("depth attachment {d} has a color format")));
                }
            }

            if !sub.resolve_attachments.is_empty() {
                if sub.resolve_attachments.len() != sub.color_attachments.len() {
                    return Err(invalid(format!(
                        "subpass {s} has {} resolve targets for {} color attachments",
                        sub.resolve_attachments.len(),
                        sub.color_attachments.len()
                    )));
                }
                for (&c, r) in sub.color_attachments.iter().zip(&sub.resolve_attachments) {
                    if let Some(r) = *r {
                        check(r, "resolve")?;
                        Self::check_resolve(info.attachments, c, r)?;
                        if !caps.supports(Features::MULTISAMPLE_RESOLVE) {
                            return Err(GPUError::FeatureNotPresent("multisample resolve"));
                        }
                    }
                }
            }
            if let Some(r) = sub.depth_stencil_resolve {
                check(r, "depth resolve")?;
                let Some(d) = sub.depth_stencil_attachment else {
                    return Err(invalid(format!(
                        "subpass {s} resolves depth without a depth attachment"
                    )));
                };
                Self::check_resolve(info.attachments, d, r)?;
                if !caps.supports(Features::DEPTH_RESOLVE) {
                    return Err(GPUError::FeatureNotPresent("depth/stencil resolve"));
                }
            }
        }

        let subpass_count = info.subpasses.len() as u32;
        for dep in info.dependencies {
            for s in [dep.src_subpass, dep.dst_subpass].into_iter().flatten() {
                if s >= subpass_count {
                    return Err(invalid(format!("dependency names missing subpass {s}")));
                }
            }
        }

        let first_use = (0..count)
            .map(|a| {
                info.subpasses
                    .iter()
                    .position(|s| s.references(a))
                    .map(|p| p as u32)
            })
            .collect();

        let signature = RenderPassSignature {
            attachments: info
                .attachments
                .iter()
                .map(|a| (a.format, a.samples))
                .collect(),
            subpasses: info
                .subpasses
                .iter()
                .map(|s| SubpassShape {
                    colors: s.color_attachments.iter().copied().collect(),
                    resolves: s.resolve_attachments.iter().copied().collect(),
                    depth_stencil: s.depth_stencil_attachment,
                    depth_stencil_resolve: s.depth_stencil_resolve,
                })
                .collect(),
        };

        Ok(Self {
            debug_name: info.debug_name.to_string(),
            attachments: info.attachments.to_vec(),
            subpasses: info.subpasses.to_vec(),
            dependencies: info.dependencies.to_vec(),
            signature,
            first_use,
        })
    }

    fn check_resolve(attachments: &[AttachmentDescription], src: u32, dst: u32) -> Result<()> {
        let (s, d) = (&attachments[src as usize], &attachments[dst as usize]);
        if s.samples == SampleCount::S1 || d.samples != SampleCount::S1 {
            return Err(invalid(format!(
                "resolve {src} -> {dst} must go from multisampled to single-sampled"
            )));
        }
        if s.format != d.format {
            return Err(invalid(format!("resolve {src} -> {dst} changes format")));
        }
        Ok(())
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    pub fn attachments(&self) -> &[AttachmentDescription] {
        &self.attachments
    }

    pub fn subpasses(&self) -> &[SubpassDescription] {
        &self.subpasses
    }

    pub fn dependencies(&self) -> &[SubpassDependency] {
        &self.dependencies
    }

    pub fn signature(&self) -> &RenderPassSignature {
        &self.signature
    }

    pub fn is_compatible(&self, other: &RenderPass) -> bool {
        self.signature == other.signature
    }

    /// Subpass whose start applies the attachment's load op. Attachments no
    /// subpass references are loaded when the pass begins.
    pub fn load_subpass(&self, attachment: u32) -> u32 {
        self.first_use
            .get(attachment as usize)
            .copied()
            .flatten()
            .unwrap_or(0)
    }

    /// One past the highest attachment index that loads with a clear.
    pub fn required_clear_values(&self) -> usize {
        self.attachments
            .iter()
            .rposition(|a| a.needs_clear_value())
            .map_or(0, |i| i + 1)
    }

    pub fn validate_clear_values(&self, values: &[ClearValue]) -> Result<()> {
        let expected = self.required_clear_values();
        if values.len() < expected {
            return Err(GPUError::ClearValueMismatch {
                expected,
                supplied: values.len(),
            });
        }
        if values.len() > self.attachments.len() {
            return Err(GPUError::ClearValueMismatch {
                expected: self.attachments.len(),
                supplied: values.len(),
            });
        }
        for (i, (desc, value)) in self.attachments.iter().zip(values).enumerate() {
            if desc.needs_clear_value() && desc.format.is_color() != value.is_color() {
                return Err(invalid(format!(
                    "clear value {i} does not match the attachment's aspect"
                )));
            }
        }
        Ok(())
    }
}

//===----------------------------------------------------------------------===//
// Render pass instance
//===----------------------------------------------------------------------===//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    NotStarted,
    InSubpass(u32),
    Ended,
}

/// One execution of a render pass over a framebuffer mapping, created when
/// a `BeginRenderPass` opcode replays.
pub struct RenderPassInstance {
    pass: Arc<RenderPass>,
    mapping: Arc<FrameBufferMapping>,
    render_area: Rect2D,
    clear_values: SmallVec<[ClearValue; 8]>,
    state: PassState,
}

impl RenderPassInstance {
    pub fn new(
        pass: Arc<RenderPass>,
        mapping: Arc<FrameBufferMapping>,
        render_area: Rect2D,
        clear_values: &[ClearValue],
    ) -> Self {
        Self {
            pass,
            mapping,
            render_area,
            clear_values: clear_values.iter().copied().collect(),
            state: PassState::NotStarted,
        }
    }

    pub fn state(&self) -> PassState {
        self.state
    }

    pub fn render_pass(&self) -> &Arc<RenderPass> {
        &self.pass
    }

    pub fn mapping(&self) -> &Arc<FrameBufferMapping> {
        &self.mapping
    }

    pub fn current_subpass(&self) -> Result<u32> {
        match self.state {
            PassState::InSubpass(i) => Ok(i),
            PassState::NotStarted => Err(GPUError::InvalidState("render pass not begun")),
            PassState::Ended => Err(GPUError::InvalidState("render pass already ended")),
        }
    }

    pub fn begin<B: Backend>(
        &mut self,
        state: &mut ContextStateStack,
        backend: &mut B,
    ) -> Result<()> {
        if self.state != PassState::NotStarted {
            return Err(GPUError::InvalidState("render pass begun twice"));
        }
        self.enter_subpass(0, state, backend)
    }

    pub fn next_subpass<B: Backend>(
        &mut self,
        state: &mut ContextStateStack,
        backend: &mut B,
    ) -> Result<()> {
        let current = self.current_subpass()?;
        if current + 1 >= self.pass.subpasses().len() as u32 {
            return Err(GPUError::InvalidState("no subpass left to advance to"));
        }
        self.resolve_subpass(current, backend)?;
        self.enter_subpass(current + 1, state, backend)
    }

    pub fn end<B: Backend>(&mut self, state: &mut ContextStateStack, backend: &mut B) -> Result<()> {
        let current = self.current_subpass()?;
        if current + 1 != self.pass.subpasses().len() as u32 {
            return Err(GPUError::InvalidState(
                "render pass ended before its last subpass",
            ));
        }
        self.resolve_subpass(current, backend)?;

        for (a, desc) in self.pass.attachments().iter().enumerate() {
            let (fbo, slot) = self.locate(current, a as u32)?;
            self.bind(fbo, state, backend)?;
            backend.store_attachment(
                slot,
                &AttachmentStore {
                    op: desc.store_op,
                    stencil_op: desc.stencil_store_op,
                },
            )?;
        }
        self.state = PassState::Ended;
        Ok(())
    }

    /// Clears regions of attachments of the current subpass.
    pub fn clear_attachments<B: Backend>(
        &self,
        state: &mut ContextStateStack,
        backend: &mut B,
        attachments: &[ClearAttachment],
        rects: &[ClearRect],
    ) -> Result<()> {
        let current = self.current_subpass()?;
        let subpass = &self.pass.subpasses()[current as usize];
        let target = self
            .mapping
            .subpass(current)
            .ok_or(GPUError::InvalidState("framebuffer mapping lacks subpass"))?;
        self.bind(target.framebuffer, state, backend)?;

        for clear in attachments {
            let slot = if clear.aspect.contains(AspectMask::COLOR) {
                if clear.color_attachment as usize >= subpass.color_attachments.len() {
                    return Err(invalid(format!(
                        "subpass has no color attachment {}",
                        clear.color_attachment
                    )));
                }
                AttachmentSlot::Color(clear.color_attachment)
            } else {
                if subpass.depth_stencil_attachment.is_none() {
                    return Err(invalid("subpass has no depth/stencil attachment".into()));
                }
                AttachmentSlot::DepthStencil
            };
            for rect in rects {
                let area = self.to_backend(&rect.rect, backend);
                backend.clear_attachment(slot, &clear.value, &area)?;
            }
        }
        Ok(())
    }

    fn to_backend<B: Backend>(&self, rect: &Rect2D, backend: &B) -> Rect2D {
        match backend.capabilities().origin {
            Origin::TopLeft => *rect,
            Origin::BottomLeft => rect.flipped(self.mapping.height()),
        }
    }

    fn locate(&self, subpass: u32, attachment: u32) -> Result<(NativeId, AttachmentSlot)> {
        self.mapping
            .locate(subpass, attachment)
            .ok_or(GPUError::InvalidState("attachment missing from framebuffer mapping"))
    }

    fn bind<B: Backend>(
        &self,
        framebuffer: NativeId,
        state: &mut ContextStateStack,
        backend: &mut B,
    ) -> Result<()> {
        state.bind_framebuffer(
            backend,
            BoundFramebuffer {
                id: framebuffer,
                height: self.mapping.height(),
            },
        )
    }

    fn enter_subpass<B: Backend>(
        &mut self,
        index: u32,
        state: &mut ContextStateStack,
        backend: &mut B,
    ) -> Result<()> {
        let area = self.to_backend(&self.render_area, backend);
        for (a, desc) in self.pass.attachments().iter().enumerate() {
            if self.pass.load_subpass(a as u32) != index {
                continue;
            }
            let (fbo, slot) = self.locate(index, a as u32)?;
            self.bind(fbo, state, backend)?;
            let load = AttachmentLoad {
                op: desc.load_op,
                stencil_op: desc.stencil_load_op,
                clear: if desc.needs_clear_value() {
                    self.clear_values.get(a).copied()
                } else {
                    None
                },
            };
            backend.load_attachment(slot, &load, &area)?;
        }

        let target = self
            .mapping
            .subpass(index)
            .ok_or(GPUError::InvalidState("framebuffer mapping lacks subpass"))?;
        self.bind(target.framebuffer, state, backend)?;
        self.state = PassState::InSubpass(index);
        log::debug!(
            "render pass '{}' entered subpass {}",
            self.pass.debug_name(),
            index
        );
        Ok(())
    }

    fn resolve_subpass<B: Backend>(&self, index: u32, backend: &mut B) -> Result<()> {
        let subpass = &self.pass.subpasses()[index as usize];
        let area = self.to_backend(&self.render_area, backend);
        let missing = GPUError::InvalidState("resolve attachment missing from mapping");

        for (&src, dst) in subpass
            .color_attachments
            .iter()
            .zip(&subpass.resolve_attachments)
        {
            if let Some(dst) = *dst {
                let s = self.mapping.single(src).ok_or(missing.clone())?;
                let d = self.mapping.single(dst).ok_or(missing.clone())?;
                backend.resolve_framebuffer(s, d, AspectMask::COLOR, &area)?;
            }
        }
        if let (Some(src), Some(dst)) = (
            subpass.depth_stencil_attachment,
            subpass.depth_stencil_resolve,
        ) {
            let s = self.mapping.single(src).ok_or(missing.clone())?;
            let d = self.mapping.single(dst).ok_or(missing)?;
            let aspect = self.pass.attachments()[src as usize].format.aspects();
            backend.resolve_framebuffer(s, d, aspect, &area)?;
        }
        Ok(())
    }
}
