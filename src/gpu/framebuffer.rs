use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use smallvec::SmallVec;

use super::backend::{AttachmentSlot, Backend, FramebufferTarget};
use super::driver::types::{Handle, ImageView, NativeId, ResourceDesc, ResourceRegistry};
use super::error::{GPUError, Result};
use super::render_pass::{RenderPass, RenderPassSignature};
use super::structs::Rect2D;

#[derive(Debug, Clone, Copy, Default)]
pub struct FramebufferInfo<'a> {
    pub debug_name: &'a str,
    pub render_pass: Handle<RenderPass>,
    pub attachments: &'a [Handle<ImageView>],
    pub width: u32,
    pub height: u32,
    pub layers: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct FramebufferView {
    pub handle: Handle<ImageView>,
    pub desc: ResourceDesc,
}

/// A set of image views matched against a render pass signature. Holds no
/// backend objects; those live in [`FrameBufferMapping`].
#[derive(Debug, Clone)]
pub struct Framebuffer {
    debug_name: String,
    signature: RenderPassSignature,
    views: SmallVec<[FramebufferView; 8]>,
    width: u32,
    height: u32,
    layers: u32,
}

impl Framebuffer {
    pub fn new(
        info: &FramebufferInfo,
        pass: &RenderPass,
        resources: &dyn ResourceRegistry,
    ) -> Result<Self> {
        if info.width == 0 || info.height == 0 || info.layers == 0 {
            return Err(GPUError::Validation(
                "framebuffer dimensions must be non-zero".into(),
            ));
        }
        let expected = pass.attachments();
        if info.attachments.len() != expected.len() {
            return Err(GPUError::Validation(format!(
                "framebuffer has {} views, render pass '{}' has {} attachments",
                info.attachments.len(),
                pass.debug_name(),
                expected.len()
            )));
        }

        let mut views = SmallVec::new();
        for (i, (&handle, desc)) in info.attachments.iter().zip(expected).enumerate() {
            let view = resources
                .image_view(handle)
                .ok_or(GPUError::InvalidHandle("framebuffer image view"))?;
            if view.format != desc.format || view.samples != desc.samples {
                return Err(GPUError::Validation(format!(
                    "view {i} is {:?}x{:?}, attachment expects {:?}x{:?}",
                    view.format, view.samples, desc.format, desc.samples
                )));
            }
            if view.extent.width < info.width || view.extent.height < info.height {
                return Err(GPUError::Validation(format!(
                    "view {i} is smaller than the framebuffer"
                )));
            }
            views.push(FramebufferView { handle, desc: view });
        }

        Ok(Self {
            debug_name: info.debug_name.to_string(),
            signature: pass.signature().clone(),
            views,
            width: info.width,
            height: info.height,
            layers: info.layers,
        })
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    pub fn is_compatible(&self, pass: &RenderPass) -> bool {
        &self.signature == pass.signature()
    }

    pub fn views(&self) -> &[FramebufferView] {
        &self.views
    }

    /// Whether every view is still registered with the resource collaborator.
    pub fn views_valid(&self, resources: &dyn ResourceRegistry) -> bool {
        self.views
            .iter()
            .all(|v| resources.image_view(v.handle).is_some())
    }

    pub fn area(&self) -> Rect2D {
        Rect2D::new(0, 0, self.width, self.height)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layers(&self) -> u32 {
        self.layers
    }
}

//===----------------------------------------------------------------------===//
// Framebuffer mapping
//===----------------------------------------------------------------------===//

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MappingKey {
    signature: RenderPassSignature,
    views: SmallVec<[NativeId; 8]>,
    width: u32,
    height: u32,
    layers: u32,
}

impl MappingKey {
    pub fn new(pass: &RenderPass, framebuffer: &Framebuffer) -> Self {
        Self {
            signature: pass.signature().clone(),
            views: framebuffer.views.iter().map(|v| v.desc.native).collect(),
            width: framebuffer.width,
            height: framebuffer.height,
            layers: framebuffer.layers,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AttachmentSet {
    colors: SmallVec<[u32; 8]>,
    depth_stencil: Option<u32>,
}

/// Backend framebuffer object a subpass renders into.
#[derive(Debug, Clone)]
pub struct SubpassTarget {
    pub framebuffer: NativeId,
    pub colors: SmallVec<[u32; 8]>,
    pub depth_stencil: Option<u32>,
}

/// The backend framebuffer objects realizing one render pass signature over
/// one set of views: one object per distinct subpass attachment set, plus a
/// single-attachment object per attachment for loads, stores and resolves
/// that fall outside the current subpass.
#[derive(Debug)]
pub struct FrameBufferMapping {
    key: MappingKey,
    subpasses: Vec<SubpassTarget>,
    singles: Vec<NativeId>,
    objects: Vec<NativeId>,
    width: u32,
    height: u32,
}

impl FrameBufferMapping {
    pub fn build<B: Backend>(
        backend: &mut B,
        pass: &RenderPass,
        framebuffer: &Framebuffer,
    ) -> Result<Self> {
        let mut created: HashMap<AttachmentSet, NativeId> = HashMap::new();
        let mut objects = Vec::new();

        let result = (|| -> Result<(Vec<SubpassTarget>, Vec<NativeId>)> {
            let mut obtain = |set: AttachmentSet, backend: &mut B| -> Result<NativeId> {
                if let Some(&id) = created.get(&set) {
                    return Ok(id);
                }
                let target = FramebufferTarget {
                    colors: set
                        .colors
                        .iter()
                        .map(|&a| framebuffer.views[a as usize].desc.native)
                        .collect(),
                    depth_stencil: set
                        .depth_stencil
                        .map(|a| framebuffer.views[a as usize].desc.native),
                    width: framebuffer.width,
                    height: framebuffer.height,
                    layers: framebuffer.layers,
                };
                let id = backend.create_framebuffer(&target)?;
                objects.push(id);
                created.insert(set, id);
                Ok(id)
            };

            let mut subpasses = Vec::with_capacity(pass.subpasses().len());
            for sub in pass.subpasses() {
                let set = AttachmentSet {
                    colors: sub.color_attachments.iter().copied().collect(),
                    depth_stencil: sub.depth_stencil_attachment,
                };
                let id = obtain(set.clone(), backend)?;
                subpasses.push(SubpassTarget {
                    framebuffer: id,
                    colors: set.colors,
                    depth_stencil: set.depth_stencil,
                });
            }

            let mut singles = Vec::with_capacity(pass.attachments().len());
            for (a, desc) in pass.attachments().iter().enumerate() {
                let a = a as u32;
                let set = if desc.format.is_color() {
                    AttachmentSet {
                        colors: smallvec::smallvec![a],
                        depth_stencil: None,
                    }
                } else {
                    AttachmentSet {
                        colors: SmallVec::new(),
                        depth_stencil: Some(a),
                    }
                };
                singles.push(obtain(set, backend)?);
            }
            Ok((subpasses, singles))
        })();

        match result {
            Ok((subpasses, singles)) => {
                log::debug!(
                    "built framebuffer mapping for '{}' with {} backend objects",
                    framebuffer.debug_name(),
                    objects.len()
                );
                Ok(Self {
                    key: MappingKey::new(pass, framebuffer),
                    subpasses,
                    singles,
                    objects,
                    width: framebuffer.width,
                    height: framebuffer.height,
                })
            }
            Err(err) => {
                for id in objects {
                    if let Err(e) = backend.destroy_framebuffer(id) {
                        log::warn!("failed to release partial framebuffer mapping: {e}");
                    }
                }
                Err(err)
            }
        }
    }

    pub fn key(&self) -> &MappingKey {
        &self.key
    }

    pub fn subpass(&self, index: u32) -> Option<&SubpassTarget> {
        self.subpasses.get(index as usize)
    }

    pub fn single(&self, attachment: u32) -> Option<NativeId> {
        self.singles.get(attachment as usize).copied()
    }

    /// Where `attachment` can be reached while `subpass` is current: inside
    /// the subpass object when the subpass uses it, else its own object.
    pub fn locate(&self, subpass: u32, attachment: u32) -> Option<(NativeId, AttachmentSlot)> {
        let target = self.subpass(subpass)?;
        if let Some(i) = target.colors.iter().position(|&a| a == attachment) {
            return Some((target.framebuffer, AttachmentSlot::Color(i as u32)));
        }
        if target.depth_stencil == Some(attachment) {
            return Some((target.framebuffer, AttachmentSlot::DepthStencil));
        }
        let single = self.single(attachment)?;
        let depth = self
            .key
            .signature
            .attachments()
            .get(attachment as usize)
            .map_or(false, |(format, _)| !format.is_color());
        let slot = if depth {
            AttachmentSlot::DepthStencil
        } else {
            AttachmentSlot::Color(0)
        };
        Some((single, slot))
    }

    pub fn references(&self, view: NativeId) -> bool {
        self.key.views.contains(&view)
    }

    pub fn objects(&self) -> &[NativeId] {
        &self.objects
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn destroy<B: Backend>(&self, backend: &mut B) -> Result<()> {
        for &id in &self.objects {
            backend.destroy_framebuffer(id)?;
        }
        Ok(())
    }
}

/// Lazily built framebuffer mappings shared by every compatible render pass.
///
/// Creation happens under the write lock with a second lookup, so racing
/// first uses build a mapping once. Mappings are immutable afterwards and
/// handed out as `Arc`s.
#[derive(Default)]
pub struct FramebufferCache {
    entries: RwLock<HashMap<MappingKey, Arc<FrameBufferMapping>>>,
}

impl FramebufferCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(
        &self,
        key: MappingKey,
        create: impl FnOnce() -> Result<FrameBufferMapping>,
    ) -> Result<Arc<FrameBufferMapping>> {
        if let Some(mapping) = self.entries.read().get(&key) {
            return Ok(mapping.clone());
        }
        let mut entries = self.entries.write();
        if let Some(mapping) = entries.get(&key) {
            return Ok(mapping.clone());
        }
        let mapping = Arc::new(create()?);
        entries.insert(key, mapping.clone());
        Ok(mapping)
    }

    /// Removes every mapping that contains `view`. The caller destroys the
    /// returned mappings' backend objects.
    pub fn invalidate_view(&self, view: NativeId) -> Vec<Arc<FrameBufferMapping>> {
        let mut entries = self.entries.write();
        let stale: Vec<MappingKey> = entries
            .iter()
            .filter(|(_, m)| m.references(view))
            .map(|(k, _)| k.clone())
            .collect();
        stale
            .into_iter()
            .filter_map(|k| entries.remove(&k))
            .collect()
    }

    pub fn drain(&self) -> Vec<Arc<FrameBufferMapping>> {
        self.entries.write().drain().map(|(_, m)| m).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::backend::{Capabilities, NullBackend};
    use crate::gpu::driver::types::{ImageInfo, ImageViewInfo, ResourceTable};
    use crate::gpu::render_pass::{AttachmentDescription, RenderPassInfo, SubpassDescription};
    use crate::gpu::structs::{Extent3D, Format};

    fn view(table: &ResourceTable, native: u64, format: Format) -> Handle<ImageView> {
        let image = table
            .register_image(&ImageInfo {
                native: NativeId(native),
                format,
                extent: Extent3D {
                    width: 64,
                    height: 64,
                    depth: 1,
                },
                ..Default::default()
            })
            .unwrap();
        table
            .register_image_view(&ImageViewInfo {
                image,
                native: NativeId(native),
                ..Default::default()
            })
            .unwrap()
    }

    fn two_subpass_pass() -> RenderPass {
        let attachments = [
            AttachmentDescription::default(),
            AttachmentDescription::default(),
            AttachmentDescription {
                format: Format::D32Float,
                ..Default::default()
            },
        ];
        let subpasses = [
            SubpassDescription {
                color_attachments: vec![0],
                depth_stencil_attachment: Some(2),
                ..Default::default()
            },
            SubpassDescription {
                color_attachments: vec![1],
                depth_stencil_attachment: Some(2),
                ..Default::default()
            },
        ];
        RenderPass::new(
            &RenderPassInfo {
                debug_name: "two",
                attachments: &attachments,
                subpasses: &subpasses,
                ..Default::default()
            },
            &Capabilities::default(),
        )
        .unwrap()
    }

    #[test]
    fn mapping_builds_one_object_per_distinct_set() {
        let table = ResourceTable::new();
        let views = [
            view(&table, 100, Format::RGBA8Unorm),
            view(&table, 101, Format::RGBA8Unorm),
            view(&table, 102, Format::D32Float),
        ];
        let pass = two_subpass_pass();
        let fb = Framebuffer::new(
            &FramebufferInfo {
                attachments: &views,
                width: 64,
                height: 64,
                layers: 1,
                ..Default::default()
            },
            &pass,
            &table,
        )
        .unwrap();

        let mut backend = NullBackend::new();
        let mapping = FrameBufferMapping::build(&mut backend, &pass, &fb).unwrap();
        // Two subpass sets plus three singles.
        assert_eq!(mapping.objects().len(), 5);
        assert_eq!(backend.live_framebuffers(), 5);

        let (fbo, slot) = mapping.locate(1, 0).unwrap();
        assert_eq!(fbo, mapping.single(0).unwrap());
        assert_eq!(slot, AttachmentSlot::Color(0));
        assert_eq!(
            mapping.locate(1, 2).unwrap(),
            (mapping.subpass(1).unwrap().framebuffer, AttachmentSlot::DepthStencil)
        );

        mapping.destroy(&mut backend).unwrap();
        assert_eq!(backend.live_framebuffers(), 0);
    }

    #[test]
    fn cache_builds_once_and_drops_on_view_invalidation() {
        let table = ResourceTable::new();
        let views = [
            view(&table, 7, Format::RGBA8Unorm),
            view(&table, 8, Format::RGBA8Unorm),
            view(&table, 9, Format::D32Float),
        ];
        let pass = two_subpass_pass();
        let fb = Framebuffer::new(
            &FramebufferInfo {
                attachments: &views,
                width: 32,
                height: 32,
                layers: 1,
                ..Default::default()
            },
            &pass,
            &table,
        )
        .unwrap();

        let cache = FramebufferCache::new();
        let mut backend = NullBackend::new();
        let mut builds = 0;
        for _ in 0..3 {
            cache
                .get_or_create(MappingKey::new(&pass, &fb), || {
                    builds += 1;
                    FrameBufferMapping::build(&mut backend, &pass, &fb)
                })
                .unwrap();
        }
        assert_eq!(builds, 1);
        assert!(cache.invalidate_view(NativeId(1234)).is_empty());
        let stale = cache.invalidate_view(NativeId(8));
        assert_eq!(stale.len(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn mismatched_view_format_is_rejected() {
        let table = ResourceTable::new();
        let views = [
            view(&table, 1, Format::RGBA8Unorm),
            view(&table, 2, Format::R32Float),
            view(&table, 3, Format::D32Float),
        ];
        let pass = two_subpass_pass();
        let result = Framebuffer::new(
            &FramebufferInfo {
                attachments: &views,
                width: 16,
                height: 16,
                layers: 1,
                ..Default::default()
            },
            &pass,
            &table,
        );
        assert!(matches!(result, Err(GPUError::Validation(_))));
    }
}
