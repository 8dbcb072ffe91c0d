use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use parking_lot::RwLock;

pub use crate::utils::Handle;
use crate::utils::Pool;

use crate::gpu::error::{GPUError, Result};
use crate::gpu::structs::{Extent3D, Format, SampleCount};

/// Backend-native object name (a GL name, a pointer, ...). Zero means "none"
/// and, for framebuffers, the backend's default framebuffer.
#[repr(transparent)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Pod, Zeroable)]
pub struct NativeId(pub u64);

impl NativeId {
    pub const NONE: NativeId = NativeId(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Backend completion marker inserted into the command stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct NativeSync(pub u64);

bitflags! {
    #[repr(C)]
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "dashi-serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct UsageBits: u32 {
        const SAMPLED       = 0x1;
        const COLOR_ATTACHMENT = 0x2;
        const DEPTH_STENCIL_ATTACHMENT = 0x4;
        const STORAGE       = 0x8;
        const COPY_SRC      = 0x10;
        const COPY_DST      = 0x20;
        const PRESENT       = 0x40;
        const VERTEX        = 0x80;
        const INDEX         = 0x100;
        const UNIFORM       = 0x200;
        const INDIRECT      = 0x400;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer,
    Image,
    ImageView,
}

/// What the command layer is allowed to know about a resource it does not
/// own: its native name and a format/usage descriptor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct ResourceDesc {
    pub native: NativeId,
    pub format: Format,
    pub samples: SampleCount,
    pub usage: UsageBits,
    /// Byte size for buffers, zero otherwise.
    pub size: u64,
    pub extent: Extent3D,
    pub mip_levels: u32,
    pub layers: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct Buffer {
    pub desc: ResourceDesc,
}

#[derive(Debug, Clone, Copy)]
pub struct Image {
    pub desc: ResourceDesc,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageView {
    pub desc: ResourceDesc,
    pub image: Handle<Image>,
}

/// Resource manager the command layer borrows identities from.
///
/// Command lists never own resources. They store the native name resolved at
/// record time plus the raw handle, which is re-checked with
/// [`ResourceRegistry::is_valid`] before replay touches the backend.
pub trait ResourceRegistry: Send + Sync {
    fn buffer(&self, handle: Handle<Buffer>) -> Option<ResourceDesc>;
    fn image(&self, handle: Handle<Image>) -> Option<ResourceDesc>;
    fn image_view(&self, handle: Handle<ImageView>) -> Option<ResourceDesc>;

    fn is_valid(&self, kind: ResourceKind, raw: u32) -> bool {
        match kind {
            ResourceKind::Buffer => self.buffer(Handle::from_raw(raw)).is_some(),
            ResourceKind::Image => self.image(Handle::from_raw(raw)).is_some(),
            ResourceKind::ImageView => self.image_view(Handle::from_raw(raw)).is_some(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BufferInfo<'a> {
    pub debug_name: &'a str,
    pub native: NativeId,
    pub size: u64,
    pub usage: UsageBits,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageInfo<'a> {
    pub debug_name: &'a str,
    pub native: NativeId,
    pub format: Format,
    pub samples: SampleCount,
    pub extent: Extent3D,
    pub mip_levels: u32,
    pub layers: u32,
    pub usage: UsageBits,
}

impl Default for ImageInfo<'_> {
    fn default() -> Self {
        Self {
            debug_name: "",
            native: NativeId::NONE,
            format: Format::RGBA8Unorm,
            samples: SampleCount::S1,
            extent: Extent3D {
                width: 1,
                height: 1,
                depth: 1,
            },
            mip_levels: 1,
            layers: 1,
            usage: UsageBits::SAMPLED,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ImageViewInfo<'a> {
    pub debug_name: &'a str,
    pub native: NativeId,
    pub image: Handle<Image>,
}

/// Simple in-process [`ResourceRegistry`] backed by generational pools.
#[derive(Default)]
pub struct ResourceTable {
    buffers: RwLock<Pool<Buffer>>,
    images: RwLock<Pool<Image>>,
    views: RwLock<Pool<ImageView>>,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_buffer(&self, info: &BufferInfo) -> Result<Handle<Buffer>> {
        let desc = ResourceDesc {
            native: info.native,
            usage: info.usage,
            size: info.size,
            ..Default::default()
        };
        self.buffers
            .write()
            .insert(Buffer { desc })
            .ok_or(GPUError::SlotError)
    }

    pub fn register_image(&self, info: &ImageInfo) -> Result<Handle<Image>> {
        let desc = ResourceDesc {
            native: info.native,
            format: info.format,
            samples: info.samples,
            usage: info.usage,
            size: 0,
            extent: info.extent,
            mip_levels: info.mip_levels,
            layers: info.layers,
        };
        self.images
            .write()
            .insert(Image { desc })
            .ok_or(GPUError::SlotError)
    }

    /// Views inherit format, sample count and extent from their image.
    pub fn register_image_view(&self, info: &ImageViewInfo) -> Result<Handle<ImageView>> {
        let image = self
            .image(info.image)
            .ok_or(GPUError::InvalidHandle("image view source"))?;
        let desc = ResourceDesc {
            native: info.native,
            ..image
        };
        self.views
            .write()
            .insert(ImageView {
                desc,
                image: info.image,
            })
            .ok_or(GPUError::SlotError)
    }

    pub fn destroy_buffer(&self, handle: Handle<Buffer>) -> Option<ResourceDesc> {
        self.buffers.write().release(handle).map(|b| b.desc)
    }

    pub fn destroy_image(&self, handle: Handle<Image>) -> Option<ResourceDesc> {
        self.images.write().release(handle).map(|i| i.desc)
    }

    pub fn destroy_image_view(&self, handle: Handle<ImageView>) -> Option<ResourceDesc> {
        self.views.write().release(handle).map(|v| v.desc)
    }
}

impl ResourceRegistry for ResourceTable {
    fn buffer(&self, handle: Handle<Buffer>) -> Option<ResourceDesc> {
        self.buffers.read().get_ref(handle).map(|b| b.desc)
    }

    fn image(&self, handle: Handle<Image>) -> Option<ResourceDesc> {
        self.images.read().get_ref(handle).map(|i| i.desc)
    }

    fn image_view(&self, handle: Handle<ImageView>) -> Option<ResourceDesc> {
        self.views.read().get_ref(handle).map(|v| v.desc)
    }
}
