//! Conversions between this crate's vocabulary and `ash::vk`, for front
//! ends that receive explicit-API structures and forward them here.

use ash::vk;

use super::error::{GPUError, ResultCode};
use super::structs::*;

impl From<ResultCode> for vk::Result {
    fn from(code: ResultCode) -> Self {
        vk::Result::from_raw(code.as_raw())
    }
}

impl From<&GPUError> for vk::Result {
    fn from(err: &GPUError) -> Self {
        err.code().into()
    }
}

impl From<Format> for vk::Format {
    fn from(format: Format) -> Self {
        match format {
            Format::R8Unorm => vk::Format::R8_UNORM,
            Format::R8Uint => vk::Format::R8_UINT,
            Format::R8Sint => vk::Format::R8_SINT,
            Format::RG8Unorm => vk::Format::R8G8_UNORM,
            Format::RGBA8Unorm => vk::Format::R8G8B8A8_UNORM,
            Format::RGBA8Srgb => vk::Format::R8G8B8A8_SRGB,
            Format::BGRA8Unorm => vk::Format::B8G8R8A8_UNORM,
            Format::BGRA8Srgb => vk::Format::B8G8R8A8_SRGB,
            Format::RGBA16Float => vk::Format::R16G16B16A16_SFLOAT,
            Format::RGBA32Float => vk::Format::R32G32B32A32_SFLOAT,
            Format::R32Float => vk::Format::R32_SFLOAT,
            Format::R32Uint => vk::Format::R32_UINT,
            Format::D16Unorm => vk::Format::D16_UNORM,
            Format::D32Float => vk::Format::D32_SFLOAT,
            Format::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
            Format::D32FloatS8Uint => vk::Format::D32_SFLOAT_S8_UINT,
        }
    }
}

impl TryFrom<vk::Format> for Format {
    type Error = GPUError;

    fn try_from(format: vk::Format) -> Result<Self, Self::Error> {
        Ok(match format {
            vk::Format::R8_UNORM => Format::R8Unorm,
            vk::Format::R8_UINT => Format::R8Uint,
            vk::Format::R8_SINT => Format::R8Sint,
            vk::Format::R8G8_UNORM => Format::RG8Unorm,
            vk::Format::R8G8B8A8_UNORM => Format::RGBA8Unorm,
            vk::Format::R8G8B8A8_SRGB => Format::RGBA8Srgb,
            vk::Format::B8G8R8A8_UNORM => Format::BGRA8Unorm,
            vk::Format::B8G8R8A8_SRGB => Format::BGRA8Srgb,
            vk::Format::R16G16B16A16_SFLOAT => Format::RGBA16Float,
            vk::Format::R32G32B32A32_SFLOAT => Format::RGBA32Float,
            vk::Format::R32_SFLOAT => Format::R32Float,
            vk::Format::R32_UINT => Format::R32Uint,
            vk::Format::D16_UNORM => Format::D16Unorm,
            vk::Format::D32_SFLOAT => Format::D32Float,
            vk::Format::D24_UNORM_S8_UINT => Format::D24UnormS8Uint,
            vk::Format::D32_SFLOAT_S8_UINT => Format::D32FloatS8Uint,
            other => {
                return Err(GPUError::Validation(format!(
                    "no equivalent for {other:?}"
                )))
            }
        })
    }
}

impl From<SampleCount> for vk::SampleCountFlags {
    fn from(samples: SampleCount) -> Self {
        vk::SampleCountFlags::from_raw(samples.count())
    }
}

impl TryFrom<vk::SampleCountFlags> for SampleCount {
    type Error = GPUError;

    fn try_from(flags: vk::SampleCountFlags) -> Result<Self, Self::Error> {
        SampleCount::from_raw(flags.as_raw())
            .ok_or_else(|| GPUError::Validation(format!("invalid sample count {flags:?}")))
    }
}

impl From<LoadOp> for vk::AttachmentLoadOp {
    fn from(op: LoadOp) -> Self {
        match op {
            LoadOp::Load => vk::AttachmentLoadOp::LOAD,
            LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
            LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
        }
    }
}

impl From<vk::AttachmentLoadOp> for LoadOp {
    fn from(op: vk::AttachmentLoadOp) -> Self {
        match op {
            vk::AttachmentLoadOp::LOAD => LoadOp::Load,
            vk::AttachmentLoadOp::CLEAR => LoadOp::Clear,
            _ => LoadOp::DontCare,
        }
    }
}

impl From<StoreOp> for vk::AttachmentStoreOp {
    fn from(op: StoreOp) -> Self {
        match op {
            StoreOp::Store => vk::AttachmentStoreOp::STORE,
            StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
        }
    }
}

impl From<vk::AttachmentStoreOp> for StoreOp {
    fn from(op: vk::AttachmentStoreOp) -> Self {
        match op {
            vk::AttachmentStoreOp::STORE => StoreOp::Store,
            _ => StoreOp::DontCare,
        }
    }
}

impl From<Filter> for vk::Filter {
    fn from(filter: Filter) -> Self {
        match filter {
            Filter::Nearest => vk::Filter::NEAREST,
            Filter::Linear => vk::Filter::LINEAR,
        }
    }
}

impl From<vk::Filter> for Filter {
    fn from(filter: vk::Filter) -> Self {
        match filter {
            vk::Filter::LINEAR => Filter::Linear,
            _ => Filter::Nearest,
        }
    }
}

impl From<IndexType> for vk::IndexType {
    fn from(ty: IndexType) -> Self {
        match ty {
            IndexType::U16 => vk::IndexType::UINT16,
            IndexType::U32 => vk::IndexType::UINT32,
        }
    }
}

impl TryFrom<vk::IndexType> for IndexType {
    type Error = GPUError;

    fn try_from(ty: vk::IndexType) -> Result<Self, Self::Error> {
        match ty {
            vk::IndexType::UINT16 => Ok(IndexType::U16),
            vk::IndexType::UINT32 => Ok(IndexType::U32),
            other => Err(GPUError::FeatureNotPresent(match other {
                vk::IndexType::UINT8_EXT => "8-bit indices",
                _ => "index type",
            })),
        }
    }
}

impl From<Topology> for vk::PrimitiveTopology {
    fn from(topology: Topology) -> Self {
        match topology {
            Topology::PointList => vk::PrimitiveTopology::POINT_LIST,
            Topology::LineList => vk::PrimitiveTopology::LINE_LIST,
            Topology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
            Topology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            Topology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
            Topology::TriangleFan => vk::PrimitiveTopology::TRIANGLE_FAN,
            Topology::PatchList => vk::PrimitiveTopology::PATCH_LIST,
        }
    }
}

impl TryFrom<vk::PrimitiveTopology> for Topology {
    type Error = GPUError;

    fn try_from(topology: vk::PrimitiveTopology) -> Result<Self, Self::Error> {
        Ok(match topology {
            vk::PrimitiveTopology::POINT_LIST => Topology::PointList,
            vk::PrimitiveTopology::LINE_LIST => Topology::LineList,
            vk::PrimitiveTopology::LINE_STRIP => Topology::LineStrip,
            vk::PrimitiveTopology::TRIANGLE_LIST => Topology::TriangleList,
            vk::PrimitiveTopology::TRIANGLE_STRIP => Topology::TriangleStrip,
            vk::PrimitiveTopology::TRIANGLE_FAN => Topology::TriangleFan,
            vk::PrimitiveTopology::PATCH_LIST => Topology::PatchList,
            _ => return Err(GPUError::FeatureNotPresent("adjacency topologies")),
        })
    }
}

impl From<CompareOp> for vk::CompareOp {
    fn from(op: CompareOp) -> Self {
        vk::CompareOp::from_raw(op as i32)
    }
}

impl From<AspectMask> for vk::ImageAspectFlags {
    fn from(mask: AspectMask) -> Self {
        let mut flags = vk::ImageAspectFlags::empty();
        if mask.contains(AspectMask::COLOR) {
            flags |= vk::ImageAspectFlags::COLOR;
        }
        if mask.contains(AspectMask::DEPTH) {
            flags |= vk::ImageAspectFlags::DEPTH;
        }
        if mask.contains(AspectMask::STENCIL) {
            flags |= vk::ImageAspectFlags::STENCIL;
        }
        flags
    }
}

impl From<vk::ImageAspectFlags> for AspectMask {
    fn from(flags: vk::ImageAspectFlags) -> Self {
        let mut mask = AspectMask::empty();
        if flags.contains(vk::ImageAspectFlags::COLOR) {
            mask |= AspectMask::COLOR;
        }
        if flags.contains(vk::ImageAspectFlags::DEPTH) {
            mask |= AspectMask::DEPTH;
        }
        if flags.contains(vk::ImageAspectFlags::STENCIL) {
            mask |= AspectMask::STENCIL;
        }
        mask
    }
}

impl From<Rect2D> for vk::Rect2D {
    fn from(rect: Rect2D) -> Self {
        vk::Rect2D {
            offset: vk::Offset2D {
                x: rect.x,
                y: rect.y,
            },
            extent: vk::Extent2D {
                width: rect.w,
                height: rect.h,
            },
        }
    }
}

impl From<vk::Rect2D> for Rect2D {
    fn from(rect: vk::Rect2D) -> Self {
        Rect2D::new(rect.offset.x, rect.offset.y, rect.extent.width, rect.extent.height)
    }
}

impl From<vk::Viewport> for Viewport {
    fn from(vp: vk::Viewport) -> Self {
        Viewport {
            x: vp.x,
            y: vp.y,
            width: vp.width,
            height: vp.height,
            min_depth: vp.min_depth,
            max_depth: vp.max_depth,
        }
    }
}

impl From<Viewport> for vk::Viewport {
    fn from(vp: Viewport) -> Self {
        vk::Viewport {
            x: vp.x,
            y: vp.y,
            width: vp.width,
            height: vp.height,
            min_depth: vp.min_depth,
            max_depth: vp.max_depth,
        }
    }
}

impl From<vk::ClearValue> for RawClearValue {
    /// `vk::ClearValue` is an untagged union, so the result is tagged as a
    /// float color; callers that know better retag it.
    fn from(value: vk::ClearValue) -> Self {
        // SAFETY: every variant of the union is plain 16 bytes of data.
        let words = unsafe { value.color.uint32 };
        RawClearValue {
            kind: 0,
            words,
            stencil: 0,
        }
    }
}
