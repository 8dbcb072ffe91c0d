use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use std::hash::{Hash, Hasher};

#[cfg(feature = "dashi-serde")]
use serde::{Deserialize, Serialize};

/// Declares a `#[repr(u32)]` enum plus a `from_raw` decoder, so values can be
/// packed into plain-old-data opcode payloads and read back safely.
macro_rules! packed_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident = $value:expr),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(u32)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $value),+
        }

        impl $name {
            pub fn from_raw(raw: u32) -> Option<Self> {
                match raw {
                    $(x if x == $value => Some($name::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

packed_enum! {
    #[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
    pub enum Format {
        R8Unorm = 0,
        R8Uint = 1,
        R8Sint = 2,
        RG8Unorm = 3,
        #[default]
        RGBA8Unorm = 4,
        RGBA8Srgb = 5,
        BGRA8Unorm = 6,
        BGRA8Srgb = 7,
        RGBA16Float = 8,
        RGBA32Float = 9,
        R32Float = 10,
        R32Uint = 11,
        D16Unorm = 12,
        D32Float = 13,
        D24UnormS8Uint = 14,
        D32FloatS8Uint = 15,
    }
}

impl Format {
    pub fn has_depth(self) -> bool {
        matches!(
            self,
            Format::D16Unorm | Format::D32Float | Format::D24UnormS8Uint | Format::D32FloatS8Uint
        )
    }

    pub fn has_stencil(self) -> bool {
        matches!(self, Format::D24UnormS8Uint | Format::D32FloatS8Uint)
    }

    pub fn is_color(self) -> bool {
        !self.has_depth() && !self.has_stencil()
    }

    pub fn is_integer(self) -> bool {
        matches!(self, Format::R8Uint | Format::R8Sint | Format::R32Uint)
    }

    pub fn aspects(self) -> AspectMask {
        let mut mask = AspectMask::empty();
        if self.is_color() {
            mask |= AspectMask::COLOR;
        }
        if self.has_depth() {
            mask |= AspectMask::DEPTH;
        }
        if self.has_stencil() {
            mask |= AspectMask::STENCIL;
        }
        mask
    }
}

packed_enum! {
    #[derive(Hash, Debug, Copy, Clone, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
    pub enum SampleCount {
        #[default]
        S1 = 1,
        S2 = 2,
        S4 = 4,
        S8 = 8,
        S16 = 16,
    }
}

impl SampleCount {
    pub fn count(self) -> u32 {
        self as u32
    }
}

packed_enum! {
    #[derive(Hash, Debug, Copy, Clone, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
    pub enum LoadOp {
        Load = 0,
        Clear = 1,
        #[default]
        DontCare = 2,
    }
}

packed_enum! {
    #[derive(Hash, Debug, Copy, Clone, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
    pub enum StoreOp {
        Store = 0,
        #[default]
        DontCare = 1,
    }
}

/// Image layouts. Implicit backends have no layouts; these are tracked only
/// so barriers and attachment descriptions round-trip.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
pub enum Layout {
    #[default]
    Undefined,
    General,
    ShaderReadOnly,
    ColorAttachment,
    DepthStencilAttachment,
    DepthStencilReadOnly,
    TransferSrc,
    TransferDst,
    Present,
}

packed_enum! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
    pub enum Filter {
        #[default]
        Nearest = 0,
        Linear = 1,
    }
}

packed_enum! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
    pub enum IndexType {
        U16 = 0,
        #[default]
        U32 = 1,
    }
}

impl IndexType {
    pub fn size(self) -> u64 {
        match self {
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

packed_enum! {
    #[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
    pub enum Topology {
        PointList = 0,
        LineList = 1,
        LineStrip = 2,
        #[default]
        TriangleList = 3,
        TriangleStrip = 4,
        TriangleFan = 5,
        PatchList = 6,
    }
}

packed_enum! {
    #[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
    pub enum CullMode {
        None = 0,
        Front = 1,
        #[default]
        Back = 2,
        FrontAndBack = 3,
    }
}

packed_enum! {
    #[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
    pub enum VertexOrdering {
        #[default]
        CounterClockwise = 0,
        Clockwise = 1,
    }
}

packed_enum! {
    #[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
    pub enum PolygonMode {
        #[default]
        Fill = 0,
        Line = 1,
        Point = 2,
    }
}

packed_enum! {
    #[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
    pub enum CompareOp {
        Never = 0,
        #[default]
        Less = 1,
        Equal = 2,
        LessOrEqual = 3,
        Greater = 4,
        NotEqual = 5,
        GreaterOrEqual = 6,
        Always = 7,
    }
}

packed_enum! {
    #[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
    pub enum StencilOp {
        #[default]
        Keep = 0,
        Zero = 1,
        Replace = 2,
        IncrementAndClamp = 3,
        DecrementAndClamp = 4,
        Invert = 5,
        IncrementAndWrap = 6,
        DecrementAndWrap = 7,
    }
}

packed_enum! {
    #[derive(Hash, Debug, Copy, Clone, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
    pub enum BlendFactor {
        #[default]
        One = 0,
        Zero = 1,
        SrcColor = 2,
        InvSrcColor = 3,
        SrcAlpha = 4,
        InvSrcAlpha = 5,
        DstAlpha = 6,
        InvDstAlpha = 7,
        DstColor = 8,
        InvDstColor = 9,
        BlendFactor = 10,
    }
}

packed_enum! {
    #[derive(Hash, Debug, Copy, Clone, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
    pub enum BlendOp {
        #[default]
        Add = 0,
        Subtract = 1,
        InvSubtract = 2,
        Min = 3,
        Max = 4,
    }
}

packed_enum! {
    #[derive(Hash, Debug, Copy, Clone, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
    pub enum BindPoint {
        #[default]
        Graphics = 0,
        Compute = 1,
    }
}

packed_enum! {
    #[derive(Hash, Debug, Copy, Clone, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
    pub enum SubpassContents {
        #[default]
        Inline = 0,
        SecondaryCommandBuffers = 1,
    }
}

/// Where a backend puts its window-space origin. Bottom-left backends need
/// viewports, scissors and render areas flipped against the framebuffer
/// height.
#[derive(Hash, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
pub enum Origin {
    TopLeft,
    #[default]
    BottomLeft,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
    pub struct ColorWriteMask: u32 {
        const R = 1 << 0;
        const G = 1 << 1;
        const B = 1 << 2;
        const A = 1 << 3;
        const ALL = Self::R.bits() | Self::G.bits() | Self::B.bits() | Self::A.bits();
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
    pub struct AspectMask: u32 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
    pub struct StencilFaces: u32 {
        const FRONT = 1 << 0;
        const BACK = 1 << 1;
        const FRONT_AND_BACK = Self::FRONT.bits() | Self::BACK.bits();
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const TESSELLATION_CONTROL = 1 << 1;
        const TESSELLATION_EVALUATION = 1 << 2;
        const GEOMETRY = 1 << 3;
        const FRAGMENT = 1 << 4;
        const COMPUTE = 1 << 5;
        const ALL_GRAPHICS = Self::VERTEX.bits()
            | Self::TESSELLATION_CONTROL.bits()
            | Self::TESSELLATION_EVALUATION.bits()
            | Self::GEOMETRY.bits()
            | Self::FRAGMENT.bits();
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
    pub struct PipelineStages: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const DRAW_INDIRECT = 1 << 1;
        const VERTEX_INPUT = 1 << 2;
        const VERTEX_SHADER = 1 << 3;
        const FRAGMENT_SHADER = 1 << 4;
        const EARLY_FRAGMENT_TESTS = 1 << 5;
        const LATE_FRAGMENT_TESTS = 1 << 6;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 7;
        const COMPUTE_SHADER = 1 << 8;
        const TRANSFER = 1 << 9;
        const BOTTOM_OF_PIPE = 1 << 10;
        const HOST = 1 << 11;
        const ALL_GRAPHICS = 1 << 12;
        const ALL_COMMANDS = 1 << 13;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
    pub struct AccessFlags: u32 {
        const INDIRECT_COMMAND_READ = 1 << 0;
        const INDEX_READ = 1 << 1;
        const VERTEX_ATTRIBUTE_READ = 1 << 2;
        const UNIFORM_READ = 1 << 3;
        const SHADER_READ = 1 << 4;
        const SHADER_WRITE = 1 << 5;
        const COLOR_ATTACHMENT_READ = 1 << 6;
        const COLOR_ATTACHMENT_WRITE = 1 << 7;
        const DEPTH_STENCIL_READ = 1 << 8;
        const DEPTH_STENCIL_WRITE = 1 << 9;
        const TRANSFER_READ = 1 << 10;
        const TRANSFER_WRITE = 1 << 11;
        const HOST_READ = 1 << 12;
        const HOST_WRITE = 1 << 13;
        const MEMORY_READ = 1 << 14;
        const MEMORY_WRITE = 1 << 15;
    }

    /// Coarse memory-barrier classes understood by implicit backends.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
    pub struct BarrierBits: u32 {
        const VERTEX_ATTRIB = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
        const TEXTURE_FETCH = 1 << 3;
        const SHADER_IMAGE = 1 << 4;
        const COMMAND = 1 << 5;
        const TRANSFER = 1 << 6;
        const FRAMEBUFFER = 1 << 7;
        const SHADER_STORAGE = 1 << 8;
        const CLIENT_MAPPED = 1 << 9;
    }
}

impl BarrierBits {
    /// Everything the destination accesses need to observe.
    pub fn from_dst_access(access: AccessFlags) -> Self {
        let mut bits = BarrierBits::empty();
        if access.contains(AccessFlags::INDIRECT_COMMAND_READ) {
            bits |= BarrierBits::COMMAND;
        }
        if access.contains(AccessFlags::INDEX_READ) {
            bits |= BarrierBits::INDEX;
        }
        if access.contains(AccessFlags::VERTEX_ATTRIBUTE_READ) {
            bits |= BarrierBits::VERTEX_ATTRIB;
        }
        if access.contains(AccessFlags::UNIFORM_READ) {
            bits |= BarrierBits::UNIFORM;
        }
        if access.contains(AccessFlags::SHADER_READ) {
            bits |= BarrierBits::TEXTURE_FETCH | BarrierBits::SHADER_STORAGE;
        }
        if access.contains(AccessFlags::SHADER_WRITE) {
            bits |= BarrierBits::SHADER_IMAGE | BarrierBits::SHADER_STORAGE;
        }
        if access.intersects(
            AccessFlags::COLOR_ATTACHMENT_READ
                | AccessFlags::COLOR_ATTACHMENT_WRITE
                | AccessFlags::DEPTH_STENCIL_READ
                | AccessFlags::DEPTH_STENCIL_WRITE,
        ) {
            bits |= BarrierBits::FRAMEBUFFER;
        }
        if access.intersects(AccessFlags::TRANSFER_READ | AccessFlags::TRANSFER_WRITE) {
            bits |= BarrierBits::TRANSFER;
        }
        if access.intersects(AccessFlags::HOST_READ | AccessFlags::HOST_WRITE) {
            bits |= BarrierBits::CLIENT_MAPPED;
        }
        if access.intersects(AccessFlags::MEMORY_READ | AccessFlags::MEMORY_WRITE) {
            bits = BarrierBits::all();
        }
        bits
    }
}

#[derive(Debug, Hash, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

#[repr(C)]
#[derive(Debug, Hash, Default, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
pub struct Rect2D {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

impl Rect2D {
    pub const fn new(x: i32, y: i32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn contains(&self, other: &Rect2D) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.x as i64 + other.w as i64 <= self.x as i64 + self.w as i64
            && other.y as i64 + other.h as i64 <= self.y as i64 + self.h as i64
    }

    /// Mirrors the rectangle vertically inside a surface `height` tall.
    pub fn flipped(&self, height: u32) -> Rect2D {
        let y = height as i64 - (self.y as i64 + self.h as i64);
        Rect2D {
            y: y.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            ..*self
        }
    }
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Pod, Zeroable)]
#[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
pub struct Offset3D {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Pod, Zeroable)]
#[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
pub struct Extent3D {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 1024.0,
            height: 1024.0,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

impl Viewport {
    /// Mirrors the viewport vertically inside a surface `height` tall.
    /// Negative heights are normalized first.
    pub fn flipped(&self, height: u32) -> Viewport {
        let (y, h) = if self.height < 0.0 {
            (self.y + self.height, -self.height)
        } else {
            (self.y, self.height)
        };
        Viewport {
            y: height as f32 - (y + h),
            height: h,
            ..*self
        }
    }
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Pod, Zeroable)]
#[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
pub struct DepthBias {
    pub constant_factor: f32,
    pub clamp: f32,
    pub slope_factor: f32,
}

//===----------------------------------------------------------------------===//
// Clear values
//===----------------------------------------------------------------------===//

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
pub enum ClearValue {
    Color([f32; 4]),
    IntColor([i32; 4]),
    UintColor([u32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

impl Default for ClearValue {
    fn default() -> Self {
        ClearValue::Color([0.0, 0.0, 0.0, 1.0])
    }
}

impl Hash for ClearValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_raw().hash(state);
    }
}

impl ClearValue {
    pub fn is_color(&self) -> bool {
        !matches!(self, ClearValue::DepthStencil { .. })
    }

    pub fn to_raw(&self) -> RawClearValue {
        match *self {
            ClearValue::Color(c) => RawClearValue {
                kind: 0,
                words: c.map(f32::to_bits),
                stencil: 0,
            },
            ClearValue::IntColor(c) => RawClearValue {
                kind: 1,
                words: c.map(|v| v as u32),
                stencil: 0,
            },
            ClearValue::UintColor(c) => RawClearValue {
                kind: 2,
                words: c,
                stencil: 0,
            },
            ClearValue::DepthStencil { depth, stencil } => RawClearValue {
                kind: 3,
                words: [depth.to_bits(), 0, 0, 0],
                stencil,
            },
        }
    }

    pub fn from_raw(raw: &RawClearValue) -> Option<Self> {
        match raw.kind {
            0 => Some(ClearValue::Color(raw.words.map(f32::from_bits))),
            1 => Some(ClearValue::IntColor(raw.words.map(|v| v as i32))),
            2 => Some(ClearValue::UintColor(raw.words)),
            3 => Some(ClearValue::DepthStencil {
                depth: f32::from_bits(raw.words[0]),
                stencil: raw.stencil,
            }),
            _ => None,
        }
    }
}

/// Bit-exact clear value as stored in command lists.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct RawClearValue {
    pub kind: u32,
    pub words: [u32; 4],
    pub stencil: u32,
}

//===----------------------------------------------------------------------===//
// Fixed-function pipeline state
//===----------------------------------------------------------------------===//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
pub struct BlendState {
    pub enable: bool,
    pub src_blend: BlendFactor,
    pub dst_blend: BlendFactor,
    pub blend_op: BlendOp,
    pub src_alpha_blend: BlendFactor,
    pub dst_alpha_blend: BlendFactor,
    pub alpha_blend_op: BlendOp,
    pub write_mask: ColorWriteMask,
}

impl Default for BlendState {
    fn default() -> Self {
        Self {
            enable: false,
            src_blend: BlendFactor::One,
            dst_blend: BlendFactor::Zero,
            blend_op: BlendOp::Add,
            src_alpha_blend: BlendFactor::One,
            dst_alpha_blend: BlendFactor::Zero,
            alpha_blend_op: BlendOp::Add,
            write_mask: ColorWriteMask::ALL,
        }
    }
}

impl BlendState {
    pub fn alpha_blend() -> Self {
        Self {
            enable: true,
            src_blend: BlendFactor::SrcAlpha,
            dst_blend: BlendFactor::InvSrcAlpha,
            src_alpha_blend: BlendFactor::SrcAlpha,
            dst_alpha_blend: BlendFactor::InvSrcAlpha,
            ..Default::default()
        }
    }

    pub(crate) fn pack(&self) -> [u32; 8] {
        [
            self.enable as u32,
            self.src_blend as u32,
            self.dst_blend as u32,
            self.blend_op as u32,
            self.src_alpha_blend as u32,
            self.dst_alpha_blend as u32,
            self.alpha_blend_op as u32,
            self.write_mask.bits(),
        ]
    }

    pub(crate) fn unpack(w: &[u32; 8]) -> Option<Self> {
        Some(Self {
            enable: w[0] != 0,
            src_blend: BlendFactor::from_raw(w[1])?,
            dst_blend: BlendFactor::from_raw(w[2])?,
            blend_op: BlendOp::from_raw(w[3])?,
            src_alpha_blend: BlendFactor::from_raw(w[4])?,
            dst_alpha_blend: BlendFactor::from_raw(w[5])?,
            alpha_blend_op: BlendOp::from_raw(w[6])?,
            write_mask: ColorWriteMask::from_bits(w[7])?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
pub struct StencilFaceState {
    pub fail_op: StencilOp,
    pub pass_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub compare: CompareOp,
}

impl StencilFaceState {
    fn pack(&self) -> [u32; 4] {
        [
            self.fail_op as u32,
            self.pass_op as u32,
            self.depth_fail_op as u32,
            self.compare as u32,
        ]
    }

    fn unpack(w: &[u32]) -> Option<Self> {
        Some(Self {
            fail_op: StencilOp::from_raw(w[0])?,
            pass_op: StencilOp::from_raw(w[1])?,
            depth_fail_op: StencilOp::from_raw(w[2])?,
            compare: CompareOp::from_raw(w[3])?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
pub struct DepthStencilState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: CompareOp,
    pub stencil_test: bool,
    pub front: StencilFaceState,
    pub back: StencilFaceState,
}

impl DepthStencilState {
    pub(crate) fn pack(&self) -> [u32; 12] {
        let mut w = [0u32; 12];
        w[0] = self.depth_test as u32;
        w[1] = self.depth_write as u32;
        w[2] = self.depth_compare as u32;
        w[3] = self.stencil_test as u32;
        w[4..8].copy_from_slice(&self.front.pack());
        w[8..12].copy_from_slice(&self.back.pack());
        w
    }

    pub(crate) fn unpack(w: &[u32; 12]) -> Option<Self> {
        Some(Self {
            depth_test: w[0] != 0,
            depth_write: w[1] != 0,
            depth_compare: CompareOp::from_raw(w[2])?,
            stencil_test: w[3] != 0,
            front: StencilFaceState::unpack(&w[4..8])?,
            back: StencilFaceState::unpack(&w[8..12])?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
pub struct RasterState {
    pub culling: CullMode,
    pub front_face: VertexOrdering,
    pub polygon_mode: PolygonMode,
    pub depth_bias_enable: bool,
    pub depth_clamp: bool,
    pub rasterizer_discard: bool,
}

impl RasterState {
    pub(crate) fn pack(&self) -> [u32; 6] {
        [
            self.culling as u32,
            self.front_face as u32,
            self.polygon_mode as u32,
            self.depth_bias_enable as u32,
            self.depth_clamp as u32,
            self.rasterizer_discard as u32,
        ]
    }

    pub(crate) fn unpack(w: &[u32; 6]) -> Option<Self> {
        Some(Self {
            culling: CullMode::from_raw(w[0])?,
            front_face: VertexOrdering::from_raw(w[1])?,
            polygon_mode: PolygonMode::from_raw(w[2])?,
            depth_bias_enable: w[3] != 0,
            depth_clamp: w[4] != 0,
            rasterizer_discard: w[5] != 0,
        })
    }
}

//===----------------------------------------------------------------------===//
// Transfer regions
//===----------------------------------------------------------------------===//

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct BufferCopy {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct ImageSubresourceLayers {
    /// [`AspectMask`] bits.
    pub aspect: u32,
    pub mip_level: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

impl Default for ImageSubresourceLayers {
    fn default() -> Self {
        Self::color()
    }
}

impl ImageSubresourceLayers {
    pub fn color() -> Self {
        Self {
            aspect: AspectMask::COLOR.bits(),
            mip_level: 0,
            base_layer: 0,
            layer_count: 1,
        }
    }

    pub fn aspect_mask(&self) -> AspectMask {
        AspectMask::from_bits_truncate(self.aspect)
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct SubresourceRange {
    pub aspect: u32,
    pub base_mip: u32,
    pub level_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

impl Default for SubresourceRange {
    fn default() -> Self {
        Self {
            aspect: AspectMask::COLOR.bits(),
            base_mip: 0,
            level_count: 1,
            base_layer: 0,
            layer_count: 1,
        }
    }
}

impl SubresourceRange {
    pub fn aspect_mask(&self) -> AspectMask {
        AspectMask::from_bits_truncate(self.aspect)
    }
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct ImageCopy {
    pub src_subresource: ImageSubresourceLayers,
    pub src_offset: Offset3D,
    pub dst_subresource: ImageSubresourceLayers,
    pub dst_offset: Offset3D,
    pub extent: Extent3D,
}

/// Multisample resolves share the copy region layout.
pub type ImageResolve = ImageCopy;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct BufferImageCopy {
    pub buffer_offset: u64,
    pub buffer_row_length: u32,
    pub buffer_image_height: u32,
    pub image_subresource: ImageSubresourceLayers,
    pub image_offset: Offset3D,
    pub image_extent: Extent3D,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct ImageBlit {
    pub src_subresource: ImageSubresourceLayers,
    pub src_offsets: [Offset3D; 2],
    pub dst_subresource: ImageSubresourceLayers,
    pub dst_offsets: [Offset3D; 2],
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct ClearRect {
    pub rect: Rect2D,
    pub base_layer: u32,
    pub layer_count: u32,
}

/// One attachment to clear inside the current subpass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearAttachment {
    pub aspect: AspectMask,
    /// Index into the subpass's color attachments; ignored for depth/stencil.
    pub color_attachment: u32,
    pub value: ClearValue,
}
