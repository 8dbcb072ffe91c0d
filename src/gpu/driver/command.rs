use bytemuck::{Pod, Zeroable};
use smallvec::SmallVec;

use crate::gpu::structs::{RawClearValue, Rect2D};

use super::types::NativeId;

//===----------------------------------------------------------------------===//
// Command definitions
//===----------------------------------------------------------------------===//

/// Opcode tag. The discriminant doubles as the index into the replay
/// dispatch table, so the numbering must stay dense.
#[repr(u16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Op {
    BindGraphicsPipeline = 0,
    BindComputePipeline = 1,
    BindVertexBuffers = 2,
    BindIndexBuffer = 3,
    BindDescriptorSet = 4,
    PushConstants = 5,
    SetViewport = 6,
    SetScissor = 7,
    SetLineWidth = 8,
    SetDepthBias = 9,
    SetBlendConstants = 10,
    SetStencilReference = 11,
    SetStencilCompareMask = 12,
    SetStencilWriteMask = 13,
    Draw = 14,
    DrawIndexed = 15,
    DrawIndirect = 16,
    DrawIndexedIndirect = 17,
    Dispatch = 18,
    DispatchIndirect = 19,
    CopyBuffer = 20,
    CopyImage = 21,
    CopyBufferToImage = 22,
    CopyImageToBuffer = 23,
    BlitImage = 24,
    ResolveImage = 25,
    UpdateBuffer = 26,
    FillBuffer = 27,
    ClearColorImage = 28,
    ClearDepthStencilImage = 29,
    BeginRenderPass = 30,
    NextSubpass = 31,
    EndRenderPass = 32,
    ClearAttachments = 33,
    PipelineBarrier = 34,
    SetEvent = 35,
    ResetEvent = 36,
    WaitEvents = 37,
    ExecuteCommands = 38,
    DebugMarkerBegin = 39,
    DebugMarkerEnd = 40,
}

impl Op {
    pub const COUNT: usize = 41;

    pub const ALL: [Op; Op::COUNT] = [
        Op::BindGraphicsPipeline,
        Op::BindComputePipeline,
        Op::BindVertexBuffers,
        Op::BindIndexBuffer,
        Op::BindDescriptorSet,
        Op::PushConstants,
        Op::SetViewport,
        Op::SetScissor,
        Op::SetLineWidth,
        Op::SetDepthBias,
        Op::SetBlendConstants,
        Op::SetStencilReference,
        Op::SetStencilCompareMask,
        Op::SetStencilWriteMask,
        Op::Draw,
        Op::DrawIndexed,
        Op::DrawIndirect,
        Op::DrawIndexedIndirect,
        Op::Dispatch,
        Op::DispatchIndirect,
        Op::CopyBuffer,
        Op::CopyImage,
        Op::CopyBufferToImage,
        Op::CopyImageToBuffer,
        Op::BlitImage,
        Op::ResolveImage,
        Op::UpdateBuffer,
        Op::FillBuffer,
        Op::ClearColorImage,
        Op::ClearDepthStencilImage,
        Op::BeginRenderPass,
        Op::NextSubpass,
        Op::EndRenderPass,
        Op::ClearAttachments,
        Op::PipelineBarrier,
        Op::SetEvent,
        Op::ResetEvent,
        Op::WaitEvents,
        Op::ExecuteCommands,
        Op::DebugMarkerBegin,
        Op::DebugMarkerEnd,
    ];

    pub fn from_u16(v: u16) -> Option<Self> {
        Op::ALL.get(v as usize).copied()
    }

    /// Opcodes only legal inside a render pass instance.
    pub fn is_render_pass_scoped(self) -> bool {
        matches!(
            self,
            Op::Draw
                | Op::DrawIndexed
                | Op::DrawIndirect
                | Op::DrawIndexedIndirect
                | Op::NextSubpass
                | Op::EndRenderPass
                | Op::ClearAttachments
        )
    }
}

/// Byte range into a command list's side arena.
#[repr(C)]
#[derive(Default, Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq, Hash)]
pub struct DataRange {
    pub offset: u32,
    pub len: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct BindGraphicsPipeline {
    pub program: NativeId,
    pub pipeline: u32,
    pub topology: u32,
    pub blend: [u32; 8],
    pub depth_stencil: [u32; 12],
    pub raster: [u32; 6],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct BindComputePipeline {
    pub program: NativeId,
    pub pipeline: u32,
    pub padding: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct VertexBufferBinding {
    pub buffer: NativeId,
    pub offset: u64,
    pub handle: u32,
    pub padding: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct BindVertexBuffers {
    pub first_binding: u32,
    pub padding: u32,
    /// [`VertexBufferBinding`] array.
    pub bindings: DataRange,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct BindIndexBuffer {
    pub buffer: NativeId,
    pub offset: u64,
    pub handle: u32,
    pub index_type: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct BindDescriptorSet {
    pub set: NativeId,
    pub index: u32,
    pub bind_point: u32,
    /// `u32` dynamic offsets.
    pub dynamic_offsets: DataRange,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct PushConstants {
    pub offset: u32,
    pub stages: u32,
    pub data: DataRange,
}

/// Shared by `SetViewport` and `SetScissor`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct SetViewports {
    pub first: u32,
    pub padding: u32,
    pub values: DataRange,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq)]
pub struct SetLineWidth {
    pub width: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq)]
pub struct SetBlendConstants {
    pub constants: [f32; 4],
}

/// Shared by the three stencil dynamic-state opcodes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct SetStencilValue {
    pub faces: u32,
    pub value: u32,
}

#[repr(C)]
#[derive(Default, Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct Draw {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

#[repr(C)]
#[derive(Default, Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct DrawIndexed {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
    pub padding: u32,
}

/// Shared by both indirect draw opcodes.
#[repr(C)]
#[derive(Default, Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct DrawIndirect {
    pub buffer: NativeId,
    pub offset: u64,
    pub handle: u32,
    pub draw_count: u32,
    pub stride: u32,
    pub padding: u32,
}

#[repr(C)]
#[derive(Default, Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct Dispatch {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub padding: u32,
}

#[repr(C)]
#[derive(Default, Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct DispatchIndirect {
    pub buffer: NativeId,
    pub offset: u64,
    pub handle: u32,
    pub padding: u32,
}

/// Two-resource transfer. Regions live in the side arena; their element type
/// depends on the opcode.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct Transfer {
    pub src: NativeId,
    pub dst: NativeId,
    pub src_handle: u32,
    pub dst_handle: u32,
    pub regions: DataRange,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct BlitImage {
    pub transfer: Transfer,
    pub filter: u32,
    pub padding: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct UpdateBuffer {
    pub dst: NativeId,
    pub offset: u64,
    pub handle: u32,
    pub padding: u32,
    pub data: DataRange,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct FillBuffer {
    pub dst: NativeId,
    pub offset: u64,
    pub size: u64,
    pub handle: u32,
    pub value: u32,
}

/// Shared by both image-clear opcodes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct ClearImage {
    pub image: NativeId,
    pub handle: u32,
    pub padding: u32,
    pub value: RawClearValue,
    /// `SubresourceRange` array.
    pub ranges: DataRange,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct BeginRenderPass {
    pub render_pass: u32,
    pub framebuffer: u32,
    pub render_area: Rect2D,
    /// [`RawClearValue`] array.
    pub clear_values: DataRange,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct NextSubpass {
    pub contents: u32,
    pub padding: u32,
}

#[repr(C)]
#[derive(Default, Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct EndRenderPass {
    padding: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct PackedClearAttachment {
    pub aspect: u32,
    pub color_attachment: u32,
    pub value: RawClearValue,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct ClearAttachments {
    /// [`PackedClearAttachment`] array.
    pub attachments: DataRange,
    /// `ClearRect` array.
    pub rects: DataRange,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct PipelineBarrier {
    pub src_stages: u32,
    pub dst_stages: u32,
    pub barriers: u32,
    pub padding: u32,
}

/// Shared by `SetEvent` and `ResetEvent`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct EventOp {
    pub event: u32,
    pub stages: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct WaitEvents {
    /// Raw event handles.
    pub events: DataRange,
    pub src_stages: u32,
    pub dst_stages: u32,
    pub barriers: u32,
    pub padding: u32,
}

/// Range into the owning list's nested secondary lists.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct ExecuteCommands {
    pub first: u32,
    pub count: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq)]
pub struct DebugMarkerBegin {
    pub label: DataRange,
    pub color: [f32; 4],
}

#[repr(C)]
#[derive(Default, Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
pub struct DebugMarkerEnd {
    padding: u64,
}

//===----------------------------------------------------------------------===//
// Command list
//===----------------------------------------------------------------------===//

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct CmdHeader {
    op: u16,
    size: u16,
}

const HEADER_SIZE: usize = std::mem::size_of::<CmdHeader>();

/// Recorded opcodes in one contiguous byte stream.
///
/// Each record is a `CmdHeader` followed by its fixed-size payload.
/// Variable-length data (regions, clear values, push-constant bytes) goes
/// into a side arena and is referenced by [`DataRange`]. Secondary lists
/// executed by this one are deep-copied into `nested` so replay never
/// reaches back into another command buffer.
#[derive(Clone, Debug, Default)]
pub struct CommandList {
    data: Vec<u8>,
    side: Vec<u8>,
    nested: Vec<CommandList>,
    count: usize,
}

impl CommandList {
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(1024),
            side: Vec::with_capacity(256),
            nested: Vec::new(),
            count: 0,
        }
    }

    /// Clear all recorded commands while retaining allocated arenas.
    pub fn reset(&mut self) {
        self.data.clear();
        self.side.clear();
        self.nested.clear();
        self.count = 0;
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn push<T: Pod>(&mut self, op: Op, payload: &T) {
        let bytes = bytemuck::bytes_of(payload);
        debug_assert!(bytes.len() <= u16::MAX as usize);
        let header = CmdHeader {
            op: op as u16,
            size: bytes.len() as u16,
        };
        self.data.extend_from_slice(bytemuck::bytes_of(&header));
        self.data.extend_from_slice(bytes);
        self.count += 1;
    }

    pub fn push_slice<T: Pod>(&mut self, items: &[T]) -> DataRange {
        self.push_bytes(bytemuck::cast_slice(items))
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) -> DataRange {
        let offset = self.side.len() as u32;
        self.side.extend_from_slice(bytes);
        DataRange {
            offset,
            len: bytes.len() as u32,
        }
    }

    pub fn bytes(&self, range: DataRange) -> &[u8] {
        let start = range.offset as usize;
        let end = start + range.len as usize;
        self.side.get(start..end).unwrap_or(&[])
    }

    /// Copies a side-arena array out. Most arrays are tiny, so they stay on
    /// the stack.
    pub fn slice<T: Pod>(&self, range: DataRange) -> SmallVec<[T; 8]> {
        self.bytes(range)
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned::<T>)
            .collect()
    }

    /// Appends secondary lists, returning the range to reference them by.
    pub fn nest(&mut self, lists: impl IntoIterator<Item = CommandList>) -> (u32, u32) {
        let first = self.nested.len() as u32;
        self.nested.extend(lists);
        (first, self.nested.len() as u32 - first)
    }

    pub fn nested(&self, first: u32, count: u32) -> &[CommandList] {
        let start = first as usize;
        let end = start + count as usize;
        self.nested.get(start..end).unwrap_or(&[])
    }

    /// Iterate over recorded commands.
    pub fn iter(&self) -> CommandIter<'_> {
        CommandIter { data: &self.data }
    }
}

//===----------------------------------------------------------------------===//
// Iteration
//===----------------------------------------------------------------------===//

pub struct Command<'a> {
    pub op: Op,
    bytes: &'a [u8],
}

impl<'a> Command<'a> {
    pub fn payload<T: Pod>(&self) -> T {
        debug_assert_eq!(
            self.bytes.len(),
            std::mem::size_of::<T>(),
            "payload<T>: wrong byte length for {:?}",
            self.op
        );
        bytemuck::pod_read_unaligned(self.bytes)
    }
}

pub struct CommandIter<'a> {
    data: &'a [u8],
}

impl<'a> Iterator for CommandIter<'a> {
    type Item = Command<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < HEADER_SIZE {
            return None;
        }

        let (head, rest) = self.data.split_at(HEADER_SIZE);
        let header: CmdHeader = bytemuck::pod_read_unaligned(head);
        let size = header.size as usize;
        if rest.len() < size {
            return None;
        }

        let (bytes, remaining) = rest.split_at(size);
        self.data = remaining;
        Some(Command {
            op: Op::from_u16(header.op)?,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::structs::{ClearRect, SubresourceRange};

    #[test]
    fn dispatch_indices_match_discriminants() {
        for (i, op) in Op::ALL.iter().enumerate() {
            assert_eq!(*op as usize, i);
            assert_eq!(Op::from_u16(i as u16), Some(*op));
        }
        assert_eq!(Op::from_u16(Op::COUNT as u16), None);
    }

    #[test]
    fn records_come_back_in_order() {
        let mut list = CommandList::new();
        list.push(
            Op::Draw,
            &Draw {
                vertex_count: 3,
                instance_count: 1,
                ..Default::default()
            },
        );
        let clears = list.push_slice(&[ClearRect {
            rect: Rect2D::new(0, 0, 4, 4),
            base_layer: 0,
            layer_count: 1,
        }]);
        list.push(Op::EndRenderPass, &EndRenderPass::default());
        assert_eq!(list.len(), 2);

        let cmds: Vec<_> = list.iter().collect();
        assert_eq!(cmds[0].op, Op::Draw);
        assert_eq!(cmds[0].payload::<Draw>().vertex_count, 3);
        assert_eq!(cmds[1].op, Op::EndRenderPass);

        let rects = list.slice::<ClearRect>(clears);
        assert_eq!(rects.len(), 1);
        assert_eq!(rects[0].rect.w, 4);
    }

    #[test]
    fn reset_drops_nested_lists() {
        let mut list = CommandList::new();
        let (first, count) = list.nest([CommandList::new(), CommandList::new()]);
        assert_eq!((first, count), (0, 2));
        assert_eq!(list.nested(first, count).len(), 2);

        list.reset();
        assert!(list.is_empty());
        assert!(list.nested(0, 2).is_empty());
    }

    #[test]
    fn ranges_read_subresources() {
        let mut list = CommandList::new();
        let range = list.push_slice(&[SubresourceRange::default(); 2]);
        assert_eq!(list.slice::<SubresourceRange>(range).len(), 2);
    }
}
