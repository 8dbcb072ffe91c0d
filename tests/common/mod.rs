#![allow(dead_code)]

use dashi_emu::gpu::*;

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 32;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn headless() -> Device {
    init_logging();
    Device::headless(&DeviceInfo::default()).unwrap()
}

pub fn headless_with(caps: Capabilities) -> Device {
    init_logging();
    Device::new(NullBackend::with_capabilities(caps), &DeviceInfo::default()).unwrap()
}

/// Registers an image and a view over it. The view's native name is what
/// backend framebuffers and [`NullBackend::contents`] are keyed by.
pub fn attachment(device: &Device, name: &str, native: u64, format: Format) -> Handle<ImageView> {
    let usage = if format.is_color() {
        UsageBits::COLOR_ATTACHMENT
    } else {
        UsageBits::DEPTH_STENCIL_ATTACHMENT
    };
    let image = device
        .register_image(&ImageInfo {
            debug_name: name,
            native: NativeId(native + 1000),
            format,
            extent: Extent3D {
                width: WIDTH,
                height: HEIGHT,
                depth: 1,
            },
            usage,
            ..Default::default()
        })
        .unwrap();
    device
        .register_image_view(&ImageViewInfo {
            debug_name: name,
            native: NativeId(native),
            image,
        })
        .unwrap()
}

pub fn buffer(device: &Device, native: u64, size: u64) -> Handle<Buffer> {
    device
        .register_buffer(&BufferInfo {
            debug_name: "buffer",
            native: NativeId(native),
            size,
            usage: UsageBits::VERTEX | UsageBits::INDEX | UsageBits::INDIRECT,
        })
        .unwrap()
}

/// Two color attachments and a depth attachment in one subpass. Depth is
/// discarded at the end of the pass.
pub struct Target {
    pub pass: Handle<RenderPass>,
    pub framebuffer: Handle<Framebuffer>,
    pub colors: [NativeId; 2],
    pub depth: NativeId,
}

pub const COLOR0: u64 = 10;
pub const COLOR1: u64 = 11;
pub const DEPTH: u64 = 12;

pub fn color_depth_target(device: &Device) -> Target {
    let color = AttachmentDescription::default();
    let depth = AttachmentDescription {
        format: Format::D32Float,
        store_op: StoreOp::DontCare,
        final_layout: Layout::DepthStencilAttachment,
        ..Default::default()
    };
    let pass = device
        .create_render_pass(&RenderPassInfo {
            debug_name: "color+depth",
            attachments: &[color, color, depth],
            subpasses: &[SubpassDescription {
                color_attachments: vec![0, 1],
                depth_stencil_attachment: Some(2),
                ..Default::default()
            }],
            dependencies: &[],
        })
        .unwrap();

    let views = [
        attachment(device, "color0", COLOR0, Format::RGBA8Unorm),
        attachment(device, "color1", COLOR1, Format::RGBA8Unorm),
        attachment(device, "depth", DEPTH, Format::D32Float),
    ];
    let framebuffer = device
        .create_framebuffer(&FramebufferInfo {
            debug_name: "color+depth",
            render_pass: pass,
            attachments: &views,
            width: WIDTH,
            height: HEIGHT,
            layers: 1,
        })
        .unwrap();

    Target {
        pass,
        framebuffer,
        colors: [NativeId(COLOR0), NativeId(COLOR1)],
        depth: NativeId(DEPTH),
    }
}

pub fn graphics_pipeline(
    device: &Device,
    pass: Handle<RenderPass>,
    program: u64,
) -> Handle<GraphicsPipeline> {
    let layout = device
        .create_pipeline_layout(&PipelineLayoutInfo {
            debug_name: "layout",
            set_count: 1,
            push_constants: &[PushConstantRange {
                stages: ShaderStages::VERTEX,
                offset: 0,
                size: 16,
            }],
        })
        .unwrap();
    device
        .create_graphics_pipeline(&GraphicsPipelineInfo {
            debug_name: "pipeline",
            layout,
            program: NativeId(program),
            render_pass: pass,
            ..Default::default()
        })
        .unwrap()
}

pub const RED: ClearValue = ClearValue::Color([1.0, 0.0, 0.0, 1.0]);
pub const BLUE: ClearValue = ClearValue::Color([0.0, 0.0, 1.0, 1.0]);
pub const FAR: ClearValue = ClearValue::DepthStencil {
    depth: 1.0,
    stencil: 0,
};

pub fn full_area() -> Rect2D {
    Rect2D::new(0, 0, WIDTH, HEIGHT)
}

/// Replays `buffer` on queue 0 and waits for it to complete.
pub fn submit_and_wait(device: &Device, buffer: &CommandBuffer) -> Result<()> {
    let fence = device.create_fence(false);
    let buffers = [buffer];
    device.queue(0)?.submit(
        &[SubmitInfo {
            command_buffers: &buffers,
            ..Default::default()
        }],
        Some(&fence),
    )?;
    match device.wait_for_fences(&[&fence], true, None)? {
        WaitResult::Success => Ok(()),
        other => panic!("fence wait ended with {other:?}"),
    }
}
