mod common;

use common::*;
use dashi_emu::gpu::backend::null::{Call, Contents};
use dashi_emu::gpu::backend::AttachmentSlot;
use dashi_emu::gpu::*;

fn record_pass(
    pool: &mut CommandPool,
    target: &Target,
    area: Rect2D,
    draw: Option<Handle<GraphicsPipeline>>,
) -> Handle<CommandBuffer> {
    let cb = pool
        .allocate_command_buffers(CommandBufferLevel::Primary, 1)
        .unwrap()[0];
    let buffer = pool.buffer_mut(cb).unwrap();
    buffer.begin(&BeginInfo::default()).unwrap();
    buffer
        .cmd_begin_render_pass(
            &RenderPassBegin {
                render_pass: target.pass,
                framebuffer: target.framebuffer,
                render_area: area,
                clear_values: &[RED, BLUE, FAR],
            },
            SubpassContents::Inline,
        )
        .unwrap();
    if let Some(pipeline) = draw {
        buffer.cmd_bind_graphics_pipeline(pipeline).unwrap();
        buffer.cmd_draw(3, 1, 0, 0).unwrap();
    }
    buffer.cmd_end_render_pass().unwrap();
    buffer.end().unwrap();
    cb
}

#[test]
fn clears_land_in_attachment_order() {
    let device = headless();
    let target = color_depth_target(&device);
    let mut pool = device.create_command_pool(&CommandPoolInfo {
        debug_name: "render_pass",
    });
    let cb = record_pass(&mut pool, &target, full_area(), None);
    submit_and_wait(&device, pool.buffer(cb).unwrap()).unwrap();

    device.with_backend(|backend| {
        let loads: Vec<_> = backend
            .calls()
            .iter()
            .filter_map(|c| match c {
                Call::Load { image, slot, load, .. } => Some((*image, *slot, load.clear)),
                _ => None,
            })
            .collect();
        assert_eq!(
            loads,
            vec![
                (target.colors[0], AttachmentSlot::Color(0), Some(RED)),
                (target.colors[1], AttachmentSlot::Color(1), Some(BLUE)),
                (target.depth, AttachmentSlot::DepthStencil, Some(FAR)),
            ]
        );

        let stores: Vec<_> = backend
            .calls()
            .iter()
            .filter_map(|c| match c {
                Call::Store { image, store, .. } => Some((*image, store.keeps_contents())),
                _ => None,
            })
            .collect();
        assert_eq!(
            stores,
            vec![
                (target.colors[0], true),
                (target.colors[1], true),
                (target.depth, false),
            ]
        );
        assert_eq!(backend.count_calls(|c| matches!(c, Call::Resolve { .. })), 0);

        assert_eq!(backend.contents(target.colors[0]), Contents::Solid(RED));
        assert_eq!(backend.contents(target.colors[1]), Contents::Solid(BLUE));
        assert_eq!(backend.contents(target.depth), Contents::Undefined);
    });
}

#[test]
fn draws_render_into_every_attachment_of_the_subpass() {
    let device = headless();
    let target = color_depth_target(&device);
    let pipeline = graphics_pipeline(&device, target.pass, 7);
    let mut pool = device.create_command_pool(&CommandPoolInfo::default());
    let cb = record_pass(&mut pool, &target, full_area(), Some(pipeline));
    submit_and_wait(&device, pool.buffer(cb).unwrap()).unwrap();

    device.with_backend(|backend| {
        assert_eq!(backend.count_calls(|c| *c == Call::UseProgram(NativeId(7))), 1);
        assert_eq!(backend.count_calls(Call::is_work), 1);
        assert_eq!(backend.contents(target.colors[0]), Contents::Rendered);
        assert_eq!(backend.contents(target.colors[1]), Contents::Rendered);
        // Discarded at the end of the pass.
        assert_eq!(backend.contents(target.depth), Contents::Undefined);
    });
}

#[test]
fn render_area_is_flipped_for_bottom_left_backends() {
    let device = headless();
    assert_eq!(device.capabilities().origin, Origin::BottomLeft);
    let target = color_depth_target(&device);
    let mut pool = device.create_command_pool(&CommandPoolInfo::default());
    let cb = record_pass(&mut pool, &target, Rect2D::new(0, 0, 16, 8), None);
    submit_and_wait(&device, pool.buffer(cb).unwrap()).unwrap();

    device.with_backend(|backend| {
        let areas: Vec<_> = backend
            .calls()
            .iter()
            .filter_map(|c| match c {
                Call::Load { area, .. } => Some(*area),
                _ => None,
            })
            .collect();
        assert_eq!(areas.len(), 3);
        assert!(areas.iter().all(|a| *a == Rect2D::new(0, HEIGHT as i32 - 8, 16, 8)));
    });
}

#[test]
fn framebuffer_mapping_is_built_once_and_reused() {
    let device = headless();
    let target = color_depth_target(&device);
    let mut pool = device.create_command_pool(&CommandPoolInfo::default());
    let cb = record_pass(&mut pool, &target, full_area(), None);

    submit_and_wait(&device, pool.buffer(cb).unwrap()).unwrap();
    let created = device.with_backend(|b| {
        b.count_calls(|c| matches!(c, Call::CreateFramebuffer(..)))
    });
    assert!(created > 0);

    submit_and_wait(&device, pool.buffer(cb).unwrap()).unwrap();
    device.with_backend(|b| {
        assert_eq!(
            b.count_calls(|c| matches!(c, Call::CreateFramebuffer(..))),
            created
        );
    });
    assert_eq!(device.shared().framebuffer_cache.len(), 1);
}

#[test]
fn destroying_a_view_releases_its_mappings() {
    let device = headless();
    let target = color_depth_target(&device);
    let mut pool = device.create_command_pool(&CommandPoolInfo::default());
    let cb = record_pass(&mut pool, &target, full_area(), None);
    submit_and_wait(&device, pool.buffer(cb).unwrap()).unwrap();
    assert!(device.with_backend(|b| b.live_framebuffers()) > 0);

    device.invalidate_image_view(target.depth).unwrap();
    assert_eq!(device.with_backend(|b| b.live_framebuffers()), 0);
    assert!(device.shared().framebuffer_cache.is_empty());
}

#[test]
fn clear_value_count_is_checked_when_recording() {
    let device = headless();
    let target = color_depth_target(&device);
    let mut pool = device.create_command_pool(&CommandPoolInfo::default());
    let cb = pool
        .allocate_command_buffers(CommandBufferLevel::Primary, 1)
        .unwrap()[0];
    let buffer = pool.buffer_mut(cb).unwrap();
    buffer.begin(&BeginInfo::default()).unwrap();
    let err = buffer
        .cmd_begin_render_pass(
            &RenderPassBegin {
                render_pass: target.pass,
                framebuffer: target.framebuffer,
                render_area: full_area(),
                clear_values: &[RED, BLUE],
            },
            SubpassContents::Inline,
        )
        .unwrap_err();
    assert_eq!(
        err,
        GPUError::ClearValueMismatch {
            expected: 3,
            supplied: 2
        }
    );
    assert_eq!(buffer.state(), CommandBufferState::Invalid);
}

fn msaa_view(device: &Device, native: u64) -> Handle<ImageView> {
    let image = device
        .register_image(&ImageInfo {
            debug_name: "msaa",
            native: NativeId(native + 1000),
            format: Format::RGBA8Unorm,
            samples: SampleCount::S4,
            extent: Extent3D {
                width: WIDTH,
                height: HEIGHT,
                depth: 1,
            },
            usage: UsageBits::COLOR_ATTACHMENT,
            ..Default::default()
        })
        .unwrap();
    device
        .register_image_view(&ImageViewInfo {
            debug_name: "msaa",
            native: NativeId(native),
            image,
        })
        .unwrap()
}

#[test]
fn next_subpass_resolves_before_later_attachments_load() {
    let device = headless();
    let msaa = AttachmentDescription {
        samples: SampleCount::S4,
        ..Default::default()
    };
    let single = AttachmentDescription::default();
    let pass = device
        .create_render_pass(&RenderPassInfo {
            debug_name: "resolve",
            attachments: &[msaa, single, single],
            subpasses: &[
                SubpassDescription {
                    color_attachments: vec![0],
                    resolve_attachments: vec![Some(1)],
                    ..Default::default()
                },
                SubpassDescription {
                    color_attachments: vec![2],
                    ..Default::default()
                },
            ],
            dependencies: &[],
        })
        .unwrap();
    let views = [
        msaa_view(&device, 20),
        attachment(&device, "resolved", 21, Format::RGBA8Unorm),
        attachment(&device, "later", 22, Format::RGBA8Unorm),
    ];
    let framebuffer = device
        .create_framebuffer(&FramebufferInfo {
            debug_name: "resolve",
            render_pass: pass,
            attachments: &views,
            width: WIDTH,
            height: HEIGHT,
            layers: 1,
        })
        .unwrap();

    let mut pool = device.create_command_pool(&CommandPoolInfo::default());
    let cb = pool
        .allocate_command_buffers(CommandBufferLevel::Primary, 1)
        .unwrap()[0];
    let buffer = pool.buffer_mut(cb).unwrap();
    buffer.begin(&BeginInfo::default()).unwrap();
    buffer
        .cmd_begin_render_pass(
            &RenderPassBegin {
                render_pass: pass,
                framebuffer,
                render_area: full_area(),
                clear_values: &[RED, BLUE, BLUE],
            },
            SubpassContents::Inline,
        )
        .unwrap();
    buffer.cmd_next_subpass(SubpassContents::Inline).unwrap();
    buffer.cmd_end_render_pass().unwrap();
    buffer.end().unwrap();
    submit_and_wait(&device, pool.buffer(cb).unwrap()).unwrap();

    device.with_backend(|backend| {
        let order: Vec<String> = backend
            .calls()
            .iter()
            .filter_map(|c| match c {
                Call::Load { image, .. } => Some(format!("load {}", image.0)),
                Call::Resolve { src, dst, .. } => Some(format!("resolve {}->{}", src.0, dst.0)),
                Call::Store { image, .. } => Some(format!("store {}", image.0)),
                _ => None,
            })
            .collect();
        assert_eq!(
            order,
            [
                "load 20",
                "load 21",
                "resolve 20->21",
                "load 22",
                "store 20",
                "store 21",
                "store 22",
            ]
        );
        assert_eq!(backend.contents(NativeId(21)), Contents::Solid(RED));
        assert_eq!(backend.contents(NativeId(22)), Contents::Solid(BLUE));
    });
}
