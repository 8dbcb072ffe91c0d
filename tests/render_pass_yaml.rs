#![cfg(feature = "dashi-serde")]

mod common;

use common::*;
use dashi_emu::gpu::backend::null::Contents;
use dashi_emu::gpu::config::{DeviceInfoCfg, RenderPassCfg};
use dashi_emu::gpu::*;
use serial_test::serial;

const GBUFFER_YAML: &str = r#"
debug_name: "gbuffer"
attachments:
  - debug_name: "gbuffer.albedo"
    format: RGBA8Unorm
    load_op: Clear
    store_op: Store
    clear_value:
      Color: [0.2, 0.3, 0.4, 1.0]
  - debug_name: "gbuffer.normal"
    format: RGBA8Unorm
    load_op: Load
    store_op: Store
  - debug_name: "gbuffer.depth"
    format: D32Float
    load_op: Clear
    store_op: DontCare
    final_layout: DepthStencilAttachment
    clear_value:
      DepthStencil: { depth: 1.0, stencil: 0 }
subpasses:
  - color_attachments: [0, 1]
    depth_stencil_attachment: 2
"#;

#[test]
fn yaml_render_pass_keeps_attachment_order_and_clear_values() {
    let cfg = RenderPassCfg::from_yaml(GBUFFER_YAML).unwrap();
    assert_eq!(cfg.attachments.len(), 3);
    assert_eq!(
        cfg.attachments[0].debug_name.as_deref(),
        Some("gbuffer.albedo")
    );
    assert_eq!(cfg.attachments[2].description.format, Format::D32Float);
    assert_eq!(cfg.attachments[2].description.store_op, StoreOp::DontCare);
    assert_eq!(
        cfg.clear_values(),
        vec![
            ClearValue::Color([0.2, 0.3, 0.4, 1.0]),
            ClearValue::default(),
            FAR,
        ]
    );
}

#[test]
#[serial]
fn yaml_render_pass_begins_with_its_own_clear_values() {
    let device = headless();
    let (pass, clears) = device.create_render_pass_from_yaml(GBUFFER_YAML).unwrap();
    let views = [
        attachment(&device, "albedo", 20, Format::RGBA8Unorm),
        attachment(&device, "normal", 21, Format::RGBA8Unorm),
        attachment(&device, "depth", 22, Format::D32Float),
    ];
    let framebuffer = device
        .create_framebuffer(&FramebufferInfo {
            debug_name: "gbuffer",
            render_pass: pass,
            attachments: &views,
            width: WIDTH,
            height: HEIGHT,
            layers: 1,
        })
        .unwrap();
    device.with_backend(|b| b.set_contents(NativeId(21), Contents::Rendered));

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
                clear_values: &clears,
            },
            SubpassContents::Inline,
        )
        .unwrap();
    buffer.cmd_end_render_pass().unwrap();
    buffer.end().unwrap();
    submit_and_wait(&device, pool.buffer(cb).unwrap()).unwrap();

    device.with_backend(|b| {
        assert_eq!(
            b.contents(NativeId(20)),
            Contents::Solid(ClearValue::Color([0.2, 0.3, 0.4, 1.0]))
        );
        // Loaded, not cleared.
        assert_eq!(b.contents(NativeId(21)), Contents::Rendered);
        assert_eq!(b.contents(NativeId(22)), Contents::Undefined);
    });
}

#[test]
fn malformed_yaml_is_a_validation_error() {
    let device = headless();
    let err = device
        .create_render_pass_from_yaml("debug_name: broken\nattachments: 3\n")
        .unwrap_err();
    assert_eq!(err.code(), ResultCode::ErrorValidationFailed);

    let err = device
        .create_render_pass_from_yaml(
            "debug_name: empty\nattachments: []\nsubpasses: []\n",
        )
        .unwrap_err();
    assert_eq!(err.code(), ResultCode::ErrorValidationFailed);
}

#[test]
fn device_info_loads_from_yaml() {
    let info = DeviceInfoCfg::from_yaml(
        "debug_name: emu\nqueue_count: 2\npoll_interval_max_us: 500\ntrace_replay: true\n",
    )
    .unwrap()
    .into_info();
    let device = Device::headless(&info).unwrap();
    assert_eq!(device.debug_name(), "emu");
    assert!(device.queue(1).is_ok());
    assert!(device.queue(2).is_err());
    assert!(device.info().trace_replay);
}
