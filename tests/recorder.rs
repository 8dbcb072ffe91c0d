mod common;

use common::*;
use dashi_emu::gpu::backend::null::Call;
use dashi_emu::gpu::driver::command::Op;
use dashi_emu::gpu::*;

fn begin_pass(buffer: &mut CommandBuffer, target: &Target, contents: SubpassContents) {
    buffer
        .cmd_begin_render_pass(
            &RenderPassBegin {
                render_pass: target.pass,
                framebuffer: target.framebuffer,
                render_area: full_area(),
                clear_values: &[RED, BLUE, FAR],
            },
            contents,
        )
        .unwrap();
}

#[test]
fn missing_feature_keeps_the_buffer_recording() {
    let caps = Capabilities {
        features: Features::all() - Features::DRAW_INDIRECT - Features::MULTI_DRAW_INDIRECT,
        ..Default::default()
    };
    let device = headless_with(caps);
    let target = color_depth_target(&device);
    let pipeline = graphics_pipeline(&device, target.pass, 3);
    let indirect = buffer(&device, 40, 256);

    let mut pool = device.create_command_pool(&CommandPoolInfo::default());
    let cb = pool
        .allocate_command_buffers(CommandBufferLevel::Primary, 1)
        .unwrap()[0];
    let buffer = pool.buffer_mut(cb).unwrap();
    buffer.begin(&BeginInfo::default()).unwrap();
    begin_pass(buffer, &target, SubpassContents::Inline);
    buffer.cmd_bind_graphics_pipeline(pipeline).unwrap();
    buffer.cmd_bind_index_buffer(indirect, 0, IndexType::U16).unwrap();
    let before = buffer.list().len();

    let err = buffer
        .cmd_draw_indexed_indirect(indirect, 0, 1, 20)
        .unwrap_err();
    assert_eq!(err.code(), ResultCode::ErrorFeatureNotPresent);
    assert_eq!(buffer.list().len(), before);
    assert_eq!(buffer.state(), CommandBufferState::Recording);

    buffer.cmd_draw_indexed(6, 1, 0, 0, 0).unwrap();
    buffer.cmd_end_render_pass().unwrap();
    buffer.end().unwrap();
    assert!(buffer
        .list()
        .iter()
        .all(|c| c.op != Op::DrawIndexedIndirect));
}

#[test]
fn invalid_usage_poisons_the_buffer() {
    let device = headless();
    let mut pool = device.create_command_pool(&CommandPoolInfo::default());
    let cb = pool
        .allocate_command_buffers(CommandBufferLevel::Primary, 1)
        .unwrap()[0];
    let buffer = pool.buffer_mut(cb).unwrap();
    buffer.begin(&BeginInfo::default()).unwrap();

    // Drawing outside a render pass.
    let err = buffer.cmd_draw(3, 1, 0, 0).unwrap_err();
    assert_eq!(err.code(), ResultCode::ErrorInvalidState);
    assert_eq!(buffer.state(), CommandBufferState::Invalid);

    assert!(buffer.cmd_set_line_width(1.0).is_err());
    assert!(buffer.end().is_err());

    buffer.reset();
    assert_eq!(buffer.state(), CommandBufferState::Initial);
    assert!(buffer.list().is_empty());
    buffer.begin(&BeginInfo::default()).unwrap();
    buffer.end().unwrap();
    assert_eq!(buffer.state(), CommandBufferState::Executable);
}

#[test]
fn unbalanced_recording_cannot_end() {
    let device = headless();
    let target = color_depth_target(&device);
    let mut pool = device.create_command_pool(&CommandPoolInfo::default());
    let handles = pool
        .allocate_command_buffers(CommandBufferLevel::Primary, 2)
        .unwrap();

    let open_pass = pool.buffer_mut(handles[0]).unwrap();
    open_pass.begin(&BeginInfo::default()).unwrap();
    begin_pass(open_pass, &target, SubpassContents::Inline);
    assert_eq!(
        open_pass.end().unwrap_err().code(),
        ResultCode::ErrorInvalidState
    );

    let open_marker = pool.buffer_mut(handles[1]).unwrap();
    open_marker.begin(&BeginInfo::default()).unwrap();
    open_marker
        .cmd_begin_debug_marker("frame", [1.0, 1.0, 1.0, 1.0])
        .unwrap();
    assert!(open_marker.end().is_err());
}

#[test]
fn push_constants_must_fit_the_layout() {
    let device = headless();
    let layout = device
        .create_pipeline_layout(&PipelineLayoutInfo {
            debug_name: "pc",
            set_count: 0,
            push_constants: &[PushConstantRange {
                stages: ShaderStages::VERTEX,
                offset: 0,
                size: 16,
            }],
        })
        .unwrap();
    let mut pool = device.create_command_pool(&CommandPoolInfo::default());
    let handles = pool
        .allocate_command_buffers(CommandBufferLevel::Primary, 2)
        .unwrap();

    let ok = pool.buffer_mut(handles[0]).unwrap();
    ok.begin(&BeginInfo::default()).unwrap();
    ok.cmd_push_constants(layout, ShaderStages::VERTEX, 0, &[0u8; 16])
        .unwrap();
    ok.end().unwrap();

    let bad = pool.buffer_mut(handles[1]).unwrap();
    bad.begin(&BeginInfo::default()).unwrap();
    let err = bad
        .cmd_push_constants(layout, ShaderStages::VERTEX, 8, &[0u8; 16])
        .unwrap_err();
    assert_eq!(err.code(), ResultCode::ErrorValidationFailed);
}

#[test]
fn secondaries_cannot_be_submitted_directly() {
    let device = headless();
    let mut pool = device.create_command_pool(&CommandPoolInfo::default());
    let cb = pool
        .allocate_command_buffers(CommandBufferLevel::Secondary, 1)
        .unwrap()[0];
    let secondary = pool.buffer_mut(cb).unwrap();
    secondary.begin(&BeginInfo::default()).unwrap();
    secondary.end().unwrap();

    let err = submit_and_wait(&device, pool.buffer(cb).unwrap()).unwrap_err();
    assert_eq!(err.code(), ResultCode::ErrorInvalidState);
}

#[test]
fn one_time_buffers_are_consumed_by_submission() {
    let device = headless();
    let mut pool = device.create_command_pool(&CommandPoolInfo::default());
    let cb = pool
        .allocate_command_buffers(CommandBufferLevel::Primary, 1)
        .unwrap()[0];
    let buffer = pool.buffer_mut(cb).unwrap();
    buffer
        .begin(&BeginInfo {
            one_time_submit: true,
            ..Default::default()
        })
        .unwrap();
    buffer.end().unwrap();

    submit_and_wait(&device, pool.buffer(cb).unwrap()).unwrap();
    assert_eq!(
        pool.buffer(cb).unwrap().state(),
        CommandBufferState::Invalid
    );
    let err = submit_and_wait(&device, pool.buffer(cb).unwrap()).unwrap_err();
    assert_eq!(err.code(), ResultCode::ErrorInvalidState);
}

#[test]
fn secondary_contents_replay_inside_the_primary_pass() {
    let device = headless();
    let target = color_depth_target(&device);
    let pipeline = graphics_pipeline(&device, target.pass, 9);
    let mut pool = device.create_command_pool(&CommandPoolInfo::default());
    let primary = pool
        .allocate_command_buffers(CommandBufferLevel::Primary, 1)
        .unwrap()[0];
    let secondary = pool
        .allocate_command_buffers(CommandBufferLevel::Secondary, 1)
        .unwrap()[0];

    let sec = pool.buffer_mut(secondary).unwrap();
    sec.begin(&BeginInfo {
        one_time_submit: false,
        inheritance: Some(Inheritance {
            render_pass: target.pass,
            subpass: 0,
            framebuffer: Some(target.framebuffer),
        }),
    })
    .unwrap();
    sec.cmd_bind_graphics_pipeline(pipeline).unwrap();
    sec.cmd_set_line_width(2.0).unwrap();
    sec.cmd_draw(3, 1, 0, 0).unwrap();
    sec.end().unwrap();

    let prim = pool.buffer_mut(primary).unwrap();
    prim.begin(&BeginInfo::default()).unwrap();
    begin_pass(prim, &target, SubpassContents::SecondaryCommandBuffers);
    pool.record_execute(primary, &[secondary]).unwrap();
    let prim = pool.buffer_mut(primary).unwrap();
    prim.cmd_end_render_pass().unwrap();
    prim.end().unwrap();
    let recorded = prim.list().len();

    // Re-recording the secondary does not reach the primary's copy.
    let sec = pool.buffer_mut(secondary).unwrap();
    sec.reset();
    assert_eq!(pool.buffer(primary).unwrap().list().len(), recorded);

    submit_and_wait(&device, pool.buffer(primary).unwrap()).unwrap();
    device.with_backend(|b| {
        assert_eq!(b.count_calls(|c| matches!(c, Call::Draw(..))), 1);
        assert_eq!(b.count_calls(|c| *c == Call::UseProgram(NativeId(9))), 1);
    });
    device.with_context(|ctx| {
        assert_eq!(ctx.state.depth(), 0);
        // The primary never set a line width, so the secondary's stays.
        assert_eq!(ctx.state.current().line_width, Some(2.0));
    });
}

#[test]
fn primaries_cannot_inherit_a_render_pass() {
    let device = headless();
    let target = color_depth_target(&device);
    let mut pool = device.create_command_pool(&CommandPoolInfo::default());
    let cb = pool
        .allocate_command_buffers(CommandBufferLevel::Primary, 1)
        .unwrap()[0];
    let err = pool
        .buffer_mut(cb)
        .unwrap()
        .begin(&BeginInfo {
            one_time_submit: false,
            inheritance: Some(Inheritance {
                render_pass: target.pass,
                subpass: 0,
                framebuffer: None,
            }),
        })
        .unwrap_err();
    assert_eq!(err.code(), ResultCode::ErrorValidationFailed);
}

#[test]
fn out_of_range_first_slots_are_rejected_not_wrapped() {
    let device = headless();
    let vertices = buffer(&device, 60, 64);
    let mut pool = device.create_command_pool(&CommandPoolInfo::default());
    let handles = pool
        .allocate_command_buffers(CommandBufferLevel::Primary, 3)
        .unwrap();

    let bind = pool.buffer_mut(handles[0]).unwrap();
    bind.begin(&BeginInfo::default()).unwrap();
    let err = bind
        .cmd_bind_vertex_buffers(u32::MAX, &[(vertices, 0)])
        .unwrap_err();
    assert_eq!(err.code(), ResultCode::ErrorValidationFailed);
    assert_eq!(bind.state(), CommandBufferState::Invalid);

    let viewport = pool.buffer_mut(handles[1]).unwrap();
    viewport.begin(&BeginInfo::default()).unwrap();
    let err = viewport
        .cmd_set_viewport(
            u32::MAX,
            &[Viewport {
                x: 0.0,
                y: 0.0,
                width: 1.0,
                height: 1.0,
                min_depth: 0.0,
                max_depth: 1.0,
            }],
        )
        .unwrap_err();
    assert_eq!(err.code(), ResultCode::ErrorValidationFailed);

    let scissor = pool.buffer_mut(handles[2]).unwrap();
    scissor.begin(&BeginInfo::default()).unwrap();
    let err = scissor
        .cmd_set_scissor(u32::MAX, &[Rect2D::new(0, 0, 1, 1)])
        .unwrap_err();
    assert_eq!(err.code(), ResultCode::ErrorValidationFailed);
}

#[test]
fn push_constant_ranges_past_u32_are_rejected() {
    let device = headless();
    let err = device
        .create_pipeline_layout(&PipelineLayoutInfo {
            debug_name: "huge",
            set_count: 0,
            push_constants: &[PushConstantRange {
                stages: ShaderStages::VERTEX,
                offset: u32::MAX - 3,
                size: 8,
            }],
        })
        .unwrap_err();
    assert_eq!(err.code(), ResultCode::ErrorValidationFailed);
}
