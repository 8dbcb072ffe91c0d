mod common;

use common::*;
use dashi_emu::gpu::backend::null::Call;
use dashi_emu::gpu::*;

struct Scene {
    device: Device,
    pool: CommandPool,
    cb: Handle<CommandBuffer>,
    vertices: Handle<Buffer>,
}

fn scene() -> Scene {
    let device = headless();
    let target = color_depth_target(&device);
    let pipeline = graphics_pipeline(&device, target.pass, 5);
    let vertices = buffer(&device, 50, 1024);
    let indices = buffer(&device, 51, 256);

    let mut pool = device.create_command_pool(&CommandPoolInfo {
        debug_name: "scene",
    });
    let cb = pool
        .allocate_command_buffers(CommandBufferLevel::Primary, 1)
        .unwrap()[0];
    let rec = pool.buffer_mut(cb).unwrap();
    rec.begin(&BeginInfo::default()).unwrap();
    rec.cmd_begin_render_pass(
        &RenderPassBegin {
            render_pass: target.pass,
            framebuffer: target.framebuffer,
            render_area: full_area(),
            clear_values: &[RED, BLUE, FAR],
        },
        SubpassContents::Inline,
    )
    .unwrap();
    rec.cmd_bind_graphics_pipeline(pipeline).unwrap();
    rec.cmd_set_viewport(
        0,
        &[Viewport {
            x: 0.0,
            y: 0.0,
            width: WIDTH as f32,
            height: HEIGHT as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }],
    )
    .unwrap();
    rec.cmd_bind_vertex_buffers(0, &[(vertices, 0)]).unwrap();
    rec.cmd_bind_index_buffer(indices, 0, IndexType::U32).unwrap();
    rec.cmd_draw_indexed(6, 1, 0, 0, 0).unwrap();
    rec.cmd_draw_indexed(6, 1, 6, 0, 0).unwrap();
    rec.cmd_end_render_pass().unwrap();
    rec.end().unwrap();

    Scene {
        device,
        pool,
        cb,
        vertices,
    }
}

/// Backend calls minus the ones that name fresh objects on every run.
fn stable_calls(device: &Device) -> Vec<Call> {
    device.with_backend(|b| {
        b.take_calls()
            .into_iter()
            .filter(|c| {
                !matches!(
                    c,
                    Call::CreateFramebuffer(..)
                        | Call::InsertFence(_)
                        | Call::QueryFence(_)
                        | Call::DeleteFence(_)
                )
            })
            .collect()
    })
}

fn count(calls: &[Call], pred: impl Fn(&Call) -> bool) -> usize {
    calls.iter().filter(|c| pred(c)).count()
}

#[test]
fn replay_after_invalidation_issues_the_same_calls() {
    let s = scene();
    submit_and_wait(&s.device, s.pool.buffer(s.cb).unwrap()).unwrap();
    let first = stable_calls(&s.device);

    s.device.with_context(|ctx| ctx.state.invalidate());
    submit_and_wait(&s.device, s.pool.buffer(s.cb).unwrap()).unwrap();
    let second = stable_calls(&s.device);

    assert_eq!(first, second);
    assert_eq!(
        first
            .iter()
            .filter(|c| matches!(c, Call::DrawIndexed(..)))
            .count(),
        2
    );
}

#[test]
fn warm_replay_elides_redundant_state() {
    let s = scene();
    submit_and_wait(&s.device, s.pool.buffer(s.cb).unwrap()).unwrap();
    let cold = stable_calls(&s.device);
    let elided_before = s.device.with_context(|ctx| ctx.state.stats().elided);

    submit_and_wait(&s.device, s.pool.buffer(s.cb).unwrap()).unwrap();
    let warm = stable_calls(&s.device);

    assert_eq!(count(&cold, |c| matches!(c, Call::UseProgram(_))), 1);
    assert_eq!(count(&warm, |c| matches!(c, Call::UseProgram(_))), 0);
    assert_eq!(count(&warm, |c| matches!(c, Call::SetBlendState(_))), 0);
    assert_eq!(count(&warm, |c| matches!(c, Call::BindIndexBuffer { .. })), 0);
    assert_eq!(count(&warm, |c| matches!(c, Call::DrawIndexed(..))), 2);
    assert!(s.device.with_context(|ctx| ctx.state.stats().elided) > elided_before);
}

#[test]
fn viewports_are_flipped_against_the_bound_framebuffer() {
    let s = scene();
    submit_and_wait(&s.device, s.pool.buffer(s.cb).unwrap()).unwrap();
    let calls = stable_calls(&s.device);
    let viewport = calls
        .iter()
        .find_map(|c| match c {
            Call::SetViewport(0, vp) => Some(*vp),
            _ => None,
        })
        .unwrap();
    // Full-height viewport maps onto itself.
    assert_eq!(viewport.y, 0.0);
    assert_eq!(viewport.height, HEIGHT as f32);
}

#[test]
fn destroyed_resources_fail_replay_validation() {
    let s = scene();
    s.device.destroy_buffer(s.vertices).unwrap();

    let fence = s.device.create_fence(false);
    let buffers = [s.pool.buffer(s.cb).unwrap()];
    let err = s
        .device
        .queue(0)
        .unwrap()
        .submit(
            &[SubmitInfo {
                command_buffers: &buffers,
                ..Default::default()
            }],
            Some(&fence),
        )
        .unwrap_err();

    assert_eq!(err.code(), ResultCode::ErrorValidationFailed);
    assert!(!s.device.is_lost());
    assert_eq!(fence.status(), SyncStatus::Unsignalled);
    s.device.with_backend(|b| {
        assert_eq!(b.count_calls(Call::is_work), 0);
    });
    s.device.with_context(|ctx| assert_eq!(ctx.state.depth(), 0));
}

#[test]
fn fatal_backend_error_latches_device_loss() {
    let s = scene();
    s.device
        .with_backend(|b| b.fail_after(3, GPUError::DeviceLost("context reset".into())));

    let fence = s.device.create_fence(false);
    let signal = s.device.create_semaphore();
    let buffers = [s.pool.buffer(s.cb).unwrap()];
    let err = s
        .device
        .queue(0)
        .unwrap()
        .submit(
            &[SubmitInfo {
                command_buffers: &buffers,
                signal_semaphores: &[&signal],
                ..Default::default()
            }],
            Some(&fence),
        )
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(s.device.is_lost());
    assert_eq!(fence.status(), SyncStatus::Error);
    assert_eq!(signal.status(), SyncStatus::Error);
    assert_eq!(
        s.device
            .wait_for_fences(&[&fence], true, None)
            .unwrap(),
        WaitResult::Error
    );

    let err = submit_and_wait(&s.device, s.pool.buffer(s.cb).unwrap()).unwrap_err();
    assert_eq!(err.code(), ResultCode::ErrorDeviceLost);
    assert!(s.device.queue(0).unwrap().wait_idle().is_err());
}

#[test]
fn wait_idle_drains_a_marker() {
    let s = scene();
    s.device.with_backend(|b| b.set_fence_latency(2));
    let buffers = [s.pool.buffer(s.cb).unwrap()];
    s.device
        .queue(0)
        .unwrap()
        .submit(
            &[SubmitInfo {
                command_buffers: &buffers,
                ..Default::default()
            }],
            None,
        )
        .unwrap();
    s.device.wait_idle().unwrap();
    s.device.with_backend(|b| {
        assert_eq!(b.count_calls(|c| matches!(c, Call::QueryFence(_))), 3);
        assert_eq!(b.live_fences(), 0);
    });
}
