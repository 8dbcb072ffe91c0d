mod common;

use std::thread;
use std::time::{Duration, Instant};

use common::*;
use dashi_emu::gpu::backend::null::Call;
use dashi_emu::gpu::*;
use serial_test::serial;

fn empty_buffer(pool: &mut CommandPool) -> Handle<CommandBuffer> {
    let cb = pool
        .allocate_command_buffers(CommandBufferLevel::Primary, 1)
        .unwrap()[0];
    let buffer = pool.buffer_mut(cb).unwrap();
    buffer.begin(&BeginInfo::default()).unwrap();
    buffer.end().unwrap();
    cb
}

fn device_with_timeouts(semaphore: Duration, event: Duration) -> Device {
    init_logging();
    Device::headless(&DeviceInfo {
        semaphore_wait_timeout: semaphore,
        event_wait_timeout: event,
        ..Default::default()
    })
    .unwrap()
}

#[test]
#[serial]
fn submit_blocks_until_semaphore_is_signalled() {
    let device = headless();
    let mut pool = device.create_command_pool(&CommandPoolInfo::default());
    let cb = empty_buffer(&mut pool);
    let sem = device.create_semaphore();

    let producer = sem.clone();
    let start = Instant::now();
    let signaller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        producer.signal();
    });

    let buffers = [pool.buffer(cb).unwrap()];
    device
        .queue(0)
        .unwrap()
        .submit(
            &[SubmitInfo {
                wait_semaphores: &[&sem],
                command_buffers: &buffers,
                ..Default::default()
            }],
            None,
        )
        .unwrap();
    assert!(start.elapsed() >= Duration::from_millis(40));
    signaller.join().unwrap();

    // The wait consumed the signal.
    assert!(!sem.is_signalled());
}

#[test]
#[serial]
fn unsignalled_semaphore_times_out_without_losing_the_device() {
    let device = device_with_timeouts(Duration::from_millis(20), Duration::from_secs(5));
    let mut pool = device.create_command_pool(&CommandPoolInfo::default());
    let cb = empty_buffer(&mut pool);
    let sem = device.create_semaphore();
    let buffers = [pool.buffer(cb).unwrap()];

    let err = device
        .queue(0)
        .unwrap()
        .submit(
            &[SubmitInfo {
                wait_semaphores: &[&sem],
                command_buffers: &buffers,
                ..Default::default()
            }],
            None,
        )
        .unwrap_err();
    assert_eq!(err, GPUError::Timeout);
    assert_eq!(err.code(), ResultCode::Timeout);
    assert!(!device.is_lost());
    device.with_backend(|b| assert!(b.calls().is_empty()));
}

#[test]
#[serial]
fn timed_out_batch_leaves_earlier_signals_in_place() {
    let device = device_with_timeouts(Duration::from_millis(20), Duration::from_secs(5));
    let mut pool = device.create_command_pool(&CommandPoolInfo::default());
    let cb = empty_buffer(&mut pool);
    let ready = device.create_semaphore();
    let late = device.create_semaphore();
    ready.signal();
    let buffers = [pool.buffer(cb).unwrap()];
    let batch = SubmitInfo {
        wait_semaphores: &[&ready, &late],
        command_buffers: &buffers,
        ..Default::default()
    };

    let err = device.queue(0).unwrap().submit(&[batch], None).unwrap_err();
    assert_eq!(err, GPUError::Timeout);
    assert!(ready.is_signalled());

    // Once the late producer arrives, a retry goes through and takes both.
    late.signal();
    device.queue(0).unwrap().submit(&[batch], None).unwrap();
    assert!(!ready.is_signalled());
    assert!(!late.is_signalled());
}

#[test]
#[serial]
fn later_batch_timeout_keeps_earlier_batches_submitted() {
    let device = device_with_timeouts(Duration::from_millis(20), Duration::from_secs(5));
    let mut pool = device.create_command_pool(&CommandPoolInfo::default());
    let first = empty_buffer(&mut pool);
    let second = empty_buffer(&mut pool);
    let done = device.create_semaphore();
    let never = device.create_semaphore();
    let fence = device.create_fence(false);

    let a = [pool.buffer(first).unwrap()];
    let b = [pool.buffer(second).unwrap()];
    let err = device
        .queue(0)
        .unwrap()
        .submit(
            &[
                SubmitInfo {
                    command_buffers: &a,
                    signal_semaphores: &[&done],
                    ..Default::default()
                },
                SubmitInfo {
                    wait_semaphores: &[&never],
                    command_buffers: &b,
                    ..Default::default()
                },
            ],
            Some(&fence),
        )
        .unwrap_err();
    assert_eq!(err, GPUError::Timeout);
    assert!(done.is_signalled());
    assert_eq!(fence.status(), SyncStatus::Unsignalled);
    assert!(!device.is_lost());
}

#[test]
fn batches_chain_through_semaphores_in_one_submit() {
    let device = headless();
    let mut pool = device.create_command_pool(&CommandPoolInfo::default());
    let first = empty_buffer(&mut pool);
    let second = empty_buffer(&mut pool);
    let sem = device.create_semaphore();
    let fence = device.create_fence(false);

    let a = [pool.buffer(first).unwrap()];
    let b = [pool.buffer(second).unwrap()];
    device
        .queue(0)
        .unwrap()
        .submit(
            &[
                SubmitInfo {
                    command_buffers: &a,
                    signal_semaphores: &[&sem],
                    ..Default::default()
                },
                SubmitInfo {
                    wait_semaphores: &[&sem],
                    command_buffers: &b,
                    ..Default::default()
                },
            ],
            Some(&fence),
        )
        .unwrap();
    assert_eq!(
        device
            .wait_for_fences(&[&fence], true, Some(Duration::from_secs(1)))
            .unwrap(),
        WaitResult::Success
    );
}

#[test]
fn presignalled_fence_wait_touches_nothing() {
    let device = headless();
    let fence = device.create_fence(true);
    assert_eq!(
        device
            .wait_for_fences(&[&fence], true, Some(Duration::ZERO))
            .unwrap(),
        WaitResult::Success
    );
    assert_eq!(device.get_fence_status(&fence).unwrap(), ResultCode::Success);
    device.with_backend(|b| assert!(b.calls().is_empty()));
}

#[test]
fn fence_without_submission_reports_not_ready() {
    let device = headless();
    let fence = device.create_fence(false);
    assert_eq!(
        device
            .wait_for_fences(&[&fence], true, Some(Duration::ZERO))
            .unwrap(),
        WaitResult::TimedOut
    );
    assert_eq!(device.get_fence_status(&fence).unwrap(), ResultCode::NotReady);
}

#[test]
fn fence_follows_backend_completion_marker() {
    let device = headless();
    device.with_backend(|b| b.set_fence_latency(2));
    let mut pool = device.create_command_pool(&CommandPoolInfo::default());
    let cb = empty_buffer(&mut pool);
    let fence = device.create_fence(false);
    let buffers = [pool.buffer(cb).unwrap()];
    device
        .queue(0)
        .unwrap()
        .submit(
            &[SubmitInfo {
                command_buffers: &buffers,
                ..Default::default()
            }],
            Some(&fence),
        )
        .unwrap();

    assert_eq!(device.get_fence_status(&fence).unwrap(), ResultCode::NotReady);
    assert_eq!(
        device.wait_for_fences(&[&fence], true, None).unwrap(),
        WaitResult::Success
    );
    device.with_backend(|b| {
        assert_eq!(b.count_calls(|c| matches!(c, Call::InsertFence(_))), 1);
        assert_eq!(b.count_calls(|c| matches!(c, Call::DeleteFence(_))), 1);
        assert_eq!(b.live_fences(), 0);
    });

    device.reset_fences(&[&fence]).unwrap();
    assert_eq!(fence.status(), SyncStatus::Unsignalled);
}

#[test]
fn fence_signals_through_finish_without_markers() {
    let caps = Capabilities {
        features: Features::all() - Features::FENCE_SYNC,
        ..Default::default()
    };
    let device = headless_with(caps);
    let mut pool = device.create_command_pool(&CommandPoolInfo::default());
    let cb = empty_buffer(&mut pool);
    let fence = device.create_fence(false);
    let buffers = [pool.buffer(cb).unwrap()];
    device
        .queue(0)
        .unwrap()
        .submit(
            &[SubmitInfo {
                command_buffers: &buffers,
                ..Default::default()
            }],
            Some(&fence),
        )
        .unwrap();

    assert!(fence.is_signalled());
    device.with_backend(|b| {
        assert_eq!(b.count_calls(|c| *c == Call::Finish), 1);
        assert_eq!(b.count_calls(|c| matches!(c, Call::InsertFence(_))), 0);
    });
}

#[test]
fn submitting_with_a_signalled_fence_is_rejected() {
    let device = headless();
    let mut pool = device.create_command_pool(&CommandPoolInfo::default());
    let cb = empty_buffer(&mut pool);
    let fence = device.create_fence(true);
    let buffers = [pool.buffer(cb).unwrap()];
    let err = device
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
    assert_eq!(err.code(), ResultCode::ErrorInvalidState);
}

fn record_wait(pool: &mut CommandPool, events: &[Handle<Event>]) -> Handle<CommandBuffer> {
    let cb = pool
        .allocate_command_buffers(CommandBufferLevel::Primary, 1)
        .unwrap()[0];
    let buffer = pool.buffer_mut(cb).unwrap();
    buffer.begin(&BeginInfo::default()).unwrap();
    buffer
        .cmd_wait_events(
            events,
            PipelineStages::TOP_OF_PIPE,
            PipelineStages::ALL_COMMANDS,
            &[MemoryBarrier {
                src_access: AccessFlags::empty(),
                dst_access: AccessFlags::empty(),
            }],
        )
        .unwrap();
    buffer.end().unwrap();
    cb
}

#[test]
fn waiting_on_no_events_succeeds() {
    let device = headless();
    let mut pool = device.create_command_pool(&CommandPoolInfo::default());
    let cb = record_wait(&mut pool, &[]);
    submit_and_wait(&device, pool.buffer(cb).unwrap()).unwrap();
    device.with_backend(|b| {
        assert_eq!(b.count_calls(|c| matches!(c, Call::MemoryBarrier(_))), 0);
    });
}

#[test]
#[serial]
fn host_set_event_releases_a_replaying_wait() {
    let device = headless();
    let event = device.create_event("gate").unwrap();
    let mut pool = device.create_command_pool(&CommandPoolInfo::default());
    let cb = record_wait(&mut pool, &[event]);
    let buffer = pool.buffer(cb).unwrap();

    thread::scope(|s| {
        s.spawn(|| {
            thread::sleep(Duration::from_millis(30));
            device.set_event(event).unwrap();
        });
        submit_and_wait(&device, buffer).unwrap();
    });
    assert_eq!(device.get_event_status(event).unwrap(), EventStatus::Set);
}

#[test]
#[serial]
fn event_wait_timeout_loses_the_device() {
    let device = device_with_timeouts(Duration::from_secs(5), Duration::from_millis(20));
    let event = device.create_event("never").unwrap();
    let mut pool = device.create_command_pool(&CommandPoolInfo::default());
    let cb = record_wait(&mut pool, &[event]);
    let fence = device.create_fence(false);
    let buffers = [pool.buffer(cb).unwrap()];

    let err = device
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
    assert_eq!(err.code(), ResultCode::ErrorDeviceLost);
    assert!(device.is_lost());
    assert_eq!(fence.status(), SyncStatus::Error);

    let empty = empty_buffer(&mut pool);
    let again = [pool.buffer(empty).unwrap()];
    let err = device
        .queue(0)
        .unwrap()
        .submit(
            &[SubmitInfo {
                command_buffers: &again,
                ..Default::default()
            }],
            None,
        )
        .unwrap_err();
    assert_eq!(err.code(), ResultCode::ErrorDeviceLost);
}

#[test]
fn event_status_round_trips_through_the_device() {
    let device = headless();
    let event = device.create_event("flag").unwrap();
    assert_eq!(device.get_event_status(event).unwrap(), EventStatus::Reset);
    device.set_event(event).unwrap();
    assert_eq!(device.get_event_status(event).unwrap().code(), ResultCode::EventSet);
    device.reset_event(event).unwrap();
    assert_eq!(device.get_event_status(event).unwrap().code(), ResultCode::EventReset);

    device.destroy_event(event);
    assert_eq!(
        device.get_event_status(event).unwrap_err().code(),
        ResultCode::ErrorValidationFailed
    );
}

fn device_with_event_errors(fatal: bool) -> Device {
    init_logging();
    Device::headless(&DeviceInfo {
        event_error_is_fatal: fatal,
        ..Default::default()
    })
    .unwrap()
}

#[test]
fn errored_event_fails_the_wait_when_fatal() {
    let device = device_with_event_errors(true);
    let event = device.create_event("broken").unwrap();
    device.shared().event(event).unwrap().mark_error();
    let mut pool = device.create_command_pool(&CommandPoolInfo::default());
    let cb = record_wait(&mut pool, &[event]);

    let err = submit_and_wait(&device, pool.buffer(cb).unwrap()).unwrap_err();
    assert_eq!(err.code(), ResultCode::ErrorDeviceLost);
    assert!(device.is_lost());
}

#[test]
fn errored_event_counts_as_set_when_not_fatal() {
    let device = device_with_event_errors(false);
    let event = device.create_event("broken").unwrap();
    device.shared().event(event).unwrap().mark_error();
    let mut pool = device.create_command_pool(&CommandPoolInfo::default());
    let cb = record_wait(&mut pool, &[event]);

    submit_and_wait(&device, pool.buffer(cb).unwrap()).unwrap();
    assert!(!device.is_lost());
    assert_eq!(device.get_event_status(event).unwrap(), EventStatus::Error);
}
