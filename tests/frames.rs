mod common;

use rstest::rstest;
use swarm::{
    BeginFrameInfo, Extent2D, FrameOrchestrator, FrameOutcome, FrameTargets, HeadlessConfig,
    PresentStatus, SubmitFrameInfo, Swarm,
};

use common::{create_targets, destroy_targets, headless, recreate_targets, Targets};

fn frame_targets(targets: &Targets) -> FrameTargets<'_> {
    FrameTargets {
        swapchain: &targets.swapchain,
        render_pass: &targets.render_pass,
        framebuffer: &targets.framebuffer,
    }
}

#[test]
fn first_frame_does_not_wait_on_a_fresh_fence() {
    let mut device = headless(HeadlessConfig::default());
    let fence = device.create_fence().unwrap();

    assert!(device.fence_signaled(&fence).unwrap());
    device.wait_fence(&fence).unwrap();
    assert_eq!(device.backend().stats().executed_submissions, 0);

    device.destroy_fence(fence);
}

#[rstest]
#[case(2)]
#[case(3)]
#[case(5)]
fn image_count_matches_framebuffers_and_semaphores(#[case] image_count: u32) {
    let mut device = headless(HeadlessConfig {
        swapchain_image_count: image_count,
        ..Default::default()
    });
    let targets = create_targets(&mut device, 640, 480);
    let frames = FrameOrchestrator::new(&mut device, &targets.swapchain).unwrap();

    assert_eq!(device.swapchain_image_count(&targets.swapchain), image_count);
    assert_eq!(device.framebuffer_count(&targets.framebuffer), image_count as usize);
    assert_eq!(frames.render_finished_count(), image_count as usize);
    assert_eq!(frames.frames_in_flight(), 1);

    frames.destroy(&mut device);
    destroy_targets(&mut device, targets);
    assert_eq!(device.backend().live_objects().total(), 0);
}

#[rstest]
#[case::single_frame_in_flight(1)]
#[case::double_buffered(2)]
#[case::more_frames_than_images(4)]
fn repeated_frames_never_deadlock(#[case] frames_in_flight: usize) {
    const FRAMES: u64 = 30;

    let mut device = headless(HeadlessConfig::default());
    let targets = create_targets(&mut device, 640, 480);
    let mut frames =
        FrameOrchestrator::with_frames_in_flight(&mut device, &targets.swapchain, frames_in_flight)
            .unwrap();

    let mut seen_images = Vec::new();
    for expected in 0..FRAMES {
        let outcome = frames
            .draw(&mut device, &frame_targets(&targets), |_, _, frame| {
                assert_eq!(frame.frame_number, expected);
                assert_eq!(frame.frame_index, expected as usize % frames_in_flight);
                assert_eq!(frame.extent, Extent2D::new(640, 480));
                seen_images.push(frame.image_index);
            })
            .unwrap();
        assert_eq!(outcome, FrameOutcome::Presented(PresentStatus::Optimal));
    }

    device.wait_idle().unwrap();
    let stats = device.backend().stats();
    assert_eq!(stats.submissions, FRAMES);
    assert_eq!(stats.executed_submissions, FRAMES);
    assert_eq!(stats.presents, FRAMES);
    assert_eq!(stats.render_passes, FRAMES);
    assert_eq!(frames.frame_number(), FRAMES);
    // Every swapchain image gets used.
    for image in 0..3 {
        assert!(seen_images.contains(&image));
    }

    frames.destroy(&mut device);
    destroy_targets(&mut device, targets);
}

#[test]
fn out_of_date_frame_is_skipped_and_recovers_after_recreate() {
    let mut device = headless(HeadlessConfig::default());
    let targets = create_targets(&mut device, 640, 480);
    let mut frames = FrameOrchestrator::new(&mut device, &targets.swapchain).unwrap();

    let outcome = frames.draw(&mut device, &frame_targets(&targets), |_, _, _| {}).unwrap();
    assert_eq!(outcome, FrameOutcome::Presented(PresentStatus::Optimal));

    device.backend_mut().resize_surface(Extent2D::new(800, 600));
    let outcome = frames
        .draw(&mut device, &frame_targets(&targets), |_, _, _| {
            panic!("nothing is recorded for a skipped frame")
        })
        .unwrap();
    assert_eq!(outcome, FrameOutcome::Skipped);
    assert!(outcome.needs_recreate());

    // The skipped frame must leave its fence signaled, or the retry blocks.
    let fence = &frames.frame_sync(0).in_flight;
    assert!(device.fence_signaled(fence).unwrap());

    let targets = recreate_targets(&mut device, targets, 800, 600);
    frames.resize(&mut device, &targets.swapchain).unwrap();
    assert_eq!(device.swapchain_extent(&targets.swapchain), Extent2D::new(800, 600));

    let outcome = frames
        .draw(&mut device, &frame_targets(&targets), |_, _, frame| {
            assert_eq!(frame.extent, Extent2D::new(800, 600));
        })
        .unwrap();
    assert_eq!(outcome, FrameOutcome::Presented(PresentStatus::Optimal));

    frames.destroy(&mut device);
    destroy_targets(&mut device, targets);
}

#[test]
fn suboptimal_swapchain_still_presents() {
    let mut device = headless(HeadlessConfig::default());
    let targets = create_targets(&mut device, 320, 240);
    let mut frames = FrameOrchestrator::new(&mut device, &targets.swapchain).unwrap();

    device.backend_mut().mark_swapchains_suboptimal();
    let outcome = frames.draw(&mut device, &frame_targets(&targets), |_, _, _| {}).unwrap();
    assert_eq!(outcome, FrameOutcome::Presented(PresentStatus::Suboptimal));
    assert!(outcome.needs_recreate());
    assert_eq!(device.backend().stats().presents, 1);

    frames.destroy(&mut device);
    destroy_targets(&mut device, targets);
}

#[test]
fn explicit_frame_calls_follow_the_same_sequence() {
    let mut device = headless(HeadlessConfig {
        swapchain_image_count: 2,
        ..Default::default()
    });
    let targets = create_targets(&mut device, 320, 240);
    let pool = device.create_command_pool().unwrap();
    let cmd = device.create_command_buffer(&pool).unwrap();
    let in_flight = device.create_fence().unwrap();
    let image_available = device.create_semaphore().unwrap();
    let render_finished = [device.create_semaphore().unwrap(), device.create_semaphore().unwrap()];

    for _ in 0..6 {
        let acquired = device
            .cmd_begin_frame(&BeginFrameInfo {
                swapchain: &targets.swapchain,
                render_pass: &targets.render_pass,
                framebuffer: &targets.framebuffer,
                command_buffer: &cmd,
                in_flight: &in_flight,
                image_available: &image_available,
            })
            .unwrap()
            .expect("swapchain is not out of date");
        assert!(!device.fence_signaled(&in_flight).unwrap());

        device.cmd_end_frame(&cmd).unwrap();
        let status = device
            .cmd_submit_frame(&SubmitFrameInfo {
                swapchain: &targets.swapchain,
                command_buffer: &cmd,
                in_flight: &in_flight,
                image_available: &image_available,
                render_finished: &render_finished[acquired.index as usize],
                image_index: acquired.index,
            })
            .unwrap();
        assert_eq!(status, PresentStatus::Optimal);
    }

    device.wait_idle().unwrap();
    assert!(device.fence_signaled(&in_flight).unwrap());

    let [a, b] = render_finished;
    device.destroy_semaphore(a);
    device.destroy_semaphore(b);
    device.destroy_semaphore(image_available);
    device.destroy_fence(in_flight);
    device.destroy_command_buffer(&pool, cmd);
    device.destroy_command_pool(pool);
    destroy_targets(&mut device, targets);
    assert_eq!(device.backend().live_objects().total(), 0);
}

#[test]
#[should_panic(expected = "cmd_end_frame called without a matching cmd_begin_frame")]
fn ending_a_frame_that_never_began_panics() {
    let mut device = headless(HeadlessConfig::default());
    let pool = device.create_command_pool().unwrap();
    let cmd = device.create_command_buffer(&pool).unwrap();
    let _ = device.cmd_end_frame(&cmd);
}

#[test]
#[should_panic(expected = "swarm library is not initialized")]
fn device_requires_an_initialized_library() {
    common::init_logging();
    let _device = swarm::Device::headless(Swarm::new(), HeadlessConfig::default());
}

#[test]
#[should_panic(expected = "swarm library is not initialized")]
fn creating_objects_after_shutdown_panics() {
    let swarm = Swarm::with_default_hooks();
    let mut device = swarm::Device::headless(swarm.clone(), HeadlessConfig::default());
    swarm.shutdown();
    let _ = device.create_fence();
}
