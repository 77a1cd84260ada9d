use std::time::Duration;

use direct3d12_bindless_renderer::headless::{
    CompletionMode, HeadlessDevice, HeadlessPresenter, HeadlessWindow,
};
use direct3d12_bindless_renderer::{
    Frame, FrameLoop, FramePipeline, RenderError, RenderResult, SlotState,
};

#[test]
fn reselecting_an_in_flight_slot_blocks_until_it_retires() {
    let device = HeadlessDevice::manual();
    let mut frames = FramePipeline::new(&device, device.create_queue(), 2, None).unwrap();
    let timeline = frames.fence().timeline();

    frames.begin_frame(0).unwrap();
    assert_eq!(frames.submit().unwrap(), 1);
    frames.begin_frame(1).unwrap();
    assert_eq!(frames.submit().unwrap(), 2);
    assert_eq!(frames.completed_value().unwrap(), 0);

    let waiter = std::thread::spawn(move || {
        let waited = frames.begin_frame(0)?.waited;
        Ok::<_, RenderError>((frames, waited))
    });
    std::thread::sleep(Duration::from_millis(50));
    assert!(!waiter.is_finished(), "slot 0 was reused before it retired");

    timeline.advance_to(1);
    let (mut frames, waited) = waiter.join().unwrap().unwrap();

    assert!(waited);
    assert_eq!(frames.current_slot(), Some(0));
    assert_eq!(
        frames.slot_state(1),
        Some(SlotState::InFlight {
            retirement_value: 2
        })
    );
    assert_eq!(frames.submit().unwrap(), 3);

    timeline.set_mode(CompletionMode::Immediate);
    frames.drain().unwrap();
    assert_eq!(frames.completed_value().unwrap(), frames.fence_value());
}

#[test]
fn shutdown_drain_waits_for_all_submitted_work() {
    let device = HeadlessDevice::manual();
    let mut frames = FramePipeline::new(&device, device.create_queue(), 3, None).unwrap();
    let timeline = frames.fence().timeline();

    for slot in 0..3 {
        frames.begin_frame(slot).unwrap();
        frames.submit().unwrap();
    }

    let drainer = std::thread::spawn(move || {
        frames.drain()?;
        Ok::<_, RenderError>(frames)
    });
    std::thread::sleep(Duration::from_millis(30));
    assert!(!drainer.is_finished());

    timeline.advance_to(3);
    std::thread::sleep(Duration::from_millis(30));
    assert!(!drainer.is_finished(), "drain returned before its own signal");

    timeline.complete_all();
    let frames = drainer.join().unwrap().unwrap();
    assert_eq!(frames.fence_value(), 4);
    assert_eq!(frames.completed_value().unwrap(), 4);
}

#[test]
fn frame_loop_follows_the_presenters_image_order() {
    let device = HeadlessDevice::with_completion(CompletionMode::Delayed(Duration::from_millis(1)));
    let pipeline = FramePipeline::new(&device, device.create_queue(), 3, None).unwrap();
    let timeline = pipeline.fence().timeline();

    let mut recorded = Vec::new();
    let recorder = |frame: &Frame<'_, HeadlessDevice>| -> RenderResult<()> {
        recorded.push((frame.frame_number, frame.context.slot_index));
        Ok(())
    };
    let presenter = HeadlessPresenter::with_order(3, vec![2, 0, 1]);
    let mut frame_loop = FrameLoop::new(pipeline, presenter, recorder, 1)
        .unwrap()
        .with_max_frames(Some(6));

    let stats = frame_loop
        .run(&mut HeadlessWindow::unbounded(1280, 720))
        .unwrap();

    assert_eq!(stats.frames_rendered, 6);
    assert_eq!(stats.last_fence_value, 7);
    assert_eq!(timeline.completed(), 7);
    assert_eq!(frame_loop.presenter().presented(), &[2, 0, 1, 2, 0, 1]);
    assert_eq!(frame_loop.presenter().sync_intervals(), &[1; 6]);
    drop(frame_loop);
    assert_eq!(
        recorded,
        vec![(0, 2), (1, 0), (2, 1), (3, 2), (4, 0), (5, 1)]
    );
}

#[test]
fn a_stale_fence_surfaces_as_device_loss() {
    let device = HeadlessDevice::manual();
    let pipeline = FramePipeline::new(
        &device,
        device.create_queue(),
        2,
        Some(Duration::from_millis(20)),
    )
    .unwrap();
    let recorder = |_: &Frame<'_, HeadlessDevice>| -> RenderResult<()> { Ok(()) };
    let mut frame_loop =
        FrameLoop::new(pipeline, HeadlessPresenter::round_robin(2), recorder, 0).unwrap();

    let error = frame_loop
        .run(&mut HeadlessWindow::unbounded(640, 480))
        .unwrap_err();

    assert!(matches!(error, RenderError::FenceTimeout { value: 1, .. }));
    assert!(error.is_device_lost());
    assert_eq!(frame_loop.stats().frames_rendered, 2);

    frame_loop
        .pipeline()
        .fence()
        .timeline()
        .set_mode(CompletionMode::Immediate);
}
