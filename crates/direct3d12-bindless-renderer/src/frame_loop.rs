//! The one render loop every scene runs through:
//! acquire slot → wait → record → submit → present → signal.

use tracing::{debug, info};

use crate::error::{RenderError, RenderResult};
use crate::frame_pipeline::{FrameContext, FramePipeline};
use crate::gpu::Device;

/// What the window reported for this iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    pub width: u32,
    pub height: u32,
    pub quit_requested: bool,
}

pub trait WindowEvents {
    /// Pumps pending OS messages and reports the current client size.
    fn poll(&mut self) -> RenderResult<WindowState>;
}

/// The swap chain, as far as the frame loop is concerned.
pub trait Presenter {
    fn image_count(&self) -> usize;

    /// Index of the image the next frame renders into. Doubles as the frame slot.
    fn next_image_index(&self) -> RenderResult<usize>;

    fn present(&mut self, sync_interval: u32) -> RenderResult<()>;
}

pub struct Frame<'a, D: Device> {
    pub context: FrameContext<'a, D>,
    pub width: u32,
    pub height: u32,
    /// Counts from 0 across the whole run.
    pub frame_number: u64,
}

/// Scene content: records the frame's commands and executes them on the queue.
pub trait FrameRecorder<D: Device> {
    fn record(&mut self, frame: &Frame<'_, D>) -> RenderResult<()>;
}

impl<D, F> FrameRecorder<D> for F
where
    D: Device,
    F: FnMut(&Frame<'_, D>) -> RenderResult<()>,
{
    fn record(&mut self, frame: &Frame<'_, D>) -> RenderResult<()> {
        self(frame)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    pub frames_rendered: u64,
    /// Frames whose slot was still in flight when selected.
    pub blocking_waits: u64,
    pub last_fence_value: u64,
}

pub struct FrameLoop<D: Device, P: Presenter, R: FrameRecorder<D>> {
    pipeline: FramePipeline<D>,
    presenter: P,
    recorder: R,
    sync_interval: u32,
    max_frames: Option<u64>,
    frames_rendered: u64,
}

impl<D, P, R> FrameLoop<D, P, R>
where
    D: Device,
    P: Presenter,
    R: FrameRecorder<D>,
{
    /// The presenter must have exactly one image per pipeline slot, since its
    /// image index selects the slot.
    pub fn new(
        pipeline: FramePipeline<D>,
        presenter: P,
        recorder: R,
        sync_interval: u32,
    ) -> RenderResult<Self> {
        if presenter.image_count() != pipeline.frame_count() {
            return Err(RenderError::ImageCountMismatch {
                image_count: presenter.image_count(),
                frame_count: pipeline.frame_count(),
            });
        }

        Ok(Self {
            pipeline,
            presenter,
            recorder,
            sync_interval,
            max_frames: None,
            frames_rendered: 0,
        })
    }

    /// Stops [`FrameLoop::run`] after `max_frames` frames even without a quit request.
    pub fn with_max_frames(mut self, max_frames: Option<u64>) -> Self {
        self.max_frames = max_frames;
        self
    }

    /// Renders frames until the window asks to quit, then drains the GPU.
    pub fn run(&mut self, window: &mut impl WindowEvents) -> RenderResult<FrameStats> {
        info!(
            frames_in_flight = self.pipeline.frame_count(),
            sync_interval = self.sync_interval,
            "frame loop started"
        );

        loop {
            if self
                .max_frames
                .is_some_and(|max_frames| self.frames_rendered >= max_frames)
            {
                debug!(max_frames = ?self.max_frames, "frame limit reached");
                break;
            }

            let state = window.poll()?;
            if state.quit_requested {
                debug!("quit requested");
                break;
            }
            self.render_frame(&state)?;
        }

        self.pipeline.drain()?;
        let stats = self.stats();
        info!(
            frames = stats.frames_rendered,
            blocking_waits = stats.blocking_waits,
            last_fence_value = stats.last_fence_value,
            "frame loop finished"
        );
        Ok(stats)
    }

    /// Renders exactly one frame and returns the fence value it retires at.
    pub fn render_frame(&mut self, window: &WindowState) -> RenderResult<u64> {
        let slot_index = self.presenter.next_image_index()?;

        {
            let context = self.pipeline.begin_frame(slot_index)?;
            let frame = Frame {
                context,
                width: window.width,
                height: window.height,
                frame_number: self.frames_rendered,
            };
            self.recorder.record(&frame)?;
        }

        self.presenter.present(self.sync_interval)?;
        let retirement_value = self.pipeline.submit()?;
        self.frames_rendered += 1;
        Ok(retirement_value)
    }

    pub fn stats(&self) -> FrameStats {
        FrameStats {
            frames_rendered: self.frames_rendered,
            blocking_waits: self.pipeline.blocking_waits(),
            last_fence_value: self.pipeline.fence_value(),
        }
    }

    pub fn pipeline(&self) -> &FramePipeline<D> {
        &self.pipeline
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn recorder(&self) -> &R {
        &self.recorder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessDevice, HeadlessPresenter, HeadlessWindow};

    #[test]
    fn runs_until_the_window_quits() {
        let device = HeadlessDevice::new();
        let pipeline = FramePipeline::new(&device, device.create_queue(), 2, None).unwrap();
        let mut slots = Vec::new();
        let recorder = |frame: &Frame<'_, HeadlessDevice>| -> RenderResult<()> {
            slots.push(frame.context.slot_index);
            Ok(())
        };
        let mut frame_loop =
            FrameLoop::new(pipeline, HeadlessPresenter::round_robin(2), recorder, 1).unwrap();

        let stats = frame_loop
            .run(&mut HeadlessWindow::for_frames(640, 480, 5))
            .unwrap();

        assert_eq!(stats.frames_rendered, 5);
        // five frames plus the drain signal
        assert_eq!(stats.last_fence_value, 6);
        assert_eq!(frame_loop.presenter().presented(), &[0, 1, 0, 1, 0]);
        drop(frame_loop);
        assert_eq!(slots, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn recorder_errors_stop_the_loop() {
        let device = HeadlessDevice::new();
        let pipeline = FramePipeline::new(&device, device.create_queue(), 2, None).unwrap();
        let recorder = |frame: &Frame<'_, HeadlessDevice>| -> RenderResult<()> {
            if frame.frame_number == 2 {
                Err(RenderError::device("ExecuteCommandLists", "scripted failure"))
            } else {
                Ok(())
            }
        };
        let mut frame_loop =
            FrameLoop::new(pipeline, HeadlessPresenter::round_robin(2), recorder, 0).unwrap();

        let error = frame_loop
            .run(&mut HeadlessWindow::unbounded(640, 480))
            .unwrap_err();
        assert!(matches!(error, RenderError::Device { .. }));
        assert_eq!(frame_loop.stats().frames_rendered, 2);
    }

    #[test]
    fn presenter_must_have_one_image_per_slot() {
        let device = HeadlessDevice::new();
        for image_count in [1, 3] {
            let pipeline = FramePipeline::new(&device, device.create_queue(), 2, None).unwrap();
            let recorder = |_: &Frame<'_, HeadlessDevice>| -> RenderResult<()> { Ok(()) };
            let result = FrameLoop::new(
                pipeline,
                HeadlessPresenter::round_robin(image_count),
                recorder,
                1,
            );
            assert!(matches!(
                result,
                Err(RenderError::ImageCountMismatch { frame_count: 2, image_count: count })
                    if count == image_count
            ));
        }
    }
}
