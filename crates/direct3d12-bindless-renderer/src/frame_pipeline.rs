use std::time::Duration;

use tracing::{debug, error, info};

use crate::error::{RenderError, RenderResult};
use crate::gpu::{CommandAllocator, CommandQueue, Device, Fence};

/// Where a frame slot is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Free to record into.
    Idle,
    /// Submitted; the GPU may still be reading the slot's command allocator until the
    /// fence reaches `retirement_value`.
    InFlight { retirement_value: u64 },
}

struct FrameSlot<A> {
    allocator: A,
    state: SlotState,
}

/// Handed out by [`FramePipeline::begin_frame`] for recording one frame.
pub struct FrameContext<'a, D: Device> {
    pub slot_index: usize,
    /// Already reset, safe to record into.
    pub allocator: &'a D::CommandAllocator,
    pub queue: &'a D::Queue,
    /// Whether selecting this slot had to wait for the GPU.
    pub waited: bool,
}

/// Owns N per-frame command allocators, the queue, and the fence that tracks
/// how far the GPU has progressed through submitted work.
///
/// Slot `k` is only reset once every submission previously recorded into it has
/// retired. Which slot comes next is decided by the caller, normally the swap
/// chain's current back buffer index.
pub struct FramePipeline<D: Device> {
    queue: D::Queue,
    fence: D::Fence,
    slots: Vec<FrameSlot<D::CommandAllocator>>,
    /// Last value handed to the queue as a signal.
    fence_value: u64,
    recording: Option<usize>,
    fence_timeout: Option<Duration>,
    blocking_waits: u64,
    drained: bool,
}

impl<D: Device> FramePipeline<D> {
    pub fn new(
        device: &D,
        queue: D::Queue,
        frame_count: usize,
        fence_timeout: Option<Duration>,
    ) -> RenderResult<Self> {
        if frame_count == 0 {
            return Err(RenderError::NoFramesInFlight);
        }

        let fence = device.create_fence(0)?;
        let slots = (0..frame_count)
            .map(|index| {
                Ok(FrameSlot {
                    allocator: device.create_command_allocator(&format!("frame {index}"))?,
                    state: SlotState::Idle,
                })
            })
            .collect::<RenderResult<Vec<_>>>()?;

        info!(frame_count, ?fence_timeout, "frame pipeline created");

        Ok(Self {
            queue,
            fence,
            slots,
            fence_value: 0,
            recording: None,
            fence_timeout,
            blocking_waits: 0,
            drained: false,
        })
    }

    /// Makes `slot_index` the frame being recorded.
    ///
    /// If the slot is still in flight this blocks until the GPU has retired it,
    /// then resets its command allocator.
    pub fn begin_frame(&mut self, slot_index: usize) -> RenderResult<FrameContext<'_, D>> {
        if slot_index >= self.slots.len() {
            return Err(RenderError::InvalidFrameSlot {
                index: slot_index,
                frame_count: self.slots.len(),
            });
        }
        if let Some(recording) = self.recording {
            return Err(RenderError::FrameAlreadyRecording {
                recording,
                requested: slot_index,
            });
        }

        let mut waited = false;
        if let SlotState::InFlight { retirement_value } = self.slots[slot_index].state {
            let completed = self.fence.completed_value()?;
            if completed < retirement_value {
                debug!(
                    slot_index,
                    retirement_value, completed, "waiting for frame slot to retire"
                );
                self.fence.wait(retirement_value, self.fence_timeout)?;
                self.blocking_waits += 1;
                waited = true;
            }
            self.slots[slot_index].state = SlotState::Idle;
        }

        let slot = &self.slots[slot_index];
        slot.allocator.reset()?;
        self.recording = Some(slot_index);
        self.drained = false;

        Ok(FrameContext {
            slot_index,
            allocator: &slot.allocator,
            queue: &self.queue,
            waited,
        })
    }

    /// Signals the fence behind the work recorded for the current frame and marks
    /// the slot in flight. Returns the slot's retirement value.
    pub fn submit(&mut self) -> RenderResult<u64> {
        let slot_index = self.recording.ok_or(RenderError::NoFrameRecording)?;

        let value = self.fence_value + 1;
        self.queue.signal(&self.fence, value)?;
        self.fence_value = value;
        self.recording = None;
        self.slots[slot_index].state = SlotState::InFlight {
            retirement_value: value,
        };

        debug!(slot_index, value, "frame submitted");
        Ok(value)
    }

    /// Signals the fence one last time and blocks until the GPU reaches it, after
    /// which no submitted work can still reference a command allocator.
    pub fn drain(&mut self) -> RenderResult<()> {
        let value = self.fence_value + 1;
        self.queue.signal(&self.fence, value)?;
        self.fence_value = value;

        if self.fence.completed_value()? < value {
            self.fence.wait(value, self.fence_timeout)?;
        }

        for slot in &mut self.slots {
            slot.state = SlotState::Idle;
        }
        self.recording = None;
        self.drained = true;

        debug!(value, "frame pipeline drained");
        Ok(())
    }

    pub fn queue(&self) -> &D::Queue {
        &self.queue
    }

    pub fn fence(&self) -> &D::Fence {
        &self.fence
    }

    pub fn allocator(&self, slot_index: usize) -> Option<&D::CommandAllocator> {
        self.slots.get(slot_index).map(|slot| &slot.allocator)
    }

    pub fn frame_count(&self) -> usize {
        self.slots.len()
    }

    /// Last value issued to the queue.
    pub fn fence_value(&self) -> u64 {
        self.fence_value
    }

    pub fn completed_value(&self) -> RenderResult<u64> {
        self.fence.completed_value()
    }

    pub fn slot_state(&self, slot_index: usize) -> Option<SlotState> {
        self.slots.get(slot_index).map(|slot| slot.state)
    }

    /// The slot between [`FramePipeline::begin_frame`] and [`FramePipeline::submit`].
    pub fn current_slot(&self) -> Option<usize> {
        self.recording
    }

    /// How many times selecting a slot actually had to block.
    pub fn blocking_waits(&self) -> u64 {
        self.blocking_waits
    }
}

impl<D: Device> Drop for FramePipeline<D> {
    fn drop(&mut self) {
        if self.drained {
            return;
        }
        if let Err(e) = self.drain() {
            error!("Error waiting for GPU idle on destroy: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{CompletionMode, HeadlessDevice};

    fn pipeline(device: &HeadlessDevice, frames: usize) -> FramePipeline<HeadlessDevice> {
        FramePipeline::new(device, device.create_queue(), frames, None).unwrap()
    }

    #[test]
    fn submissions_take_consecutive_fence_values() {
        let device = HeadlessDevice::manual();
        let mut frames = pipeline(&device, 3);

        for (slot, expected) in [(0, 1), (1, 2), (2, 3)] {
            frames.begin_frame(slot).unwrap();
            assert_eq!(frames.submit().unwrap(), expected);
            assert_eq!(
                frames.slot_state(slot),
                Some(SlotState::InFlight {
                    retirement_value: expected
                })
            );
        }
        assert_eq!(frames.fence_value(), 3);

        frames.fence().timeline().set_mode(CompletionMode::Immediate);
    }

    #[test]
    fn reselecting_a_retired_slot_does_not_block() {
        let device = HeadlessDevice::new();
        let mut frames = pipeline(&device, 2);

        frames.begin_frame(0).unwrap();
        frames.submit().unwrap();
        let frame = frames.begin_frame(0).unwrap();
        assert!(!frame.waited);
        assert_eq!(frames.blocking_waits(), 0);
        assert_eq!(frames.slot_state(0), Some(SlotState::Idle));
    }

    #[test]
    fn allocator_is_reset_only_after_retirement() {
        let device = HeadlessDevice::manual();
        let mut frames = pipeline(&device, 2);
        let timeline = frames.fence().timeline();

        frames.begin_frame(0).unwrap();
        frames.submit().unwrap();
        frames.begin_frame(1).unwrap();
        frames.submit().unwrap();

        let waiter = std::thread::spawn(move || {
            frames.begin_frame(0).map(|frame| frame.waited)?;
            Ok::<_, RenderError>(frames)
        });
        std::thread::sleep(Duration::from_millis(30));
        assert!(!waiter.is_finished());

        timeline.advance_to(1);
        let frames = waiter.join().unwrap().unwrap();

        assert_eq!(frames.blocking_waits(), 1);
        let resets = frames.allocator(0).unwrap().reset_log();
        assert_eq!(resets, vec![0, 1]);
        timeline.set_mode(CompletionMode::Immediate);
    }

    #[test]
    fn misuse_is_reported() {
        let device = HeadlessDevice::new();
        let mut frames = pipeline(&device, 2);

        assert!(matches!(
            frames.begin_frame(2),
            Err(RenderError::InvalidFrameSlot {
                index: 2,
                frame_count: 2
            })
        ));
        assert!(matches!(frames.submit(), Err(RenderError::NoFrameRecording)));

        frames.begin_frame(0).unwrap();
        assert!(matches!(
            frames.begin_frame(1),
            Err(RenderError::FrameAlreadyRecording {
                recording: 0,
                requested: 1
            })
        ));
        assert!(matches!(
            FramePipeline::new(&device, device.create_queue(), 0, None),
            Err(RenderError::NoFramesInFlight)
        ));
    }

    #[test]
    fn drain_leaves_completed_equal_to_last_issued() {
        let device = HeadlessDevice::with_completion(CompletionMode::Delayed(
            Duration::from_millis(2),
        ));
        let mut frames = pipeline(&device, 2);

        for slot in [0, 1, 0, 1] {
            frames.begin_frame(slot).unwrap();
            frames.submit().unwrap();
        }
        frames.drain().unwrap();

        assert_eq!(frames.fence_value(), 5);
        assert_eq!(frames.completed_value().unwrap(), frames.fence_value());
        assert_eq!(frames.slot_state(0), Some(SlotState::Idle));
        assert_eq!(frames.slot_state(1), Some(SlotState::Idle));
    }

    #[test]
    fn timed_out_wait_is_device_loss() {
        let device = HeadlessDevice::manual();
        let mut frames =
            FramePipeline::new(&device, device.create_queue(), 1, Some(Duration::from_millis(10)))
                .unwrap();

        frames.begin_frame(0).unwrap();
        frames.submit().unwrap();
        let error = frames.begin_frame(0).err().unwrap();
        assert!(error.is_device_lost());

        frames.fence().timeline().set_mode(CompletionMode::Immediate);
    }

    #[test]
    fn dropping_drains() {
        let device = HeadlessDevice::new();
        let timeline = {
            let mut frames = pipeline(&device, 2);
            let timeline = frames.fence().timeline();
            frames.begin_frame(1).unwrap();
            frames.submit().unwrap();
            timeline
        };
        assert_eq!(timeline.last_signaled(), 2);
        assert_eq!(timeline.completed(), 2);
    }

    #[test]
    fn pipelines_on_one_device_retire_independently() {
        let device = HeadlessDevice::manual();
        let mut first = pipeline(&device, 2);
        let first_timeline = first.fence().timeline();
        for slot in [0, 1] {
            first.begin_frame(slot).unwrap();
            first.submit().unwrap();
        }
        first_timeline.complete_all();
        assert_eq!(first.completed_value().unwrap(), 2);

        let mut second = pipeline(&device, 2);
        let second_timeline = second.fence().timeline();
        second.begin_frame(0).unwrap();
        assert_eq!(second.submit().unwrap(), 1);
        assert_eq!(second.completed_value().unwrap(), 0);

        let waiter = std::thread::spawn(move || {
            let waited = second.begin_frame(0)?.waited;
            Ok::<_, RenderError>((second, waited))
        });
        std::thread::sleep(Duration::from_millis(30));
        assert!(!waiter.is_finished(), "slot 0 was reused before its own fence retired it");

        second_timeline.advance_to(1);
        let (second, waited) = waiter.join().unwrap().unwrap();
        assert!(waited);
        assert_eq!(second.allocator(0).unwrap().reset_log(), vec![0, 1]);

        first_timeline.set_mode(CompletionMode::Immediate);
        second_timeline.set_mode(CompletionMode::Immediate);
    }
}
