use tracing::trace;

use crate::error::{RenderError, RenderResult};
use crate::frame_loop::{Presenter, WindowEvents, WindowState};

/// A swap chain without a screen.
///
/// Hands out image indices in a fixed, repeating order, which need not be round
/// robin, and advances to the next one on present like a flip-model swap chain.
#[derive(Debug, Clone)]
pub struct HeadlessPresenter {
    image_count: usize,
    order: Vec<usize>,
    cursor: usize,
    presented: Vec<usize>,
    sync_intervals: Vec<u32>,
}

impl HeadlessPresenter {
    pub fn round_robin(image_count: usize) -> Self {
        Self::with_order(image_count, (0..image_count).collect())
    }

    /// `order` is repeated forever; an empty order falls back to round robin.
    pub fn with_order(image_count: usize, order: Vec<usize>) -> Self {
        let order = if order.is_empty() {
            (0..image_count).collect()
        } else {
            order
        };
        Self {
            image_count,
            order,
            cursor: 0,
            presented: Vec::new(),
            sync_intervals: Vec::new(),
        }
    }

    /// Image indices in the order they were presented.
    pub fn presented(&self) -> &[usize] {
        &self.presented
    }

    pub fn sync_intervals(&self) -> &[u32] {
        &self.sync_intervals
    }
}

impl Presenter for HeadlessPresenter {
    fn image_count(&self) -> usize {
        self.image_count
    }

    fn next_image_index(&self) -> RenderResult<usize> {
        let index = match self.order.len() {
            0 => 0,
            len => self.order[self.cursor % len],
        };
        if index >= self.image_count {
            return Err(RenderError::InvalidFrameSlot {
                index,
                frame_count: self.image_count,
            });
        }
        Ok(index)
    }

    fn present(&mut self, sync_interval: u32) -> RenderResult<()> {
        let index = self.next_image_index()?;
        trace!(index, sync_interval, "present");
        self.presented.push(index);
        self.sync_intervals.push(sync_interval);
        self.cursor += 1;
        Ok(())
    }
}

/// A window that never receives input and asks to quit after a number of frames.
#[derive(Debug, Clone)]
pub struct HeadlessWindow {
    width: u32,
    height: u32,
    remaining_frames: Option<u64>,
}

impl HeadlessWindow {
    pub fn for_frames(width: u32, height: u32, frames: u64) -> Self {
        Self {
            width,
            height,
            remaining_frames: Some(frames),
        }
    }

    pub fn unbounded(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            remaining_frames: None,
        }
    }
}

impl WindowEvents for HeadlessWindow {
    fn poll(&mut self) -> RenderResult<WindowState> {
        let quit_requested = match &mut self.remaining_frames {
            Some(0) => true,
            Some(remaining) => {
                *remaining -= 1;
                false
            }
            None => false,
        };
        Ok(WindowState {
            width: self.width,
            height: self.height,
            quit_requested,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follows_the_given_order() {
        let mut presenter = HeadlessPresenter::with_order(3, vec![2, 0, 1]);
        for expected in [2, 0, 1, 2] {
            assert_eq!(presenter.next_image_index().unwrap(), expected);
            presenter.present(1).unwrap();
        }
        assert_eq!(presenter.presented(), &[2, 0, 1, 2]);
    }

    #[test]
    fn window_quits_after_the_requested_frames() {
        let mut window = HeadlessWindow::for_frames(800, 600, 2);
        assert!(!window.poll().unwrap().quit_requested);
        assert!(!window.poll().unwrap().quit_requested);
        let last = window.poll().unwrap();
        assert!(last.quit_requested);
        assert_eq!((last.width, last.height), (800, 600));
    }
}
