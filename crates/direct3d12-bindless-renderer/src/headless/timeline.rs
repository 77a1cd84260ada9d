use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::{RenderError, RenderResult};

/// When signals posted to the simulated queue become complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    /// The simulated GPU finishes work the moment it is signaled.
    Immediate,
    /// Nothing completes until [`Timeline::advance_to`] or [`Timeline::complete_all`].
    Manual,
    /// Each signal completes the given latency after it was posted, in order, on
    /// one completion thread per timeline.
    Delayed(Duration),
}

#[derive(Debug)]
struct TimelineState {
    mode: CompletionMode,
    completed: u64,
    last_signaled: u64,
    /// Delayed signals not yet completed, with the instant they are due.
    pending: VecDeque<(Instant, u64)>,
    worker_running: bool,
}

/// The progress of one simulated fence.
///
/// Each [`super::HeadlessFence`] owns one, shared with the command allocators
/// created after it. Safe to advance from another thread.
#[derive(Debug)]
pub struct Timeline {
    state: Mutex<TimelineState>,
    changed: Condvar,
}

impl Timeline {
    pub fn new(mode: CompletionMode) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TimelineState {
                mode,
                completed: 0,
                last_signaled: 0,
                pending: VecDeque::new(),
                worker_running: false,
            }),
            changed: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, TimelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mode(&self) -> CompletionMode {
        self.lock().mode
    }

    /// Switches how later signals complete. Switching to
    /// [`CompletionMode::Immediate`] also finishes everything already signaled.
    pub fn set_mode(&self, mode: CompletionMode) {
        self.lock().mode = mode;
        if mode == CompletionMode::Immediate {
            self.complete_all();
        }
    }

    pub fn completed(&self) -> u64 {
        self.lock().completed
    }

    pub fn last_signaled(&self) -> u64 {
        self.lock().last_signaled
    }

    /// Queues a signal of `value` behind everything signaled before it.
    pub(crate) fn signal(self: &Arc<Self>, value: u64) {
        let mut state = self.lock();
        state.last_signaled = state.last_signaled.max(value);
        let mode = state.mode;
        trace!(value, ?mode, "timeline signaled");

        match mode {
            CompletionMode::Immediate => {
                drop(state);
                self.advance_to(value);
            }
            CompletionMode::Manual => {}
            CompletionMode::Delayed(latency) => {
                state.pending.push_back((Instant::now() + latency, value));
                if !state.worker_running {
                    state.worker_running = true;
                    drop(state);
                    let timeline = Arc::clone(self);
                    std::thread::spawn(move || timeline.complete_pending());
                }
            }
        }
    }

    /// Body of the completion thread: finishes delayed signals in order and exits
    /// once none are left.
    fn complete_pending(&self) {
        loop {
            let (due, value) = {
                let mut state = self.lock();
                match state.pending.pop_front() {
                    Some(next) => next,
                    None => {
                        state.worker_running = false;
                        return;
                    }
                }
            };
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }
            self.advance_to(value);
        }
    }

    /// Whether a completion thread is currently running for this timeline.
    pub fn has_completion_thread(&self) -> bool {
        self.lock().worker_running
    }

    /// Delayed signals that have not completed yet.
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Reports all work up to `value` as finished. Never moves backwards.
    pub fn advance_to(&self, value: u64) {
        let mut state = self.lock();
        if value > state.completed {
            state.completed = value;
            trace!(value, "timeline advanced");
            self.changed.notify_all();
        }
    }

    /// Finishes everything signaled so far.
    pub fn complete_all(&self) {
        let last = self.last_signaled();
        self.advance_to(last);
    }

    /// Raises the completed value to `value` if it is lower, used for a fence's initial value.
    pub(crate) fn initialize(&self, value: u64) {
        let mut state = self.lock();
        state.completed = state.completed.max(value);
        state.last_signaled = state.last_signaled.max(value);
    }

    pub(crate) fn wait(&self, value: u64, timeout: Option<Duration>) -> RenderResult<()> {
        let deadline = timeout.map(|timeout| (Instant::now() + timeout, timeout));
        let mut state = self.lock();

        while state.completed < value {
            state = match deadline {
                None => self
                    .changed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some((deadline, timeout)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(RenderError::FenceTimeout {
                            value,
                            completed: state.completed,
                            timeout,
                        });
                    }
                    self.changed
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_mode_completes_on_signal() {
        let timeline = Timeline::new(CompletionMode::Immediate);
        timeline.signal(3);
        assert_eq!(timeline.completed(), 3);
        timeline.wait(3, None).unwrap();
    }

    #[test]
    fn manual_mode_waits_for_advance() {
        let timeline = Timeline::new(CompletionMode::Manual);
        timeline.signal(1);
        timeline.signal(2);
        assert_eq!(timeline.completed(), 0);
        assert_eq!(timeline.last_signaled(), 2);

        let waiter = {
            let timeline = Arc::clone(&timeline);
            std::thread::spawn(move || timeline.wait(2, None))
        };
        timeline.advance_to(1);
        std::thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        timeline.complete_all();
        waiter.join().unwrap().unwrap();
        assert_eq!(timeline.completed(), 2);
    }

    #[test]
    fn switching_to_immediate_releases_waiters() {
        let timeline = Timeline::new(CompletionMode::Manual);
        timeline.signal(4);
        timeline.set_mode(CompletionMode::Immediate);
        assert_eq!(timeline.completed(), 4);

        timeline.signal(5);
        assert_eq!(timeline.completed(), 5);
    }

    #[test]
    fn completed_never_moves_backwards() {
        let timeline = Timeline::new(CompletionMode::Manual);
        timeline.advance_to(5);
        timeline.advance_to(2);
        assert_eq!(timeline.completed(), 5);
    }

    #[test]
    fn wait_times_out() {
        let timeline = Timeline::new(CompletionMode::Manual);
        timeline.signal(1);
        let error = timeline
            .wait(1, Some(Duration::from_millis(10)))
            .unwrap_err();
        assert!(matches!(
            error,
            RenderError::FenceTimeout {
                value: 1,
                completed: 0,
                ..
            }
        ));
    }

    #[test]
    fn delayed_mode_completes_eventually() {
        let timeline = Timeline::new(CompletionMode::Delayed(Duration::from_millis(5)));
        timeline.signal(1);
        timeline.wait(1, Some(Duration::from_secs(5))).unwrap();
        assert_eq!(timeline.completed(), 1);
    }

    #[test]
    fn delayed_signals_share_one_completion_thread() {
        let timeline = Timeline::new(CompletionMode::Delayed(Duration::from_millis(1)));
        for value in 1..=200 {
            timeline.signal(value);
        }
        assert!(timeline.has_completion_thread());

        timeline.wait(200, Some(Duration::from_secs(5))).unwrap();
        assert_eq!(timeline.completed(), 200);

        let deadline = Instant::now() + Duration::from_secs(5);
        while timeline.has_completion_thread() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(!timeline.has_completion_thread());
        assert_eq!(timeline.pending(), 0);
    }

}
