//! Frame pacing, decoupled from any display.
//!
//! A [`FrameScheduler`] decides when the next frame may run. The windowed
//! runner asks it after every redraw; the headless runner drives it in a
//! loop until the frame budget is spent.

use std::time::{Duration, Instant};

/// Timing of one scheduled frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameTick {
    /// Seconds since the previous tick, clamped.
    pub dt: f32,
    pub now: Instant,
    pub frame_index: u64,
}

/// Monotonic clock producing clamped frame deltas.
///
/// Deltas are clamped so a debugger pause or a minimized window does not
/// produce a huge step.
#[derive(Debug, Clone)]
pub struct FrameClock {
    last: Instant,
    frame_index: u64,
    dt_min: Duration,
    dt_max: Duration,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::with_clamps(Duration::from_micros(100), Duration::from_millis(250))
    }

    pub fn with_clamps(dt_min: Duration, dt_max: Duration) -> Self {
        debug_assert!(dt_min <= dt_max);
        Self {
            last: Instant::now(),
            frame_index: 0,
            dt_min,
            dt_max,
        }
    }

    /// Resets the baseline, e.g. when resuming.
    pub fn reset(&mut self) {
        self.last = Instant::now();
    }

    pub fn tick(&mut self) -> FrameTick {
        let now = Instant::now();
        let dt = now
            .saturating_duration_since(self.last)
            .clamp(self.dt_min, self.dt_max);
        self.last = now;

        let tick = FrameTick {
            dt: dt.as_secs_f32(),
            now,
            frame_index: self.frame_index,
        };
        self.frame_index = self.frame_index.wrapping_add(1);
        tick
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    /// No new frames are accepted; an already requested one still runs.
    Stopped,
    /// No further frames run at all.
    Cancelled,
}

pub trait FrameScheduler {
    fn start(&mut self);
    fn stop(&mut self);
    fn cancel(&mut self);
    /// Asks for one more frame. Ignored unless running.
    fn request_frame(&mut self);
    /// Yields the next frame to run, if one is due.
    fn poll(&mut self) -> Option<FrameTick>;
    fn state(&self) -> SchedulerState;

    /// Whether no frame can ever be yielded again.
    fn is_finished(&self) -> bool;
}

/// Request-driven scheduler with an optional frame budget.
#[derive(Debug, Clone)]
pub struct FrameLoop {
    clock: FrameClock,
    state: SchedulerState,
    requested: bool,
    budget: Option<u64>,
    produced: u64,
}

impl FrameLoop {
    pub fn new() -> Self {
        Self {
            clock: FrameClock::new(),
            state: SchedulerState::Idle,
            requested: false,
            budget: None,
            produced: 0,
        }
    }

    /// Loop that stops by itself after `frames` frames.
    pub fn with_budget(frames: u64) -> Self {
        Self {
            budget: Some(frames),
            ..Self::new()
        }
    }

    pub fn frames_produced(&self) -> u64 {
        self.produced
    }

    fn budget_spent(&self) -> bool {
        self.budget.is_some_and(|budget| self.produced >= budget)
    }
}

impl Default for FrameLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameScheduler for FrameLoop {
    fn start(&mut self) {
        if self.state == SchedulerState::Cancelled {
            return;
        }
        if self.budget_spent() {
            self.state = SchedulerState::Stopped;
            return;
        }
        self.state = SchedulerState::Running;
        self.requested = true;
        self.clock.reset();
    }

    fn stop(&mut self) {
        if self.state == SchedulerState::Running {
            self.state = SchedulerState::Stopped;
        }
    }

    fn cancel(&mut self) {
        self.state = SchedulerState::Cancelled;
        self.requested = false;
    }

    fn request_frame(&mut self) {
        if self.state == SchedulerState::Running && !self.budget_spent() {
            self.requested = true;
        }
    }

    fn poll(&mut self) -> Option<FrameTick> {
        let live = matches!(
            self.state,
            SchedulerState::Running | SchedulerState::Stopped
        );
        if !live || !self.requested {
            return None;
        }
        self.requested = false;
        self.produced += 1;
        if self.budget_spent() {
            self.state = SchedulerState::Stopped;
        }
        Some(self.clock.tick())
    }

    fn state(&self) -> SchedulerState {
        self.state
    }

    fn is_finished(&self) -> bool {
        match self.state {
            SchedulerState::Cancelled => true,
            SchedulerState::Stopped => !self.requested,
            SchedulerState::Idle | SchedulerState::Running => false,
        }
    }
}
