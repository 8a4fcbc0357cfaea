pub mod clock;
pub mod input;

use std::time::{Duration, Instant};

use crate::buffer::FrameBuffer;
use crate::media::{DecodedFrame, PlayDirection};

use self::clock::FrameClock;

/// Position and transport state of the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackState {
    pub current_index: usize,
    pub is_playing: bool,
    pub direction: PlayDirection,
}

/// Controller state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerMode {
    /// No finalized buffer yet.
    Idle,
    Ready,
    /// A slider drag is in progress.
    Scrubbing,
    /// A step control is pressed and the hold threshold has not been reached.
    SteppingOneShot(PlayDirection),
    Playing(PlayDirection),
}

/// Emitted on every index change so the host can keep slider and counter in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameChanged {
    pub current_index: usize,
    pub total: usize,
}

/// Read-only snapshot for the host UI.
#[derive(Debug, Clone)]
pub struct PlaybackInfo {
    pub current_index: usize,
    pub total: usize,
    pub mode: ControllerMode,
    pub fps: u32,
    pub counter_text: String,
}

#[derive(Debug, Clone, Copy)]
struct Press {
    direction: PlayDirection,
    at: Instant,
}

/// Drives seek, stepping and continuous playback over a finalized buffer.
pub struct PlaybackController {
    buffer: Option<FrameBuffer>,
    state: PlaybackState,
    mode: ControllerMode,
    clock: FrameClock,
    fps: u32,
    hold_threshold: Duration,
    press: Option<Press>,
}

impl PlaybackController {
    /// An idle controller with nothing to show.
    pub fn new(fps: u32, hold_threshold: Duration) -> Self {
        Self {
            buffer: None,
            state: PlaybackState {
                current_index: 0,
                is_playing: false,
                direction: PlayDirection::Forward,
            },
            mode: ControllerMode::Idle,
            clock: FrameClock::new(fps),
            fps: fps.max(1),
            hold_threshold,
            press: None,
        }
    }

    pub fn with_buffer(buffer: FrameBuffer, fps: u32, hold_threshold: Duration) -> Self {
        let mut controller = Self::new(fps, hold_threshold);
        controller.attach(buffer);
        controller
    }

    /// Take the finalized buffer and show frame 0.
    pub fn attach(&mut self, buffer: FrameBuffer) -> Option<FrameChanged> {
        if buffer.is_empty() {
            log::warn!("Refusing to attach an empty frame buffer");
            return None;
        }
        self.clock.stop();
        self.press = None;
        self.buffer = Some(buffer);
        self.state = PlaybackState {
            current_index: 0,
            is_playing: false,
            direction: PlayDirection::Forward,
        };
        self.set_mode(ControllerMode::Ready);
        self.changed()
    }

    pub fn total(&self) -> usize {
        self.buffer.as_ref().map_or(0, FrameBuffer::len)
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn mode(&self) -> ControllerMode {
        self.mode
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn set_fps(&mut self, fps: u32) {
        self.fps = fps.max(1);
        self.clock.set_fps(self.fps);
    }

    /// Pixels of the frame currently shown.
    pub fn current_frame(&self) -> Option<&DecodedFrame> {
        self.buffer.as_ref()?.get(self.state.current_index)
    }

    /// Show frame `index`, wrapping any integer into range. Stops continuous playback.
    pub fn seek(&mut self, index: i64) -> Option<FrameChanged> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        if matches!(self.mode, ControllerMode::Playing(_)) {
            self.stop_continuous();
        }
        self.state.current_index = wrap(index, total);
        self.changed()
    }

    /// Move `delta` frames around the ring.
    pub fn step(&mut self, delta: i64) -> Option<FrameChanged> {
        let current = i64::try_from(self.state.current_index).unwrap_or(0);
        self.seek(current.saturating_add(delta))
    }

    pub fn start_continuous(&mut self, direction: PlayDirection, now: Instant) {
        if self.total() == 0 {
            return;
        }
        self.press = None;
        self.state.is_playing = true;
        self.state.direction = direction;
        self.clock.start(now);
        self.set_mode(ControllerMode::Playing(direction));
    }

    /// Stop auto-advance. The pending deadline is dropped, so later ticks do nothing.
    pub fn stop_continuous(&mut self) {
        self.clock.stop();
        self.press = None;
        self.state.is_playing = false;
        if self.buffer.is_some() {
            self.set_mode(ControllerMode::Ready);
        }
    }

    /// A step control went down.
    pub fn press(&mut self, direction: PlayDirection, now: Instant) {
        if self.total() == 0 {
            return;
        }
        match self.mode {
            ControllerMode::Playing(_) => self.stop_continuous(),
            ControllerMode::SteppingOneShot(_) => return,
            _ => {}
        }
        self.press = Some(Press { direction, at: now });
        self.set_mode(ControllerMode::SteppingOneShot(direction));
    }

    /// A step control came up. A release before the hold threshold steps exactly once.
    pub fn release(&mut self, direction: PlayDirection, now: Instant) -> Option<FrameChanged> {
        let changed = self.tick(now);
        match self.mode {
            ControllerMode::SteppingOneShot(d) if d == direction => {
                self.press = None;
                self.set_mode(ControllerMode::Ready);
                self.step(direction.delta())
            }
            ControllerMode::Playing(d) if d == direction => {
                self.stop_continuous();
                changed
            }
            _ => changed,
        }
    }

    /// Abandon a press without stepping, e.g. a cancelled touch.
    pub fn cancel_press(&mut self) {
        match self.mode {
            ControllerMode::SteppingOneShot(_) => {
                self.press = None;
                self.set_mode(ControllerMode::Ready);
            }
            ControllerMode::Playing(_) => self.stop_continuous(),
            _ => {}
        }
    }

    pub fn begin_scrub(&mut self) {
        if self.total() == 0 {
            return;
        }
        if matches!(self.mode, ControllerMode::Playing(_)) {
            self.stop_continuous();
        }
        self.press = None;
        self.set_mode(ControllerMode::Scrubbing);
    }

    pub fn end_scrub(&mut self) {
        if self.mode == ControllerMode::Scrubbing {
            self.set_mode(ControllerMode::Ready);
        }
    }

    /// Advance time: promote a long press to continuous playback and emit due frames.
    pub fn tick(&mut self, now: Instant) -> Option<FrameChanged> {
        if let (ControllerMode::SteppingOneShot(direction), Some(press)) = (self.mode, self.press) {
            if now.saturating_duration_since(press.at) >= self.hold_threshold {
                // Continuous runs from the moment the threshold was crossed
                self.start_continuous(direction, press.at + self.hold_threshold);
            }
        }

        let ControllerMode::Playing(direction) = self.mode else {
            return None;
        };
        let due = self.clock.due(now);
        if due == 0 {
            return None;
        }
        let total = self.total();
        let current = i64::try_from(self.state.current_index).unwrap_or(0);
        self.state.current_index = wrap(current + direction.delta() * i64::from(due), total);
        self.changed()
    }

    /// When the host should call [`tick`](Self::tick) next.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.mode, self.press) {
            (ControllerMode::SteppingOneShot(_), Some(press)) => {
                Some(press.at + self.hold_threshold)
            }
            (ControllerMode::Playing(_), _) => self.clock.deadline(),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> PlaybackInfo {
        let total = self.total();
        PlaybackInfo {
            current_index: self.state.current_index,
            total,
            mode: self.mode,
            fps: self.fps,
            counter_text: counter_text(self.state.current_index, total),
        }
    }

    fn set_mode(&mut self, mode: ControllerMode) {
        if self.mode != mode {
            log::debug!("Playback {:?} -> {:?}", self.mode, mode);
            self.mode = mode;
        }
    }

    fn changed(&self) -> Option<FrameChanged> {
        let total = self.total();
        (total > 0).then_some(FrameChanged {
            current_index: self.state.current_index,
            total,
        })
    }
}

/// Euclidean wrap of any integer into `[0, total)`.
pub fn wrap(index: i64, total: usize) -> usize {
    let total = i64::try_from(total).unwrap_or(i64::MAX).max(1);
    // rem_euclid is non-negative and below total
    index.rem_euclid(total) as usize
}

pub fn counter_text(index: usize, total: usize) -> String {
    if total == 0 {
        "Frame: 0/0".to_string()
    } else {
        format!("Frame: {}/{}", index + 1, total)
    }
}

#[cfg(test)]
pub(crate) fn test_buffer(total: usize) -> FrameBuffer {
    use crate::buffer::{FinalizePolicy, FrameTable, finalize, solid_frame};

    let mut table = FrameTable::new(total);
    for i in 0..total {
        table.settle(i, Some(solid_frame((i % 256) as u8)));
    }
    finalize(table, FinalizePolicy::default()).unwrap().buffer
}
