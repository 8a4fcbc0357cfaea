//! Input surfaces bound to the playback controller.
//!
//! Every surface ends in `seek`, `step` or a press/release on the same controller, so the index
//! reported back is always the one the slider shows.

use std::time::Instant;

use super::{FrameChanged, PlaybackController};
use crate::media::PlayDirection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pointer {
    Mouse,
    Touch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrowKey {
    Left,
    Right,
}

impl ArrowKey {
    pub fn direction(self) -> PlayDirection {
        match self {
            ArrowKey::Left => PlayDirection::Backward,
            ArrowKey::Right => PlayDirection::Forward,
        }
    }
}

/// Raw events from the host UI.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    /// Press-and-hold step control went down.
    ButtonDown {
        direction: PlayDirection,
        pointer: Pointer,
    },
    ButtonUp {
        direction: PlayDirection,
        pointer: Pointer,
    },
    /// Pointer left the control or the touch was cancelled.
    ButtonCancel { pointer: Pointer },
    /// Plain click-step control without hold support.
    Click(PlayDirection),
    KeyDown { key: ArrowKey, repeat: bool },
    KeyUp(ArrowKey),
    /// Vertical wheel delta; positive scrolls down.
    Wheel { delta_y: f64 },
    SliderInput(i64),
    SliderDragStart,
    SliderDragEnd,
}

/// Routes [`InputEvent`]s onto a [`PlaybackController`].
#[derive(Debug, Default)]
pub struct InputRouter {
    held_keys: [bool; 2],
    /// Pointer that owns the current button press.
    active_pointer: Option<Pointer>,
}

impl InputRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(
        &mut self,
        controller: &mut PlaybackController,
        event: InputEvent,
        now: Instant,
    ) -> Option<FrameChanged> {
        match event {
            InputEvent::ButtonDown { direction, pointer } => {
                self.active_pointer = Some(pointer);
                controller.press(direction, now);
                None
            }
            InputEvent::ButtonUp { direction, pointer } => {
                if self.active_pointer != Some(pointer) {
                    return None;
                }
                self.active_pointer = None;
                controller.release(direction, now)
            }
            InputEvent::ButtonCancel { pointer } => {
                if self.active_pointer == Some(pointer) {
                    self.active_pointer = None;
                    controller.cancel_press();
                }
                None
            }
            InputEvent::Click(direction) => controller.step(direction.delta()),
            InputEvent::KeyDown { key, repeat } => {
                let held = &mut self.held_keys[key_slot(key)];
                if repeat || *held {
                    return None;
                }
                *held = true;
                controller.press(key.direction(), now);
                None
            }
            InputEvent::KeyUp(key) => {
                let held = &mut self.held_keys[key_slot(key)];
                if !*held {
                    return None;
                }
                *held = false;
                controller.release(key.direction(), now)
            }
            InputEvent::Wheel { delta_y } => match wheel_direction(delta_y) {
                Some(direction) => controller.step(direction.delta()),
                None => None,
            },
            InputEvent::SliderInput(index) => controller.seek(index),
            InputEvent::SliderDragStart => {
                controller.begin_scrub();
                None
            }
            InputEvent::SliderDragEnd => {
                controller.end_scrub();
                None
            }
        }
    }
}

fn key_slot(key: ArrowKey) -> usize {
    match key {
        ArrowKey::Left => 0,
        ArrowKey::Right => 1,
    }
}

/// One step per wheel tick. Zero and non-finite deltas do nothing.
pub fn wheel_direction(delta_y: f64) -> Option<PlayDirection> {
    if !delta_y.is_finite() || delta_y == 0.0 {
        None
    } else if delta_y > 0.0 {
        Some(PlayDirection::Forward)
    } else {
        Some(PlayDirection::Backward)
    }
}
