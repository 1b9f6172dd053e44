//! Application-level key vocabulary built on top of raw broker records.

use crate::codes::*;
use crate::event::{InputEvent, KeyValue};
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    KeyboardSlider,
    Camera,
    VolumeUp,
    VolumeDown,
    Mute,
    Power,
    Phone,
    Up,
    Down,
    Left,
    Right,
    Play,
    Pause,
    PlayPause,
    Stop,
    NextSong,
    PreviousSong,
    Forward,
    Rewind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    #[default]
    Unknown,
    Up,
    HalfDown,
    Down,
}

impl Key {
    /// Maps a raw record type/code to a key. Both camera codes map to [`Key::Camera`].
    pub fn from_raw(type_: u16, code: u16) -> Option<Key> {
        if type_ == EV_SW {
            return (code == SW_KEYPAD_SLIDE).then_some(Key::KeyboardSlider);
        }
        if type_ != EV_KEY {
            return None;
        }
        let key = match code {
            KEY_CAMERA | KEY_CAMERA_FOCUS => Key::Camera,
            KEY_VOLUMEUP => Key::VolumeUp,
            KEY_VOLUMEDOWN => Key::VolumeDown,
            KEY_MUTE => Key::Mute,
            KEY_POWER => Key::Power,
            KEY_PHONE => Key::Phone,
            KEY_UP => Key::Up,
            KEY_DOWN => Key::Down,
            KEY_LEFT => Key::Left,
            KEY_RIGHT => Key::Right,
            KEY_PLAYCD => Key::Play,
            KEY_PAUSECD => Key::Pause,
            KEY_PLAYPAUSE => Key::PlayPause,
            KEY_STOPCD => Key::Stop,
            KEY_NEXTSONG => Key::NextSong,
            KEY_PREVIOUSSONG => Key::PreviousSong,
            KEY_FASTFORWARD => Key::Forward,
            KEY_REWIND => Key::Rewind,
            _ => return None,
        };
        Some(key)
    }

    /// Raw `(type, code)` pair to query for this key. For the camera this is the shutter.
    pub fn raw_code(self) -> (u16, u16) {
        let code = match self {
            Key::KeyboardSlider => return (EV_SW, SW_KEYPAD_SLIDE),
            Key::Camera => KEY_CAMERA,
            Key::VolumeUp => KEY_VOLUMEUP,
            Key::VolumeDown => KEY_VOLUMEDOWN,
            Key::Mute => KEY_MUTE,
            Key::Power => KEY_POWER,
            Key::Phone => KEY_PHONE,
            Key::Up => KEY_UP,
            Key::Down => KEY_DOWN,
            Key::Left => KEY_LEFT,
            Key::Right => KEY_RIGHT,
            Key::Play => KEY_PLAYCD,
            Key::Pause => KEY_PAUSECD,
            Key::PlayPause => KEY_PLAYPAUSE,
            Key::Stop => KEY_STOPCD,
            Key::NextSong => KEY_NEXTSONG,
            Key::PreviousSong => KEY_PREVIOUSSONG,
            Key::Forward => KEY_FASTFORWARD,
            Key::Rewind => KEY_REWIND,
        };
        (EV_KEY, code)
    }
}

/// Combines the camera shutter and focus codes into one three-position key.
#[derive(Debug, Clone, Copy)]
pub struct CameraTracker {
    state: State,
    focus_down: bool,
}

impl Default for CameraTracker {
    fn default() -> Self {
        Self {
            state: State::Up,
            focus_down: false,
        }
    }
}

impl CameraTracker {
    pub fn state(&self) -> State {
        self.state
    }

    /// Feeds one camera record. Returns the new position when it changed.
    pub fn feed(&mut self, code: u16, value: i32) -> Option<State> {
        let value = KeyValue::from_raw(value)?;
        let previous = self.state;
        match (code, value) {
            (_, KeyValue::Repeat) => {}
            (KEY_CAMERA_FOCUS, KeyValue::Pressed) => {
                self.focus_down = true;
                match self.state {
                    State::Up | State::Unknown => self.state = State::HalfDown,
                    State::HalfDown => {}
                    State::Down => warn!("Camera focus pressed while shutter is already down"),
                }
            }
            (KEY_CAMERA_FOCUS, KeyValue::Released) => {
                self.focus_down = false;
                if self.state == State::HalfDown {
                    self.state = State::Up;
                }
            }
            (KEY_CAMERA, KeyValue::Pressed) => {
                if self.state != State::Down {
                    if !self.focus_down {
                        warn!("Camera shutter pressed without half press, going straight down");
                    }
                    self.state = State::Down;
                }
            }
            (KEY_CAMERA, KeyValue::Released) => {
                if self.state == State::Down {
                    self.state = if self.focus_down {
                        State::HalfDown
                    } else {
                        State::Up
                    };
                }
            }
            _ => return None,
        }
        (self.state != previous).then_some(self.state)
    }
}

/// Last-known state of every key, updated from broadcast records.
#[derive(Debug, Default)]
pub struct KeyTracker {
    states: HashMap<Key, State>,
    camera: CameraTracker,
}

impl KeyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, key: Key) -> State {
        self.states.get(&key).copied().unwrap_or_default()
    }

    /// Applies a broadcast record. Returns the key and its new state when it changed.
    pub fn apply(&mut self, event: &InputEvent) -> Option<(Key, State)> {
        let key = Key::from_raw(event.type_, event.code)?;
        let state = if key == Key::Camera {
            self.camera.feed(event.code, event.value)?
        } else {
            match KeyValue::from_raw(event.value)? {
                KeyValue::Pressed => State::Down,
                KeyValue::Released => State::Up,
                KeyValue::Repeat => return None,
            }
        };
        if self.states.insert(key, state) == Some(state) {
            return None;
        }
        debug!(?key, ?state, "Key state changed");
        Some((key, state))
    }
}
