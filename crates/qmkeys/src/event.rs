//! Wire representation of a single input event.
//!
//! Every message on the broker socket is one record laid out exactly like the
//! 64-bit kernel `struct input_event`: seconds, microseconds, type, code and
//! value, in native byte order with no framing.

use nix::time::{ClockId, clock_gettime};

/// Seconds and microseconds, as in a kernel `timeval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    pub sec: i64,
    pub usec: i64,
}

impl Timestamp {
    pub fn new(sec: i64, usec: i64) -> Self {
        Self { sec, usec }
    }

    /// Current value of `CLOCK_MONOTONIC`.
    pub fn monotonic_now() -> Self {
        match clock_gettime(ClockId::CLOCK_MONOTONIC) {
            Ok(ts) => Self {
                sec: ts.tv_sec() as i64,
                usec: ts.tv_nsec() as i64 / 1_000,
            },
            Err(e) => {
                tracing::warn!("Failed to read monotonic clock: {}", e);
                Self::default()
            }
        }
    }
}

/// Value carried by a key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyValue {
    Released = 0,
    Pressed = 1,
    Repeat = 2,
}

impl KeyValue {
    pub fn from_raw(value: i32) -> Option<Self> {
        match value {
            0 => Some(KeyValue::Released),
            1 => Some(KeyValue::Pressed),
            2 => Some(KeyValue::Repeat),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub time: Timestamp,
    pub type_: u16,
    pub code: u16,
    pub value: i32,
}

impl InputEvent {
    /// Size of one record on the wire.
    pub const SIZE: usize = 24;

    pub fn new(time: Timestamp, type_: u16, code: u16, value: i32) -> Self {
        Self {
            time,
            type_,
            code,
            value,
        }
    }

    /// A key event stamped with the monotonic clock.
    pub fn key(code: u16, value: KeyValue) -> Self {
        Self::new(
            Timestamp::monotonic_now(),
            crate::codes::EV_KEY,
            code,
            value as i32,
        )
    }

    /// A state query for `type_`/`code`. The broker ignores the value field.
    pub fn query(type_: u16, code: u16) -> Self {
        Self::new(Timestamp::monotonic_now(), type_, code, 0)
    }

    pub fn is_supported(&self) -> bool {
        crate::codes::is_supported(self.type_, self.code)
    }

    /// True when `other` answers a query for the same type and code.
    pub fn matches(&self, other: &InputEvent) -> bool {
        self.type_ == other.type_ && self.code == other.code
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(&self.time.sec.to_ne_bytes());
        buf[8..16].copy_from_slice(&self.time.usec.to_ne_bytes());
        buf[16..18].copy_from_slice(&self.type_.to_ne_bytes());
        buf[18..20].copy_from_slice(&self.code.to_ne_bytes());
        buf[20..24].copy_from_slice(&self.value.to_ne_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; Self::SIZE]) -> Self {
        let mut sec = [0u8; 8];
        let mut usec = [0u8; 8];
        let mut type_ = [0u8; 2];
        let mut code = [0u8; 2];
        let mut value = [0u8; 4];
        sec.copy_from_slice(&buf[0..8]);
        usec.copy_from_slice(&buf[8..16]);
        type_.copy_from_slice(&buf[16..18]);
        code.copy_from_slice(&buf[18..20]);
        value.copy_from_slice(&buf[20..24]);
        Self {
            time: Timestamp::new(i64::from_ne_bytes(sec), i64::from_ne_bytes(usec)),
            type_: u16::from_ne_bytes(type_),
            code: u16::from_ne_bytes(code),
            value: i32::from_ne_bytes(value),
        }
    }

    /// Decodes the first record of `buf`, or `None` when it is short.
    pub fn try_from_slice(buf: &[u8]) -> Option<Self> {
        let record: &[u8; Self::SIZE] = buf.get(..Self::SIZE)?.try_into().ok()?;
        Some(Self::from_bytes(record))
    }
}
