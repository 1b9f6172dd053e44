//! Linux input ABI constants and the set of codes the broker forwards.
//!
//! Values mirror `linux/input-event-codes.h`.

pub const EV_SYN: u16 = 0x00;
pub const EV_KEY: u16 = 0x01;
pub const EV_REL: u16 = 0x02;
pub const EV_SW: u16 = 0x05;
pub const EV_REP: u16 = 0x14;

pub const KEY_UP: u16 = 103;
pub const KEY_LEFT: u16 = 105;
pub const KEY_RIGHT: u16 = 106;
pub const KEY_DOWN: u16 = 108;
pub const KEY_MUTE: u16 = 113;
pub const KEY_VOLUMEDOWN: u16 = 114;
pub const KEY_VOLUMEUP: u16 = 115;
pub const KEY_POWER: u16 = 116;
pub const KEY_NEXTSONG: u16 = 163;
pub const KEY_PLAYPAUSE: u16 = 164;
pub const KEY_PREVIOUSSONG: u16 = 165;
pub const KEY_STOPCD: u16 = 166;
pub const KEY_REWIND: u16 = 168;
pub const KEY_PHONE: u16 = 169;
pub const KEY_PLAYCD: u16 = 200;
pub const KEY_PAUSECD: u16 = 201;
pub const KEY_FASTFORWARD: u16 = 208;
pub const KEY_CAMERA: u16 = 212;
pub const KEY_CAMERA_FOCUS: u16 = 0x210;

pub const SW_KEYPAD_SLIDE: u16 = 0x0a;

/// Key codes forwarded to clients and answered by state queries.
pub const SUPPORTED_KEYS: &[u16] = &[
    KEY_VOLUMEUP,
    KEY_VOLUMEDOWN,
    KEY_CAMERA,
    KEY_CAMERA_FOCUS,
    KEY_UP,
    KEY_DOWN,
    KEY_LEFT,
    KEY_RIGHT,
    KEY_PLAYCD,
    KEY_PAUSECD,
    KEY_PLAYPAUSE,
    KEY_STOPCD,
    KEY_NEXTSONG,
    KEY_PREVIOUSSONG,
    KEY_FASTFORWARD,
    KEY_REWIND,
    KEY_PHONE,
    KEY_MUTE,
    KEY_POWER,
];

/// Media transport keys a Bluetooth headset has to report.
pub const MEDIA_KEYS: &[u16] = &[
    KEY_PAUSECD,
    KEY_PLAYCD,
    KEY_STOPCD,
    KEY_NEXTSONG,
    KEY_FASTFORWARD,
    KEY_PREVIOUSSONG,
    KEY_REWIND,
];

pub fn is_supported(type_: u16, code: u16) -> bool {
    match type_ {
        EV_KEY => SUPPORTED_KEYS.contains(&code),
        EV_SW => code == SW_KEYPAD_SLIDE,
        _ => false,
    }
}
