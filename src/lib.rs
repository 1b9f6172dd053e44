//! qmkeyd: multiplexes hardware key devices onto one local socket.
//!
//! Events from the GPIO keys, keypad, ECI accessory and power button devices,
//! plus a hotplugged Bluetooth headset, are filtered against the supported
//! key/switch set and copied verbatim to every connected client. Clients can
//! also ask whether a key is currently down. The client side lives in the
//! `qmkeys` crate.

pub mod broker;
pub mod config;
pub mod device;
pub mod error;
pub mod hotplug;
pub mod server;
