//! Client side of the qmkeyd key broker.
//!
//! Applications link this crate to receive hardware key and switch events
//! multiplexed by `qmkeyd`, to ask whether a key is currently held, and to
//! tell short presses from long ones.

pub mod client;
pub mod codes;
pub mod error;
pub mod event;
pub mod keys;
pub mod longpress;

pub use client::{QmKeys, default_socket_path, query_key_value};
pub use error::ClientError;
pub use event::{InputEvent, KeyValue, Timestamp};
pub use keys::{CameraTracker, Key, KeyTracker, State};
pub use longpress::LongPressTranslator;
