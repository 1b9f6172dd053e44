//! Input device handles and the capability queries the broker relies on.
//!
//! The broker only talks to devices through [`Capabilities`] and
//! [`DeviceOpener`], so slot bookkeeping and the Bluetooth probe can be driven
//! by fakes in tests. [`EvdevDevice`] is the real implementation.

use evdev::{Device, EventType, KeyCode, SwitchCode};
use nix::fcntl::OFlag;
use qmkeys::codes::{EV_KEY, EV_REL, EV_REP, EV_SW, EV_SYN, MEDIA_KEYS};
use qmkeys::{InputEvent, Timestamp};
use std::fs::OpenOptions;
use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;
use tracing::trace;

/// Hardware capability and state queries, mirroring the evdev ioctls.
pub trait Capabilities {
    fn supports_event_type(&self, type_: u16) -> bool;
    fn supports_key(&self, code: u16) -> bool;
    /// Whether `code` is currently held (`EV_KEY`) or set (`EV_SW`).
    fn is_active(&self, type_: u16, code: u16) -> io::Result<bool>;
}

pub trait DeviceOpener {
    type Device: Capabilities;

    fn open(&mut self, path: &Path) -> io::Result<Self::Device>;
}

/// A Bluetooth headset shows up as a device with sync, relative and repeat
/// events that reports every media transport key.
pub fn is_media_accessory<D: Capabilities + ?Sized>(device: &D) -> bool {
    [EV_SYN, EV_REL, EV_REP]
        .iter()
        .all(|&type_| device.supports_event_type(type_))
        && MEDIA_KEYS.iter().all(|&code| device.supports_key(code))
}

/// An evdev node opened read-only and non-blocking, registered with the
/// tokio reactor. Dropping it deregisters the watch and closes the fd.
pub struct EvdevDevice {
    path: PathBuf,
    inner: AsyncFd<Device>,
}

impl EvdevDevice {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(path)?;
        let device = Device::from_fd(OwnedFd::from(file))?;
        let inner = AsyncFd::with_interest(device, Interest::READABLE)?;
        Ok(Self {
            path: path.to_path_buf(),
            inner,
        })
    }

    fn device(&self) -> &Device {
        self.inner.get_ref()
    }

    /// Waits for readiness, then drains every record currently available.
    ///
    /// The readiness wait is the only suspension point, so dropping the future
    /// never loses records.
    pub async fn read_events(&mut self) -> io::Result<Vec<InputEvent>> {
        let mut guard = self.inner.readable_mut().await?;
        let mut events = Vec::new();
        loop {
            let fetched = guard.try_io(|inner| {
                inner
                    .get_mut()
                    .fetch_events()
                    .map(|batch| batch.map(to_wire).collect::<Vec<_>>())
            });
            match fetched {
                Ok(Ok(batch)) => events.extend(batch),
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => break,
            }
        }
        trace!(path = %self.path.display(), count = events.len(), "Drained device");
        Ok(events)
    }
}

fn to_wire(event: evdev::InputEvent) -> InputEvent {
    InputEvent::new(
        timestamp_of(event.timestamp()),
        event.event_type().0,
        event.code(),
        event.value(),
    )
}

fn timestamp_of(time: SystemTime) -> Timestamp {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => Timestamp::new(since.as_secs() as i64, since.subsec_micros() as i64),
        Err(e) => {
            let before = e.duration();
            let mut sec = -(before.as_secs() as i64);
            let mut usec = -(before.subsec_micros() as i64);
            if usec < 0 {
                sec -= 1;
                usec += 1_000_000;
            }
            Timestamp::new(sec, usec)
        }
    }
}

impl Capabilities for EvdevDevice {
    fn supports_event_type(&self, type_: u16) -> bool {
        self.device().supported_events().contains(EventType(type_))
    }

    fn supports_key(&self, code: u16) -> bool {
        self.device()
            .supported_keys()
            .is_some_and(|keys| keys.contains(KeyCode(code)))
    }

    fn is_active(&self, type_: u16, code: u16) -> io::Result<bool> {
        match type_ {
            EV_KEY => Ok(self.device().get_key_state()?.contains(KeyCode(code))),
            EV_SW => Ok(self.device().get_switch_state()?.contains(SwitchCode(code))),
            _ => Ok(false),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EvdevOpener;

impl DeviceOpener for EvdevOpener {
    type Device = EvdevDevice;

    fn open(&mut self, path: &Path) -> io::Result<EvdevDevice> {
        EvdevDevice::open(path)
    }
}
