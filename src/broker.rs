//! Broker state: device slots, connected clients and the fan-out rules.
//!
//! [`Broker`] owns everything the reactor mutates. It is driven strictly
//! sequentially from the server loop, one callback per readiness event:
//! accept, disconnect, hotplug, device records and client queries.
//!
//! Device handles are opened when the first client connects and closed when
//! the last one leaves. A handle is closed by dropping it, so every removal
//! path (last disconnect, Bluetooth replacement, unplug, probe rejection,
//! read failure) releases the descriptor and its readiness watch.

use crate::config::DevicesConfig;
use crate::device::{Capabilities, DeviceOpener, is_media_accessory};
use qmkeys::InputEvent;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, trace, warn};

/// A device slot. The declaration order is the order in which state queries
/// consult the slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Slot {
    Gpio,
    Keypad,
    Eci,
    PowerButton,
    Bluetooth,
}

impl Slot {
    /// Slots opened for the first client.
    pub const FIXED: [Slot; 4] = [Slot::Gpio, Slot::Keypad, Slot::Eci, Slot::PowerButton];

    pub fn name(self) -> &'static str {
        match self {
            Slot::Gpio => "gpio",
            Slot::Keypad => "keypad",
            Slot::Eci => "eci",
            Slot::PowerButton => "power_button",
            Slot::Bluetooth => "bluetooth",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub type ClientId = u64;

/// Records queued per client before further records for it are dropped.
pub const CHANNEL_BUFFER_SIZE: usize = 1024;

struct OpenDevice<D> {
    path: PathBuf,
    device: D,
}

pub struct Broker<O: DeviceOpener> {
    opener: O,
    fixed_paths: [(Slot, PathBuf); 4],
    slots: BTreeMap<Slot, OpenDevice<O::Device>>,
    clients: BTreeMap<ClientId, mpsc::Sender<InputEvent>>,
    next_client_id: ClientId,
}

impl<O: DeviceOpener> Broker<O> {
    pub fn new(opener: O, devices: &DevicesConfig) -> Self {
        Self {
            opener,
            fixed_paths: [
                (Slot::Gpio, devices.gpio.clone()),
                (Slot::Keypad, devices.keypad.clone()),
                (Slot::Eci, devices.eci.clone()),
                (Slot::PowerButton, devices.power_button.clone()),
            ],
            slots: BTreeMap::new(),
            clients: BTreeMap::new(),
            next_client_id: 0,
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn is_open(&self, slot: Slot) -> bool {
        self.slots.contains_key(&slot)
    }

    pub fn open_slots(&self) -> impl Iterator<Item = Slot> + '_ {
        self.slots.keys().copied()
    }

    pub fn bluetooth_path(&self) -> Option<&Path> {
        self.slots
            .get(&Slot::Bluetooth)
            .map(|open| open.path.as_path())
    }

    /// Open devices, for the reactor to wait on.
    pub fn devices_mut(&mut self) -> impl Iterator<Item = (Slot, &mut O::Device)> + '_ {
        self.slots
            .iter_mut()
            .map(|(slot, open)| (*slot, &mut open.device))
    }

    /// Registers a client. Records for it are delivered through the returned receiver.
    pub fn client_connected(&mut self) -> (ClientId, mpsc::Receiver<InputEvent>) {
        let id = self.next_client_id;
        self.next_client_id += 1;
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        self.clients.insert(id, tx);
        info!(client = id, clients = self.clients.len(), "Client connected");
        if self.clients.len() == 1 {
            self.open_fixed_slots();
        }
        (id, rx)
    }

    pub fn client_disconnected(&mut self, id: ClientId) {
        if self.clients.remove(&id).is_none() {
            return;
        }
        info!(client = id, clients = self.clients.len(), "Client disconnected");
        if self.clients.is_empty() {
            self.close_all();
        }
    }

    fn open_fixed_slots(&mut self) {
        for (slot, path) in &self.fixed_paths {
            if self.slots.contains_key(slot) {
                continue;
            }
            match self.opener.open(path) {
                Ok(device) => {
                    debug!(%slot, path = %path.display(), "Opened device");
                    self.slots.insert(
                        *slot,
                        OpenDevice {
                            path: path.clone(),
                            device,
                        },
                    );
                }
                Err(e) => warn!(%slot, "Failed to open {}: {}", path.display(), e),
            }
        }
    }

    fn close_all(&mut self) {
        for slot in std::mem::take(&mut self.slots).into_keys() {
            debug!(%slot, "Closed device");
        }
    }

    /// Closes one slot, e.g. after its device stopped answering reads.
    pub fn detach(&mut self, slot: Slot) {
        if let Some(open) = self.slots.remove(&slot) {
            info!(%slot, path = %open.path.display(), "Detached device");
        }
    }

    /// A node appeared in the input directory. Tracked as the Bluetooth
    /// device when it passes the media accessory probe.
    pub fn device_created(&mut self, path: &Path) {
        if self.clients.is_empty() {
            debug!(path = %path.display(), "Ignoring new device, no clients connected");
            return;
        }
        let device = match self.opener.open(path) {
            Ok(device) => device,
            Err(e) => {
                debug!(path = %path.display(), "Not an input device: {}", e);
                return;
            }
        };
        if !is_media_accessory(&device) {
            debug!(path = %path.display(), "Not a media key accessory");
            return;
        }
        let previous = self.slots.insert(
            Slot::Bluetooth,
            OpenDevice {
                path: path.to_path_buf(),
                device,
            },
        );
        if let Some(previous) = previous {
            info!(path = %previous.path.display(), "Replaced previous Bluetooth device");
        }
        info!(path = %path.display(), "Tracking Bluetooth device");
    }

    /// A node disappeared from the input directory.
    pub fn device_removed(&mut self, path: &Path) {
        if self.bluetooth_path() == Some(path) {
            self.detach(Slot::Bluetooth);
        }
    }

    /// Forwards every supported record from `slot` to every client, in order.
    /// Returns how many records passed the filter.
    pub fn dispatch(&mut self, slot: Slot, events: &[InputEvent]) -> usize {
        let mut forwarded = 0;
        for event in events {
            if !event.is_supported() {
                trace!(%slot, type_ = event.type_, code = event.code, "Dropping record");
                continue;
            }
            debug!(
                %slot,
                type_ = event.type_,
                code = event.code,
                value = event.value,
                "Forwarding record"
            );
            for (id, sink) in &self.clients {
                queue(*id, sink, *event);
            }
            forwarded += 1;
        }
        forwarded
    }

    /// Answers a state query from `client`. Unsupported codes get no reply.
    pub fn answer_query(&self, client: ClientId, query: &InputEvent) {
        if !query.is_supported() {
            debug!(client, type_ = query.type_, code = query.code, "Ignoring query");
            return;
        }
        let Some(sink) = self.clients.get(&client) else {
            return;
        };
        let pressed = self.slots.iter().any(|(slot, open)| {
            match open.device.is_active(query.type_, query.code) {
                Ok(active) => active,
                Err(e) => {
                    debug!(%slot, "State query failed: {}", e);
                    false
                }
            }
        });
        let reply = InputEvent {
            value: i32::from(pressed),
            ..*query
        };
        debug!(client, code = query.code, value = reply.value, "Answering query");
        queue(client, sink, reply);
    }
}

/// Queues `record` for one client. A full or closed queue drops the record
/// for that client only.
fn queue(client: ClientId, sink: &mpsc::Sender<InputEvent>, record: InputEvent) {
    match sink.try_send(record) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            warn!(client, code = record.code, "Client is not reading, dropping record");
        }
        Err(TrySendError::Closed(_)) => {
            warn!(client, "Failed to queue record for client");
        }
    }
}
