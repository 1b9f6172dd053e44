//! The broker's reactor loop.
//!
//! One task owns the listener, the hotplug watch and the [`Broker`]. Client
//! sockets are split the same way for every peer: a reader task forwards
//! query records to the loop, and a writer task drains the client's outbound
//! queue onto the socket. Everything that touches broker state happens in the
//! loop itself, one wake-up at a time.

use crate::broker::{Broker, ClientId, Slot};
use crate::config::AppConfig;
use crate::device::EvdevOpener;
use crate::error::StartupError;
use crate::hotplug::{Hotplug, HotplugWatch};
use futures::future::select_all;
use qmkeys::InputEvent;
use qmkeys::client::{read_event, write_event};
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Pause after a failed accept, so a persistent error such as EMFILE does not
/// spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Messages from client reader tasks to the loop.
#[derive(Debug)]
pub enum Inbound {
    Record(ClientId, InputEvent),
    Disconnected(ClientId),
}

enum Wake {
    Accept(io::Result<UnixStream>),
    Client(Inbound),
    Hotplug(Option<io::Result<Hotplug>>),
    Device(Slot, io::Result<Vec<InputEvent>>),
    Shutdown(&'static str),
}

/// Removes the socket file when dropped.
struct SocketGuard(PathBuf);

impl Drop for SocketGuard {
    fn drop(&mut self) {
        match fs::remove_file(&self.0) {
            Ok(()) => debug!("Removed socket {}", self.0.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove socket {}: {}", self.0.display(), e),
        }
    }
}

pub struct KeyServer {
    listener: UnixListener,
    broker: Broker<EvdevOpener>,
    hotplug: Option<HotplugWatch>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    sigterm: Signal,
    sigint: Signal,
    // dropped last, after the listener is closed
    _socket: SocketGuard,
}

/// Removes a socket left over from a previous run.
fn remove_stale_socket(path: &Path) -> Result<(), StartupError> {
    match fs::remove_file(path) {
        Ok(()) => {
            info!("Removed stale socket {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StartupError::StaleSocket {
            path: path.to_path_buf(),
            source,
        }),
    }
}

impl KeyServer {
    /// Runs the startup sequence. Must be called from within a tokio runtime.
    pub fn bind(config: &AppConfig) -> Result<Self, StartupError> {
        let path = &config.socket.path;
        remove_stale_socket(path)?;

        let listener = UnixListener::bind(path).map_err(|source| StartupError::Bind {
            path: path.clone(),
            source,
        })?;
        let socket = SocketGuard(path.clone());
        fs::set_permissions(path, fs::Permissions::from_mode(0o777)).map_err(|source| {
            StartupError::Permissions {
                path: path.clone(),
                source,
            }
        })?;

        let input_dir = &config.devices.input_dir;
        let hotplug = HotplugWatch::new(input_dir).map_err(|source| StartupError::Watch {
            path: input_dir.clone(),
            source,
        })?;

        let sigterm = signal(SignalKind::terminate()).map_err(StartupError::Signal)?;
        let sigint = signal(SignalKind::interrupt()).map_err(StartupError::Signal)?;

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        info!("Listening on {}", path.display());
        Ok(Self {
            listener,
            broker: Broker::new(EvdevOpener, &config.devices),
            hotplug: Some(hotplug),
            inbound_tx,
            inbound_rx,
            sigterm,
            sigint,
            _socket: socket,
        })
    }

    /// Serves clients until SIGINT or SIGTERM.
    pub async fn run(mut self) {
        loop {
            let wake = tokio::select! {
                accepted = self.listener.accept() => {
                    Wake::Accept(accepted.map(|(stream, _)| stream))
                }
                Some(msg) = self.inbound_rx.recv() => Wake::Client(msg),
                change = next_hotplug(&mut self.hotplug) => Wake::Hotplug(change),
                (slot, read) = next_device_events(&mut self.broker) => Wake::Device(slot, read),
                _ = self.sigterm.recv() => Wake::Shutdown("SIGTERM"),
                _ = self.sigint.recv() => Wake::Shutdown("SIGINT"),
            };

            match wake {
                Wake::Accept(Ok(stream)) => self.attach_client(stream),
                Wake::Accept(Err(e)) => accept_failed(e).await,
                Wake::Client(Inbound::Record(id, query)) => self.broker.answer_query(id, &query),
                Wake::Client(Inbound::Disconnected(id)) => self.broker.client_disconnected(id),
                Wake::Hotplug(change) => self.handle_hotplug(change),
                Wake::Device(slot, Ok(events)) => {
                    self.broker.dispatch(slot, &events);
                }
                Wake::Device(slot, Err(e)) => {
                    warn!(%slot, "Failed to read device, closing it: {}", e);
                    self.broker.detach(slot);
                }
                Wake::Shutdown(name) => {
                    info!("Received {}, shutting down", name);
                    return;
                }
            }
        }
    }

    fn attach_client(&mut self, stream: UnixStream) {
        let (id, outbound) = self.broker.client_connected();
        let (reader, writer) = stream.into_split();
        tokio::spawn(client_reader(id, reader, self.inbound_tx.clone()));
        tokio::spawn(client_writer(id, writer, outbound));
    }

    fn handle_hotplug(&mut self, change: Option<io::Result<Hotplug>>) {
        match change {
            Some(Ok(Hotplug::Created(path))) => self.broker.device_created(&path),
            Some(Ok(Hotplug::Removed(path))) => self.broker.device_removed(&path),
            Some(Err(e)) if e.kind() == io::ErrorKind::Interrupted => {}
            Some(Err(e)) => {
                warn!("Hotplug watch failed, accessories will not be detected: {}", e);
                self.hotplug = None;
            }
            None => {
                warn!("Hotplug watch closed, accessories will not be detected");
                self.hotplug = None;
            }
        }
    }
}

async fn accept_failed(e: io::Error) {
    warn!("Failed to accept client connection: {}", e);
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}

async fn next_hotplug(watch: &mut Option<HotplugWatch>) -> Option<io::Result<Hotplug>> {
    match watch {
        Some(watch) => watch.next().await,
        None => std::future::pending().await,
    }
}

/// Waits until any open device has records, and drains it.
async fn next_device_events(
    broker: &mut Broker<EvdevOpener>,
) -> (Slot, io::Result<Vec<InputEvent>>) {
    let reads: Vec<_> = broker
        .devices_mut()
        .map(|(slot, device)| Box::pin(async move { (slot, device.read_events().await) }))
        .collect();
    if reads.is_empty() {
        return std::future::pending().await;
    }
    let (result, _, _) = select_all(reads).await;
    result
}

async fn client_reader(
    id: ClientId,
    mut reader: OwnedReadHalf,
    inbound: mpsc::UnboundedSender<Inbound>,
) {
    loop {
        match read_event(&mut reader).await {
            Ok(Some(record)) => {
                if inbound.send(Inbound::Record(id, record)).is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(client = id, "Client read failed: {}", e);
                break;
            }
        }
    }
    let _ = inbound.send(Inbound::Disconnected(id));
}

/// Writes queued records until the broker drops the client's queue.
async fn client_writer(
    id: ClientId,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<InputEvent>,
) {
    while let Some(record) = outbound.recv().await {
        if let Err(e) = write_event(&mut writer, &record).await {
            warn!(client = id, "Failed to write record to client: {}", e);
        }
    }
    debug!(client = id, "Client writer finished");
}
