//! Connection to the key broker.
//!
//! [`QmKeys`] keeps one long-lived connection for broadcast records and tracks
//! the last known state of every key. Point queries ("is this key down right
//! now") use a short-lived second connection so they never steal broadcast
//! records from the main one.

use crate::codes::{EV_KEY, KEY_CAMERA, KEY_CAMERA_FOCUS};
use crate::error::ClientError;
use crate::event::InputEvent;
use crate::keys::{Key, KeyTracker, State};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/qmkeyd2.socket";
/// Environment variable overriding the broker socket path.
pub const SOCKET_ENV: &str = "QMKEYD_SOCKET";
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(1);

pub fn default_socket_path() -> PathBuf {
    std::env::var_os(SOCKET_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH))
}

/// Reads one full record. `Ok(None)` means the peer closed the stream.
pub async fn read_event<R>(reader: &mut R) -> io::Result<Option<InputEvent>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; InputEvent::SIZE];
    match reader.read_exact(&mut buf).await {
        Ok(_) => Ok(Some(InputEvent::from_bytes(&buf))),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

pub async fn write_event<W>(writer: &mut W, event: &InputEvent) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&event.to_bytes()).await?;
    writer.flush().await
}

/// Continues filling `buf` from `filled`. Every await is a single `read`, so
/// dropping the future loses no bytes. `Ok(None)` means end of stream.
async fn read_partial<R>(
    reader: &mut R,
    buf: &mut [u8; InputEvent::SIZE],
    filled: &mut usize,
) -> io::Result<Option<InputEvent>>
where
    R: AsyncRead + Unpin,
{
    while *filled < InputEvent::SIZE {
        let n = reader.read(&mut buf[*filled..]).await?;
        if n == 0 {
            return Ok(None);
        }
        *filled += n;
    }
    *filled = 0;
    Ok(Some(InputEvent::from_bytes(buf)))
}

async fn connect_stream(path: &Path) -> Result<UnixStream, ClientError> {
    match timeout(CONNECT_TIMEOUT, UnixStream::connect(path)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(ClientError::Connect {
            path: path.to_path_buf(),
            source,
        }),
        Err(_) => Err(ClientError::ConnectTimeout(path.to_path_buf())),
    }
}

/// Asks the broker for the current value of `type_`/`code`.
///
/// Unrelated broadcast records arriving on the same connection are discarded
/// until the reply shows up; the whole wait is bounded by [`QUERY_TIMEOUT`].
pub async fn query_key_value(path: &Path, type_: u16, code: u16) -> Result<i32, ClientError> {
    let mut stream = connect_stream(path).await?;
    let query = InputEvent::query(type_, code);
    write_event(&mut stream, &query).await?;

    let reply = async {
        loop {
            match read_event(&mut stream).await? {
                Some(record) if record.matches(&query) => return Ok(record.value),
                Some(record) => trace!(
                    type_ = record.type_,
                    code = record.code,
                    "Discarding record while waiting for query reply"
                ),
                None => return Err(ClientError::Closed),
            }
        }
    };
    timeout(QUERY_TIMEOUT, reply)
        .await
        .map_err(|_| ClientError::QueryTimeout { type_, code })?
}

pub struct QmKeys {
    socket_path: PathBuf,
    stream: Option<UnixStream>,
    // bytes of a record whose read has not finished yet
    pending: [u8; InputEvent::SIZE],
    filled: usize,
    tracker: KeyTracker,
}

impl QmKeys {
    /// Connects to the broker at the default socket path.
    pub async fn connect() -> Self {
        Self::connect_to(default_socket_path()).await
    }

    /// Connects to the broker at `socket_path`. A failed connection is logged
    /// and leaves the handle disconnected.
    pub async fn connect_to(socket_path: impl Into<PathBuf>) -> Self {
        let socket_path = socket_path.into();
        let stream = match connect_stream(&socket_path).await {
            Ok(stream) => {
                debug!("Connected to key broker at {}", socket_path.display());
                Some(stream)
            }
            Err(e) => {
                warn!("Could not connect to key broker: {}", e);
                None
            }
        };
        Self {
            socket_path,
            stream,
            pending: [0; InputEvent::SIZE],
            filled: 0,
            tracker: KeyTracker::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Last known state of `key`, as seen from broadcast records.
    pub fn key_state(&self, key: Key) -> State {
        self.tracker.state(key)
    }

    /// Waits for the next key state change.
    ///
    /// Returns `None` once the broker connection is gone. Cancel safe: bytes of
    /// a partially received record are kept for the next call.
    pub async fn next_event(&mut self) -> Option<(Key, State)> {
        loop {
            let stream = self.stream.as_mut()?;
            match read_partial(stream, &mut self.pending, &mut self.filled).await {
                Ok(Some(record)) => {
                    if let Some(change) = self.tracker.apply(&record) {
                        return Some(change);
                    }
                }
                Ok(None) => {
                    info!("Key broker closed the connection");
                    self.disconnect();
                }
                Err(e) => {
                    warn!("Failed to read from key broker: {}", e);
                    self.disconnect();
                }
            }
        }
    }

    fn disconnect(&mut self) {
        self.stream = None;
        self.filled = 0;
    }

    /// Queries the broker for the current state of `key`.
    ///
    /// Any failure is reported as [`State::Unknown`].
    pub async fn get_key_state(&self, key: Key) -> State {
        let result = if key == Key::Camera {
            self.camera_state().await
        } else {
            let (type_, code) = key.raw_code();
            query_key_value(&self.socket_path, type_, code)
                .await
                .map(|value| if value == 1 { State::Down } else { State::Up })
        };
        result.unwrap_or_else(|e| {
            warn!(?key, "Key state query failed: {}", e);
            State::Unknown
        })
    }

    async fn camera_state(&self) -> Result<State, ClientError> {
        if query_key_value(&self.socket_path, EV_KEY, KEY_CAMERA).await? == 1 {
            return Ok(State::Down);
        }
        if query_key_value(&self.socket_path, EV_KEY, KEY_CAMERA_FOCUS).await? == 1 {
            return Ok(State::HalfDown);
        }
        Ok(State::Up)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::{EV_SW, KEY_VOLUMEUP, SW_KEYPAD_SLIDE};
    use crate::event::{KeyValue, Timestamp};
    use tokio::net::UnixListener;
    use tokio::sync::oneshot;

    fn socket_path(name: &str) -> PathBuf {
        let file = format!("qmkeys_test_{}_{}", name, std::process::id());
        let path = std::env::temp_dir().join(file);
        let _ = std::fs::remove_file(&path);
        path
    }

    /// Accepts connections and answers each query with `value`, after first
    /// sending an unrelated broadcast record.
    async fn spawn_fake_broker(path: &Path, value_for: fn(u16) -> Option<i32>) {
        let listener = UnixListener::bind(path).unwrap();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    while let Ok(Some(query)) = read_event(&mut stream).await {
                        let noise =
                            InputEvent::new(Timestamp::default(), EV_SW, SW_KEYPAD_SLIDE, 1);
                        write_event(&mut stream, &noise).await.unwrap();
                        if let Some(value) = value_for(query.code) {
                            let reply = InputEvent { value, ..query };
                            write_event(&mut stream, &reply).await.unwrap();
                        }
                    }
                });
            }
        });
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_query_skips_unrelated_records() {
        let path = socket_path("query");
        spawn_fake_broker(&path, |code| Some(if code == KEY_VOLUMEUP { 1 } else { 0 })).await;

        assert_eq!(query_key_value(&path, EV_KEY, KEY_VOLUMEUP).await.unwrap(), 1);
        assert_eq!(query_key_value(&path, EV_KEY, KEY_CAMERA).await.unwrap(), 0);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_query_times_out_without_reply() {
        let path = socket_path("timeout");
        spawn_fake_broker(&path, |_| None).await;

        let err = query_key_value(&path, EV_KEY, KEY_VOLUMEUP).await.unwrap_err();
        assert!(matches!(err, ClientError::QueryTimeout { code: KEY_VOLUMEUP, .. }));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_camera_state_query() {
        let path = socket_path("camera");
        spawn_fake_broker(&path, |code| Some(if code == KEY_CAMERA_FOCUS { 1 } else { 0 })).await;

        let keys = QmKeys::connect_to(&path).await;
        assert!(keys.is_connected());
        assert_eq!(keys.get_key_state(Key::Camera).await, State::HalfDown);
        assert_eq!(keys.get_key_state(Key::VolumeUp).await, State::Up);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_missing_broker_is_not_fatal() {
        let path = socket_path("missing");
        let mut keys = QmKeys::connect_to(&path).await;
        assert!(!keys.is_connected());
        assert!(logs_contain("Could not connect to key broker"));
        assert_eq!(keys.next_event().await, None);
        assert_eq!(keys.get_key_state(Key::Power).await, State::Unknown);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_broadcasts_update_last_known_state() {
        let path = socket_path("broadcast");
        let listener = UnixListener::bind(&path).unwrap();
        let broker = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            for event in [
                InputEvent::key(KEY_CAMERA_FOCUS, KeyValue::Pressed),
                InputEvent::key(KEY_CAMERA, KeyValue::Pressed),
                InputEvent::key(KEY_VOLUMEUP, KeyValue::Pressed),
                InputEvent::key(KEY_VOLUMEUP, KeyValue::Repeat),
                InputEvent::key(KEY_VOLUMEUP, KeyValue::Released),
            ] {
                write_event(&mut stream, &event).await.unwrap();
            }
        });

        let mut keys = QmKeys::connect_to(&path).await;
        assert_eq!(keys.next_event().await, Some((Key::Camera, State::HalfDown)));
        assert_eq!(keys.next_event().await, Some((Key::Camera, State::Down)));
        assert_eq!(keys.next_event().await, Some((Key::VolumeUp, State::Down)));
        assert_eq!(keys.next_event().await, Some((Key::VolumeUp, State::Up)));
        broker.await.unwrap();
        assert_eq!(keys.next_event().await, None);
        assert_eq!(keys.key_state(Key::Camera), State::Down);
        assert_eq!(keys.key_state(Key::Phone), State::Unknown);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_next_event_resumes_after_cancellation() {
        let path = socket_path("resume");
        let listener = UnixListener::bind(&path).unwrap();
        let (resume_tx, resume_rx) = oneshot::channel::<()>();
        let broker = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let first = InputEvent::key(KEY_VOLUMEUP, KeyValue::Pressed).to_bytes();
            stream.write_all(&first[..10]).await.unwrap();
            resume_rx.await.unwrap();
            stream.write_all(&first[10..]).await.unwrap();
            write_event(&mut stream, &InputEvent::key(KEY_VOLUMEUP, KeyValue::Released))
                .await
                .unwrap();
        });

        let mut keys = QmKeys::connect_to(&path).await;
        let cancelled = timeout(Duration::from_millis(100), keys.next_event()).await;
        assert!(cancelled.is_err());

        resume_tx.send(()).unwrap();
        assert_eq!(keys.next_event().await, Some((Key::VolumeUp, State::Down)));
        assert_eq!(keys.next_event().await, Some((Key::VolumeUp, State::Up)));
        broker.await.unwrap();
        assert_eq!(keys.next_event().await, None);
        let _ = std::fs::remove_file(&path);
    }
}
