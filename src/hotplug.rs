//! Hotplug notifications for the input device directory.

use futures::StreamExt;
use inotify::{EventMask, EventStream, Inotify, WatchMask};
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hotplug {
    Created(PathBuf),
    Removed(PathBuf),
}

pub struct HotplugWatch {
    dir: PathBuf,
    stream: EventStream<[u8; 4096]>,
}

impl HotplugWatch {
    /// Watches `dir` for created and deleted entries.
    pub fn new(dir: &Path) -> io::Result<Self> {
        let inotify = Inotify::init()?;
        inotify
            .watches()
            .add(dir, WatchMask::CREATE | WatchMask::DELETE)?;
        let stream = inotify.into_event_stream([0u8; 4096])?;
        Ok(Self {
            dir: dir.to_path_buf(),
            stream,
        })
    }

    /// Next create/delete record. `None` once the watch is gone.
    pub async fn next(&mut self) -> Option<io::Result<Hotplug>> {
        loop {
            let event = match self.stream.next().await? {
                Ok(event) => event,
                Err(e) => return Some(Err(e)),
            };
            if let Some(change) = classify(&self.dir, event.mask, event.name.as_deref()) {
                return Some(Ok(change));
            }
        }
    }
}

fn classify(dir: &Path, mask: EventMask, name: Option<&OsStr>) -> Option<Hotplug> {
    let path = dir.join(name?);
    if mask.contains(EventMask::ISDIR) {
        return None;
    }
    if mask.contains(EventMask::CREATE) {
        Some(Hotplug::Created(path))
    } else if mask.contains(EventMask::DELETE) {
        Some(Hotplug::Removed(path))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_classify_create_and_delete() {
        let dir = Path::new("/dev/input");
        assert_eq!(
            classify(dir, EventMask::CREATE, Some(OsStr::new("event5"))),
            Some(Hotplug::Created(PathBuf::from("/dev/input/event5")))
        );
        assert_eq!(
            classify(dir, EventMask::DELETE, Some(OsStr::new("event5"))),
            Some(Hotplug::Removed(PathBuf::from("/dev/input/event5")))
        );
    }

    #[test]
    fn test_classify_ignores_other_records() {
        let dir = Path::new("/dev/input");
        assert_eq!(classify(dir, EventMask::CREATE, None), None);
        assert_eq!(
            classify(dir, EventMask::CREATE | EventMask::ISDIR, Some(OsStr::new("by-id"))),
            None
        );
        assert_eq!(classify(dir, EventMask::IGNORED, Some(OsStr::new("x"))), None);
    }

    #[tokio::test]
    async fn test_watch_sees_files() {
        let dir = std::env::temp_dir().join(format!("qmkeyd_hotplug_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let mut watch = HotplugWatch::new(&dir).unwrap();

        let node = dir.join("event9");
        std::fs::write(&node, b"").unwrap();
        let created = timeout(Duration::from_secs(2), watch.next()).await.unwrap();
        assert_eq!(created.unwrap().unwrap(), Hotplug::Created(node.clone()));

        std::fs::remove_file(&node).unwrap();
        let removed = timeout(Duration::from_secs(2), watch.next()).await.unwrap();
        assert_eq!(removed.unwrap().unwrap(), Hotplug::Removed(node));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
