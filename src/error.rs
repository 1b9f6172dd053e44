//! Fatal startup errors. Anything that goes wrong after startup is logged and
//! the broker keeps running in a degraded state.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(
        "failed to remove stale socket {}: {source} (is another qmkeyd running?)",
        path.display()
    )]
    StaleSocket {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to listen on {}: {source}", path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to set permissions on {}: {source}", path.display())]
    Permissions {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to watch {} for hotplug: {source}", path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to install signal handler: {0}")]
    Signal(#[source] io::Error),
}
