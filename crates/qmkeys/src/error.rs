//! Client-side errors. None of these affect the broker or other clients.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to key broker at {}: {source}", path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("timed out connecting to key broker at {}", .0.display())]
    ConnectTimeout(PathBuf),
    #[error("no reply from key broker for type {type_} code {code}")]
    QueryTimeout { type_: u16, code: u16 },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("key broker closed the connection")]
    Closed,
}
