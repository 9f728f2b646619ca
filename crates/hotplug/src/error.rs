//! Error types for the attach-and-report pipeline

use std::path::PathBuf;
use thiserror::Error;

/// The device node could not be mapped onto the device trees
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("malformed device node '{node}': {reason}")]
    MalformedDeviceNode { node: String, reason: &'static str },
}

/// Creating the bind link inside the container device tree failed
#[derive(Debug, Error)]
pub enum BindError {
    #[error("permission denied creating {}: {source}", path.display())]
    PermissionDenied {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{} is occupied by a file that is not {}", path.display(), expected.display())]
    Occupied { path: PathBuf, expected: PathBuf },

    #[error("failed to create {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl BindError {
    pub(crate) fn from_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            BindError::PermissionDenied { path, source }
        } else {
            BindError::Io { path, source }
        }
    }
}

/// Report channel setup and delivery errors
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    #[error("invalid endpoint URL '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: &'static str },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("address resolution failed: {0}")]
    Resolve(String),

    #[error("report channel is not open")]
    NotOpen,

    #[error("report channel was already opened")]
    AlreadyOpen,

    #[error("report queue closed")]
    QueueClosed,

    #[error("protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
