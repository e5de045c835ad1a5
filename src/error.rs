// src/error.rs
//! Error types shared by the watch engine and the media-server clients.

use std::path::PathBuf;
use thiserror::Error;

/// Failures raised by the inotify event source and the watch tree.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("inotify I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("path contains an interior NUL byte: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("failed to watch {}: {source}", path.display())]
    AddWatch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The kernel dropped events because the queue filled up.
    #[error("inotify event queue overflowed")]
    Overflow,

    /// A watched filesystem went away underneath us.
    #[error("watched filesystem was unmounted")]
    Unmounted,
}

/// Failures talking to a Plex, Emby or Jellyfin server.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered with status {0}")]
    Status(reqwest::StatusCode),
}
