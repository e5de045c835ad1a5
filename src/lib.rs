// src/lib.rs

#![doc = r#"
# Scanwatch

Scanwatch watches media folders with inotify and asks Plex, Emby and
Jellyfin to rescan a library once a folder has been quiet for a while.

## Modules

- [`backend`]: Media server clients and the registry they are looked up in.
- [`config`]: Configuration loading and merging from CLI, file, and environment.
- [`dispatch`]: Turns a ready scan group into library rescan requests.
- [`error`]: Error types for watching and for talking to media servers.
- [`event`]: Decoding of raw inotify event records.
- [`filter`]: Ignore-substring and file-extension rules.
- [`inotify`]: Thin wrapper over the kernel inotify API.
- [`monitor`]: Debounce and throttle of pending scan groups.
- [`scan`]: Scan groups and the registry built from config.
- [`service`]: Thread lifecycle and shutdown.
- [`tree`]: Recursive directory watches and their bookkeeping.
- [`watcher`]: Per-group event loop feeding the monitor.
"#]

pub mod backend;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod filter;
pub mod inotify;
pub mod monitor;
pub mod scan;
pub mod service;
pub mod tree;
pub mod watcher;
