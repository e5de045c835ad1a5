// src/backend/mod.rs
//! Media-server clients.
//!
//! The watch engine only ever talks to [`MediaBackend`]; the HTTP details of each
//! server kind live in the submodules.

pub mod emby;
pub mod jellyfin;
pub mod plex;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::BackendError;
use crate::scan::BackendKind;

pub use emby::EmbyBackend;
pub use jellyfin::JellyfinBackend;
pub use plex::PlexBackend;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Server-side identifier of a library (Plex section key, Emby/Jellyfin item id).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LibraryHandle(pub String);

impl fmt::Display for LibraryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of looking a library up by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryLookup {
    Found(LibraryHandle),
    NotFound,
}

/// What the dispatcher needs from a media server.
pub trait MediaBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Configured name of this server instance.
    fn server_name(&self) -> &str;

    fn is_available(&self) -> bool;

    fn library_exists_or_resolve(&self, library: &str) -> LibraryLookup;

    /// Fire and forget. Failures are logged by the implementation.
    fn trigger_scan(&self, library: &LibraryHandle);
}

impl fmt::Debug for dyn MediaBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.server_name())
    }
}

/// All configured media servers, looked up by kind and server name.
#[derive(Debug, Default, Clone)]
pub struct BackendRegistry {
    backends: Vec<Arc<dyn MediaBackend>>,
}

impl BackendRegistry {
    pub fn new(backends: Vec<Arc<dyn MediaBackend>>) -> Self {
        Self { backends }
    }

    /// Creates a client per server and reports whether each one answers.
    pub fn from_config(servers: &[ServerConfig]) -> Self {
        let mut backends: Vec<Arc<dyn MediaBackend>> = Vec::new();
        for server in servers {
            let backend: Result<Arc<dyn MediaBackend>, BackendError> = match server.kind {
                BackendKind::Plex => PlexBackend::new(server).map(shared),
                BackendKind::Emby => EmbyBackend::new(server).map(shared),
                BackendKind::Jellyfin => JellyfinBackend::new(server).map(shared),
            };
            match backend {
                Ok(backend) => {
                    if backend.is_available() {
                        info!("Connected to {}({}) successfully", server.kind, server.server_name);
                    } else {
                        warn!(
                            "{}({}) server not available. Is this correct url={}",
                            server.kind, server.server_name, server.url
                        );
                    }
                    backends.push(backend);
                }
                Err(e) => warn!(
                    "{}({}) client could not be created: {}",
                    server.kind, server.server_name, e
                ),
            }
        }
        Self { backends }
    }

    pub fn find(&self, kind: BackendKind, server_name: &str) -> Option<&Arc<dyn MediaBackend>> {
        self.backends
            .iter()
            .find(|b| b.kind() == kind && b.server_name() == server_name)
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

fn shared<B: MediaBackend + 'static>(backend: B) -> Arc<dyn MediaBackend> {
    Arc::new(backend)
}

pub(crate) fn http_client() -> Result<reqwest::blocking::Client, BackendError> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()?)
}

/// Sends a request and turns non-2xx answers into errors.
pub(crate) fn send(
    request: reqwest::blocking::RequestBuilder,
) -> Result<reqwest::blocking::Response, BackendError> {
    let response = request.send()?;
    if !response.status().is_success() {
        return Err(BackendError::Status(response.status()));
    }
    Ok(response)
}
