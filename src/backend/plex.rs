// src/backend/plex.rs
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::{debug, error};

use super::{http_client, send, LibraryHandle, LibraryLookup, MediaBackend};
use crate::config::ServerConfig;
use crate::error::BackendError;
use crate::scan::BackendKind;

const TOKEN_HEADER: &str = "X-Plex-Token";

#[derive(Debug, Deserialize)]
struct SectionsResponse {
    #[serde(rename = "MediaContainer")]
    media_container: MediaContainer,
}

#[derive(Debug, Deserialize)]
struct MediaContainer {
    #[serde(rename = "Directory", default)]
    directory: Vec<Section>,
}

#[derive(Debug, Deserialize)]
struct Section {
    key: String,
    title: String,
}

/// Plex Media Server client. Libraries are resolved to section keys.
#[derive(Debug)]
pub struct PlexBackend {
    server_name: String,
    url: String,
    token: String,
    client: Client,
}

impl PlexBackend {
    pub fn new(config: &ServerConfig) -> Result<Self, BackendError> {
        Ok(Self {
            server_name: config.server_name.clone(),
            url: config.url.clone(),
            token: config.api_key.clone(),
            client: http_client()?,
        })
    }

    fn sections(&self) -> Result<Vec<Section>, BackendError> {
        let request = self
            .client
            .get(format!("{}/library/sections", self.url))
            .header(TOKEN_HEADER, &self.token)
            .header(reqwest::header::ACCEPT, "application/json");
        let body: SectionsResponse = send(request)?.json()?;
        Ok(body.media_container.directory)
    }
}

impl MediaBackend for PlexBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Plex
    }

    fn server_name(&self) -> &str {
        &self.server_name
    }

    fn is_available(&self) -> bool {
        match self.sections() {
            Ok(_) => true,
            Err(e) => {
                debug!("Plex({}) availability check failed: {}", self.server_name, e);
                false
            }
        }
    }

    fn library_exists_or_resolve(&self, library: &str) -> LibraryLookup {
        match self.sections() {
            Ok(sections) => sections
                .into_iter()
                .find(|s| s.title == library)
                .map(|s| LibraryLookup::Found(LibraryHandle(s.key)))
                .unwrap_or(LibraryLookup::NotFound),
            Err(e) => {
                error!("Plex({}) library lookup error={}", self.server_name, e);
                LibraryLookup::NotFound
            }
        }
    }

    fn trigger_scan(&self, library: &LibraryHandle) {
        let request = self
            .client
            .get(format!("{}/library/sections/{}/refresh", self.url, library))
            .header(TOKEN_HEADER, &self.token);
        if let Err(e) = send(request) {
            error!(
                "Plex({}) set_library_scan library={} error={}",
                self.server_name, library, e
            );
        }
    }
}
