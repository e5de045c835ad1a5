// src/backend/jellyfin.rs
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::{debug, error};

use super::emby::{find_folder, MediaFolder};
use super::{http_client, send, LibraryHandle, LibraryLookup, MediaBackend};
use crate::config::ServerConfig;
use crate::error::BackendError;
use crate::scan::BackendKind;

#[derive(Debug, Deserialize)]
struct MediaFolders {
    #[serde(rename = "Items", default)]
    items: Vec<MediaFolder>,
}

/// Jellyfin server client. Same item model as Emby, no `/emby` prefix.
#[derive(Debug)]
pub struct JellyfinBackend {
    server_name: String,
    url: String,
    api_key: String,
    client: Client,
}

impl JellyfinBackend {
    pub fn new(config: &ServerConfig) -> Result<Self, BackendError> {
        Ok(Self {
            server_name: config.server_name.clone(),
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            client: http_client()?,
        })
    }
}

impl MediaBackend for JellyfinBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Jellyfin
    }

    fn server_name(&self) -> &str {
        &self.server_name
    }

    fn is_available(&self) -> bool {
        let request = self
            .client
            .get(format!("{}/System/Configuration", self.url))
            .query(&[("api_key", &self.api_key)]);
        match send(request) {
            Ok(_) => true,
            Err(e) => {
                debug!("Jellyfin({}) availability check failed: {}", self.server_name, e);
                false
            }
        }
    }

    fn library_exists_or_resolve(&self, library: &str) -> LibraryLookup {
        let request = self
            .client
            .get(format!("{}/Library/MediaFolders", self.url))
            .query(&[("api_key", &self.api_key)]);
        let folders = send(request).and_then(|r| Ok(r.json::<MediaFolders>()?));
        match folders {
            Ok(folders) => find_folder(folders.items, library),
            Err(e) => {
                error!("Jellyfin({}) get_library_id error={}", self.server_name, e);
                LibraryLookup::NotFound
            }
        }
    }

    fn trigger_scan(&self, library: &LibraryHandle) {
        let request = self
            .client
            .post(format!("{}/Items/{}/Refresh", self.url, library))
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("recursive", "true"),
                ("imageRefreshMode", "Default"),
                ("metadataRefreshMode", "Default"),
                ("replaceAllImages", "false"),
                ("replaceAllMetadata", "false"),
                ("regenerateTrickplay", "false"),
            ]);
        if let Err(e) = send(request) {
            error!(
                "Jellyfin({}) set_library_scan library={} error={}",
                self.server_name, library, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_folders_are_read_from_items() {
        let parsed: MediaFolders = serde_json::from_str(
            r#"{"Items":[{"Name":"Films","Id":"abc"}],"TotalRecordCount":1}"#,
        )
        .unwrap();
        assert_eq!(
            find_folder(parsed.items, "Films"),
            LibraryLookup::Found(LibraryHandle("abc".to_string()))
        );
    }
}
