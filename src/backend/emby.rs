// src/backend/emby.rs
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::{debug, error};

use super::{http_client, send, LibraryHandle, LibraryLookup, MediaBackend};
use crate::config::ServerConfig;
use crate::error::BackendError;
use crate::scan::BackendKind;

#[derive(Debug, Deserialize)]
pub(crate) struct MediaFolder {
    #[serde(rename = "Name")]
    pub name: Option<String>,
    #[serde(rename = "Id")]
    pub id: Option<String>,
}

/// Picks the id of the folder named `library`.
pub(crate) fn find_folder(folders: Vec<MediaFolder>, library: &str) -> LibraryLookup {
    folders
        .into_iter()
        .find_map(|f| match (f.name, f.id) {
            (Some(name), Some(id)) if name == library => Some(LibraryHandle(id)),
            _ => None,
        })
        .map(LibraryLookup::Found)
        .unwrap_or(LibraryLookup::NotFound)
}

/// Emby server client.
#[derive(Debug)]
pub struct EmbyBackend {
    server_name: String,
    url: String,
    api_key: String,
    client: Client,
}

impl EmbyBackend {
    pub fn new(config: &ServerConfig) -> Result<Self, BackendError> {
        Ok(Self {
            server_name: config.server_name.clone(),
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            client: http_client()?,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/emby{}", self.url, path)
    }

    fn folders(&self) -> Result<Vec<MediaFolder>, BackendError> {
        let request = self
            .client
            .get(self.api_url("/Library/SelectableMediaFolders"))
            .query(&[("api_key", &self.api_key)]);
        Ok(send(request)?.json()?)
    }
}

impl MediaBackend for EmbyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Emby
    }

    fn server_name(&self) -> &str {
        &self.server_name
    }

    fn is_available(&self) -> bool {
        let request = self
            .client
            .get(self.api_url("/System/Info"))
            .query(&[("api_key", &self.api_key)]);
        match send(request) {
            Ok(_) => true,
            Err(e) => {
                debug!("Emby({}) availability check failed: {}", self.server_name, e);
                false
            }
        }
    }

    fn library_exists_or_resolve(&self, library: &str) -> LibraryLookup {
        match self.folders() {
            Ok(folders) => find_folder(folders, library),
            Err(e) => {
                error!("Emby({}) get_library_id error={}", self.server_name, e);
                LibraryLookup::NotFound
            }
        }
    }

    fn trigger_scan(&self, library: &LibraryHandle) {
        let request = self
            .client
            .post(self.api_url(&format!("/Items/{}/Refresh", library)))
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("Recursive", "true"),
                ("ImageRefreshMode", "Default"),
                ("MetadataRefreshMode", "Default"),
                ("ReplaceAllImages", "false"),
                ("ReplaceAllMetadata", "false"),
            ]);
        if let Err(e) = send(request) {
            error!(
                "Emby({}) set_library_scan library={} error={}",
                self.server_name, library, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_folder_by_exact_name() {
        let folders: Vec<MediaFolder> = serde_json::from_str(
            r#"[{"Name":"Movies","Id":"3"},{"Name":"Shows","Id":"7"},{"Name":"Music"}]"#,
        )
        .unwrap();
        assert_eq!(
            find_folder(folders, "Shows"),
            LibraryLookup::Found(LibraryHandle("7".to_string()))
        );
    }

    #[test]
    fn folder_without_id_does_not_match() {
        let folders: Vec<MediaFolder> =
            serde_json::from_str(r#"[{"Name":"Music"},{"Name":"movies","Id":"3"}]"#).unwrap();
        assert_eq!(find_folder(folders, "Music"), LibraryLookup::NotFound);
    }
}
