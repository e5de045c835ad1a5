// src/scan.rs
//! Scan groups: named bindings of watched roots to media-server libraries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use crate::config::ScanEntry;

/// Supported media-server kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Plex,
    Emby,
    Jellyfin,
}

impl BackendKind {
    pub fn label(self) -> &'static str {
        match self {
            BackendKind::Plex => "Plex",
            BackendKind::Emby => "Emby",
            BackendKind::Jellyfin => "Jellyfin",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One library on one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryTarget {
    pub kind: BackendKind,
    pub server_name: String,
    pub library: String,
}

/// A named scan: the roots to watch and the libraries to refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanGroup {
    pub name: String,
    pub targets: Vec<LibraryTarget>,
    pub paths: Vec<PathBuf>,
}

impl ScanGroup {
    /// Validates a config entry. Returns `None` (after logging why) when the
    /// entry has no usable library or no path.
    pub fn from_entry(entry: &ScanEntry) -> Option<Self> {
        let name = match &entry.name {
            Some(name) => name.clone(),
            None => {
                warn!("Missing name from scan configuration");
                "Not Configured".to_string()
            }
        };

        let mut targets = Vec::new();
        for (kind, lib) in entry.libraries() {
            let (Some(server_name), Some(library)) = (&lib.server_name, &lib.library) else {
                warn!(scan = %name, "{} scan entry needs server_name and library ... Skipping", kind);
                continue;
            };
            if library.is_empty() {
                warn!(scan = %name, "{} scan library blank ... Skipping", kind);
                continue;
            }
            targets.push(LibraryTarget {
                kind,
                server_name: server_name.clone(),
                library: library.clone(),
            });
        }

        let paths: Vec<PathBuf> = entry
            .paths
            .iter()
            .map(|p| p.as_str())
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect();

        if targets.is_empty() {
            warn!("No Media Server libraries for scan name={} ... Skipping", name);
        }
        if paths.is_empty() {
            warn!("No paths for scan name={} ... Skipping", name);
        }
        if targets.is_empty() || paths.is_empty() {
            return None;
        }

        Some(ScanGroup {
            name,
            targets,
            paths,
        })
    }
}

/// Immutable set of scan groups built at start-up.
#[derive(Debug, Clone, Default)]
pub struct ScanRegistry {
    groups: Vec<Arc<ScanGroup>>,
}

impl ScanRegistry {
    pub fn new(groups: Vec<ScanGroup>) -> Self {
        Self {
            groups: groups.into_iter().map(Arc::new).collect(),
        }
    }

    /// Builds the registry, skipping invalid entries.
    pub fn from_entries(entries: &[ScanEntry]) -> Self {
        Self::new(entries.iter().filter_map(ScanGroup::from_entry).collect())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ScanGroup>> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ScanGroup>> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Every configured root, in configuration order.
    pub fn all_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.groups.iter().flat_map(|g| g.paths.iter())
    }
}
