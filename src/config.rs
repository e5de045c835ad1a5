// src/config.rs
use clap::Parser;
use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::filter::{parse_extensions, EventFilter};
use crate::monitor::Timings;
use crate::scan::BackendKind;

pub const DEFAULT_SECONDS_MONITOR_RATE: u64 = 1;
pub const DEFAULT_SECONDS_BEFORE_NOTIFY: u64 = 90;
pub const DEFAULT_SECONDS_BETWEEN_NOTIFIES: u64 = 15;
pub const DEFAULT_SECONDS_BEFORE_INOTIFY_MODIFY: u64 = 1;

pub const MIN_SECONDS_MONITOR_RATE: u64 = 1;
pub const MIN_SECONDS_BEFORE_NOTIFY: u64 = 30;
pub const MIN_SECONDS_BETWEEN_NOTIFIES: u64 = 10;
pub const MIN_SECONDS_BEFORE_INOTIFY_MODIFY: u64 = 1;

const DEFAULT_CONFIG_FILE: &str = "scanwatch.toml";

/// Command-line arguments for the application.
#[derive(Parser, Debug, Deserialize, Default)]
#[clap(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to a configuration file (TOML, or JSON when it ends in .json)
    #[clap(
        short,
        long,
        value_parser,
        env = "CONFIG_PATH",
        help = "Path to a configuration file (e.g., scanwatch.toml)"
    )]
    pub config: Option<PathBuf>,

    /// Log level (e.g., trace, debug, info, warn, error)
    #[clap(
        long,
        value_parser,
        help = "Log level (e.g., trace, debug, info, warn, error)"
    )]
    pub log_level: Option<String>,

    /// Validate the configuration, print the scan groups and exit
    #[clap(long, help = "Validate the configuration, print the scan groups and exit")]
    pub dry_run: bool,
}

/// A media server instance as written in the config file.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerEntry {
    pub server_name: Option<String>,
    pub url: Option<String>,
    pub api_key: Option<String>,
}

/// A library on a named server that a scan should refresh.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct LibraryEntry {
    pub server_name: Option<String>,
    pub library: Option<String>,
}

/// Root path of a scan. Accepts a bare string or `{ container_path = "..." }`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum PathEntry {
    Plain(String),
    Container { container_path: String },
}

impl PathEntry {
    pub fn as_str(&self) -> &str {
        match self {
            PathEntry::Plain(path) => path,
            PathEntry::Container { container_path } => container_path,
        }
    }
}

/// Ignore substring. Accepts a bare string or `{ ignore_folder = "..." }`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum IgnoreEntry {
    Plain(String),
    Folder { ignore_folder: String },
}

impl IgnoreEntry {
    pub fn as_str(&self) -> &str {
        match self {
            IgnoreEntry::Plain(s) => s,
            IgnoreEntry::Folder { ignore_folder } => ignore_folder,
        }
    }
}

/// One `[[remote_scan.scans]]` table.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanEntry {
    pub name: Option<String>,
    #[serde(default)]
    pub plex: Vec<LibraryEntry>,
    #[serde(default)]
    pub emby: Vec<LibraryEntry>,
    #[serde(default)]
    pub jellyfin: Vec<LibraryEntry>,
    #[serde(default)]
    pub paths: Vec<PathEntry>,
}

impl ScanEntry {
    /// Library entries paired with the backend they belong to, in
    /// Plex, Emby, Jellyfin order.
    pub fn libraries(&self) -> impl Iterator<Item = (BackendKind, &LibraryEntry)> {
        self.plex
            .iter()
            .map(|l| (BackendKind::Plex, l))
            .chain(self.emby.iter().map(|l| (BackendKind::Emby, l)))
            .chain(self.jellyfin.iter().map(|l| (BackendKind::Jellyfin, l)))
    }
}

/// The `[remote_scan]` section.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteScanSection {
    pub seconds_monitor_rate: Option<u64>,
    pub seconds_before_notify: Option<u64>,
    pub seconds_between_notifies: Option<u64>,
    pub seconds_before_inotify_modify: Option<u64>,
    #[serde(default, alias = "ignore_folders")]
    pub ignore_folder_with_name: Vec<IgnoreEntry>,
    pub valid_file_extensions: Option<String>,
    #[serde(default)]
    pub scans: Vec<ScanEntry>,
}

/// Configuration loaded from file, environment, or defaults.
#[derive(Deserialize, Serialize, Debug, Default)]
pub struct FileConfig {
    /// Log level
    pub log_level: Option<String>,
    #[serde(default)]
    pub plex: Vec<ServerEntry>,
    #[serde(default)]
    pub emby: Vec<ServerEntry>,
    #[serde(default)]
    pub jellyfin: Vec<ServerEntry>,
    #[serde(default)]
    pub remote_scan: RemoteScanSection,
}

/// A validated media server connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub kind: BackendKind,
    pub server_name: String,
    pub url: String,
    pub api_key: String,
}

/// Resolved `[remote_scan]` settings with tunables clamped to their minimums.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteScanConfig {
    pub seconds_monitor_rate: u64,
    pub seconds_before_notify: u64,
    pub seconds_between_notifies: u64,
    /// Accepted for compatibility with older config files; watch changes are
    /// applied as soon as they are seen.
    pub seconds_before_inotify_modify: u64,
    pub ignore_folder_with_name: Vec<String>,
    pub valid_file_extensions: Vec<String>,
    pub scans: Vec<ScanEntry>,
}

impl Default for RemoteScanConfig {
    fn default() -> Self {
        RemoteScanConfig::from_section(RemoteScanSection::default())
    }
}

impl RemoteScanConfig {
    pub fn from_section(section: RemoteScanSection) -> Self {
        RemoteScanConfig {
            seconds_monitor_rate: section
                .seconds_monitor_rate
                .unwrap_or(DEFAULT_SECONDS_MONITOR_RATE)
                .max(MIN_SECONDS_MONITOR_RATE),
            seconds_before_notify: section
                .seconds_before_notify
                .unwrap_or(DEFAULT_SECONDS_BEFORE_NOTIFY)
                .max(MIN_SECONDS_BEFORE_NOTIFY),
            seconds_between_notifies: section
                .seconds_between_notifies
                .unwrap_or(DEFAULT_SECONDS_BETWEEN_NOTIFIES)
                .max(MIN_SECONDS_BETWEEN_NOTIFIES),
            seconds_before_inotify_modify: section
                .seconds_before_inotify_modify
                .unwrap_or(DEFAULT_SECONDS_BEFORE_INOTIFY_MODIFY)
                .max(MIN_SECONDS_BEFORE_INOTIFY_MODIFY),
            ignore_folder_with_name: section
                .ignore_folder_with_name
                .iter()
                .map(|e| e.as_str().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            valid_file_extensions: section
                .valid_file_extensions
                .as_deref()
                .map(parse_extensions)
                .unwrap_or_default(),
            scans: section.scans,
        }
    }

    pub fn timings(&self) -> Timings {
        Timings {
            monitor_rate: Duration::from_secs(self.seconds_monitor_rate),
            before_notify: Duration::from_secs(self.seconds_before_notify),
            between_notifies: Duration::from_secs(self.seconds_between_notifies),
            ..Timings::default()
        }
    }

    pub fn filter(&self) -> EventFilter {
        EventFilter::new(
            self.ignore_folder_with_name.clone(),
            self.valid_file_extensions.clone(),
        )
    }
}

/// Final application configuration after merging all sources.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Log level
    pub log_level: String,
    /// Media servers that passed validation
    pub servers: Vec<ServerConfig>,
    /// Scan groups and debounce tunables
    pub remote_scan: RemoteScanConfig,
    /// Only validate and print
    pub dry_run: bool,
}

impl AppConfig {
    /// Loads the application configuration by merging CLI, file, environment, and defaults.
    pub fn load() -> Result<Self, figment::Error> {
        let cli_args = CliArgs::parse();

        let config_file_path = cli_args
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let fig = Self::figment(&config_file_path);
        Self::from_figment(fig, cli_args)
    }

    /// Defaults, then the config file, then `SCANWATCH_` environment variables.
    pub fn figment(config_file_path: &Path) -> Figment {
        // Default log level from environment variable SCANWATCH_LOG_LEVEL, then "info"
        let default_log_level =
            std::env::var("SCANWATCH_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let fig = Figment::new().merge(Serialized::defaults(FileConfig {
            log_level: Some(default_log_level),
            ..Default::default()
        }));

        let is_json = config_file_path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let fig = if is_json {
            fig.merge(Json::file(config_file_path))
        } else {
            fig.merge(Toml::file(config_file_path))
        };

        // SCANWATCH_REMOTE_SCAN__SECONDS_BEFORE_NOTIFY -> remote_scan.seconds_before_notify
        fig.merge(Env::prefixed("SCANWATCH_").map(|key| key.as_str().replace("__", ".").into()))
    }

    /// Extracts and validates the merged configuration; CLI flags win.
    pub fn from_figment(fig: Figment, cli_args: CliArgs) -> Result<Self, figment::Error> {
        let mut merged_config: FileConfig = fig.extract()?;

        if let Some(cli_ll) = cli_args.log_level {
            merged_config.log_level = Some(cli_ll);
        }

        let mut servers = Vec::new();
        servers.extend(resolve_servers(BackendKind::Plex, &merged_config.plex));
        servers.extend(resolve_servers(BackendKind::Emby, &merged_config.emby));
        servers.extend(resolve_servers(BackendKind::Jellyfin, &merged_config.jellyfin));

        Ok(AppConfig {
            log_level: merged_config
                .log_level
                .unwrap_or_else(|| "info".to_string()),
            servers,
            remote_scan: RemoteScanConfig::from_section(merged_config.remote_scan),
            dry_run: cli_args.dry_run,
        })
    }
}

/// Keeps server entries that define a name, url and api key.
fn resolve_servers(kind: BackendKind, entries: &[ServerEntry]) -> Vec<ServerConfig> {
    entries
        .iter()
        .filter_map(|entry| match entry {
            ServerEntry {
                server_name: Some(server_name),
                url: Some(url),
                api_key: Some(api_key),
            } => Some(ServerConfig {
                kind,
                server_name: server_name.clone(),
                url: url.trim_end_matches('/').to_string(),
                api_key: api_key.clone(),
            }),
            _ => {
                warn!(
                    "{} configuration error must define server_name, url and api_key for a server",
                    kind
                );
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(toml: &str) -> RemoteScanSection {
        let fig = Figment::new().merge(Toml::string(toml));
        fig.extract::<FileConfig>().unwrap().remote_scan
    }

    #[test]
    fn tunables_are_clamped_to_their_minimums() {
        let config = RemoteScanConfig::from_section(section(
            r#"
            [remote_scan]
            seconds_monitor_rate = 0
            seconds_before_notify = 5
            seconds_between_notifies = 1
            seconds_before_inotify_modify = 0
            "#,
        ));
        assert_eq!(config.seconds_monitor_rate, 1);
        assert_eq!(config.seconds_before_notify, 30);
        assert_eq!(config.seconds_between_notifies, 10);
        assert_eq!(config.seconds_before_inotify_modify, 1);
    }

    #[test]
    fn missing_tunables_use_defaults() {
        let config = RemoteScanConfig::default();
        assert_eq!(config.seconds_monitor_rate, 1);
        assert_eq!(config.seconds_before_notify, 90);
        assert_eq!(config.seconds_between_notifies, 15);
        assert!(config.valid_file_extensions.is_empty());
        let timings = config.timings();
        assert_eq!(timings.before_notify, Duration::from_secs(90));
    }

    #[test]
    fn both_path_and_ignore_spellings_are_accepted() {
        let config = RemoteScanConfig::from_section(section(
            r#"
            [remote_scan]
            ignore_folder_with_name = ["@eaDir", { ignore_folder = ".grab" }]
            valid_file_extensions = ".mkv,.mp4"

            [[remote_scan.scans]]
            name = "Movies"
            paths = ["/media/movies", { container_path = "/media/movies4k" }]
            plex = [{ server_name = "main", library = "Movies" }]
            "#,
        ));
        assert_eq!(config.ignore_folder_with_name, vec!["@eaDir", ".grab"]);
        assert_eq!(config.valid_file_extensions, vec![".mkv", ".mp4"]);
        let paths: Vec<&str> = config.scans[0].paths.iter().map(PathEntry::as_str).collect();
        assert_eq!(paths, vec!["/media/movies", "/media/movies4k"]);
    }

    #[test]
    fn json_layout_of_the_original_service_parses() {
        let fig = Figment::new().merge(Json::string(
            r#"{
                "remote_scan": {
                    "ignore_folders": [{ "ignore_folder": "@eaDir" }],
                    "valid_file_extensions": "",
                    "scans": [{
                        "name": "TV",
                        "emby": [{ "server_name": "den", "library": "Shows" }],
                        "paths": [{ "container_path": "/media/tv" }]
                    }]
                }
            }"#,
        ));
        let file: FileConfig = fig.extract().unwrap();
        let config = RemoteScanConfig::from_section(file.remote_scan);
        assert_eq!(config.ignore_folder_with_name, vec!["@eaDir"]);
        assert!(config.valid_file_extensions.is_empty());
        assert_eq!(config.scans[0].emby[0].library.as_deref(), Some("Shows"));
    }

    #[test]
    fn incomplete_servers_are_dropped() {
        let fig = Figment::new().merge(Toml::string(
            r#"
            [[plex]]
            server_name = "main"
            url = "http://plex:32400/"
            api_key = "token"

            [[plex]]
            server_name = "broken"
            url = "http://nowhere"
            "#,
        ));
        let config = AppConfig::from_figment(fig, CliArgs::default()).unwrap();
        assert_eq!(config.servers.len(), 1);
        assert_eq!(config.servers[0].kind, BackendKind::Plex);
        assert_eq!(config.servers[0].url, "http://plex:32400");
    }

    #[test]
    fn cli_log_level_overrides_file() {
        let fig = Figment::new().merge(Toml::string(r#"log_level = "warn""#));
        let cli = CliArgs {
            log_level: Some("debug".to_string()),
            ..Default::default()
        };
        let config = AppConfig::from_figment(fig, cli).unwrap();
        assert_eq!(config.log_level, "debug");
    }
}
