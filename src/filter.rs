// src/filter.rs
use std::path::Path;

/// Decides which filesystem changes are worth a rescan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    ignore: Vec<String>,
    extensions: Vec<String>,
}

impl EventFilter {
    pub fn new(ignore: Vec<String>, extensions: Vec<String>) -> Self {
        Self { ignore, extensions }
    }

    /// `false` if `path` contains any ignore substring.
    pub fn is_path_allowed(&self, path: &str) -> bool {
        !self.ignore.iter().any(|needle| path.contains(needle.as_str()))
    }

    /// `true` when no extensions are configured, otherwise only for names ending
    /// in one of them. The comparison is a literal, case-sensitive suffix match.
    pub fn is_extension_allowed(&self, filename: &str) -> bool {
        self.extensions.is_empty()
            || self
                .extensions
                .iter()
                .any(|ext| filename.ends_with(ext.as_str()))
    }

    /// Both checks for a name reported inside `dir`.
    pub fn allows(&self, dir: &Path, name: &str) -> bool {
        self.is_path_allowed(&dir.join(name).to_string_lossy()) && self.is_extension_allowed(name)
    }
}

/// Splits a comma-separated extension list. Blank entries are dropped, so an
/// empty string means "allow everything".
pub fn parse_extensions(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|ext| !ext.is_empty())
        .map(str::to_string)
        .collect()
}
