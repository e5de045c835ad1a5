// src/dispatch.rs
//! Turns a settled scan group into library refreshes on the media servers.

use std::path::Path;
use tracing::{info, warn};

use crate::backend::{BackendRegistry, LibraryLookup};
use crate::monitor::PendingMonitor;
use crate::scan::LibraryTarget;

/// What a dispatch reached.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Comma-separated list of the backends that accepted the refresh,
    /// e.g. `Plex(main),Jellyfin(den)`.
    pub target: String,
    pub notified: usize,
}

#[derive(Debug, Default, Clone)]
pub struct Dispatcher {
    backends: BackendRegistry,
}

impl Dispatcher {
    pub fn new(backends: BackendRegistry) -> Self {
        Self { backends }
    }

    /// Refreshes every library of `monitor`. Unreachable servers and unknown
    /// libraries are logged and left out of the summary.
    pub fn dispatch(&self, monitor: &PendingMonitor) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        for target in &monitor.targets {
            if self.notify(target) {
                append_target(&mut summary.target, target.kind.label(), &target.server_name);
                summary.notified += 1;
            }
        }

        if !summary.target.is_empty() {
            for path in &monitor.paths {
                info!(
                    "✅ Monitor moved to target {} folder={}",
                    summary.target,
                    folder_name(path)
                );
            }
        }
        summary
    }

    fn notify(&self, target: &LibraryTarget) -> bool {
        let Some(backend) = self.backends.find(target.kind, &target.server_name) else {
            warn!(
                "{}({}) server not configured ... Skipped notify for library={}",
                target.kind, target.server_name, target.library
            );
            return false;
        };

        if !backend.is_available() {
            warn!(
                "{}({}) server not available ... Skipped notify for library={}",
                target.kind, target.server_name, target.library
            );
            return false;
        }

        match backend.library_exists_or_resolve(&target.library) {
            LibraryLookup::Found(handle) => {
                backend.trigger_scan(&handle);
                true
            }
            LibraryLookup::NotFound => {
                warn!(
                    "{}({}) library={} not found on server",
                    target.kind, target.server_name, target.library
                );
                false
            }
        }
    }
}

/// Appends `label(instance)` to a comma-separated target list.
pub fn append_target(target: &mut String, label: &str, instance: &str) {
    if !target.is_empty() {
        target.push(',');
    }
    target.push_str(label);
    if !instance.is_empty() {
        target.push('(');
        target.push_str(instance);
        target.push(')');
    }
}

fn folder_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
