// src/watcher.rs
//! The per-scan-group watch loop.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::error::WatchError;
use crate::event::{Event, SCAN_MASK};
use crate::filter::EventFilter;
use crate::inotify::Inotify;
use crate::monitor::Monitor;
use crate::scan::ScanGroup;
use crate::tree::WatchTree;

/// Everything one watcher thread needs.
#[derive(Debug, Clone)]
pub struct WatchContext {
    pub group: Arc<ScanGroup>,
    pub tree: Arc<WatchTree<Inotify>>,
    pub filter: Arc<EventFilter>,
    pub monitor: Arc<Monitor>,
    pub stop: Arc<AtomicBool>,
}

/// Opens an inotify instance and watches every root of `group` recursively.
///
/// Roots that cannot be watched are logged and skipped.
pub fn open_group(
    group: &ScanGroup,
    block_duration: Duration,
) -> Result<WatchTree<Inotify>, WatchError> {
    let inotify = Inotify::init()?.with_block_duration(block_duration);
    let tree = WatchTree::new(inotify, SCAN_MASK);
    for path in &group.paths {
        info!("Starting monitor name={} path={}", group.name, path.display());
        let discovery = tree.watch_tree(path);
        debug!(
            "Watching {} directories under {}",
            discovery.added,
            path.display()
        );
    }
    Ok(tree)
}

/// Reads events until the stop flag is raised or the event source fails.
///
/// Runs on a dedicated thread; never panics on I/O trouble.
pub fn run_watch_loop(ctx: WatchContext) {
    for item in ctx.tree.backend().events() {
        if ctx.stop.load(Ordering::Acquire) {
            for path in &ctx.group.paths {
                info!("Stopping watch name={} path={}", ctx.group.name, path.display());
            }
            return;
        }

        match item {
            Ok(Some(event)) => handle_event(&ctx, &event),
            Ok(None) => {}
            Err(e) => {
                error!("Watcher for scan name={} stopped: {}", ctx.group.name, e);
                return;
            }
        }
    }
}

/// Applies one event: keeps the watch tree current and reports relevant
/// changes to the monitor.
pub fn handle_event(ctx: &WatchContext, event: &Event) {
    if event.is_ignored() {
        if let Some(path) = ctx.tree.forget_watch(event.wd) {
            debug!("Watch ({}) dropped by the kernel: {}", event.wd, path.display());
        }
        return;
    }

    let Some(dir) = ctx.tree.resolve(event.wd) else {
        debug!("Event for unknown watch ({}) ignored", event.wd);
        return;
    };
    if !event.has_name() {
        return;
    }
    let full_path = dir.join(&event.name);

    if event.is_dir() {
        if event.is_created() {
            let discovery = ctx.tree.handle_directory_created(&full_path);
            // Content moved in together with its directory raises no events
            // of its own.
            for file in &discovery.files {
                if let (Some(parent), Some(name)) = (file.parent(), file.file_name()) {
                    report(ctx, parent, &name.to_string_lossy());
                }
            }
        } else if event.is_deleted() {
            ctx.tree.handle_directory_removed(&full_path);
        } else if event.is_moved_out() {
            ctx.tree.handle_directory_moved_out(&full_path);
        }
    }

    report(ctx, &dir, &event.name.to_string_lossy());
}

fn report(ctx: &WatchContext, dir: &Path, name: &str) {
    if ctx.filter.allows(dir, name) {
        ctx.monitor.register_activity(&ctx.group, dir);
    }
}
