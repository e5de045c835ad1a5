// src/service.rs
//! Lifecycle of the watch engine: one thread per scan group plus the
//! coordinator, and the sentinel-file shutdown that unblocks them.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::{error, info};

use crate::dispatch::Dispatcher;
use crate::filter::EventFilter;
use crate::inotify::Inotify;
use crate::monitor::{Monitor, PendingMonitor, Timings};
use crate::scan::ScanRegistry;
use crate::tree::WatchTree;
use crate::watcher::{open_group, run_watch_loop, WatchContext};

/// Name of the file written into each root to unblock a watcher on shutdown.
pub const SENTINEL_FILE: &str = "temp.txt";

/// The remote-scan service.
#[derive(Debug)]
pub struct RemoteScan {
    registry: ScanRegistry,
    filter: Arc<EventFilter>,
    timings: Timings,
    dispatcher: Arc<Dispatcher>,
    monitor: Arc<Monitor>,
    stop: Arc<AtomicBool>,
    started: AtomicBool,
    shut_down: AtomicBool,
    trees: Mutex<Vec<Arc<WatchTree<Inotify>>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl RemoteScan {
    pub fn new(
        registry: ScanRegistry,
        filter: EventFilter,
        timings: Timings,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            registry,
            filter: Arc::new(filter),
            timings,
            dispatcher: Arc::new(dispatcher),
            monitor: Arc::new(Monitor::new(timings)),
            stop: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            trees: Mutex::new(Vec::new()),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &ScanRegistry {
        &self.registry
    }

    /// Spawns a watcher thread per scan group and the coordinator thread.
    ///
    /// A group whose inotify instance cannot be created is logged and left
    /// out; the others still start.
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut threads = self.threads.lock();
        for group in self.registry.iter() {
            let tree = match open_group(group, self.timings.block_duration) {
                Ok(tree) => Arc::new(tree),
                Err(e) => {
                    error!("Unable to watch scan name={}: {}", group.name, e);
                    continue;
                }
            };
            self.trees.lock().push(Arc::clone(&tree));

            let ctx = WatchContext {
                group: Arc::clone(group),
                tree,
                filter: Arc::clone(&self.filter),
                monitor: Arc::clone(&self.monitor),
                stop: Arc::clone(&self.stop),
            };
            let handle = std::thread::Builder::new()
                .name(format!("watch-{}", group.name))
                .spawn(move || run_watch_loop(ctx))
                .with_context(|| format!("spawning watcher for scan {}", group.name))?;
            threads.push(handle);
        }

        let monitor = Arc::clone(&self.monitor);
        let dispatcher = Arc::clone(&self.dispatcher);
        let handle = std::thread::Builder::new()
            .name("monitor".to_string())
            .spawn(move || monitor.run(&dispatcher))
            .context("spawning monitor thread")?;
        threads.push(handle);

        Ok(())
    }

    /// Stops every thread and releases all watches. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        self.stop.store(true, Ordering::Release);
        self.monitor.stop();

        // Force an event through each blocked read so the loops see the flag.
        let sentinels: Vec<PathBuf> = self
            .registry
            .all_paths()
            .map(|root| root.join(SENTINEL_FILE))
            .collect();
        for sentinel in &sentinels {
            if let Err(e) = std::fs::write(sentinel, b"BREAK") {
                error!("Could not write shutdown sentinel {}: {}", sentinel.display(), e);
            }
        }

        std::thread::sleep(self.timings.shutdown_grace);

        for sentinel in &sentinels {
            remove_sentinel(sentinel);
        }

        let threads: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        for handle in threads {
            let name = handle.thread().name().unwrap_or("unnamed").to_string();
            if handle.join().is_err() {
                error!("Thread {} panicked before shutdown", name);
            }
        }

        for tree in self.trees.lock().drain(..) {
            tree.unwatch_all();
        }

        // Watchers may register activity until they are joined.
        self.monitor.clear();

        info!("Successful shutdown");
    }

    /// Names of scan groups waiting for their quiet period.
    pub fn pending(&self) -> Vec<String> {
        self.monitor.pending_names()
    }

    /// Pending groups with the folders they have accumulated so far.
    pub fn pending_monitors(&self) -> Vec<PendingMonitor> {
        self.monitor.snapshot()
    }

    /// Every directory currently watched, across all groups.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .trees
            .lock()
            .iter()
            .flat_map(|t| t.watched_paths())
            .collect();
        paths.sort();
        paths
    }
}

fn remove_sentinel(sentinel: &Path) {
    match std::fs::remove_file(sentinel) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => error!("Could not remove shutdown sentinel {}: {}", sentinel.display(), e),
    }
}
