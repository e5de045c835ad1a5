// src/monitor.rs
//! Debounce and aggregation of scan-group activity.
//!
//! Watchers call [`Monitor::register_activity`] for every relevant change. The
//! coordinator thread runs [`Monitor::run`], which wakes every
//! `monitor_rate`, and hands at most one settled group per
//! `between_notifies` window to the [`Dispatcher`]. Groups are considered in
//! the order they first became pending.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use crate::dispatch::Dispatcher;
use crate::inotify::DEFAULT_BLOCK_DURATION;
use crate::scan::{LibraryTarget, ScanGroup};

/// Timing knobs of the watch engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Coordinator wake-up cadence.
    pub monitor_rate: Duration,
    /// Quiet period a group needs before it is dispatched.
    pub before_notify: Duration,
    /// Minimum spacing between any two dispatches.
    pub between_notifies: Duration,
    /// Upper bound of one blocking inotify poll.
    pub block_duration: Duration,
    /// How long shutdown waits for watchers to see the sentinel files.
    pub shutdown_grace: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            monitor_rate: Duration::from_secs(1),
            before_notify: Duration::from_secs(90),
            between_notifies: Duration::from_secs(15),
            block_duration: DEFAULT_BLOCK_DURATION,
            shutdown_grace: Duration::from_secs(1),
        }
    }
}

/// A scan group with unsettled activity.
#[derive(Debug, Clone)]
pub struct PendingMonitor {
    pub name: String,
    pub targets: Vec<LibraryTarget>,
    pub last_activity: Instant,
    /// Directories that reported changes, in first-seen order.
    pub paths: Vec<PathBuf>,
}

/// How an activity report changed the pending set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// No group with this name was pending; a new one was created.
    Started,
    /// The group was pending and `path` is new to it.
    PathAdded,
    /// The group was pending and already knew `path`; only the clock moved.
    Refreshed,
}

#[derive(Debug, Default)]
struct MonitorState {
    pending: Vec<PendingMonitor>,
    last_notify: Option<Instant>,
    stopped: bool,
}

impl MonitorState {
    fn register(&mut self, group: &ScanGroup, path: &Path, now: Instant) -> Activity {
        let mut found = false;
        let mut added = false;
        for monitor in self.pending.iter_mut().filter(|m| m.name == group.name) {
            found = true;
            if !monitor.paths.iter().any(|p| p == path) {
                monitor.paths.push(path.to_path_buf());
                added = true;
            }
            monitor.last_activity = now;
        }

        if found {
            return if added {
                Activity::PathAdded
            } else {
                Activity::Refreshed
            };
        }

        self.pending.push(PendingMonitor {
            name: group.name.clone(),
            targets: group.targets.clone(),
            last_activity: now,
            paths: vec![path.to_path_buf()],
        });
        Activity::Started
    }

    /// Removes and returns the first settled group, honouring the global
    /// throttle. Every other entry with the same name goes with it.
    fn take_ready(&mut self, now: Instant, timings: &Timings) -> Option<PendingMonitor> {
        if self.pending.is_empty() {
            return None;
        }
        if let Some(last) = self.last_notify {
            if now.saturating_duration_since(last) < timings.between_notifies {
                return None;
            }
        }

        let index = self
            .pending
            .iter()
            .position(|m| now.saturating_duration_since(m.last_activity) >= timings.before_notify)?;
        let fired = self.pending.remove(index);
        self.pending.retain(|m| m.name != fired.name);
        self.last_notify = Some(now);
        Some(fired)
    }
}

/// Shared pending set plus the coordinator that drains it.
#[derive(Debug)]
pub struct Monitor {
    state: Mutex<MonitorState>,
    wake: Condvar,
    timings: Timings,
}

impl Monitor {
    pub fn new(timings: Timings) -> Self {
        Self {
            state: Mutex::new(MonitorState::default()),
            wake: Condvar::new(),
            timings,
        }
    }

    /// Records a relevant change in `path` for `group`.
    pub fn register_activity(&self, group: &ScanGroup, path: &Path) -> Activity {
        self.register_activity_at(group, path, Instant::now())
    }

    pub fn register_activity_at(&self, group: &ScanGroup, path: &Path, now: Instant) -> Activity {
        let mut state = self.state.lock();
        let was_empty = state.pending.is_empty();
        let activity = state.register(group, path, now);
        if was_empty {
            self.wake.notify_all();
        }
        drop(state);

        match activity {
            Activity::Started | Activity::PathAdded => info!(
                "➡️ Scan moved to monitor name={} folder={}",
                group.name,
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string())
            ),
            Activity::Refreshed => debug!("Refreshed monitor name={}", group.name),
        }
        activity
    }

    /// Next group to dispatch at `now`, if the throttle allows one.
    pub fn take_ready(&self, now: Instant) -> Option<PendingMonitor> {
        self.state.lock().take_ready(now, &self.timings)
    }

    /// Coordinator loop. Returns once [`Monitor::stop`] has been called.
    pub fn run(&self, dispatcher: &Dispatcher) {
        loop {
            let ready = {
                let mut state = self.state.lock();
                while state.pending.is_empty() && !state.stopped {
                    self.wake.wait(&mut state);
                }
                if state.stopped {
                    break;
                }
                state.take_ready(Instant::now(), &self.timings)
            };

            // Dispatch outside the lock; the group is already out of the
            // pending set, so new activity starts a fresh accumulation.
            if let Some(monitor) = ready {
                dispatcher.dispatch(&monitor);
            }

            let mut state = self.state.lock();
            if state.stopped {
                break;
            }
            self.wake.wait_for(&mut state, self.timings.monitor_rate);
            if state.stopped {
                break;
            }
        }
        info!("Stopping monitor thread");
    }

    /// Makes [`Monitor::run`] return and wakes it if it is sleeping.
    pub fn stop(&self) {
        self.state.lock().stopped = true;
        self.wake.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Drops all pending groups.
    pub fn clear(&self) {
        self.state.lock().pending.clear();
    }

    /// Copies of the pending groups, in insertion order.
    pub fn snapshot(&self) -> Vec<PendingMonitor> {
        self.state.lock().pending.iter().cloned().collect()
    }

    /// Names of the pending groups, in insertion order.
    pub fn pending_names(&self) -> Vec<String> {
        self.state
            .lock()
            .pending
            .iter()
            .map(|m| m.name.clone())
            .collect()
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }
}
