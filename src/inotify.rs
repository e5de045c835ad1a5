// src/inotify.rs
//! Thin wrapper over the Linux inotify API.
//!
//! [`Inotify`] owns the descriptor and manages watches. [`Inotify::events`] hands
//! out a blocking iterator that polls with a bounded timeout so callers get an
//! idle tick (`Ok(None)`) at least once per block duration and can check for
//! cancellation.

use std::collections::VecDeque;
use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::error::WatchError;
use crate::event::{Event, EventDecoder, Terminal, WatchId};
use crate::tree::WatchBackend;

/// Default upper bound for a single `poll(2)` call.
pub const DEFAULT_BLOCK_DURATION: Duration = Duration::from_secs(1);

const READ_CHUNK: usize = 4096;

/// An inotify instance.
#[derive(Debug)]
pub struct Inotify {
    fd: OwnedFd,
    block_duration: Duration,
}

impl Inotify {
    /// Creates a non-blocking, close-on-exec inotify descriptor.
    pub fn init() -> Result<Self, WatchError> {
        // SAFETY: inotify_init1 takes no pointers.
        let raw = unsafe { libc::inotify_init1(libc::IN_NONBLOCK | libc::IN_CLOEXEC) };
        if raw < 0 {
            return Err(io::Error::last_os_error().into());
        }
        debug!("Inotify handle is ({})", raw);
        // SAFETY: `raw` is a freshly created descriptor we exclusively own.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        Ok(Self {
            fd,
            block_duration: DEFAULT_BLOCK_DURATION,
        })
    }

    pub fn with_block_duration(mut self, block_duration: Duration) -> Self {
        self.block_duration = block_duration;
        self
    }

    /// Blocking stream of decoded events. Restart by calling `events` again; a
    /// terminal event ends the stream for good.
    pub fn events(&self) -> Events<'_> {
        Events {
            inotify: self,
            decoder: EventDecoder::new(),
            ready: VecDeque::new(),
            chunk: vec![0u8; READ_CHUNK],
            finished: false,
        }
    }

    /// Waits until the descriptor is readable. `Ok(false)` means timeout.
    fn wait_readable(&self) -> io::Result<bool> {
        let mut pfd = libc::pollfd {
            fd: self.fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout = self.block_duration.as_millis().min(i32::MAX as u128) as libc::c_int;
        // SAFETY: `pfd` is a valid pollfd for the duration of the call.
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(rc > 0 && pfd.revents & libc::POLLIN != 0)
    }

    fn read_into(&self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
        let n = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }
}

impl WatchBackend for Inotify {
    fn add_watch(&self, path: &Path, mask: u32) -> Result<WatchId, WatchError> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| WatchError::InvalidPath(path.to_path_buf()))?;
        // SAFETY: `c_path` is a valid NUL-terminated string.
        let wd = unsafe { libc::inotify_add_watch(self.fd.as_raw_fd(), c_path.as_ptr(), mask) };
        if wd < 0 {
            return Err(WatchError::AddWatch {
                path: path.to_path_buf(),
                source: io::Error::last_os_error(),
            });
        }
        Ok(wd)
    }

    fn remove_watch(&self, wd: WatchId) -> Result<(), WatchError> {
        // SAFETY: plain integer arguments.
        let rc = unsafe { libc::inotify_rm_watch(self.fd.as_raw_fd(), wd) };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }
}

/// Iterator returned by [`Inotify::events`].
///
/// Yields `Ok(Some(event))` for each record, `Ok(None)` when a poll cycle
/// passes without a complete record, and a single `Err` before ending when
/// the kernel reports an overflow or an unmount.
#[derive(Debug)]
pub struct Events<'a> {
    inotify: &'a Inotify,
    decoder: EventDecoder,
    ready: VecDeque<Event>,
    chunk: Vec<u8>,
    finished: bool,
}

impl Events<'_> {
    /// One poll + read cycle. Returns `Ok(false)` on an idle cycle.
    fn fill(&mut self) -> Result<bool, WatchError> {
        loop {
            match self.inotify.wait_readable() {
                Ok(false) => return Ok(false),
                Ok(true) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            match self.inotify.read_into(&mut self.chunk) {
                Ok(n) => {
                    self.decoder.extend(&self.chunk[..n]);
                    while let Some(event) = self.decoder.next_event() {
                        self.ready.push_back(event);
                    }
                    return Ok(true);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Iterator for Events<'_> {
    type Item = Result<Option<Event>, WatchError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        if self.ready.is_empty() {
            match self.fill() {
                Ok(_) if self.ready.is_empty() => return Some(Ok(None)),
                Ok(_) => {}
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }

        let event = self.ready.pop_front()?;
        debug!(
            "Event received in stream: wd={} {:?} {:?}",
            event.wd,
            event.kind_names(),
            event.name
        );
        match event.terminal() {
            Some(Terminal::Overflow) => {
                self.finished = true;
                Some(Err(WatchError::Overflow))
            }
            Some(Terminal::Unmount) => {
                self.finished = true;
                Some(Err(WatchError::Unmounted))
            }
            None => Some(Ok(Some(event))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SCAN_MASK;
    use std::ffi::OsString;

    fn next_real_event(events: &mut Events<'_>) -> Event {
        for _ in 0..50 {
            match events.next() {
                Some(Ok(Some(event))) => return event,
                Some(Ok(None)) => continue,
                other => panic!("unexpected stream item: {:?}", other),
            }
        }
        panic!("no event arrived");
    }

    #[test]
    fn reports_file_creation_in_a_watched_directory() {
        let dir = tempfile::tempdir().unwrap();
        let inotify = Inotify::init()
            .unwrap()
            .with_block_duration(Duration::from_millis(50));
        let wd = inotify.add_watch(dir.path(), SCAN_MASK).unwrap();

        std::fs::write(dir.path().join("film.mkv"), b"x").unwrap();

        let mut events = inotify.events();
        let event = next_real_event(&mut events);
        assert_eq!(event.wd, wd);
        assert_eq!(event.name, OsString::from("film.mkv"));
        assert!(event.is_created());
    }

    #[test]
    fn yields_idle_ticks_without_activity() {
        let dir = tempfile::tempdir().unwrap();
        let inotify = Inotify::init()
            .unwrap()
            .with_block_duration(Duration::from_millis(10));
        inotify.add_watch(dir.path(), SCAN_MASK).unwrap();

        let mut events = inotify.events();
        assert!(matches!(events.next(), Some(Ok(None))));
    }

    #[test]
    fn add_watch_on_missing_path_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let inotify = Inotify::init().unwrap();
        match inotify.add_watch(&missing, SCAN_MASK) {
            Err(WatchError::AddWatch { path, .. }) => assert_eq!(path, missing),
            other => panic!("expected AddWatch error, got {:?}", other),
        }
    }

    #[test]
    fn removing_a_watch_produces_an_ignored_event() {
        let dir = tempfile::tempdir().unwrap();
        let inotify = Inotify::init()
            .unwrap()
            .with_block_duration(Duration::from_millis(50));
        let wd = inotify.add_watch(dir.path(), SCAN_MASK).unwrap();
        inotify.remove_watch(wd).unwrap();

        let mut events = inotify.events();
        let event = next_real_event(&mut events);
        assert_eq!(event.wd, wd);
        assert!(event.is_ignored());
    }
}
