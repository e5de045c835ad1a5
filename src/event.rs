// src/event.rs
//! Decoding of the raw inotify byte stream.
//!
//! The kernel hands out a packed sequence of `struct inotify_event` records: a
//! fixed 16-byte header (`wd`, `mask`, `cookie`, `len`) followed by `len` bytes of
//! NUL-padded file name. A single `read(2)` may end in the middle of a record, so
//! [`EventDecoder`] keeps the unconsumed tail around until the rest arrives.

use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;

/// Watch descriptor handed out by `inotify_add_watch`.
pub type WatchId = i32;

/// Length of the fixed part of `struct inotify_event`.
pub const HEADER_LEN: usize = 16;

/// Mask used for every directory in a scan tree.
pub const SCAN_MASK: u32 = libc::IN_MODIFY
    | libc::IN_MOVED_FROM
    | libc::IN_MOVED_TO
    | libc::IN_CREATE
    | libc::IN_DELETE;

const MASK_NAMES: &[(u32, &str)] = &[
    (libc::IN_ACCESS, "IN_ACCESS"),
    (libc::IN_MODIFY, "IN_MODIFY"),
    (libc::IN_ATTRIB, "IN_ATTRIB"),
    (libc::IN_CLOSE_WRITE, "IN_CLOSE_WRITE"),
    (libc::IN_CLOSE_NOWRITE, "IN_CLOSE_NOWRITE"),
    (libc::IN_OPEN, "IN_OPEN"),
    (libc::IN_MOVED_FROM, "IN_MOVED_FROM"),
    (libc::IN_MOVED_TO, "IN_MOVED_TO"),
    (libc::IN_CREATE, "IN_CREATE"),
    (libc::IN_DELETE, "IN_DELETE"),
    (libc::IN_DELETE_SELF, "IN_DELETE_SELF"),
    (libc::IN_MOVE_SELF, "IN_MOVE_SELF"),
    (libc::IN_UNMOUNT, "IN_UNMOUNT"),
    (libc::IN_Q_OVERFLOW, "IN_Q_OVERFLOW"),
    (libc::IN_IGNORED, "IN_IGNORED"),
    (libc::IN_ISDIR, "IN_ISDIR"),
];

/// Event types after which the inotify handle is no longer trustworthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Overflow,
    Unmount,
}

/// One decoded inotify record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub wd: WatchId,
    pub mask: u32,
    pub cookie: u32,
    /// File or directory name relative to the watched directory. Empty for
    /// events about the watch itself (overflow, ignored, unmount).
    pub name: OsString,
}

impl Event {
    pub fn is_dir(&self) -> bool {
        self.mask & libc::IN_ISDIR != 0
    }

    /// Something appeared: created in place or moved in.
    pub fn is_created(&self) -> bool {
        self.mask & (libc::IN_CREATE | libc::IN_MOVED_TO) != 0
    }

    /// Deleted. The kernel drops the watches of a deleted directory itself.
    pub fn is_deleted(&self) -> bool {
        self.mask & libc::IN_DELETE != 0
    }

    /// Renamed away from this directory; its watches stay live.
    pub fn is_moved_out(&self) -> bool {
        self.mask & libc::IN_MOVED_FROM != 0
    }

    /// The kernel dropped this watch descriptor.
    pub fn is_ignored(&self) -> bool {
        self.mask & libc::IN_IGNORED != 0
    }

    pub fn has_name(&self) -> bool {
        !self.name.is_empty()
    }

    pub fn terminal(&self) -> Option<Terminal> {
        if self.mask & libc::IN_Q_OVERFLOW != 0 {
            Some(Terminal::Overflow)
        } else if self.mask & libc::IN_UNMOUNT != 0 {
            Some(Terminal::Unmount)
        } else {
            None
        }
    }

    /// Symbolic names of the bits set in `mask`, for logging.
    pub fn kind_names(&self) -> Vec<&'static str> {
        MASK_NAMES
            .iter()
            .filter(|(bit, _)| self.mask & bit != 0)
            .map(|(_, name)| *name)
            .collect()
    }
}

/// Incremental decoder for the inotify record stream.
#[derive(Debug, Default)]
pub struct EventDecoder {
    buffer: Vec<u8>,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly read bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes received but not yet part of a complete record.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Pops the next complete record, or `None` if more bytes are needed.
    pub fn next_event(&mut self) -> Option<Event> {
        if self.buffer.len() < HEADER_LEN {
            return None;
        }

        let wd = i32::from_ne_bytes(word(&self.buffer, 0));
        let mask = u32::from_ne_bytes(word(&self.buffer, 4));
        let cookie = u32::from_ne_bytes(word(&self.buffer, 8));
        let name_len = u32::from_ne_bytes(word(&self.buffer, 12)) as usize;

        let total = HEADER_LEN + name_len;
        if self.buffer.len() < total {
            return None;
        }

        let raw_name = &self.buffer[HEADER_LEN..total];
        let end = raw_name
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(raw_name.len());
        let name = OsStr::from_bytes(&raw_name[..end]).to_os_string();

        self.buffer.drain(..total);

        Some(Event {
            wd,
            mask,
            cookie,
            name,
        })
    }
}

fn word(buffer: &[u8], offset: usize) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buffer[offset..offset + 4]);
    out
}

#[cfg(test)]
pub(crate) fn encode(wd: WatchId, mask: u32, name: &str) -> Vec<u8> {
    // Names are NUL-terminated and padded to a 16-byte boundary, like the kernel does.
    let padded = if name.is_empty() {
        0
    } else {
        (name.len() + 1).div_ceil(16) * 16
    };
    let mut out = Vec::with_capacity(HEADER_LEN + padded);
    out.extend_from_slice(&wd.to_ne_bytes());
    out.extend_from_slice(&mask.to_ne_bytes());
    out.extend_from_slice(&0u32.to_ne_bytes());
    out.extend_from_slice(&(padded as u32).to_ne_bytes());
    out.extend_from_slice(name.as_bytes());
    out.resize(HEADER_LEN + padded, 0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_back_to_back_records() {
        let mut decoder = EventDecoder::new();
        let mut bytes = encode(1, libc::IN_CREATE, "film.mkv");
        bytes.extend(encode(2, libc::IN_DELETE | libc::IN_ISDIR, "Extras"));
        decoder.extend(&bytes);

        let first = decoder.next_event().unwrap();
        assert_eq!(first.wd, 1);
        assert_eq!(first.name, OsString::from("film.mkv"));
        assert!(first.is_created());
        assert!(!first.is_dir());

        let second = decoder.next_event().unwrap();
        assert_eq!(second.wd, 2);
        assert_eq!(second.name, OsString::from("Extras"));
        assert!(second.is_dir() && second.is_deleted());
        assert!(!second.is_moved_out());

        assert!(decoder.next_event().is_none());
        assert_eq!(decoder.pending_bytes(), 0);
    }

    #[test]
    fn waits_for_a_complete_header() {
        let mut decoder = EventDecoder::new();
        let bytes = encode(7, libc::IN_MODIFY, "a.mkv");

        decoder.extend(&bytes[..10]);
        assert!(decoder.next_event().is_none());
        assert_eq!(decoder.pending_bytes(), 10);

        decoder.extend(&bytes[10..]);
        let event = decoder.next_event().unwrap();
        assert_eq!(event.wd, 7);
        assert_eq!(event.name, OsString::from("a.mkv"));
    }

    #[test]
    fn waits_for_a_complete_name() {
        let mut decoder = EventDecoder::new();
        let bytes = encode(3, libc::IN_MOVED_TO, "a-rather-long-file-name.mp4");

        // Full header, half of the name.
        let split = HEADER_LEN + 5;
        decoder.extend(&bytes[..split]);
        assert!(decoder.next_event().is_none());

        decoder.extend(&bytes[split..]);
        let event = decoder.next_event().unwrap();
        assert_eq!(event.name, OsString::from("a-rather-long-file-name.mp4"));
        assert!(decoder.next_event().is_none());
    }

    #[test]
    fn byte_at_a_time_feed_yields_the_same_events() {
        let mut bytes = encode(1, libc::IN_CREATE, "one.mkv");
        bytes.extend(encode(1, libc::IN_MODIFY, "two.mkv"));

        let mut decoder = EventDecoder::new();
        let mut names = Vec::new();
        for b in &bytes {
            decoder.extend(std::slice::from_ref(b));
            while let Some(event) = decoder.next_event() {
                names.push(event.name);
            }
        }
        assert_eq!(names, vec![OsString::from("one.mkv"), OsString::from("two.mkv")]);
    }

    #[test]
    fn nameless_records_have_an_empty_name() {
        let mut decoder = EventDecoder::new();
        decoder.extend(&encode(-1, libc::IN_Q_OVERFLOW, ""));
        let event = decoder.next_event().unwrap();
        assert!(!event.has_name());
        assert_eq!(event.terminal(), Some(Terminal::Overflow));
    }

    #[test]
    fn unmount_is_terminal_and_plain_events_are_not() {
        let unmount = Event {
            wd: 4,
            mask: libc::IN_UNMOUNT,
            cookie: 0,
            name: OsString::new(),
        };
        assert_eq!(unmount.terminal(), Some(Terminal::Unmount));

        let create = Event {
            wd: 4,
            mask: libc::IN_CREATE,
            cookie: 0,
            name: OsString::from("x"),
        };
        assert_eq!(create.terminal(), None);
    }

    #[test]
    fn kind_names_lists_every_set_bit() {
        let event = Event {
            wd: 1,
            mask: libc::IN_CREATE | libc::IN_ISDIR,
            cookie: 0,
            name: OsString::from("dir"),
        };
        assert_eq!(event.kind_names(), vec!["IN_CREATE", "IN_ISDIR"]);
    }
}
