//! Rewind checkpoints captured during demo playback.

use std::num::NonZeroUsize;

use crate::session::SessionState;

/// Errors that can occur when inserting a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointError {
    /// Keys must be strictly increasing.
    OutOfOrder { last_key: u64, new_key: u64 },
}

impl std::fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfOrder { last_key, new_key } => {
                write!(f, "checkpoint key {new_key} is not after {last_key}")
            }
        }
    }
}

impl std::error::Error for CheckpointError {}

/// A fixed-capacity ring of values keyed by a strictly increasing `u64`.
///
/// When full, inserting evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct CheckpointRing<T> {
    entries: Vec<Option<(u64, T)>>,
    head: usize,
    len: usize,
    last_key: Option<u64>,
}

impl<T> CheckpointRing<T> {
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        let cap = capacity.get();
        let mut entries = Vec::with_capacity(cap);
        entries.resize_with(cap, || None);
        Self {
            entries,
            head: 0,
            len: 0,
            last_key: None,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Key of the most recent insert, surviving eviction.
    #[must_use]
    pub const fn newest_key(&self) -> Option<u64> {
        self.last_key
    }

    /// Inserts `value` at `key`, evicting the oldest entry when full.
    pub fn insert(&mut self, key: u64, value: T) -> Result<(), CheckpointError> {
        if let Some(last) = self.last_key {
            if key <= last {
                return Err(CheckpointError::OutOfOrder {
                    last_key: last,
                    new_key: key,
                });
            }
        }

        let cap = self.entries.len();
        if self.len < cap {
            let idx = (self.head + self.len) % cap;
            self.entries[idx] = Some((key, value));
            self.len += 1;
        } else {
            self.entries[self.head] = Some((key, value));
            self.head = (self.head + 1) % cap;
        }
        self.last_key = Some(key);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, key: u64) -> Option<&T> {
        self.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    #[must_use]
    pub fn oldest(&self) -> Option<(u64, &T)> {
        self.iter().next()
    }

    /// Newest entry satisfying `pred`.
    pub fn latest_matching(&self, mut pred: impl FnMut(&T) -> bool) -> Option<(u64, &T)> {
        self.iter().rev().find(|(_, v)| pred(v))
    }

    /// Iterates from oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (u64, &T)> {
        let cap = self.entries.len();
        (0..self.len).filter_map(move |i| {
            self.entries[(self.head + i) % cap]
                .as_ref()
                .map(|(key, value)| (*key, value))
        })
    }

    pub fn clear(&mut self) {
        self.entries.iter_mut().for_each(|e| *e = None);
        self.head = 0;
        self.len = 0;
        self.last_key = None;
    }
}

/// Session state captured just before a demo frame was read.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    /// Byte offset of the frame in the demo stream.
    pub seek_point: u64,
    /// Frames read before this one.
    pub messages_read: u64,
    pub state: SessionState,
}

impl Checkpoint {
    /// Server time of the newest snapshot in the captured state.
    #[must_use]
    pub const fn server_time(&self) -> i32 {
        self.state.snapshots.current().server_time
    }
}

/// Returns `true` when a checkpoint should be taken before frame
/// `messages_read`.
#[must_use]
pub const fn should_capture(messages_read: u64, interval: u64, newest_key: Option<u64>) -> bool {
    match newest_key {
        None => true,
        Some(newest) => messages_read > newest && interval > 0 && messages_read % interval == 0,
    }
}
