use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tessera_types::{EntityStream, Entry, State};
use tracing::warn;

use crate::error::{JournalError, JournalResult};

/// Journal storage shared between the writer task and every reader.
pub type SharedState = Arc<RwLock<JournalState>>;

/// In-memory journal contents.
///
/// Entries live in one append-only log in commit order. Each stream keeps an
/// index from version to log position, and at most one snapshot.
#[derive(Debug, Default)]
pub struct JournalState {
    entries: Vec<Entry>,
    stream_indexes: HashMap<String, BTreeMap<u32, usize>>,
    snapshots: HashMap<String, State>,
}

impl JournalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedState {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Number of entries across all streams.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry_at(&self, position: usize) -> Option<&Entry> {
        self.entries.get(position)
    }

    /// Up to `max` entries starting at log position `position`.
    pub fn entries_from(&self, position: usize, max: usize) -> &[Entry] {
        let start = position.min(self.entries.len());
        let end = start.saturating_add(max).min(self.entries.len());
        &self.entries[start..end]
    }

    /// Log position of the entry with this id.
    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id == id)
    }

    /// Highest version written to the stream, `0` if it has none.
    pub fn stream_version(&self, stream_name: &str) -> u32 {
        self.stream_indexes
            .get(stream_name)
            .and_then(|index| index.keys().next_back().copied())
            .unwrap_or(0)
    }

    pub fn stream_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stream_indexes.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn snapshot(&self, stream_name: &str) -> Option<&State> {
        self.snapshots.get(stream_name)
    }

    /// Append a batch of entries to a stream, all or nothing.
    ///
    /// Each entry must already carry its stream version. No entry is written
    /// if any of those versions is taken. Returns the stored entries with
    /// their journal-assigned ids.
    pub fn insert_all(
        &mut self,
        stream_name: &str,
        entries: Vec<Entry>,
    ) -> JournalResult<Vec<Entry>> {
        if entries.is_empty() {
            return Err(JournalError::EmptyBatch(stream_name.to_string()));
        }

        if let Some(index) = self.stream_indexes.get(stream_name) {
            if let Some(taken) = entries
                .iter()
                .find(|entry| index.contains_key(&entry.entry_version))
            {
                warn!(
                    stream = stream_name,
                    version = taken.entry_version,
                    "rejected append: version already exists"
                );
                return Err(JournalError::ConcurrencyConflict {
                    stream_name: stream_name.to_string(),
                    version: taken.entry_version,
                });
            }
        }
        if let Some(zero) = entries.iter().find(|entry| entry.entry_version == 0) {
            return Err(JournalError::IntegrityViolation {
                stream_name: stream_name.to_string(),
                version: zero.entry_version,
                reason: "stream versions start at 1".into(),
            });
        }

        let index = self
            .stream_indexes
            .entry(stream_name.to_string())
            .or_default();
        let mut stored = Vec::with_capacity(entries.len());
        for entry in entries {
            let position = self.entries.len();
            let entry = entry.with_id((position + 1).to_string());
            index.insert(entry.entry_version, position);
            self.entries.push(entry.clone());
            stored.push(entry);
        }
        Ok(stored)
    }

    /// Store the stream's snapshot, replacing any earlier one.
    pub fn put_snapshot(&mut self, stream_name: &str, snapshot: State) {
        self.snapshots.insert(stream_name.to_string(), snapshot);
    }

    /// Reconstruct a stream from `from_version`, optionally bounded by
    /// `to_version` (inclusive).
    ///
    /// A snapshot inside the requested range is returned and the entries
    /// resume right after it. Otherwise the snapshot is omitted. The walk stops
    /// at the first missing version. When nothing is read, `stream_version` is
    /// `from_version - 1`.
    pub fn stream(
        &self,
        stream_name: &str,
        from_version: u32,
        to_version: Option<u32>,
    ) -> EntityStream {
        let from_version = from_version.max(1);
        let (mut version, snapshot) = match self.snapshots.get(stream_name) {
            Some(snapshot)
                if snapshot.data_version >= from_version
                    && to_version.map_or(true, |to| snapshot.data_version <= to) =>
            {
                (snapshot.data_version.saturating_add(1), Some(snapshot.clone()))
            }
            _ => (from_version, None),
        };

        let mut entries = Vec::new();
        if let Some(index) = self.stream_indexes.get(stream_name) {
            while to_version.map_or(true, |to| version <= to) {
                let Some(entry) = index
                    .get(&version)
                    .and_then(|&position| self.entries.get(position))
                else {
                    break;
                };
                entries.push(entry.clone());
                version += 1;
            }
        }

        EntityStream::new(stream_name, version - 1, entries, snapshot)
    }

    /// Check the stream's index against the log.
    ///
    /// Versions must be contiguous from 1. Each must point at an entry that
    /// carries that version and a journal id. A snapshot may not claim a
    /// version past the stream head.
    pub fn validate_stream(&self, stream_name: &str) -> JournalResult<()> {
        let violation = |version: u32, reason: &str| JournalError::IntegrityViolation {
            stream_name: stream_name.to_string(),
            version,
            reason: reason.to_string(),
        };

        let Some(index) = self.stream_indexes.get(stream_name) else {
            return match self.snapshots.get(stream_name) {
                Some(snapshot) => Err(violation(
                    snapshot.data_version,
                    "snapshot for a stream without entries",
                )),
                None => Ok(()),
            };
        };

        let mut expected = 1;
        for (&version, &position) in index {
            if version != expected {
                return Err(violation(expected, "missing version"));
            }
            let Some(entry) = self.entries.get(position) else {
                return Err(violation(version, "index points past the log"));
            };
            if entry.entry_version != version {
                return Err(violation(version, "entry version does not match index"));
            }
            if !entry.has_id() {
                return Err(violation(version, "entry has no journal id"));
            }
            expected += 1;
        }

        if let Some(snapshot) = self.snapshots.get(stream_name) {
            if snapshot.data_version >= expected {
                return Err(violation(
                    snapshot.data_version,
                    "snapshot is ahead of the stream",
                ));
            }
        }
        Ok(())
    }
}

pub(crate) fn read_state(state: &SharedState) -> JournalResult<RwLockReadGuard<'_, JournalState>> {
    state
        .read()
        .map_err(|_| JournalError::Storage("journal read lock poisoned".into()))
}

pub(crate) fn write_state(
    state: &SharedState,
) -> JournalResult<RwLockWriteGuard<'_, JournalState>> {
    state
        .write()
        .map_err(|_| JournalError::Storage("journal write lock poisoned".into()))
}
