use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entry::Entry;
use crate::state::State;

/// The entries, and possibly the snapshot, of a full or partial named stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityStream {
    /// Name of the stream, generally the identity of an aggregate.
    pub stream_name: String,
    /// Highest stream version reached by this read. When nothing was read
    /// this is the starting version minus one, so `0` for a read from the
    /// start of an empty stream.
    pub stream_version: u32,
    /// Entries in version order.
    pub entries: Vec<Entry>,
    /// Latest snapshot, when it falls inside the requested range.
    pub snapshot: Option<State>,
}

impl EntityStream {
    pub fn new(
        stream_name: impl Into<String>,
        stream_version: u32,
        entries: Vec<Entry>,
        snapshot: Option<State>,
    ) -> Self {
        Self {
            stream_name: stream_name.into(),
            stream_version,
            entries,
            snapshot,
        }
    }

    /// Stream with no entries and no snapshot.
    pub fn empty(stream_name: impl Into<String>) -> Self {
        Self::new(stream_name, 0, Vec::new(), None)
    }

    /// Returns `true` when a non-empty snapshot is present.
    pub fn has_snapshot(&self) -> bool {
        self.snapshot.as_ref().is_some_and(|s| !s.is_empty())
    }

    /// Number of entries.
    pub fn size(&self) -> usize {
        self.entries.len()
    }
}

impl fmt::Display for EntityStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EntityStream[streamName={} streamVersion={} entries={}",
            self.stream_name,
            self.stream_version,
            self.entries.len()
        )?;
        match &self.snapshot {
            Some(snapshot) => write!(f, " snapshot={snapshot}]"),
            None => write!(f, " snapshot=none]"),
        }
    }
}
