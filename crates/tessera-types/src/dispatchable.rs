use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entry::Entry;
use crate::state::State;

/// A batch of freshly appended entries, plus the snapshot written with them,
/// handed to every registered dispatcher.
///
/// The `id` is derived from the stream name, the first version of the batch,
/// and the ordered entry ids. Redelivering the same batch therefore always
/// carries the same id, which is what dispatchers de-duplicate on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispatchable {
    pub id: String,
    pub created_on: DateTime<Utc>,
    pub state: Option<State>,
    pub entries: Vec<Entry>,
}

impl Dispatchable {
    /// Build a dispatchable stamped with the current time.
    pub fn new(
        stream_name: &str,
        from_version: u32,
        entries: Vec<Entry>,
        state: Option<State>,
    ) -> Self {
        Self {
            id: Self::id_for(stream_name, from_version, &entries),
            created_on: Utc::now(),
            state,
            entries,
        }
    }

    /// Deterministic dispatch id: `stream:fromVersion:id1:id2:...`.
    pub fn id_for(stream_name: &str, from_version: u32, entries: &[Entry]) -> String {
        let mut id = format!("{stream_name}:{from_version}");
        for entry in entries {
            id.push(':');
            id.push_str(&entry.id);
        }
        id
    }

    pub fn has_state(&self) -> bool {
        self.state.is_some()
    }

    pub fn has_entries(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Returns `true` if this dispatchable was created at or before `cutoff`.
    pub fn created_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.created_on <= cutoff
    }
}
