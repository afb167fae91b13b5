use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entry::Payload;
use crate::metadata::Metadata;

/// Serialized snapshot of an aggregate.
///
/// `data_version` is the stream version the snapshot was captured at; the
/// snapshot reflects every entry up to and including that version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Identity of the snapshotted aggregate (its stream name).
    pub id: String,
    /// Logical type tag of the snapshotted state.
    pub state_type: String,
    /// Schema version of the serialized data.
    pub type_version: u32,
    /// Serialized state.
    pub data: Payload,
    /// Stream version at capture time.
    pub data_version: u32,
    pub metadata: Metadata,
}

impl State {
    pub fn new(
        id: impl Into<String>,
        state_type: impl Into<String>,
        type_version: u32,
        data: impl Into<Payload>,
        data_version: u32,
        metadata: Metadata,
    ) -> Self {
        Self {
            id: id.into(),
            state_type: state_type.into(),
            type_version,
            data: data.into(),
            data_version,
            metadata,
        }
    }

    /// Returns `true` when the state carries no data.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "State[id={} type={} dataVersion={}]",
            self.id, self.state_type, self.data_version
        )
    }
}
