use async_trait::async_trait;

use tessera_types::EntityStream;

use crate::error::JournalResult;
use crate::state::{read_state, SharedState};
use crate::traits::StreamReader;

/// Reconstructs streams from the in-memory journal. Stateless apart from its
/// name, so one instance can serve any number of callers.
#[derive(Debug)]
pub struct InMemoryStreamReader {
    name: String,
    state: SharedState,
}

impl InMemoryStreamReader {
    pub fn new(name: impl Into<String>, state: SharedState) -> Self {
        Self {
            name: name.into(),
            state,
        }
    }
}

#[async_trait]
impl StreamReader for InMemoryStreamReader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream_for_from(
        &self,
        stream_name: &str,
        from_version: u32,
    ) -> JournalResult<EntityStream> {
        Ok(read_state(&self.state)?.stream(stream_name, from_version, None))
    }

    async fn stream_for_range(
        &self,
        stream_name: &str,
        from_version: u32,
        to_version: u32,
    ) -> JournalResult<EntityStream> {
        Ok(read_state(&self.state)?.stream(stream_name, from_version, Some(to_version)))
    }
}
