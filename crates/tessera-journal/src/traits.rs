use async_trait::async_trait;

use tessera_types::{EntityStream, Entry};

use crate::error::JournalResult;

/// Id reported by a reader whose cursor is past the last entry.
pub const END_OF_JOURNAL: &str = "-1";

/// First version of every stream.
pub const FIRST_STREAM_VERSION: u32 = 1;

/// Target of [`JournalReader::seek_to`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SeekTo {
    /// Before the first entry.
    Beginning,
    /// Past the last entry.
    End,
    /// Report the current position without moving.
    Query,
    /// At the entry with this id, or past the end if there is none.
    Id(String),
}

impl SeekTo {
    pub const BEGINNING: &'static str = "<<BEGINNING>>";
    pub const END: &'static str = "<<END>>";
    pub const QUERY: &'static str = "<<QUERY>>";
}

impl From<&str> for SeekTo {
    fn from(token: &str) -> Self {
        match token {
            Self::BEGINNING => Self::Beginning,
            Self::END => Self::End,
            Self::QUERY => Self::Query,
            id => Self::Id(id.to_string()),
        }
    }
}

/// Sequential cursor over every entry in the journal, in commit order.
#[async_trait]
pub trait JournalReader: Send + Sync {
    fn name(&self) -> &str;

    /// The entry at the cursor, advancing past it. `None` at the end.
    async fn read_next(&self) -> JournalResult<Option<Entry>>;

    /// Seek to `id`, then read one entry.
    async fn read_next_from(&self, id: &str) -> JournalResult<Option<Entry>>;

    /// Up to `max_entries` entries from the cursor, advancing past them.
    async fn read_next_batch(&self, max_entries: usize) -> JournalResult<Vec<Entry>>;

    /// Seek to `id`, then read a batch.
    async fn read_next_batch_from(&self, id: &str, max_entries: usize)
        -> JournalResult<Vec<Entry>>;

    /// Move the cursor and return the id of the entry now under it, or
    /// [`END_OF_JOURNAL`].
    async fn seek_to(&self, to: SeekTo) -> JournalResult<String>;

    /// Move the cursor back to the beginning.
    fn rewind(&self) -> JournalResult<()>;

    /// Total number of entries visible to this reader.
    async fn size(&self) -> JournalResult<u64>;

    /// Detach this reader from the journal. Later reads see nothing.
    fn close(&self) -> JournalResult<()>;
}

/// Per-stream reconstruction.
#[async_trait]
pub trait StreamReader: Send + Sync {
    fn name(&self) -> &str;

    /// The whole stream, with snapshot cutoff applied.
    async fn stream_for(&self, stream_name: &str) -> JournalResult<EntityStream> {
        self.stream_for_from(stream_name, FIRST_STREAM_VERSION).await
    }

    /// The stream from `from_version` onward.
    async fn stream_for_from(&self, stream_name: &str, from_version: u32)
        -> JournalResult<EntityStream>;

    /// The stream between two versions, both inclusive.
    async fn stream_for_range(
        &self,
        stream_name: &str,
        from_version: u32,
        to_version: u32,
    ) -> JournalResult<EntityStream>;
}
