use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use tessera_types::Entry;

use crate::error::{JournalError, JournalResult};
use crate::state::{read_state, SharedState};
use crate::traits::{JournalReader, SeekTo, END_OF_JOURNAL};

/// Named cursor over the in-memory journal.
///
/// Entries appended after the reader was created are visible to it. The
/// cursor is private to the reader; two readers never affect each other.
pub struct InMemoryJournalReader {
    name: String,
    cursor: Mutex<Cursor>,
}

struct Cursor {
    view: Option<SharedState>,
    position: usize,
}

impl InMemoryJournalReader {
    pub fn new(name: impl Into<String>, state: SharedState) -> Self {
        Self {
            name: name.into(),
            cursor: Mutex::new(Cursor {
                view: Some(state),
                position: 0,
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cursor().map(|c| c.view.is_none()).unwrap_or(true)
    }

    fn cursor(&self) -> JournalResult<MutexGuard<'_, Cursor>> {
        self.cursor
            .lock()
            .map_err(|_| JournalError::Storage(format!("reader {} cursor poisoned", self.name)))
    }

    fn read_batch(cursor: &mut Cursor, max_entries: usize) -> JournalResult<Vec<Entry>> {
        let Some(view) = &cursor.view else {
            return Ok(Vec::new());
        };
        let batch = read_state(view)?
            .entries_from(cursor.position, max_entries)
            .to_vec();
        cursor.position += batch.len();
        Ok(batch)
    }

    fn seek(cursor: &mut Cursor, to: &SeekTo) -> JournalResult<String> {
        let Some(view) = &cursor.view else {
            return Ok(END_OF_JOURNAL.to_string());
        };
        let state = read_state(view)?;
        match to {
            SeekTo::Beginning => cursor.position = 0,
            SeekTo::End => cursor.position = state.len(),
            SeekTo::Query => {}
            SeekTo::Id(id) => cursor.position = state.position_of(id).unwrap_or(state.len()),
        }
        Ok(state
            .entry_at(cursor.position)
            .map(|entry| entry.id.clone())
            .unwrap_or_else(|| END_OF_JOURNAL.to_string()))
    }
}

#[async_trait]
impl JournalReader for InMemoryJournalReader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read_next(&self) -> JournalResult<Option<Entry>> {
        let mut cursor = self.cursor()?;
        Ok(Self::read_batch(&mut cursor, 1)?.pop())
    }

    async fn read_next_from(&self, id: &str) -> JournalResult<Option<Entry>> {
        let mut cursor = self.cursor()?;
        Self::seek(&mut cursor, &SeekTo::from(id))?;
        Ok(Self::read_batch(&mut cursor, 1)?.pop())
    }

    async fn read_next_batch(&self, max_entries: usize) -> JournalResult<Vec<Entry>> {
        let mut cursor = self.cursor()?;
        Self::read_batch(&mut cursor, max_entries)
    }

    async fn read_next_batch_from(
        &self,
        id: &str,
        max_entries: usize,
    ) -> JournalResult<Vec<Entry>> {
        let mut cursor = self.cursor()?;
        Self::seek(&mut cursor, &SeekTo::from(id))?;
        Self::read_batch(&mut cursor, max_entries)
    }

    async fn seek_to(&self, to: SeekTo) -> JournalResult<String> {
        let mut cursor = self.cursor()?;
        let id = Self::seek(&mut cursor, &to)?;
        debug!(reader = %self.name, ?to, at = %id, "journal reader seek");
        Ok(id)
    }

    fn rewind(&self) -> JournalResult<()> {
        self.cursor()?.position = 0;
        Ok(())
    }

    async fn size(&self) -> JournalResult<u64> {
        let cursor = self.cursor()?;
        match &cursor.view {
            Some(view) => Ok(read_state(view)?.len() as u64),
            None => Ok(0),
        }
    }

    fn close(&self) -> JournalResult<()> {
        let mut cursor = self.cursor()?;
        if cursor.view.take().is_some() {
            debug!(reader = %self.name, "journal reader closed");
        }
        cursor.position = 0;
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryJournalReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryJournalReader")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}
