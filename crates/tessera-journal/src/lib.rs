//! Event-sourcing journal for Tessera.
//!
//! This crate is the heart of Tessera. It provides:
//! - [`Journal`]: versioned, optimistic-concurrency appends serialized through
//!   a single writer task, with at-least-once dispatch of every appended batch
//! - [`AdapterRegistry`]: per-journal entry and state adapters keyed by type
//! - [`InMemoryJournalReader`]: sequential cursor over the whole journal
//! - [`InMemoryStreamReader`]: per-stream reconstruction with snapshot cutoff
//! - [`EntryReaderStream`]: push-based, bounded, drop-newest bulk streaming
//! - [`JournalConfig`]: TOML-loadable configuration

pub mod adapter;
pub mod config;
pub mod error;
pub mod journal;
pub mod reader;
pub mod state;
pub mod stream_reader;
pub mod streaming;
pub mod traits;

pub use adapter::{AdapterError, AdapterRegistry, EntryAdapter, JsonAdapter, StateAdapter};
pub use config::{JournalConfig, StreamConfig};
pub use error::{JournalError, JournalResult};
pub use journal::{AppendOutcome, AppendRequest, AppendResultInterest, Journal};
pub use reader::InMemoryJournalReader;
pub use state::{JournalState, SharedState};
pub use stream_reader::InMemoryStreamReader;
pub use streaming::{ConsumerSink, EntryBundle, EntryReaderStream, Sink};
pub use traits::{JournalReader, SeekTo, StreamReader, END_OF_JOURNAL, FIRST_STREAM_VERSION};

pub use tessera_dispatch::{Dispatcher, DispatcherControl, DispatchError};
pub use tessera_types::{Dispatchable, EntityStream, Entry, Metadata, Payload, State};

#[cfg(test)]
mod mock;
