use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::metadata::Metadata;

/// Serialized content of an entry or a snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Payload {
    /// Textual serialization (JSON, for example).
    Text(String),
    /// Opaque binary serialization.
    Binary(Bytes),
}

impl Payload {
    /// Size of the serialized content in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    /// Borrow the payload as text. Binary payloads are accepted when they hold
    /// valid UTF-8.
    pub fn as_text(&self) -> Result<&str, TypeError> {
        match self {
            Self::Text(text) => Ok(text),
            Self::Binary(bytes) => {
                std::str::from_utf8(bytes).map_err(|e| TypeError::InvalidUtf8(e.to_string()))
            }
        }
    }

    /// Borrow the raw bytes regardless of representation.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(bytes))
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Self::Binary(bytes)
    }
}

/// An immutable journal record.
///
/// The `id` is empty until the journal inserts the entry; from then on it is
/// the 1-based position of the entry in the journal, formatted as a string,
/// and never changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Store-assigned identity (`""` before insertion).
    pub id: String,
    /// Logical type tag of the source this entry was serialized from.
    pub entry_type: String,
    /// Schema version of the serialized payload.
    pub type_version: u32,
    /// Serialized source.
    pub payload: Payload,
    /// The stream version this entry occupies.
    pub entry_version: u32,
    /// Free-form annotations.
    pub metadata: Metadata,
}

impl Entry {
    /// Create an entry that has not yet been assigned an id.
    pub fn new(
        entry_type: impl Into<String>,
        type_version: u32,
        payload: impl Into<Payload>,
        entry_version: u32,
        metadata: Metadata,
    ) -> Self {
        Self {
            id: String::new(),
            entry_type: entry_type.into(),
            type_version,
            payload: payload.into(),
            entry_version,
            metadata,
        }
    }

    /// Returns `true` once the journal has assigned an id.
    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    /// Copy of this entry carrying the given id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Entry[id={} type={} typeVersion={} version={} payload={}B]",
            self.id,
            self.entry_type,
            self.type_version,
            self.entry_version,
            self.payload.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entry_has_no_id() {
        let entry = Entry::new("AccountOpened", 1, r#"{"id":7}"#, 1, Metadata::new());
        assert!(!entry.has_id());
        let entry = entry.with_id("1");
        assert!(entry.has_id());
        assert_eq!(entry.id, "1");
    }

    #[test]
    fn binary_payload_as_text_requires_utf8() {
        let ok = Payload::from(b"hello".to_vec());
        assert_eq!(ok.as_text().unwrap(), "hello");

        let bad = Payload::from(vec![0xff, 0xfe]);
        assert!(matches!(bad.as_text(), Err(TypeError::InvalidUtf8(_))));
    }

    #[test]
    fn display_includes_identity() {
        let entry = Entry::new("Deposited", 2, "{}", 3, Metadata::new()).with_id("9");
        let shown = entry.to_string();
        assert!(shown.contains("id=9"));
        assert!(shown.contains("version=3"));
    }
}
