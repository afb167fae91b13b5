use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use tessera_types::{Entry, Metadata, State};

/// Errors produced while converting between domain values and raw entries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    #[error("no adapter registered for {0}")]
    NotRegistered(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
}

/// Converts a source (domain event) to and from a raw [`Entry`].
///
/// Implementations must be pure: the same input always yields the same output.
pub trait EntryAdapter<S>: Send + Sync {
    fn to_entry(&self, source: &S, version: u32, metadata: &Metadata)
        -> Result<Entry, AdapterError>;

    fn from_entry(&self, entry: &Entry) -> Result<S, AdapterError>;
}

/// Converts a snapshot state to and from a raw [`State`].
pub trait StateAdapter<ST>: Send + Sync {
    fn to_raw_state(
        &self,
        id: &str,
        state: &ST,
        version: u32,
        metadata: &Metadata,
    ) -> Result<State, AdapterError>;

    fn from_raw_state(&self, raw: &State) -> Result<ST, AdapterError>;
}

/// Entry and state adapters for one journal, resolved by the Rust type of the
/// source or state.
#[derive(Default)]
pub struct AdapterRegistry {
    entry_adapters: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    state_adapters: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the entry adapter for `S`.
    pub fn register_entry_adapter<S, A>(&mut self, adapter: A) -> &mut Self
    where
        S: 'static,
        A: EntryAdapter<S> + 'static,
    {
        let adapter: Arc<dyn EntryAdapter<S>> = Arc::new(adapter);
        self.entry_adapters
            .insert(TypeId::of::<S>(), Box::new(adapter));
        self
    }

    /// Register (or replace) the state adapter for `ST`.
    pub fn register_state_adapter<ST, A>(&mut self, adapter: A) -> &mut Self
    where
        ST: 'static,
        A: StateAdapter<ST> + 'static,
    {
        let adapter: Arc<dyn StateAdapter<ST>> = Arc::new(adapter);
        self.state_adapters
            .insert(TypeId::of::<ST>(), Box::new(adapter));
        self
    }

    /// Builder form of [`Self::register_entry_adapter`].
    pub fn with_entry_adapter<S, A>(mut self, adapter: A) -> Self
    where
        S: 'static,
        A: EntryAdapter<S> + 'static,
    {
        self.register_entry_adapter::<S, A>(adapter);
        self
    }

    /// Builder form of [`Self::register_state_adapter`].
    pub fn with_state_adapter<ST, A>(mut self, adapter: A) -> Self
    where
        ST: 'static,
        A: StateAdapter<ST> + 'static,
    {
        self.register_state_adapter::<ST, A>(adapter);
        self
    }

    pub fn entry_adapter<S: 'static>(&self) -> Result<Arc<dyn EntryAdapter<S>>, AdapterError> {
        self.entry_adapters
            .get(&TypeId::of::<S>())
            .and_then(|boxed| boxed.downcast_ref::<Arc<dyn EntryAdapter<S>>>())
            .cloned()
            .ok_or_else(|| AdapterError::NotRegistered(type_name::<S>().to_string()))
    }

    pub fn state_adapter<ST: 'static>(&self) -> Result<Arc<dyn StateAdapter<ST>>, AdapterError> {
        self.state_adapters
            .get(&TypeId::of::<ST>())
            .and_then(|boxed| boxed.downcast_ref::<Arc<dyn StateAdapter<ST>>>())
            .cloned()
            .ok_or_else(|| AdapterError::NotRegistered(type_name::<ST>().to_string()))
    }

    pub fn has_entry_adapter<S: 'static>(&self) -> bool {
        self.entry_adapters.contains_key(&TypeId::of::<S>())
    }

    pub fn has_state_adapter<ST: 'static>(&self) -> bool {
        self.state_adapters.contains_key(&TypeId::of::<ST>())
    }

    pub fn to_entry<S: 'static>(
        &self,
        source: &S,
        version: u32,
        metadata: &Metadata,
    ) -> Result<Entry, AdapterError> {
        self.entry_adapter::<S>()?.to_entry(source, version, metadata)
    }

    /// Convert a batch, assigning versions `from_version, from_version + 1, ...`.
    pub fn to_entries<S: 'static>(
        &self,
        sources: &[S],
        from_version: u32,
        metadata: &Metadata,
    ) -> Result<Vec<Entry>, AdapterError> {
        let adapter = self.entry_adapter::<S>()?;
        sources
            .iter()
            .zip(from_version..)
            .map(|(source, version)| adapter.to_entry(source, version, metadata))
            .collect()
    }

    pub fn from_entry<S: 'static>(&self, entry: &Entry) -> Result<S, AdapterError> {
        self.entry_adapter::<S>()?.from_entry(entry)
    }

    pub fn to_raw_state<ST: 'static>(
        &self,
        id: &str,
        state: &ST,
        version: u32,
        metadata: &Metadata,
    ) -> Result<State, AdapterError> {
        self.state_adapter::<ST>()?
            .to_raw_state(id, state, version, metadata)
    }

    pub fn from_raw_state<ST: 'static>(&self, raw: &State) -> Result<ST, AdapterError> {
        self.state_adapter::<ST>()?.from_raw_state(raw)
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("entry_adapters", &self.entry_adapters.len())
            .field("state_adapters", &self.state_adapters.len())
            .finish()
    }
}

/// JSON adapter for any serde type, usable as both entry and state adapter.
pub struct JsonAdapter<T> {
    type_name: String,
    type_version: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonAdapter<T> {
    pub fn new(type_name: impl Into<String>, type_version: u32) -> Self {
        Self {
            type_name: type_name.into(),
            type_version,
            _marker: PhantomData,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    fn check_type(&self, found: &str) -> Result<(), AdapterError> {
        if found == self.type_name {
            Ok(())
        } else {
            Err(AdapterError::TypeMismatch {
                expected: self.type_name.clone(),
                found: found.to_string(),
            })
        }
    }
}

impl<T> Default for JsonAdapter<T> {
    /// Tagged with the unqualified Rust type name, type version 1.
    fn default() -> Self {
        let full = type_name::<T>();
        let short = full.rsplit("::").next().unwrap_or(full);
        Self::new(short, 1)
    }
}

impl<T> EntryAdapter<T> for JsonAdapter<T>
where
    T: Serialize + DeserializeOwned,
{
    fn to_entry(
        &self,
        source: &T,
        version: u32,
        metadata: &Metadata,
    ) -> Result<Entry, AdapterError> {
        let payload =
            serde_json::to_string(source).map_err(|e| AdapterError::Serialization(e.to_string()))?;
        Ok(Entry::new(
            self.type_name.clone(),
            self.type_version,
            payload,
            version,
            metadata.clone(),
        ))
    }

    fn from_entry(&self, entry: &Entry) -> Result<T, AdapterError> {
        self.check_type(&entry.entry_type)?;
        let text = entry
            .payload
            .as_text()
            .map_err(|e| AdapterError::Serialization(e.to_string()))?;
        serde_json::from_str(text).map_err(|e| AdapterError::Serialization(e.to_string()))
    }
}

impl<T> StateAdapter<T> for JsonAdapter<T>
where
    T: Serialize + DeserializeOwned,
{
    fn to_raw_state(
        &self,
        id: &str,
        state: &T,
        version: u32,
        metadata: &Metadata,
    ) -> Result<State, AdapterError> {
        let data =
            serde_json::to_string(state).map_err(|e| AdapterError::Serialization(e.to_string()))?;
        Ok(State::new(
            id,
            self.type_name.clone(),
            self.type_version,
            data,
            version,
            metadata.clone(),
        ))
    }

    fn from_raw_state(&self, raw: &State) -> Result<T, AdapterError> {
        self.check_type(&raw.state_type)?;
        let text = raw
            .data
            .as_text()
            .map_err(|e| AdapterError::Serialization(e.to_string()))?;
        serde_json::from_str(text).map_err(|e| AdapterError::Serialization(e.to_string()))
    }
}
