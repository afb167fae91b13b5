//! Foundation types for the Tessera journal.
//!
//! This crate provides the data model shared by every other Tessera crate.
//! It carries no behavior beyond construction and small accessors.
//!
//! # Key Types
//!
//! - [`Entry`]: Immutable journal record with a store-assigned id
//! - [`Payload`]: Serialized entry or state content (text or binary)
//! - [`Metadata`]: Free-form key/value annotations
//! - [`State`]: Serialized snapshot of an aggregate at a stream version
//! - [`Dispatchable`]: Batch of freshly appended entries handed to dispatchers
//! - [`EntityStream`]: Reconstructed entries (and snapshot) of one stream

pub mod dispatchable;
pub mod entry;
pub mod error;
pub mod metadata;
pub mod state;
pub mod stream;

pub use dispatchable::Dispatchable;
pub use entry::{Entry, Payload};
pub use error::TypeError;
pub use metadata::Metadata;
pub use state::State;
pub use stream::EntityStream;
