//! Dispatch coordination for the Tessera journal.
//!
//! Every successful append produces exactly one [`Dispatchable`] which is
//! handed to each registered [`Dispatcher`]. Delivery is at-least-once:
//!
//! - [`DispatchCoordinator`] builds the dispatchable, records it as
//!   unconfirmed, and fans it out in registration order
//! - dispatchers confirm through the [`DispatcherControl`] handle they are
//!   given at registration
//! - [`ConfirmationSweeper`] periodically redelivers whatever is still
//!   unconfirmed after the expiration window
//!
//! Dispatchers must treat delivery as idempotent by [`Dispatchable::id`].
//!
//! [`Dispatchable`]: tessera_types::Dispatchable
//! [`Dispatchable::id`]: tessera_types::Dispatchable

pub mod coordinator;
pub mod delegate;
pub mod dispatcher;
pub mod error;
pub mod sweeper;

pub use coordinator::DispatchCoordinator;
pub use delegate::{DispatcherControlDelegate, InMemoryDispatcherControlDelegate};
pub use dispatcher::{Dispatcher, DispatcherControl};
pub use error::{DispatchError, DispatchResult};
pub use sweeper::{ConfirmationSweeper, SweeperConfig};

#[cfg(any(test, feature = "test-util"))]
pub mod testing;
