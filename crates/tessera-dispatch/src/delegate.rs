use std::sync::RwLock;

use tessera_types::Dispatchable;

use crate::error::{DispatchError, DispatchResult};

/// Storage for unconfirmed dispatchables.
///
/// Durable backends persist this set so redelivery survives restarts; the
/// in-memory delegate is the reference implementation.
pub trait DispatcherControlDelegate: Send + Sync {
    /// Record a dispatchable as unconfirmed.
    fn add(&self, dispatchable: Dispatchable) -> DispatchResult<()>;

    /// All unconfirmed dispatchables, oldest first.
    fn all_unconfirmed(&self) -> DispatchResult<Vec<Dispatchable>>;

    /// Remove a dispatchable. Returns `true` if it was present.
    fn confirm_dispatched(&self, dispatch_id: &str) -> DispatchResult<bool>;

    /// Release any resources held by the delegate.
    fn stop(&self);
}

/// Vec-backed delegate, kept in insertion order.
#[derive(Default)]
pub struct InMemoryDispatcherControlDelegate {
    dispatchables: RwLock<Vec<Dispatchable>>,
}

impl InMemoryDispatcherControlDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unconfirmed dispatchables.
    pub fn len(&self) -> usize {
        self.dispatchables.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DispatcherControlDelegate for InMemoryDispatcherControlDelegate {
    fn add(&self, dispatchable: Dispatchable) -> DispatchResult<()> {
        let mut dispatchables = self
            .dispatchables
            .write()
            .map_err(|_| DispatchError::LockPoisoned("delegate"))?;
        if !dispatchables.iter().any(|d| d.id == dispatchable.id) {
            dispatchables.push(dispatchable);
        }
        Ok(())
    }

    fn all_unconfirmed(&self) -> DispatchResult<Vec<Dispatchable>> {
        let dispatchables = self
            .dispatchables
            .read()
            .map_err(|_| DispatchError::LockPoisoned("delegate"))?;
        Ok(dispatchables.clone())
    }

    fn confirm_dispatched(&self, dispatch_id: &str) -> DispatchResult<bool> {
        let mut dispatchables = self
            .dispatchables
            .write()
            .map_err(|_| DispatchError::LockPoisoned("delegate"))?;
        let before = dispatchables.len();
        dispatchables.retain(|d| d.id != dispatch_id);
        Ok(dispatchables.len() != before)
    }

    fn stop(&self) {}
}

impl std::fmt::Debug for InMemoryDispatcherControlDelegate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryDispatcherControlDelegate")
            .field("unconfirmed", &self.len())
            .finish()
    }
}
