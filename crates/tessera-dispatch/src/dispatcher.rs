use std::sync::Arc;

use tessera_types::Dispatchable;

use crate::error::DispatchResult;

/// Receiver of freshly appended batches.
///
/// `dispatch` runs on the journal's writer path, so implementations should
/// hand slow work off to their own tasks instead of blocking. The same
/// dispatchable may arrive more than once; implementations de-duplicate by
/// its id.
pub trait Dispatcher: Send + Sync {
    /// Called once at registration with the control used to confirm delivery.
    fn control_with(&self, control: Arc<dyn DispatcherControl>);

    /// Deliver a dispatchable.
    fn dispatch(&self, dispatchable: &Dispatchable) -> DispatchResult<()>;
}

/// Handle through which dispatchers acknowledge delivery.
pub trait DispatcherControl: Send + Sync {
    /// Mark the dispatchable as durably delivered. Unknown or already
    /// confirmed ids are ignored.
    fn confirm_dispatched(&self, dispatch_id: &str);

    /// Redeliver every dispatchable that is still unconfirmed.
    fn dispatch_unconfirmed(&self);

    /// Stop redelivery. Irreversible.
    fn stop(&self);
}
