use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use tessera_types::{Dispatchable, Entry, State};

use crate::delegate::DispatcherControlDelegate;
use crate::dispatcher::{Dispatcher, DispatcherControl};
use crate::error::{DispatchError, DispatchResult};

/// Fan-out of dispatchables to registered dispatchers, with confirmation
/// tracking through a [`DispatcherControlDelegate`].
///
/// Dispatchers are invoked synchronously in registration order. A failing
/// dispatcher never prevents delivery to the others and is never retried
/// inline; the [`ConfirmationSweeper`](crate::ConfirmationSweeper) picks it
/// up on its next pass.
pub struct DispatchCoordinator {
    dispatchers: Vec<Arc<dyn Dispatcher>>,
    delegate: Arc<dyn DispatcherControlDelegate>,
    stopped: AtomicBool,
}

impl DispatchCoordinator {
    /// Create the coordinator and hand every dispatcher its control handle.
    pub fn new(
        dispatchers: Vec<Arc<dyn Dispatcher>>,
        delegate: Arc<dyn DispatcherControlDelegate>,
    ) -> Arc<Self> {
        let coordinator = Arc::new(Self {
            dispatchers,
            delegate,
            stopped: AtomicBool::new(false),
        });

        for dispatcher in &coordinator.dispatchers {
            dispatcher.control_with(coordinator.control());
        }

        info!(
            dispatchers = coordinator.dispatchers.len(),
            "dispatch coordinator started"
        );
        coordinator
    }

    /// A control handle that does not keep the coordinator alive.
    pub fn control(self: &Arc<Self>) -> Arc<dyn DispatcherControl> {
        Arc::new(CoordinatorControl {
            coordinator: Arc::downgrade(self),
        })
    }

    /// Build the dispatchable for a freshly appended batch, record it as
    /// unconfirmed, and deliver it to every dispatcher.
    pub fn build_and_dispatch(
        &self,
        stream_name: &str,
        from_version: u32,
        entries: Vec<Entry>,
        state: Option<State>,
    ) -> DispatchResult<Dispatchable> {
        let dispatchable = Dispatchable::new(stream_name, from_version, entries, state);
        self.delegate.add(dispatchable.clone())?;

        let failures = self.fan_out(&dispatchable);
        debug!(
            id = %dispatchable.id,
            entries = dispatchable.entries.len(),
            snapshot = dispatchable.has_state(),
            failures,
            "dispatched"
        );
        Ok(dispatchable)
    }

    /// Remove a dispatchable from the unconfirmed set. Idempotent.
    pub fn confirm_dispatched(&self, dispatch_id: &str) -> DispatchResult<bool> {
        let removed = self.delegate.confirm_dispatched(dispatch_id)?;
        if removed {
            debug!(id = dispatch_id, "dispatch confirmed");
        }
        Ok(removed)
    }

    /// Redeliver every unconfirmed dispatchable created at least `expiration`
    /// ago. Returns how many dispatchables were redelivered.
    pub fn dispatch_unconfirmed(&self, expiration: Duration) -> DispatchResult<usize> {
        if self.is_stopped() {
            return Err(DispatchError::Stopped);
        }

        let Some(cutoff) = cutoff(expiration) else {
            return Ok(0);
        };

        let expired: Vec<Dispatchable> = self
            .delegate
            .all_unconfirmed()?
            .into_iter()
            .filter(|d| d.created_before(cutoff))
            .collect();

        for dispatchable in &expired {
            self.fan_out(dispatchable);
        }

        if !expired.is_empty() {
            debug!(count = expired.len(), "redelivered unconfirmed dispatchables");
        }
        Ok(expired.len())
    }

    /// Snapshot of the unconfirmed set.
    pub fn unconfirmed(&self) -> DispatchResult<Vec<Dispatchable>> {
        self.delegate.all_unconfirmed()
    }

    pub fn dispatcher_count(&self) -> usize {
        self.dispatchers.len()
    }

    /// Stop redelivery and release the delegate. Initial dispatch of new
    /// appends continues.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.delegate.stop();
            info!("dispatch coordinator stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Deliver to every dispatcher; returns the number of failures.
    fn fan_out(&self, dispatchable: &Dispatchable) -> usize {
        let mut failures = 0;
        for (index, dispatcher) in self.dispatchers.iter().enumerate() {
            if let Err(error) = dispatcher.dispatch(dispatchable) {
                failures += 1;
                warn!(
                    id = %dispatchable.id,
                    dispatcher = index,
                    %error,
                    "dispatcher failed; leaving for redelivery"
                );
            }
        }
        failures
    }
}

impl std::fmt::Debug for DispatchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchCoordinator")
            .field("dispatchers", &self.dispatchers.len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

fn cutoff(expiration: Duration) -> Option<DateTime<Utc>> {
    let window = chrono::Duration::from_std(expiration).ok()?;
    Utc::now().checked_sub_signed(window)
}

/// Control handle given to dispatchers.
struct CoordinatorControl {
    coordinator: Weak<DispatchCoordinator>,
}

impl DispatcherControl for CoordinatorControl {
    fn confirm_dispatched(&self, dispatch_id: &str) {
        let Some(coordinator) = self.coordinator.upgrade() else {
            return;
        };
        if let Err(error) = coordinator.confirm_dispatched(dispatch_id) {
            warn!(id = dispatch_id, %error, "confirmation failed");
        }
    }

    fn dispatch_unconfirmed(&self) {
        let Some(coordinator) = self.coordinator.upgrade() else {
            return;
        };
        match coordinator.dispatch_unconfirmed(Duration::ZERO) {
            Ok(_) | Err(DispatchError::Stopped) => {}
            Err(error) => warn!(%error, "redelivery failed"),
        }
    }

    fn stop(&self) {
        if let Some(coordinator) = self.coordinator.upgrade() {
            coordinator.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegate::InMemoryDispatcherControlDelegate;
    use crate::testing::{FailingDispatcher, RecordingDispatcher};
    use tessera_types::Metadata;

    fn entries(ids: &[&str]) -> Vec<Entry> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| Entry::new("Test", 1, "{}", i as u32 + 1, Metadata::new()).with_id(*id))
            .collect()
    }

    fn coordinator(
        dispatchers: Vec<Arc<dyn Dispatcher>>,
    ) -> (Arc<DispatchCoordinator>, Arc<InMemoryDispatcherControlDelegate>) {
        let delegate = Arc::new(InMemoryDispatcherControlDelegate::new());
        let coordinator = DispatchCoordinator::new(dispatchers, delegate.clone());
        (coordinator, delegate)
    }

    #[test]
    fn dispatches_to_every_dispatcher_in_order() {
        let first = Arc::new(RecordingDispatcher::confirming());
        let second = Arc::new(RecordingDispatcher::confirming());
        let (coordinator, delegate) = coordinator(vec![first.clone(), second.clone()]);

        let d = coordinator
            .build_and_dispatch("123", 1, entries(&["1", "2"]), None)
            .unwrap();

        assert_eq!(d.id, "123:1:1:2");
        assert_eq!(first.dispatched_ids(), vec!["123:1:1:2".to_string()]);
        assert_eq!(second.dispatched_ids(), vec!["123:1:1:2".to_string()]);
        assert!(delegate.is_empty());
    }

    #[test]
    fn failing_dispatcher_does_not_block_others() {
        let failing = Arc::new(FailingDispatcher::default());
        let healthy = Arc::new(RecordingDispatcher::recording());
        let (coordinator, delegate) = coordinator(vec![failing.clone(), healthy.clone()]);

        coordinator
            .build_and_dispatch("s", 1, entries(&["1"]), None)
            .unwrap();

        assert_eq!(failing.attempts(), 1);
        assert_eq!(healthy.attempts(), 1);
        assert_eq!(delegate.len(), 1);
    }

    #[test]
    fn confirm_is_idempotent() {
        let dispatcher = Arc::new(RecordingDispatcher::recording());
        let (coordinator, _) = coordinator(vec![dispatcher]);

        let d = coordinator
            .build_and_dispatch("s", 1, entries(&["1"]), None)
            .unwrap();

        assert!(coordinator.confirm_dispatched(&d.id).unwrap());
        assert!(!coordinator.confirm_dispatched(&d.id).unwrap());
        assert!(!coordinator.confirm_dispatched("unknown").unwrap());
        assert!(coordinator.unconfirmed().unwrap().is_empty());
    }

    #[test]
    fn redelivers_only_expired_unconfirmed() {
        let dispatcher = Arc::new(RecordingDispatcher::recording());
        let (coordinator, _) = coordinator(vec![dispatcher.clone()]);

        coordinator
            .build_and_dispatch("s", 1, entries(&["1"]), None)
            .unwrap();

        assert_eq!(
            coordinator
                .dispatch_unconfirmed(Duration::from_secs(3600))
                .unwrap(),
            0
        );
        assert_eq!(coordinator.dispatch_unconfirmed(Duration::ZERO).unwrap(), 1);
        assert_eq!(dispatcher.attempts(), 2);
        assert_eq!(dispatcher.dispatched_ids().len(), 1);
    }

    #[test]
    fn confirmed_dispatchable_is_not_redelivered() {
        let dispatcher = Arc::new(RecordingDispatcher::confirming());
        let (coordinator, _) = coordinator(vec![dispatcher.clone()]);

        coordinator
            .build_and_dispatch("s", 1, entries(&["1"]), None)
            .unwrap();
        assert_eq!(coordinator.dispatch_unconfirmed(Duration::ZERO).unwrap(), 0);
        assert_eq!(dispatcher.attempts(), 1);
    }

    #[test]
    fn control_handle_confirms_and_redelivers() {
        let dispatcher = Arc::new(RecordingDispatcher::recording());
        let (coordinator, delegate) = coordinator(vec![dispatcher.clone()]);

        let d = coordinator
            .build_and_dispatch("s", 1, entries(&["1"]), None)
            .unwrap();

        let control = coordinator.control();
        control.dispatch_unconfirmed();
        assert_eq!(dispatcher.attempts(), 2);

        control.confirm_dispatched(&d.id);
        assert!(delegate.is_empty());
    }

    #[test]
    fn stop_halts_redelivery_but_not_initial_dispatch() {
        let dispatcher = Arc::new(RecordingDispatcher::recording());
        let (coordinator, _) = coordinator(vec![dispatcher.clone()]);

        coordinator.control().stop();
        assert!(coordinator.is_stopped());
        assert_eq!(
            coordinator.dispatch_unconfirmed(Duration::ZERO),
            Err(DispatchError::Stopped)
        );

        coordinator
            .build_and_dispatch("s", 1, entries(&["1"]), None)
            .unwrap();
        assert_eq!(dispatcher.attempts(), 1);
    }

    #[test]
    fn control_outliving_coordinator_is_inert() {
        let dispatcher = Arc::new(RecordingDispatcher::recording());
        let (coordinator, _) = coordinator(vec![dispatcher]);
        let control = coordinator.control();
        drop(coordinator);

        control.confirm_dispatched("s:1:1");
        control.dispatch_unconfirmed();
        control.stop();
    }
}
