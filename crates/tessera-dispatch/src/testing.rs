//! Dispatcher fixtures for tests in this and dependent crates.
//!
//! Enabled for this crate's own tests and, elsewhere, through the
//! `test-util` feature.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tessera_types::Dispatchable;

use crate::dispatcher::{Dispatcher, DispatcherControl};
use crate::error::{DispatchError, DispatchResult};

/// Keeps every distinct dispatchable it receives and optionally confirms it
/// through the control handed over at registration.
pub struct RecordingDispatcher {
    confirm: AtomicBool,
    attempts: AtomicUsize,
    dispatched: Mutex<Vec<Dispatchable>>,
    control: Mutex<Option<Arc<dyn DispatcherControl>>>,
}

impl RecordingDispatcher {
    /// Confirms every delivery.
    pub fn confirming() -> Self {
        Self::with_confirm(true)
    }

    /// Records without confirming, leaving everything for redelivery.
    pub fn recording() -> Self {
        Self::with_confirm(false)
    }

    fn with_confirm(confirm: bool) -> Self {
        Self {
            confirm: AtomicBool::new(confirm),
            attempts: AtomicUsize::new(0),
            dispatched: Mutex::new(Vec::new()),
            control: Mutex::new(None),
        }
    }

    pub fn set_confirm(&self, confirm: bool) {
        self.confirm.store(confirm, Ordering::SeqCst);
    }

    /// Deliveries seen, redeliveries included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Distinct dispatchables in first-delivery order.
    pub fn dispatched(&self) -> Vec<Dispatchable> {
        lock(&self.dispatched).clone()
    }

    pub fn dispatched_ids(&self) -> Vec<String> {
        lock(&self.dispatched).iter().map(|d| d.id.clone()).collect()
    }
}

impl Dispatcher for RecordingDispatcher {
    fn control_with(&self, control: Arc<dyn DispatcherControl>) {
        *lock(&self.control) = Some(control);
    }

    fn dispatch(&self, dispatchable: &Dispatchable) -> DispatchResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        {
            let mut dispatched = lock(&self.dispatched);
            if !dispatched.iter().any(|d| d.id == dispatchable.id) {
                dispatched.push(dispatchable.clone());
            }
        }
        if self.confirm.load(Ordering::SeqCst) {
            let control = lock(&self.control).clone();
            if let Some(control) = control {
                control.confirm_dispatched(&dispatchable.id);
            }
        }
        Ok(())
    }
}

/// Always reports the downstream as unavailable.
#[derive(Default)]
pub struct FailingDispatcher {
    attempts: AtomicUsize,
}

impl FailingDispatcher {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Dispatcher for FailingDispatcher {
    fn control_with(&self, _control: Arc<dyn DispatcherControl>) {}

    fn dispatch(&self, _dispatchable: &Dispatchable) -> DispatchResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(DispatchError::Unavailable("downstream offline".into()))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
