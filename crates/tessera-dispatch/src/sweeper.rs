use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::coordinator::DispatchCoordinator;
use crate::error::DispatchError;

/// Timing of the redelivery sweep.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SweeperConfig {
    /// How often unconfirmed dispatchables are checked.
    pub check_interval: Duration,
    /// How old an unconfirmed dispatchable must be before it is redelivered.
    pub confirmation_expiration: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_millis(1000),
            confirmation_expiration: Duration::from_millis(1000),
        }
    }
}

/// Background task that redelivers expired unconfirmed dispatchables.
///
/// Stopping is terminal: a stopped sweeper never sweeps again and cannot be
/// restarted. Dropping the sweeper also ends the task.
pub struct ConfirmationSweeper {
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ConfirmationSweeper {
    /// Spawn the sweep loop on the current tokio runtime.
    pub fn spawn(coordinator: Arc<DispatchCoordinator>, config: SweeperConfig) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(coordinator, config, shutdown_rx));
        Self {
            shutdown,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Stop sweeping. Irreversible.
    pub fn stop(&self) {
        if !self.shutdown.send_replace(true) {
            debug!("confirmation sweeper stop requested");
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stop and wait for the sweep task to finish.
    pub async fn shutdown(&self) {
        self.stop();
        let handle = self.handle.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            if let Err(error) = handle.await {
                warn!(%error, "confirmation sweeper task ended abnormally");
            }
        }
    }
}

impl std::fmt::Debug for ConfirmationSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmationSweeper")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

async fn run(
    coordinator: Arc<DispatchCoordinator>,
    config: SweeperConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(
        interval_ms = config.check_interval.as_millis() as u64,
        expiration_ms = config.confirmation_expiration.as_millis() as u64,
        "confirmation sweeper started"
    );

    let mut interval = tokio::time::interval(config.check_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                if *shutdown_rx.borrow() {
                    break;
                }
                match coordinator.dispatch_unconfirmed(config.confirmation_expiration) {
                    Ok(_) => {}
                    Err(DispatchError::Stopped) => break,
                    Err(error) => warn!(%error, "redelivery sweep failed"),
                }
            }
        }
    }

    info!("confirmation sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegate::InMemoryDispatcherControlDelegate;
    use crate::dispatcher::Dispatcher;
    use crate::testing::RecordingDispatcher;
    use tessera_types::{Entry, Metadata};

    fn fast() -> SweeperConfig {
        SweeperConfig {
            check_interval: Duration::from_millis(10),
            confirmation_expiration: Duration::ZERO,
        }
    }

    fn setup(dispatcher: Arc<RecordingDispatcher>) -> Arc<DispatchCoordinator> {
        let dispatchers: Vec<Arc<dyn Dispatcher>> = vec![dispatcher];
        DispatchCoordinator::new(
            dispatchers,
            Arc::new(InMemoryDispatcherControlDelegate::new()),
        )
    }

    fn entry(id: &str) -> Entry {
        Entry::new("Test", 1, "{}", 1, Metadata::new()).with_id(id)
    }

    #[tokio::test]
    async fn redelivers_until_confirmed() {
        let dispatcher = Arc::new(RecordingDispatcher::recording());
        let coordinator = setup(dispatcher.clone());
        let sweeper = ConfirmationSweeper::spawn(coordinator.clone(), fast());

        coordinator
            .build_and_dispatch("s", 1, vec![entry("1")], None)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(dispatcher.attempts() > 1);
        assert_eq!(dispatcher.dispatched_ids(), vec!["s:1:1".to_string()]);

        dispatcher.set_confirm(true);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(coordinator.unconfirmed().unwrap().is_empty());

        let settled = dispatcher.attempts();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(dispatcher.attempts(), settled);

        sweeper.shutdown().await;
    }

    #[tokio::test]
    async fn stop_is_terminal() {
        let dispatcher = Arc::new(RecordingDispatcher::recording());
        let coordinator = setup(dispatcher.clone());
        let sweeper = ConfirmationSweeper::spawn(coordinator.clone(), fast());

        sweeper.shutdown().await;
        assert!(sweeper.is_stopped());

        coordinator
            .build_and_dispatch("s", 1, vec![entry("1")], None)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(dispatcher.attempts(), 1);

        sweeper.stop();
        assert!(sweeper.is_stopped());
    }

    #[tokio::test]
    async fn respects_expiration_window() {
        let dispatcher = Arc::new(RecordingDispatcher::recording());
        let coordinator = setup(dispatcher.clone());
        let sweeper = ConfirmationSweeper::spawn(
            coordinator.clone(),
            SweeperConfig {
                check_interval: Duration::from_millis(10),
                confirmation_expiration: Duration::from_secs(3600),
            },
        );

        coordinator
            .build_and_dispatch("s", 1, vec![entry("1")], None)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(dispatcher.attempts(), 1);

        sweeper.shutdown().await;
    }
}
