//! Push-based bulk streaming of journal entries.
//!
//! An [`EntryReaderStream`] pulls batches from a [`JournalReader`], decodes
//! each entry to its source type, and pushes the pair into a bounded buffer
//! drained by a [`Sink`]. When the buffer is full the newest element is
//! dropped and counted. When the reader has nothing new the producer sleeps
//! for the probe interval and tries again, so entries appended later are
//! delivered too. `stop` cancels both sides; no element is emitted after it.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tessera_types::Entry;

use crate::adapter::AdapterRegistry;
use crate::config::StreamConfig;
use crate::traits::JournalReader;

/// A raw entry together with the source decoded from it.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryBundle<S> {
    pub entry: Entry,
    pub source: S,
}

/// Consumer side of a stream.
pub trait Sink<T>: Send + 'static {
    /// Called once before the first value.
    fn ready(&mut self) {}

    fn when_value(&mut self, value: T);

    /// Called once after the last value.
    fn terminate(&mut self) {}
}

/// Adapts a closure into a [`Sink`].
pub struct ConsumerSink<F> {
    consumer: F,
}

impl<F> ConsumerSink<F> {
    pub fn new(consumer: F) -> Self {
        Self { consumer }
    }
}

impl<T, F> Sink<T> for ConsumerSink<F>
where
    F: FnMut(T) + Send + 'static,
{
    fn when_value(&mut self, value: T) {
        (self.consumer)(value);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    Accepted,
    Dropped,
    Closed,
}

/// Producer end of the buffer. Never waits for space.
pub(crate) struct Publisher<T> {
    sender: mpsc::Sender<T>,
    dropped: Arc<AtomicU64>,
}

impl<T> Publisher<T> {
    pub(crate) fn new(sender: mpsc::Sender<T>, dropped: Arc<AtomicU64>) -> Self {
        Self { sender, dropped }
    }

    pub(crate) fn offer(&self, item: T) -> Offer {
        match self.sender.try_send(item) {
            Ok(()) => Offer::Accepted,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Offer::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Offer::Closed,
        }
    }
}

/// Bounded, cancellable stream over every entry a journal reader yields.
pub struct EntryReaderStream {
    reader: Arc<dyn JournalReader>,
    adapters: Arc<AdapterRegistry>,
    config: StreamConfig,
    flow_rate: Arc<AtomicUsize>,
    dropped: Arc<AtomicU64>,
    cancel: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EntryReaderStream {
    pub fn new(
        reader: Arc<dyn JournalReader>,
        adapters: Arc<AdapterRegistry>,
        config: StreamConfig,
    ) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            reader,
            adapters,
            flow_rate: Arc::new(AtomicUsize::new(config.flow_rate.max(1))),
            config,
            dropped: Arc::new(AtomicU64::new(0)),
            cancel,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start delivering entries decoded as `S` into `sink`.
    ///
    /// Spawns a producer and a consumer on the current tokio runtime. Has no
    /// effect once the stream is stopped.
    pub fn flow_into<S, K>(&self, sink: K)
    where
        S: Send + 'static,
        K: Sink<EntryBundle<S>>,
    {
        if self.is_stopped() {
            debug!(reader = self.reader.name(), "flow requested on a stopped stream");
            return;
        }

        let (sender, receiver) = mpsc::channel(self.config.buffer_size.max(1));
        let publisher = Publisher::new(sender, self.dropped.clone());

        let producer = tokio::spawn(produce::<S>(
            self.reader.clone(),
            self.adapters.clone(),
            self.flow_rate.clone(),
            self.config.probe_interval(),
            publisher,
            self.cancel.subscribe(),
        ));
        let consumer = tokio::spawn(consume(sink, receiver, self.cancel.subscribe()));

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(producer);
            tasks.push(consumer);
        }
        info!(
            reader = self.reader.name(),
            buffer = self.config.buffer_size,
            flow_rate = self.flow_rate(),
            "entry stream started"
        );
    }

    /// Change how many entries are pulled per batch. Zero is treated as one.
    pub fn request(&self, flow_rate: usize) {
        self.flow_rate.store(flow_rate.max(1), Ordering::Relaxed);
    }

    pub fn flow_rate(&self) -> usize {
        self.flow_rate.load(Ordering::Relaxed)
    }

    /// Elements dropped because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Cancel production and consumption. Irreversible.
    pub fn stop(&self) {
        if !self.cancel.send_replace(true) {
            info!(reader = self.reader.name(), dropped = self.dropped(), "entry stream stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Stop and wait for the stream's tasks to finish.
    pub async fn shutdown(&self) {
        self.stop();
        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => Vec::new(),
        };
        for task in tasks {
            if let Err(error) = task.await {
                warn!(%error, "entry stream task ended abnormally");
            }
        }
    }
}

impl Drop for EntryReaderStream {
    fn drop(&mut self) {
        self.cancel.send_replace(true);
    }
}

impl std::fmt::Debug for EntryReaderStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryReaderStream")
            .field("reader", &self.reader.name())
            .field("config", &self.config)
            .field("dropped", &self.dropped())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

async fn produce<S: Send + 'static>(
    reader: Arc<dyn JournalReader>,
    adapters: Arc<AdapterRegistry>,
    flow_rate: Arc<AtomicUsize>,
    probe_interval: Duration,
    publisher: Publisher<EntryBundle<S>>,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        if *cancel.borrow() {
            break;
        }

        let batch = match reader
            .read_next_batch(flow_rate.load(Ordering::Relaxed).max(1))
            .await
        {
            Ok(batch) => batch,
            Err(error) => {
                warn!(reader = reader.name(), %error, "entry stream read failed");
                break;
            }
        };

        if batch.is_empty() {
            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(probe_interval) => {}
            }
            continue;
        }

        for entry in batch {
            if *cancel.borrow() {
                return;
            }
            let source = match adapters.from_entry::<S>(&entry) {
                Ok(source) => source,
                Err(error) => {
                    warn!(id = %entry.id, %error, "skipping entry that does not decode");
                    continue;
                }
            };
            match publisher.offer(EntryBundle { entry, source }) {
                Offer::Accepted => {}
                Offer::Dropped => warn!(reader = reader.name(), "buffer full, dropped newest entry"),
                Offer::Closed => return,
            }
        }
        tokio::task::yield_now().await;
    }
}

async fn consume<T, K>(mut sink: K, mut receiver: mpsc::Receiver<T>, mut cancel: watch::Receiver<bool>)
where
    T: Send + 'static,
    K: Sink<T>,
{
    sink.ready();
    loop {
        tokio::select! {
            biased;
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
            }
            item = receiver.recv() => match item {
                Some(item) => {
                    if *cancel.borrow() {
                        break;
                    }
                    sink.when_value(item);
                }
                None => break,
            }
        }
    }
    sink.terminate();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JournalConfig;
    use crate::journal::Journal;
    use crate::mock::{account_registry, AccountEvent, RecordingDispatcher};
    use tessera_dispatch::Dispatcher;
    use tessera_types::Metadata;

    fn journal(stream: StreamConfig) -> Journal {
        let dispatchers: Vec<Arc<dyn Dispatcher>> = vec![Arc::new(RecordingDispatcher::confirming())];
        let config = JournalConfig {
            stream,
            ..JournalConfig::default()
        };
        Journal::new(dispatchers, account_registry(), config).unwrap()
    }

    async fn wait_for(count: &AtomicUsize, expected: usize) {
        for _ in 0..400 {
            if count.load(Ordering::SeqCst) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[test]
    fn full_buffer_drops_newest() {
        let (sender, mut receiver) = mpsc::channel(2);
        let dropped = Arc::new(AtomicU64::new(0));
        let publisher = Publisher::new(sender, dropped.clone());

        assert_eq!(publisher.offer(1), Offer::Accepted);
        assert_eq!(publisher.offer(2), Offer::Accepted);
        assert_eq!(publisher.offer(3), Offer::Dropped);
        assert_eq!(dropped.load(Ordering::Relaxed), 1);

        assert_eq!(receiver.try_recv().unwrap(), 1);
        assert_eq!(receiver.try_recv().unwrap(), 2);
        assert!(receiver.try_recv().is_err());

        drop(receiver);
        assert_eq!(publisher.offer(4), Offer::Closed);
    }

    #[tokio::test]
    async fn streams_every_entry_in_order() {
        let journal = journal(StreamConfig {
            buffer_size: 2048,
            flow_rate: 100,
            probe_interval_ms: 5,
        });
        for i in 0..1000u64 {
            let outcome = journal
                .append(&format!("acct-{i}"), 1, AccountEvent::Deposited { amount: i }, Metadata::new())
                .await;
            assert!(outcome.is_success());
        }

        let stream = journal.stream_all("all").unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let count = Arc::new(AtomicUsize::new(0));
        {
            let received = received.clone();
            let count = count.clone();
            stream.flow_into::<AccountEvent, _>(ConsumerSink::new(move |bundle: EntryBundle<AccountEvent>| {
                received.lock().unwrap().push(bundle.entry.id.clone());
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }

        wait_for(&count, 1000).await;
        stream.shutdown().await;

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1000);
        assert_eq!(received[0], "1");
        assert_eq!(received[999], "1000");
        assert_eq!(stream.dropped(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_sink_drops_newest_entries() {
        struct Gated {
            gate: Option<std::sync::mpsc::Receiver<()>>,
            delivered: Arc<Mutex<Vec<String>>>,
        }
        impl Sink<EntryBundle<AccountEvent>> for Gated {
            fn when_value(&mut self, value: EntryBundle<AccountEvent>) {
                if let Some(gate) = self.gate.take() {
                    let _ = gate.recv_timeout(Duration::from_secs(5));
                }
                self.delivered.lock().unwrap().push(value.entry.id);
            }
        }

        let journal = journal(StreamConfig {
            buffer_size: 1,
            flow_rate: 100,
            probe_interval_ms: 5,
        });
        for i in 0..5u64 {
            let outcome = journal
                .append(&format!("acct-{i}"), 1, AccountEvent::Deposited { amount: i }, Metadata::new())
                .await;
            assert!(outcome.is_success());
        }

        let (release, gate) = std::sync::mpsc::channel();
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let stream = journal.stream_all("overflow").unwrap();
        stream.flow_into(Gated {
            gate: Some(gate),
            delivered: delivered.clone(),
        });

        for _ in 0..400 {
            if stream.dropped() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(stream.dropped() >= 3);
        release.send(()).unwrap();

        for _ in 0..400 {
            if delivered.lock().unwrap().len() as u64 + stream.dropped() == 5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        stream.shutdown().await;

        let delivered = delivered.lock().unwrap().clone();
        assert_eq!(delivered.len() as u64 + stream.dropped(), 5);
        assert_eq!(delivered[0], "1");
        let positions: Vec<u64> = delivered.iter().map(|id| id.parse().unwrap()).collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[tokio::test]
    async fn later_appends_are_picked_up() {
        let journal = journal(StreamConfig::default());
        let stream = journal.stream_all("tail").unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        {
            let count = count.clone();
            stream.flow_into::<AccountEvent, _>(ConsumerSink::new(move |_: EntryBundle<AccountEvent>| {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }

        journal
            .append("s", 1, AccountEvent::Opened { owner: "ana".into() }, Metadata::new())
            .await;
        wait_for(&count, 1).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        stream.shutdown().await;
    }

    #[tokio::test]
    async fn nothing_is_emitted_after_stop() {
        let journal = journal(StreamConfig::default());
        let stream = journal.stream_all("stopped").unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        {
            let count = count.clone();
            stream.flow_into::<AccountEvent, _>(ConsumerSink::new(move |_: EntryBundle<AccountEvent>| {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }

        journal
            .append("s", 1, AccountEvent::Deposited { amount: 1 }, Metadata::new())
            .await;
        wait_for(&count, 1).await;
        stream.shutdown().await;
        assert!(stream.is_stopped());

        journal
            .append("s", 2, AccountEvent::Deposited { amount: 2 }, Metadata::new())
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sink_lifecycle_and_flow_rate() {
        struct Lifecycle {
            events: Arc<Mutex<Vec<String>>>,
        }
        impl Sink<EntryBundle<AccountEvent>> for Lifecycle {
            fn ready(&mut self) {
                self.events.lock().unwrap().push("ready".into());
            }
            fn when_value(&mut self, value: EntryBundle<AccountEvent>) {
                self.events.lock().unwrap().push(value.entry.id);
            }
            fn terminate(&mut self) {
                self.events.lock().unwrap().push("terminate".into());
            }
        }

        let journal = journal(StreamConfig::default());
        journal
            .append_all(
                "s",
                1,
                vec![
                    AccountEvent::Deposited { amount: 1 },
                    AccountEvent::Deposited { amount: 2 },
                ],
                Metadata::new(),
            )
            .await;

        let stream = journal.stream_all("lifecycle").unwrap();
        stream.request(0);
        assert_eq!(stream.flow_rate(), 1);

        let events = Arc::new(Mutex::new(Vec::new()));
        stream.flow_into(Lifecycle {
            events: events.clone(),
        });
        for _ in 0..200 {
            if events.lock().unwrap().len() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        stream.shutdown().await;

        let events = events.lock().unwrap().clone();
        assert_eq!(events, vec!["ready", "1", "2", "terminate"]);
    }
}
