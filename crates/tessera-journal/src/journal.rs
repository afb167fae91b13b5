use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use tessera_dispatch::{
    ConfirmationSweeper, DispatchCoordinator, Dispatcher, DispatcherControl,
    DispatcherControlDelegate, InMemoryDispatcherControlDelegate,
};
use tessera_types::{Entry, Metadata, State};

use crate::adapter::AdapterRegistry;
use crate::config::JournalConfig;
use crate::error::{JournalError, JournalResult};
use crate::reader::InMemoryJournalReader;
use crate::state::{read_state, write_state, JournalState, SharedState};
use crate::stream_reader::InMemoryStreamReader;
use crate::streaming::EntryReaderStream;

/// A batch of sources to append to one stream, with an optional snapshot.
#[derive(Debug, Clone)]
pub struct AppendRequest<S, ST = ()> {
    pub stream_name: String,
    /// Version of the first source. Following sources take the next versions.
    pub from_version: u32,
    pub sources: Vec<S>,
    pub snapshot: Option<ST>,
    pub metadata: Metadata,
    /// Opaque value handed back in the outcome.
    pub correlation: Option<String>,
}

impl<S> AppendRequest<S> {
    pub fn new(stream_name: impl Into<String>, from_version: u32, sources: Vec<S>) -> Self {
        Self {
            stream_name: stream_name.into(),
            from_version,
            sources,
            snapshot: None,
            metadata: Metadata::new(),
            correlation: None,
        }
    }
}

impl<S, ST> AppendRequest<S, ST> {
    pub fn with_snapshot<T>(self, snapshot: T) -> AppendRequest<S, T> {
        AppendRequest {
            stream_name: self.stream_name,
            from_version: self.from_version,
            sources: self.sources,
            snapshot: Some(snapshot),
            metadata: self.metadata,
            correlation: self.correlation,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn correlated(mut self, correlation: impl Into<String>) -> Self {
        self.correlation = Some(correlation.into());
        self
    }

    /// Version the last source will be stored at.
    fn last_version(&self) -> JournalResult<u32> {
        let extra = u32::try_from(self.sources.len().saturating_sub(1))
            .map_err(|_| JournalError::Storage("batch too large".into()))?;
        self.from_version
            .checked_add(extra)
            .ok_or_else(|| JournalError::IntegrityViolation {
                stream_name: self.stream_name.clone(),
                version: self.from_version,
                reason: "stream version overflow".into(),
            })
    }
}

/// Result of an append, echoing back what was submitted.
#[derive(Debug)]
pub struct AppendOutcome<S, ST = ()> {
    /// Stored entries with their journal ids, or why nothing was stored.
    pub result: JournalResult<Vec<Entry>>,
    pub stream_name: String,
    pub stream_version: u32,
    pub sources: Vec<S>,
    pub snapshot: Option<ST>,
    pub correlation: Option<String>,
}

impl<S, ST> AppendOutcome<S, ST> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn entries(&self) -> &[Entry] {
        match &self.result {
            Ok(entries) => entries,
            Err(_) => &[],
        }
    }

    pub fn error(&self) -> Option<&JournalError> {
        self.result.as_ref().err()
    }
}

/// Receives append outcomes passed to [`Journal::submit`].
pub trait AppendResultInterest<S, ST = ()>: Send + Sync {
    fn append_resulted_in(&self, outcome: &AppendOutcome<S, ST>);
}

struct WriteCommand {
    stream_name: String,
    from_version: u32,
    entries: Vec<Entry>,
    snapshot: Option<State>,
    reply: oneshot::Sender<JournalResult<Vec<Entry>>>,
}

/// In-memory event journal.
///
/// Appends are converted to entries on the caller's task, then applied one at
/// a time by a dedicated writer task. The writer stores the batch and its
/// snapshot, then dispatches it before replying. A confirmation sweeper
/// redelivers batches no dispatcher has confirmed.
///
/// Must be created inside a tokio runtime. Dropping the journal ends both
/// background tasks.
pub struct Journal {
    state: SharedState,
    commands: mpsc::Sender<WriteCommand>,
    adapters: Arc<AdapterRegistry>,
    coordinator: Arc<DispatchCoordinator>,
    sweeper: ConfirmationSweeper,
    journal_readers: Mutex<HashMap<String, Arc<InMemoryJournalReader>>>,
    stream_readers: Mutex<HashMap<String, Arc<InMemoryStreamReader>>>,
    config: JournalConfig,
}

impl Journal {
    /// Journal tracking unconfirmed dispatches in memory.
    pub fn new(
        dispatchers: Vec<Arc<dyn Dispatcher>>,
        adapters: AdapterRegistry,
        config: JournalConfig,
    ) -> JournalResult<Self> {
        Self::with_delegate(
            dispatchers,
            Arc::new(InMemoryDispatcherControlDelegate::new()),
            adapters,
            config,
        )
    }

    pub fn with_delegate(
        dispatchers: Vec<Arc<dyn Dispatcher>>,
        delegate: Arc<dyn DispatcherControlDelegate>,
        adapters: AdapterRegistry,
        config: JournalConfig,
    ) -> JournalResult<Self> {
        config.validate()?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(JournalError::Config(
                "journal must be created inside a tokio runtime".into(),
            ));
        }

        let state = JournalState::shared();
        let coordinator = DispatchCoordinator::new(dispatchers, delegate);
        let sweeper = ConfirmationSweeper::spawn(coordinator.clone(), config.sweeper());

        let (commands, receiver) = mpsc::channel(config.writer_channel_capacity);
        tokio::spawn(run_writer(state.clone(), coordinator.clone(), receiver));

        info!(
            dispatchers = coordinator.dispatcher_count(),
            writer_capacity = config.writer_channel_capacity,
            "journal started"
        );

        Ok(Self {
            state,
            commands,
            adapters: Arc::new(adapters),
            coordinator,
            sweeper,
            journal_readers: Mutex::new(HashMap::new()),
            stream_readers: Mutex::new(HashMap::new()),
            config,
        })
    }

    /// Append one source at `stream_version`.
    pub async fn append<S>(
        &self,
        stream_name: &str,
        stream_version: u32,
        source: S,
        metadata: Metadata,
    ) -> AppendOutcome<S>
    where
        S: Send + 'static,
    {
        let request =
            AppendRequest::new(stream_name, stream_version, vec![source]).with_metadata(metadata);
        self.submit(request, None).await
    }

    /// Append one source and replace the stream's snapshot.
    pub async fn append_with<S, ST>(
        &self,
        stream_name: &str,
        stream_version: u32,
        source: S,
        snapshot: Option<ST>,
        metadata: Metadata,
    ) -> AppendOutcome<S, ST>
    where
        S: Send + 'static,
        ST: Send + 'static,
    {
        self.append_all_with(stream_name, stream_version, vec![source], snapshot, metadata)
            .await
    }

    /// Append a batch at consecutive versions starting at `from_version`.
    pub async fn append_all<S>(
        &self,
        stream_name: &str,
        from_version: u32,
        sources: Vec<S>,
        metadata: Metadata,
    ) -> AppendOutcome<S>
    where
        S: Send + 'static,
    {
        let request =
            AppendRequest::new(stream_name, from_version, sources).with_metadata(metadata);
        self.submit(request, None).await
    }

    /// Append a batch; the snapshot is stored at `from_version`, the version
    /// of the first source.
    pub async fn append_all_with<S, ST>(
        &self,
        stream_name: &str,
        from_version: u32,
        sources: Vec<S>,
        snapshot: Option<ST>,
        metadata: Metadata,
    ) -> AppendOutcome<S, ST>
    where
        S: Send + 'static,
        ST: Send + 'static,
    {
        let request = AppendRequest {
            stream_name: stream_name.to_string(),
            from_version,
            sources,
            snapshot,
            metadata,
            correlation: None,
        };
        self.submit(request, None).await
    }

    /// Append a request and report the outcome to `interest`, if any, before
    /// returning it.
    pub async fn submit<S, ST>(
        &self,
        request: AppendRequest<S, ST>,
        interest: Option<&dyn AppendResultInterest<S, ST>>,
    ) -> AppendOutcome<S, ST>
    where
        S: Send + 'static,
        ST: Send + 'static,
    {
        let result = match self.prepare(&request) {
            Ok(command) => self.write(command).await,
            Err(error) => Err(error),
        };
        if let Err(error) = &result {
            debug!(stream = %request.stream_name, %error, "append failed");
        }

        let outcome = AppendOutcome {
            stream_version: request.last_version().unwrap_or(request.from_version),
            result,
            stream_name: request.stream_name,
            sources: request.sources,
            snapshot: request.snapshot,
            correlation: request.correlation,
        };
        if let Some(interest) = interest {
            interest.append_resulted_in(&outcome);
        }
        outcome
    }

    /// Convert sources and snapshot to raw form on the caller's task.
    fn prepare<S, ST>(
        &self,
        request: &AppendRequest<S, ST>,
    ) -> JournalResult<(WriteCommand, oneshot::Receiver<JournalResult<Vec<Entry>>>)>
    where
        S: 'static,
        ST: 'static,
    {
        if request.sources.is_empty() {
            return Err(JournalError::EmptyBatch(request.stream_name.clone()));
        }
        request.last_version()?;
        let entries =
            self.adapters
                .to_entries(&request.sources, request.from_version, &request.metadata)?;
        let snapshot = match &request.snapshot {
            Some(snapshot) => Some(self.adapters.to_raw_state(
                &request.stream_name,
                snapshot,
                request.from_version,
                &request.metadata,
            )?),
            None => None,
        };

        let (reply, response) = oneshot::channel();
        let command = WriteCommand {
            stream_name: request.stream_name.clone(),
            from_version: request.from_version,
            entries,
            snapshot,
            reply,
        };
        Ok((command, response))
    }

    async fn write(
        &self,
        (command, response): (WriteCommand, oneshot::Receiver<JournalResult<Vec<Entry>>>),
    ) -> JournalResult<Vec<Entry>> {
        self.commands
            .send(command)
            .await
            .map_err(|_| JournalError::Closed)?;
        response.await.map_err(|_| JournalError::Closed)?
    }

    /// The reader registered under `name`, created on first use.
    pub fn journal_reader(&self, name: &str) -> JournalResult<Arc<InMemoryJournalReader>> {
        let mut readers = self
            .journal_readers
            .lock()
            .map_err(|_| JournalError::Storage("journal reader registry poisoned".into()))?;
        let reader = readers.entry(name.to_string()).or_insert_with(|| {
            debug!(reader = name, "journal reader created");
            Arc::new(InMemoryJournalReader::new(name, self.state.clone()))
        });
        Ok(reader.clone())
    }

    /// The stream reader registered under `name`, created on first use.
    pub fn stream_reader(&self, name: &str) -> JournalResult<Arc<InMemoryStreamReader>> {
        let mut readers = self
            .stream_readers
            .lock()
            .map_err(|_| JournalError::Storage("stream reader registry poisoned".into()))?;
        let reader = readers.entry(name.to_string()).or_insert_with(|| {
            debug!(reader = name, "stream reader created");
            Arc::new(InMemoryStreamReader::new(name, self.state.clone()))
        });
        Ok(reader.clone())
    }

    /// Push every entry, from the named reader's cursor onward, into a bounded
    /// stream configured by `config.stream`.
    pub fn stream_all(&self, reader_name: &str) -> JournalResult<EntryReaderStream> {
        let reader = self.journal_reader(reader_name)?;
        Ok(EntryReaderStream::new(
            reader,
            self.adapters.clone(),
            self.config.stream.clone(),
        ))
    }

    /// Control handle for confirming or redelivering dispatches by hand.
    pub fn dispatcher_control(&self) -> Arc<dyn DispatcherControl> {
        self.coordinator.control()
    }

    pub fn adapters(&self) -> &Arc<AdapterRegistry> {
        &self.adapters
    }

    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    /// Number of unconfirmed dispatchables.
    pub fn unconfirmed_count(&self) -> JournalResult<usize> {
        self.coordinator
            .unconfirmed()
            .map(|d| d.len())
            .map_err(|e| JournalError::Storage(e.to_string()))
    }

    /// Total entries in the journal.
    pub fn size(&self) -> JournalResult<usize> {
        Ok(read_state(&self.state)?.len())
    }

    /// Highest version stored for the stream, `0` if it has none.
    pub fn stream_version(&self, stream_name: &str) -> JournalResult<u32> {
        Ok(read_state(&self.state)?.stream_version(stream_name))
    }

    pub fn stream_names(&self) -> JournalResult<Vec<String>> {
        Ok(read_state(&self.state)?.stream_names())
    }

    /// Check a stream's versions and snapshot against the log.
    pub fn validate_stream(&self, stream_name: &str) -> JournalResult<()> {
        read_state(&self.state)?.validate_stream(stream_name)
    }

    /// Stop redelivery. Appends, reads, and initial dispatch keep working.
    pub fn stop(&self) {
        self.sweeper.stop();
        self.coordinator.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.coordinator.is_stopped()
    }

    /// Stop and wait for the sweeper to finish.
    pub async fn shutdown(&self) {
        self.stop();
        self.sweeper.shutdown().await;
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("adapters", &self.adapters)
            .field("coordinator", &self.coordinator)
            .field("config", &self.config)
            .finish()
    }
}

async fn run_writer(
    state: SharedState,
    coordinator: Arc<DispatchCoordinator>,
    mut commands: mpsc::Receiver<WriteCommand>,
) {
    while let Some(command) = commands.recv().await {
        let WriteCommand {
            stream_name,
            from_version,
            entries,
            snapshot,
            reply,
        } = command;
        let result = apply(&state, &coordinator, &stream_name, from_version, entries, snapshot);
        if reply.send(result).is_err() {
            debug!(stream = %stream_name, "append caller went away before the reply");
        }
    }
    debug!("journal writer stopped");
}

fn apply(
    state: &SharedState,
    coordinator: &DispatchCoordinator,
    stream_name: &str,
    from_version: u32,
    entries: Vec<Entry>,
    snapshot: Option<State>,
) -> JournalResult<Vec<Entry>> {
    let stored = {
        let mut guard = write_state(state)?;
        let stored = guard.insert_all(stream_name, entries)?;
        if let Some(snapshot) = &snapshot {
            guard.put_snapshot(stream_name, snapshot.clone());
        }
        stored
    };

    debug!(
        stream = stream_name,
        from_version,
        count = stored.len(),
        snapshot = snapshot.is_some(),
        "appended"
    );

    if let Err(error) =
        coordinator.build_and_dispatch(stream_name, from_version, stored.clone(), snapshot)
    {
        warn!(stream = stream_name, from_version, %error, "appended batch was not dispatched");
    }
    Ok(stored)
}
