//! Harvest coordinator: session construction and the lazy message stream.

use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use engine_logging::engine_info;
use harvester_core::{Credentials, MessageRecord, StopConditions};

use crate::error::HarvestError;
use crate::monitor::CompletionMonitor;
use crate::queue::{QueueService, SqsQueueService};
use crate::session::SharedSession;
use crate::worker::Worker;

/// Start-to-finish description of one harvest session. Nothing runs until
/// the stream produced by [`Harvester::into_stream`] is first polled.
pub struct Harvester {
    service: Arc<dyn QueueService>,
    queue_name: String,
    conditions: StopConditions,
    num_workers: usize,
    exclude_ids: HashSet<String>,
}

impl Harvester {
    /// Harvest `queue_name` through a live SQS connection.
    pub fn new(
        queue_name: impl Into<String>,
        credentials: &Credentials,
        conditions: StopConditions,
        num_workers: Option<usize>,
    ) -> Result<Self, HarvestError> {
        let service = Arc::new(SqsQueueService::connect(credentials)?);
        Self::with_service(service, queue_name, conditions, num_workers)
    }

    /// Harvest through an injected queue service (tests, other backends).
    pub fn with_service(
        service: Arc<dyn QueueService>,
        queue_name: impl Into<String>,
        conditions: StopConditions,
        num_workers: Option<usize>,
    ) -> Result<Self, HarvestError> {
        conditions.validate()?;
        let num_workers = match num_workers {
            Some(0) => {
                return Err(HarvestError::Configuration(
                    "num_workers must be greater than 0".into(),
                ))
            }
            Some(n) => n,
            None => default_num_workers(),
        };

        Ok(Self {
            service,
            queue_name: queue_name.into(),
            conditions,
            num_workers,
            exclude_ids: HashSet::new(),
        })
    }

    /// Ids to treat as already harvested, e.g. loaded from the disk cache.
    /// They are never published and do not count toward the count condition.
    pub fn exclude_ids(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.exclude_ids.extend(ids);
        self
    }

    pub fn into_stream(self) -> MessageStream {
        MessageStream::new(self)
    }
}

/// Default worker count: one per available core, falling back to 2 when
/// parallelism cannot be determined.
pub fn default_num_workers() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(2)
}

/// Convenience entry point: build a [`Harvester`] against live SQS and turn
/// it into a stream in one call.
pub fn harvest(
    queue_name: impl Into<String>,
    credentials: &Credentials,
    conditions: StopConditions,
    num_workers: Option<usize>,
) -> Result<MessageStream, HarvestError> {
    Ok(Harvester::new(queue_name, credentials, conditions, num_workers)?.into_stream())
}

/// Lazy, single-pass stream of unique harvested messages.
///
/// Worker and monitor threads spawn on the first `next()` call and issue
/// live network calls for the duration of consumption. The iterator yields
/// until the session's end-of-stream marker arrives; after that,
/// [`MessageStream::take_error`] distinguishes "drained cleanly" from
/// "stopped due to a worker failure". Dropping the stream mid-iteration
/// requests shutdown and joins every thread before returning.
pub struct MessageStream {
    config: Option<Harvester>,
    session: Option<Arc<SharedSession>>,
    receiver: Receiver<Option<MessageRecord>>,
    sender: Option<Sender<Option<MessageRecord>>>,
    monitor: Option<JoinHandle<()>>,
    finished: bool,
}

impl MessageStream {
    fn new(config: Harvester) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            config: Some(config),
            session: None,
            receiver,
            sender: Some(sender),
            monitor: None,
            finished: false,
        }
    }

    fn start(&mut self) {
        let (Some(config), Some(sender)) = (self.config.take(), self.sender.take()) else {
            return;
        };

        engine_info!(
            "Starting harvest of queue {} with {} workers",
            config.queue_name,
            config.num_workers
        );

        let session = Arc::new(SharedSession::new(
            sender.clone(),
            config.exclude_ids,
            config.num_workers,
        ));

        let mut workers = Vec::with_capacity(config.num_workers);
        for index in 0..config.num_workers {
            let worker = Worker {
                index,
                queue_name: config.queue_name.clone(),
                conditions: config.conditions.clone(),
                service: Arc::clone(&config.service),
                session: Arc::clone(&session),
            };
            workers.push(thread::spawn(move || worker.run()));
        }

        let monitor = CompletionMonitor {
            session: Arc::clone(&session),
            workers,
            output: sender,
            timeout: config.conditions.timeout,
        };
        self.monitor = Some(thread::spawn(move || monitor.run()));
        self.session = Some(session);
    }

    /// First error any worker recorded. Meaningful once the stream has
    /// ended; `None` means the session finished cleanly.
    pub fn take_error(&mut self) -> Option<HarvestError> {
        self.session
            .as_ref()
            .and_then(|session| session.take_first_error())
    }
}

impl Iterator for MessageStream {
    type Item = MessageRecord;

    fn next(&mut self) -> Option<MessageRecord> {
        if self.finished {
            return None;
        }
        if self.session.is_none() {
            self.start();
        }

        match self.receiver.recv() {
            Ok(Some(record)) => Some(record),
            Ok(None) | Err(_) => {
                self.finished = true;
                if let Some(monitor) = self.monitor.take() {
                    let _ = monitor.join();
                }
                None
            }
        }
    }
}

impl Drop for MessageStream {
    fn drop(&mut self) {
        // A consumer that stops iterating early must not leak threads: tell
        // the session to wind down and let the monitor join the workers.
        if let Some(session) = &self.session {
            session.request_shutdown();
        }
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.join();
        }
    }
}
