use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Mutex, MutexGuard};

use harvester_core::MessageRecord;

use crate::error::HarvestError;

/// State shared by every worker in one harvest session.
///
/// The mutex guards the dedup set, the output side of the channel, and the
/// drained-queue bookkeeping as a unit. It is only ever held across the
/// per-batch dedup-and-publish step, never across a network call. The
/// shutdown flag is a plain atomic: written once by the monitor, read by
/// all workers between polls.
pub(crate) struct SharedSession {
    inner: Mutex<SessionInner>,
    shutdown: AtomicBool,
    errors: Mutex<Vec<HarvestError>>,
}

impl SharedSession {
    pub fn new(
        output: Sender<Option<MessageRecord>>,
        exclude_ids: HashSet<String>,
        num_workers: usize,
    ) -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                seen_ids: exclude_ids,
                published: 0,
                output,
                empty_observers: HashSet::new(),
                live_workers: num_workers,
            }),
            shutdown: AtomicBool::new(false),
            errors: Mutex::new(Vec::new()),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().expect("session state poisoned")
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn record_error(&self, error: HarvestError) {
        self.errors.lock().expect("error sink poisoned").push(error);
    }

    /// First error any worker recorded, removed from the sink.
    pub fn take_first_error(&self) -> Option<HarvestError> {
        let mut errors = self.errors.lock().expect("error sink poisoned");
        if errors.is_empty() {
            None
        } else {
            Some(errors.remove(0))
        }
    }
}

pub(crate) struct SessionInner {
    /// Ids already delivered downstream (or excluded up front).
    seen_ids: HashSet<String>,
    /// Messages actually published this session; excluded ids do not count.
    published: usize,
    output: Sender<Option<MessageRecord>>,
    /// Workers currently on an empty-poll streak, by worker index.
    empty_observers: HashSet<usize>,
    /// Workers that have not yet exited.
    live_workers: usize,
}

impl SessionInner {
    /// Publish the unseen messages from `batch`, stopping once `limit`
    /// total messages have been published this session. Returns how many
    /// were published from this batch.
    pub fn publish_unique(&mut self, batch: Vec<MessageRecord>, limit: Option<usize>) -> usize {
        let mut from_batch = 0;
        for record in batch {
            if limit.is_some_and(|limit| self.published >= limit) {
                break;
            }
            if self.seen_ids.insert(record.id.clone()) {
                self.published += 1;
                from_batch += 1;
                // The receiver may already be gone if the consumer stopped
                // iterating early; workers wind down via the shutdown flag.
                let _ = self.output.send(Some(record));
            }
        }
        from_batch
    }

    pub fn published(&self) -> usize {
        self.published
    }

    /// Record that `worker` saw an empty batch. Returns true once every
    /// live worker is simultaneously on an empty streak, at which point the
    /// queue is treated as drained.
    pub fn note_empty_poll(&mut self, worker: usize) -> bool {
        self.empty_observers.insert(worker);
        self.empty_observers.len() >= self.live_workers
    }

    /// A non-empty batch disproves the drained hypothesis for everyone.
    pub fn note_delivery(&mut self) {
        self.empty_observers.clear();
    }

    pub fn worker_exited(&mut self, worker: usize) {
        self.empty_observers.remove(&worker);
        self.live_workers -= 1;
    }
}
