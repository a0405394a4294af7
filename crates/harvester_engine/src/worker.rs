use std::sync::Arc;
use std::thread;
use std::time::Duration;

use engine_logging::{engine_debug, engine_trace, engine_warn};
use harvester_core::StopConditions;

use crate::queue::{QueueService, MAX_BATCH_SIZE};
use crate::session::SharedSession;

/// Back-off between empty polls while the drained hypothesis is still
/// unconfirmed by the other workers.
const EMPTY_POLL_BACKOFF: Duration = Duration::from_millis(100);

/// One polling task. Runs on its own OS thread until a stop condition
/// fires: the shutdown flag, a confirmed-drained queue, the count
/// condition, or a transport failure.
pub(crate) struct Worker {
    pub index: usize,
    pub queue_name: String,
    pub conditions: StopConditions,
    pub service: Arc<dyn QueueService>,
    pub session: Arc<SharedSession>,
}

impl Worker {
    pub fn run(self) {
        let publish_limit = (!self.conditions.all).then_some(self.conditions.count);

        loop {
            if self.session.shutdown_requested() {
                engine_debug!("Worker {}: shutdown requested", self.index);
                break;
            }

            // Each delivery is hidden for the session timeout, so a message
            // handed to one worker is not redelivered to another within the
            // same session unless the session outlives the hold.
            let batch = match self.service.receive_batch(
                &self.queue_name,
                MAX_BATCH_SIZE,
                self.conditions.timeout,
            ) {
                Ok(batch) => batch,
                Err(err) => {
                    engine_warn!("Worker {} stopping after receive failure: {}", self.index, err);
                    self.session.record_error(err.into());
                    break;
                }
            };

            if batch.is_empty() {
                // A single empty batch is not proof the queue is drained:
                // another worker may be holding deliveries that bounce back.
                // Exit only when every live worker sees empty at once.
                if self.session.lock().note_empty_poll(self.index) {
                    engine_debug!("Worker {}: queue drained", self.index);
                    break;
                }
                thread::sleep(EMPTY_POLL_BACKOFF);
                continue;
            }

            let mut inner = self.session.lock();
            inner.note_delivery();
            let published = inner.publish_unique(batch, publish_limit);
            engine_trace!("Worker {} published {} new messages", self.index, published);
            if publish_limit.is_some_and(|count| inner.published() >= count) {
                engine_debug!("Worker {}: count condition reached", self.index);
                break;
            }
        }

        self.session.lock().worker_exited(self.index);
    }
}
