use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use engine_logging::{engine_debug, engine_warn};
use harvester_core::MessageRecord;

use crate::session::SharedSession;

/// How often the monitor re-checks worker liveness while waiting out the
/// session timeout.
const MONITOR_INTERVAL: Duration = Duration::from_millis(500);

/// Supervises the worker threads of one session: bounds total duration,
/// detects natural completion, and finalizes the output channel.
pub(crate) struct CompletionMonitor {
    pub session: Arc<SharedSession>,
    pub workers: Vec<JoinHandle<()>>,
    pub output: Sender<Option<MessageRecord>>,
    pub timeout: Duration,
}

impl CompletionMonitor {
    pub fn run(self) {
        for _ in 0..timeout_iterations(self.timeout) {
            thread::sleep(MONITOR_INTERVAL);
            if self.workers.iter().all(JoinHandle::is_finished) {
                engine_debug!("All workers finished before the session timeout");
                break;
            }
            if self.session.shutdown_requested() {
                // The consumer dropped the stream early.
                break;
            }
        }

        self.session.request_shutdown();
        for worker in self.workers {
            if worker.join().is_err() {
                engine_warn!("A harvest worker panicked before completion");
            }
        }

        // Exactly one end-of-stream marker, even when nothing was harvested
        // and even when workers errored.
        let _ = self.output.send(None);
    }
}

fn timeout_iterations(timeout: Duration) -> u32 {
    (timeout.as_secs_f64() / MONITOR_INTERVAL.as_secs_f64()).ceil() as u32
}
