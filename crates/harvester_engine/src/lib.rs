//! Harvester engine: concurrent queue polling, deduplication, and the
//! disk-backed message cache.
mod cache;
mod error;
mod harvest;
mod monitor;
mod queue;
mod session;
mod worker;

pub use cache::{deserialize_record, serialize_record, MessageCache};
pub use error::{HarvestError, StorageError, TransportError};
pub use harvest::{default_num_workers, harvest, Harvester, MessageStream};
pub use queue::{QueueService, SqsQueueService, MAX_BATCH_SIZE};
