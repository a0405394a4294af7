//! Harvester core: message data model and session configuration.
mod conditions;
mod credentials;
mod message;

pub use conditions::{ConditionsError, StopConditions};
pub use credentials::Credentials;
pub use message::{AttributeData, MessageAttribute, MessageRecord};
