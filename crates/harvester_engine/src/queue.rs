use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_sdk_sqs::config::{Credentials as SdkCredentials, Region};
use aws_sdk_sqs::types::{Message, MessageSystemAttributeName};
use aws_sdk_sqs::Client;
use engine_logging::engine_warn;
use harvester_core::{AttributeData, Credentials, MessageAttribute, MessageRecord};
use tokio::runtime::Runtime;

use crate::error::TransportError;

/// Largest batch the queue service returns from one receive call.
pub const MAX_BATCH_SIZE: usize = 10;

/// Blocking facade over the remote queue service.
///
/// All calls are synchronous from the caller's perspective; implementations
/// must be safe to share across worker threads.
pub trait QueueService: Send + Sync {
    /// Short-poll up to `max_messages` (capped at [`MAX_BATCH_SIZE`])
    /// messages, hiding each delivery for `visibility_timeout`. A zero wait
    /// time is used so callers can re-check their stop signals promptly.
    fn receive_batch(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<MessageRecord>, TransportError>;

    fn send_message(&self, queue_name: &str, body: &str) -> Result<(), TransportError>;

    fn purge(&self, queue_name: &str) -> Result<(), TransportError>;
}

/// [`QueueService`] implementation over the AWS SQS SDK.
///
/// The SDK is async-only; this wrapper owns a dedicated runtime and drives
/// each call to completion with `block_on`, so the harvester's workers stay
/// plain OS threads.
pub struct SqsQueueService {
    runtime: Runtime,
    client: Client,
    queue_urls: Mutex<HashMap<String, String>>,
}

impl SqsQueueService {
    pub fn connect(credentials: &Credentials) -> Result<Self, TransportError> {
        let runtime = Runtime::new().map_err(|err| TransportError::new("runtime", err))?;
        let client = runtime.block_on(build_client(credentials));
        Ok(Self {
            runtime,
            client,
            queue_urls: Mutex::new(HashMap::new()),
        })
    }

    fn queue_url(&self, queue_name: &str) -> Result<String, TransportError> {
        {
            let urls = self.queue_urls.lock().expect("queue url cache poisoned");
            if let Some(url) = urls.get(queue_name) {
                return Ok(url.clone());
            }
        }

        let resolved = self
            .runtime
            .block_on(self.client.get_queue_url().queue_name(queue_name).send())
            .map_err(|err| TransportError::new("get_queue_url", err))?;
        let url = resolved
            .queue_url()
            .ok_or_else(|| TransportError::new("get_queue_url", "response carried no queue url"))?
            .to_string();

        self.queue_urls
            .lock()
            .expect("queue url cache poisoned")
            .insert(queue_name.to_string(), url.clone());
        Ok(url)
    }
}

impl QueueService for SqsQueueService {
    fn receive_batch(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<MessageRecord>, TransportError> {
        let url = self.queue_url(queue_name)?;
        let visibility_secs = i32::try_from(visibility_timeout.as_secs()).unwrap_or(i32::MAX);

        let output = self
            .runtime
            .block_on(
                self.client
                    .receive_message()
                    .queue_url(&url)
                    .max_number_of_messages(max_messages.min(MAX_BATCH_SIZE) as i32)
                    .visibility_timeout(visibility_secs)
                    .wait_time_seconds(0)
                    .message_attribute_names("All")
                    .message_system_attribute_names(MessageSystemAttributeName::All)
                    .send(),
            )
            .map_err(|err| TransportError::new("receive_message", err))?;

        let mut records = Vec::with_capacity(output.messages().len());
        for message in output.messages() {
            match convert_message(message) {
                Some(record) => records.push(record),
                None => {
                    engine_warn!("Dropping message without an id from queue {}", queue_name);
                }
            }
        }
        Ok(records)
    }

    fn send_message(&self, queue_name: &str, body: &str) -> Result<(), TransportError> {
        let url = self.queue_url(queue_name)?;
        self.runtime
            .block_on(
                self.client
                    .send_message()
                    .queue_url(&url)
                    .message_body(body)
                    .send(),
            )
            .map_err(|err| TransportError::new("send_message", err))?;
        Ok(())
    }

    fn purge(&self, queue_name: &str) -> Result<(), TransportError> {
        let url = self.queue_url(queue_name)?;
        self.runtime
            .block_on(self.client.purge_queue().queue_url(&url).send())
            .map_err(|err| TransportError::new("purge_queue", err))?;
        Ok(())
    }
}

async fn build_client(credentials: &Credentials) -> Client {
    let provider = SdkCredentials::new(
        credentials.access_key.clone(),
        credentials.secret_key.clone(),
        None,
        None,
        "harvester",
    );
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(credentials.region.clone()))
        .credentials_provider(provider);
    if let Some(endpoint) = &credentials.endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }
    let config = loader.load().await;
    Client::new(&config)
}

fn convert_message(message: &Message) -> Option<MessageRecord> {
    let id = message.message_id()?.to_string();

    let attributes = message.message_attributes().map(|attrs| {
        attrs
            .iter()
            .filter_map(|(name, value)| {
                let data = if let Some(blob) = value.binary_value() {
                    AttributeData::Bytes(blob.as_ref().to_vec())
                } else {
                    AttributeData::Text(value.string_value()?.to_string())
                };
                let attribute = MessageAttribute {
                    data_type: value.data_type().to_string(),
                    value: data,
                };
                Some((name.clone(), attribute))
            })
            .collect::<BTreeMap<_, _>>()
    });

    let system_attributes = message
        .attributes()
        .map(|attrs| {
            attrs
                .iter()
                .map(|(key, value)| (key.as_str().to_string(), value.clone()))
                .collect()
        })
        .unwrap_or_default();

    Some(MessageRecord {
        id,
        body: message.body().unwrap_or_default().to_string(),
        body_checksum: message.md5_of_body().unwrap_or_default().to_string(),
        attributes,
        attributes_checksum: message.md5_of_message_attributes().map(str::to_string),
        system_attributes,
        receipt_handle: message.receipt_handle().unwrap_or_default().to_string(),
    })
}
