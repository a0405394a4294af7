use std::collections::BTreeMap;
use std::fmt;

/// One harvested queue message, normalized from whatever the queue service
/// returned.
///
/// `id` is assigned by the service and is stable across redeliveries; it is
/// the dedup key for a harvest session. `receipt_handle` is *not* stable: a
/// fresh handle arrives with every delivery of the same message.
#[derive(Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: String,
    pub body: String,
    /// Checksum of `body` as reported by the service. Opaque; never
    /// recomputed locally.
    pub body_checksum: String,
    pub attributes: Option<BTreeMap<String, MessageAttribute>>,
    pub attributes_checksum: Option<String>,
    /// Service-assigned attributes (send timestamp, receive count, ...).
    pub system_attributes: BTreeMap<String, String>,
    /// Token needed to acknowledge or extend visibility of this delivery.
    pub receipt_handle: String,
}

impl fmt::Debug for MessageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The receipt handle changes on every delivery; keep it out of log
        // output so it is never mistaken for a stable identifier.
        f.debug_struct("MessageRecord")
            .field("id", &self.id)
            .field("body", &self.body)
            .field("body_checksum", &self.body_checksum)
            .field("attributes", &self.attributes)
            .field("attributes_checksum", &self.attributes_checksum)
            .field("system_attributes", &self.system_attributes)
            .field("receipt_handle", &"<redacted>")
            .finish()
    }
}

/// A typed user attribute attached to a message.
///
/// `data_type` is the service's type label (`String`, `Number`, `Binary`, or
/// a custom-qualified variant such as `Binary.gzip`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageAttribute {
    pub data_type: String,
    pub value: AttributeData,
}

/// The payload of a [`MessageAttribute`]: text for string/number types,
/// raw bytes for binary types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeData {
    Text(String),
    Bytes(Vec<u8>),
}
