use std::collections::BTreeMap;
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use harvester_core::{AttributeData, MessageAttribute, MessageRecord, StopConditions};
use harvester_engine::{
    deserialize_record, serialize_record, Harvester, MessageCache, QueueService, StorageError,
    TransportError,
};
use tempfile::TempDir;

fn init_logging() {
    engine_logging::initialize_for_tests();
}

fn record(id: &str) -> MessageRecord {
    MessageRecord {
        id: id.to_string(),
        body: format!("body-{id}"),
        body_checksum: "9e107d9d372bb6826bd81d3542a419d6".to_string(),
        attributes: None,
        attributes_checksum: None,
        system_attributes: BTreeMap::from([
            ("SentTimestamp".to_string(), "1700000000000".to_string()),
            ("ApproximateReceiveCount".to_string(), "1".to_string()),
        ]),
        receipt_handle: format!("rh-{id}"),
    }
}

fn record_with_binary_attribute(id: &str, payload: Vec<u8>) -> MessageRecord {
    let mut rec = record(id);
    rec.attributes = Some(BTreeMap::from([
        (
            "payload".to_string(),
            MessageAttribute {
                data_type: "Binary".to_string(),
                value: AttributeData::Bytes(payload),
            },
        ),
        (
            "origin".to_string(),
            MessageAttribute {
                data_type: "String".to_string(),
                value: AttributeData::Text("unit-test".to_string()),
            },
        ),
    ]));
    rec.attributes_checksum = Some("0123456789abcdef0123456789abcdef".to_string());
    rec
}

#[test]
fn round_trip_preserves_every_binary_byte() {
    init_logging();
    let payload: Vec<u8> = (0u8..=255).collect();
    let original = record_with_binary_attribute("msg-bin", payload);

    let serialized = serialize_record(&original).unwrap();
    let restored = deserialize_record(&serialized).unwrap();

    assert_eq!(original, restored);
}

#[test]
fn serialized_record_is_text_with_original_field_names() {
    let serialized = serialize_record(&record_with_binary_attribute("msg-1", vec![0, 1, 255]))
        .unwrap();

    // The on-disk format keeps the historical JSON keys.
    assert!(serialized.contains("\"md5OfBody\""));
    assert!(serialized.contains("\"sysAttributes\""));
    assert!(serialized.contains("\"receiptHandle\""));
    assert!(serialized.contains("\"BinaryValue\""));
    // Raw bytes never appear; the payload is base85 text.
    assert!(!serialized.contains('\u{0}'));
}

#[test]
fn save_stop_load_round_trips_through_files() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let mut cache = MessageCache::open_in(temp.path(), "orders").unwrap();

    cache.start_writer();
    for i in 0..3 {
        cache.save(record(&format!("msg-{i}"))).unwrap();
    }
    cache.stop_writer().unwrap();

    // One file per message, named by id.
    for i in 0..3 {
        assert!(cache.dir().join(format!("msg-{i}")).is_file());
    }

    let loaded = cache.load_all().unwrap();
    assert_eq!(loaded.len(), 3);
    let ids = cache.load_ids().unwrap();
    assert!(ids.contains("msg-0") && ids.contains("msg-2"));
}

#[test]
fn records_saved_before_start_are_flushed_on_stop() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let mut cache = MessageCache::open_in(temp.path(), "orders").unwrap();

    for i in 0..50 {
        cache.save(record(&format!("msg-{i}"))).unwrap();
    }
    cache.start_writer();
    cache.stop_writer().unwrap();

    assert_eq!(cache.load_all().unwrap().len(), 50);
}

#[test]
fn save_after_stop_reports_writer_stopped() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let mut cache = MessageCache::open_in(temp.path(), "orders").unwrap();

    cache.start_writer();
    cache.stop_writer().unwrap();

    assert!(matches!(
        cache.save(record("late")),
        Err(StorageError::WriterStopped)
    ));
}

#[test]
fn persistent_write_failure_is_surfaced_on_stop() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let mut cache = MessageCache::open_in(temp.path(), "orders").unwrap();
    // A directory squatting on the record's file name defeats the
    // temp-file rename on every retry.
    fs::create_dir(cache.dir().join("blocked")).unwrap();

    cache.start_writer();
    cache.save(record("blocked")).unwrap();
    cache.save(record("fine")).unwrap();

    assert!(matches!(cache.stop_writer(), Err(StorageError::Io(_))));
    // One record failing does not take the rest of the flush with it.
    assert!(cache.dir().join("fine").is_file());
}

#[test]
fn corrupt_file_is_skipped_not_fatal() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let mut cache = MessageCache::open_in(temp.path(), "orders").unwrap();

    cache.start_writer();
    cache.save(record("good")).unwrap();
    cache.stop_writer().unwrap();
    fs::write(cache.dir().join("broken"), "{not valid json").unwrap();

    let loaded = cache.load_all().unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].id, "good");
}

#[test]
fn open_in_fails_when_target_is_a_file() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("orders"), "x").unwrap();

    let result = MessageCache::open_in(temp.path(), "orders");
    assert!(matches!(result, Err(StorageError::CacheDir(_))));
}

/// Redelivering queue: every poll hands back the full message list.
struct RedeliveringQueue {
    records: Mutex<Vec<MessageRecord>>,
}

impl QueueService for RedeliveringQueue {
    fn receive_batch(
        &self,
        _queue_name: &str,
        max_messages: usize,
        _visibility_timeout: Duration,
    ) -> Result<Vec<MessageRecord>, TransportError> {
        let records = self.records.lock().unwrap();
        Ok(records.iter().take(max_messages).cloned().collect())
    }

    fn send_message(&self, _queue_name: &str, _body: &str) -> Result<(), TransportError> {
        Ok(())
    }

    fn purge(&self, _queue_name: &str) -> Result<(), TransportError> {
        Ok(())
    }
}

#[test]
fn resumed_session_skips_everything_already_on_disk() {
    init_logging();
    let temp = TempDir::new().unwrap();
    let records: Vec<_> = (0..6).map(|i| record(&format!("msg-{i}"))).collect();
    let queue = Arc::new(RedeliveringQueue {
        records: Mutex::new(records.clone()),
    });

    // First session: harvest everything and persist it.
    let mut cache = MessageCache::open_in(temp.path(), "orders").unwrap();
    cache.start_writer();
    let harvester = Harvester::with_service(
        Arc::clone(&queue) as Arc<dyn QueueService>,
        "orders",
        StopConditions::first_n(6, Duration::from_secs(2)),
        Some(2),
    )
    .unwrap();
    for rec in harvester.into_stream() {
        cache.save(rec).unwrap();
    }
    cache.stop_writer().unwrap();

    // Second session: the queue redelivers everything, the cache excludes it.
    let cache = MessageCache::open_in(temp.path(), "orders").unwrap();
    let cached_ids = cache.load_ids().unwrap();
    assert_eq!(cached_ids.len(), 6);

    let harvester = Harvester::with_service(
        queue,
        "orders",
        StopConditions::drain_within(Duration::from_secs(1)),
        Some(2),
    )
    .unwrap()
    .exclude_ids(cached_ids);

    let reharvested: Vec<_> = harvester.into_stream().collect();
    assert!(
        reharvested.is_empty(),
        "cached ids must never be re-emitted"
    );
}
