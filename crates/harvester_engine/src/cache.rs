//! Disk-backed message cache: one JSON file per harvested message, grouped
//! per queue, so later sessions can skip ids already on disk.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use directories::ProjectDirs;
use engine_logging::{engine_debug, engine_warn};
use harvester_core::{AttributeData, MessageAttribute, MessageRecord};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::StorageError;

/// How many times the writer retries a failed file write before recording
/// the failure.
const WRITE_ATTEMPTS: u32 = 3;

const APP_NAME: &str = "sqs-harvester";

/// Durable, append-only store of harvested messages for one queue.
///
/// Writes happen on a single background thread fed through an unbounded
/// channel, so [`MessageCache::save`] never blocks a worker on I/O.
pub struct MessageCache {
    dir: PathBuf,
    jobs: Sender<Option<MessageRecord>>,
    pending: Option<Receiver<Option<MessageRecord>>>,
    writer: Option<JoinHandle<Vec<StorageError>>>,
}

impl MessageCache {
    /// Open the cache for `queue_name` under the platform application-data
    /// directory, creating it if absent.
    pub fn open(queue_name: &str) -> Result<Self, StorageError> {
        let dirs =
            ProjectDirs::from("", "", APP_NAME).ok_or(StorageError::UnsupportedPlatform)?;
        Self::open_in(dirs.data_dir(), queue_name)
    }

    /// Open the cache under an explicit root instead of the platform
    /// application-data directory.
    pub fn open_in(root: &Path, queue_name: &str) -> Result<Self, StorageError> {
        let dir = root.join(queue_name);
        ensure_cache_dir(&dir)?;
        let (jobs, pending) = mpsc::channel();
        Ok(Self {
            dir,
            jobs,
            pending: Some(pending),
            writer: None,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load every record in the cache. Corrupt files are logged and
    /// skipped; only directory-level failures are fatal.
    pub fn load_all(&self) -> Result<Vec<MessageRecord>, StorageError> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            match load_record(&path) {
                Ok(record) => records.push(record),
                Err(err) => {
                    engine_warn!("Skipping unreadable cache record {:?}: {}", path, err);
                }
            }
        }
        engine_debug!("Loaded {} cached messages from {:?}", records.len(), self.dir);
        Ok(records)
    }

    /// Ids of every cached record, for excluding them from a new harvest.
    pub fn load_ids(&self) -> Result<HashSet<String>, StorageError> {
        Ok(self
            .load_all()?
            .into_iter()
            .map(|record| record.id)
            .collect())
    }

    /// Queue `record` for asynchronous persistence. Never blocks on I/O;
    /// fails only once the writer has been stopped.
    pub fn save(&self, record: MessageRecord) -> Result<(), StorageError> {
        self.jobs
            .send(Some(record))
            .map_err(|_| StorageError::WriterStopped)
    }

    /// Start the single background writer draining queued records. Records
    /// saved before this call are already buffered and get written first.
    pub fn start_writer(&mut self) {
        let Some(jobs) = self.pending.take() else {
            return;
        };
        let dir = self.dir.clone();
        self.writer = Some(thread::spawn(move || writer_loop(&dir, jobs)));
    }

    /// Stop the writer after flushing everything queued so far. Returns the
    /// first write error the writer ran into, if any.
    pub fn stop_writer(&mut self) -> Result<(), StorageError> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let _ = self.jobs.send(None);
        match writer.join() {
            Ok(mut failures) => {
                if failures.is_empty() {
                    Ok(())
                } else {
                    Err(failures.remove(0))
                }
            }
            Err(_) => Err(StorageError::CacheDir("cache writer panicked".into())),
        }
    }
}

fn ensure_cache_dir(dir: &Path) -> Result<(), StorageError> {
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|err| StorageError::CacheDir(err.to_string()))?;
        if !meta.is_dir() {
            return Err(StorageError::CacheDir("path is not a directory".into()));
        }
    } else {
        fs::create_dir_all(dir).map_err(|err| StorageError::CacheDir(err.to_string()))?;
    }
    // Writability probe: try creating a temp file.
    NamedTempFile::new_in(dir).map_err(|err| StorageError::CacheDir(err.to_string()))?;
    Ok(())
}

fn writer_loop(dir: &Path, jobs: Receiver<Option<MessageRecord>>) -> Vec<StorageError> {
    let mut failures = Vec::new();
    while let Ok(Some(record)) = jobs.recv() {
        match write_record(dir, &record) {
            Ok(()) => engine_debug!("Cached message {}", record.id),
            Err(err) => {
                engine_warn!("Giving up on caching message {}: {}", record.id, err);
                failures.push(err);
            }
        }
    }
    failures
}

fn write_record(dir: &Path, record: &MessageRecord) -> Result<(), StorageError> {
    let content = serialize_record(record)?;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match write_atomic(dir, &record.id, &content) {
            Ok(()) => return Ok(()),
            Err(err) if attempt < WRITE_ATTEMPTS => {
                engine_warn!("Retrying cache write for {} after: {}", record.id, err);
            }
            Err(err) => return Err(err),
        }
    }
}

/// Write `{dir}/{filename}` via a temp file and rename, so a crash never
/// leaves a half-written record for a later load to trip over.
fn write_atomic(dir: &Path, filename: &str, content: &str) -> Result<(), StorageError> {
    let target = dir.join(filename);
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.flush()?;
    tmp.as_file_mut().sync_all()?;
    if target.exists() {
        fs::remove_file(&target)?;
    }
    tmp.persist(&target).map_err(|err| StorageError::Io(err.error))?;
    Ok(())
}

fn load_record(path: &Path) -> Result<MessageRecord, StorageError> {
    let content = fs::read_to_string(path)?;
    deserialize_record(&content)
}

/// Serialize a record to the on-disk JSON form. Binary attribute values are
/// base85-encoded so the record stays plain text while preserving payload
/// bytes losslessly.
pub fn serialize_record(record: &MessageRecord) -> Result<String, StorageError> {
    serde_json::to_string(&to_stored(record)).map_err(|err| StorageError::Malformed(err.to_string()))
}

/// Parse a record from its on-disk JSON form, decoding base85 binary
/// attribute values back to raw bytes.
pub fn deserialize_record(content: &str) -> Result<MessageRecord, StorageError> {
    let stored: StoredMessage =
        serde_json::from_str(content).map_err(|err| StorageError::Malformed(err.to_string()))?;
    from_stored(stored)
}

#[derive(Serialize, Deserialize)]
struct StoredMessage {
    id: String,
    body: String,
    #[serde(rename = "md5OfBody")]
    md5_of_body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attributes: Option<BTreeMap<String, StoredAttribute>>,
    #[serde(rename = "md5OfAttributes", default, skip_serializing_if = "Option::is_none")]
    md5_of_attributes: Option<String>,
    #[serde(rename = "sysAttributes", default)]
    sys_attributes: BTreeMap<String, String>,
    #[serde(rename = "receiptHandle")]
    receipt_handle: String,
}

#[derive(Serialize, Deserialize)]
struct StoredAttribute {
    #[serde(rename = "DataType")]
    data_type: String,
    #[serde(rename = "StringValue", default, skip_serializing_if = "Option::is_none")]
    string_value: Option<String>,
    #[serde(rename = "BinaryValue", default, skip_serializing_if = "Option::is_none")]
    binary_value: Option<String>,
}

fn to_stored(record: &MessageRecord) -> StoredMessage {
    let attributes = record.attributes.as_ref().map(|attrs| {
        attrs
            .iter()
            .map(|(name, attr)| {
                let stored = match &attr.value {
                    AttributeData::Text(text) => StoredAttribute {
                        data_type: attr.data_type.clone(),
                        string_value: Some(text.clone()),
                        binary_value: None,
                    },
                    AttributeData::Bytes(bytes) => StoredAttribute {
                        data_type: attr.data_type.clone(),
                        string_value: None,
                        binary_value: Some(base85::encode(bytes)),
                    },
                };
                (name.clone(), stored)
            })
            .collect()
    });

    StoredMessage {
        id: record.id.clone(),
        body: record.body.clone(),
        md5_of_body: record.body_checksum.clone(),
        attributes,
        md5_of_attributes: record.attributes_checksum.clone(),
        sys_attributes: record.system_attributes.clone(),
        receipt_handle: record.receipt_handle.clone(),
    }
}

fn from_stored(stored: StoredMessage) -> Result<MessageRecord, StorageError> {
    let attributes = match stored.attributes {
        None => None,
        Some(attrs) => {
            let mut out = BTreeMap::new();
            for (name, attr) in attrs {
                let value = if let Some(encoded) = attr.binary_value {
                    let bytes = base85::decode(&encoded)
                        .map_err(|err| StorageError::Malformed(err.to_string()))?;
                    AttributeData::Bytes(bytes)
                } else if let Some(text) = attr.string_value {
                    AttributeData::Text(text)
                } else {
                    return Err(StorageError::Malformed(format!(
                        "attribute {name} has neither a string nor a binary value"
                    )));
                };
                out.insert(
                    name,
                    MessageAttribute {
                        data_type: attr.data_type,
                        value,
                    },
                );
            }
            Some(out)
        }
    };

    Ok(MessageRecord {
        id: stored.id,
        body: stored.body,
        body_checksum: stored.md5_of_body,
        attributes,
        attributes_checksum: stored.md5_of_attributes,
        system_attributes: stored.sys_attributes,
        receipt_handle: stored.receipt_handle,
    })
}
