//! Injected key/value persistence.
//!
//! The core never talks to a concrete storage backend. Stores receive an
//! `Arc<dyn KeyValueStore>` at construction time; [`MemoryStore`] backs tests
//! and [`JsonFileStore`] backs the CLI.
//!
//! Every record is written inside a [`VersionedRecord`] envelope carrying a
//! format version and an RFC 3339 `lastModified` timestamp.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::CoreError;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Current envelope format version.
pub const RECORD_VERSION: u32 = 1;

/// Key of the project table.
pub const PROJECTS_KEY: &str = "projects";

/// Key of the `{documentId → projectId}` index.
pub const DOCUMENT_PROJECTS_KEY: &str = "document_projects";

/// Storage quota the usage report is measured against (10 MiB).
pub const STORAGE_QUOTA_BYTES: u64 = 10 * 1024 * 1024;

const FILE_EXTENSION: &str = "json";

/// Key of the pin map for a document.
pub fn pins_key(document_id: &str) -> String {
    format!("pins:{document_id}")
}

/// Key of the feedback list for a document.
pub fn feedback_key(document_id: &str) -> String {
    format!("feedback:{document_id}")
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Async key/value storage the stores persist through.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value; `Ok(None)` when the key has never been written.
    async fn get(&self, key: &str) -> Result<Option<Value>, CoreError>;

    /// Write (replace) a value.
    async fn set(&self, key: &str, value: Value) -> Result<(), CoreError>;

    /// Delete a value. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), CoreError>;

    /// All keys currently stored, in no particular order.
    async fn keys(&self) -> Result<Vec<String>, CoreError>;
}

// ---------------------------------------------------------------------------
// Versioned envelope
// ---------------------------------------------------------------------------

/// Envelope around every persisted value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedRecord<T> {
    pub version: u32,
    pub last_modified: Timestamp,
    pub data: T,
}

impl<T> VersionedRecord<T> {
    pub fn new(data: T) -> Self {
        Self {
            version: RECORD_VERSION,
            last_modified: Utc::now(),
            data,
        }
    }
}

/// Serialize `data` into a fresh envelope and write it under `key`.
pub async fn save_record<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    data: &T,
) -> Result<(), CoreError> {
    let value = serde_json::to_value(VersionedRecord::new(data))?;
    store.set(key, value).await
}

/// Read and unwrap the envelope under `key`.
///
/// Records written by a newer format version are refused rather than
/// misread.
pub async fn load_record<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, CoreError> {
    let Some(value) = store.get(key).await? else {
        return Ok(None);
    };
    let record: VersionedRecord<T> = serde_json::from_value(value)?;
    if record.version > RECORD_VERSION {
        return Err(CoreError::Storage(format!(
            "record '{key}' has unsupported version {}",
            record.version
        )));
    }
    Ok(Some(record.data))
}

// ---------------------------------------------------------------------------
// Storage usage
// ---------------------------------------------------------------------------

/// Approximate storage consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageUsage {
    pub bytes_used: u64,
    pub quota_bytes: u64,
}

impl StorageUsage {
    /// Fraction of the quota in use, `0.0..`.
    pub fn fraction(&self) -> f64 {
        if self.quota_bytes == 0 {
            return 0.0;
        }
        self.bytes_used as f64 / self.quota_bytes as f64
    }

    pub fn is_over_quota(&self) -> bool {
        self.bytes_used > self.quota_bytes
    }
}

/// Sum of key lengths plus serialized value sizes across the store.
pub async fn storage_usage(store: &dyn KeyValueStore) -> Result<StorageUsage, CoreError> {
    let mut bytes_used = 0u64;
    for key in store.keys().await? {
        if let Some(value) = store.get(&key).await? {
            let size = serde_json::to_vec(&value)?.len() + key.len();
            bytes_used += size as u64;
        }
    }
    Ok(StorageUsage {
        bytes_used,
        quota_bytes: STORAGE_QUOTA_BYTES,
    })
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-process store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, CoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), CoreError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, CoreError> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// JsonFileStore
// ---------------------------------------------------------------------------

/// One pretty-printed JSON file per key under a root directory.
///
/// Keys are percent-encoded into file names (`pins:abc` → `pins%3Aabc.json`).
/// Writes go to a temporary sibling first and are renamed into place.
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| io_error("create store directory", &root, e))?;
        tracing::debug!(root = %root.display(), "Opened JSON file store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{FILE_EXTENSION}", encode_key(key)))
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, CoreError> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("read", &path, e)),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), CoreError> {
        let path = self.path_for(key);
        // One temp file per write so concurrent writers never share it.
        let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4()));
        let bytes = serde_json::to_vec_pretty(&value)?;
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| io_error("write", &tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error("rename", &path, e))
    }

    async fn remove(&self, key: &str) -> Result<(), CoreError> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("remove", &path, e)),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, CoreError> {
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| io_error("list", &self.root, e))?;
        let mut keys = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| io_error("list", &self.root, e))?
        {
            let name = entry.file_name();
            let Some(stem) = name
                .to_str()
                .and_then(|n| n.strip_suffix(&format!(".{FILE_EXTENSION}")))
            else {
                continue;
            };
            if let Some(key) = decode_key(stem) {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}

fn io_error(action: &str, path: &Path, err: std::io::Error) -> CoreError {
    CoreError::Storage(format!("failed to {action} {}: {err}", path.display()))
}

/// Percent-encode everything outside the URL-unreserved set.
fn encode_key(key: &str) -> String {
    urlencoding::encode(key).into_owned()
}

fn decode_key(encoded: &str) -> Option<String> {
    urlencoding::decode(encoded).ok().map(|key| key.into_owned())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    // -- key encoding -------------------------------------------------------

    #[test]
    fn key_encoding_round_trips() {
        for key in ["pins:abc", "feedback:1a-B_c", "document_projects", "スライド/1"] {
            let encoded = encode_key(key);
            assert!(!encoded.contains(['/', ':']));
            assert_eq!(decode_key(&encoded).as_deref(), Some(key));
        }
        assert_eq!(encode_key("pins:abc"), "pins%3Aabc");
        assert_eq!(decode_key("bad%FF"), None);
    }

    // -- MemoryStore --------------------------------------------------------

    #[tokio::test]
    async fn memory_store_get_set_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", json!({"a": 1})).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!({"a": 1})));
        assert_eq!(store.keys().await.unwrap(), vec!["k".to_string()]);

        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    // -- records ------------------------------------------------------------

    #[tokio::test]
    async fn record_envelope_carries_version_and_timestamp() {
        let store = MemoryStore::new();
        save_record(&store, "projects", &vec!["a", "b"]).await.unwrap();

        let raw = store.get("projects").await.unwrap().unwrap();
        assert_eq!(raw["version"], RECORD_VERSION);
        assert!(raw["lastModified"].as_str().unwrap().contains('T'));
        assert_eq!(raw["data"], json!(["a", "b"]));

        let loaded: Option<Vec<String>> = load_record(&store, "projects").await.unwrap();
        assert_eq!(loaded, Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[tokio::test]
    async fn newer_record_version_is_refused() {
        let store = MemoryStore::new();
        store
            .set("k", json!({"version": 99, "lastModified": "2026-01-01T00:00:00Z", "data": 1}))
            .await
            .unwrap();
        let result: Result<Option<u32>, _> = load_record(&store, "k").await;
        assert_matches!(result, Err(CoreError::Storage(_)));
    }

    #[tokio::test]
    async fn malformed_record_is_a_storage_error() {
        let store = MemoryStore::new();
        store.set("k", json!("not an envelope")).await.unwrap();
        let result: Result<Option<u32>, _> = load_record(&store, "k").await;
        assert_matches!(result, Err(CoreError::Storage(_)));
    }

    // -- JsonFileStore ------------------------------------------------------

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = JsonFileStore::open(dir.path()).await.unwrap();
            store.set(&pins_key("doc-1"), json!({"1": []})).await.unwrap();
            store.set(PROJECTS_KEY, json!([])).await.unwrap();
        }

        let store = JsonFileStore::open(dir.path()).await.unwrap();
        assert_eq!(store.get(&pins_key("doc-1")).await.unwrap(), Some(json!({"1": []})));
        assert!(dir.path().join("pins%3Adoc-1.json").exists());

        let mut keys = store.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["pins:doc-1".to_string(), "projects".to_string()]);
    }

    #[tokio::test]
    async fn file_store_missing_key_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("nested")).await.unwrap();
        assert_eq!(store.get("absent").await.unwrap(), None);
        store.remove("absent").await.unwrap();

        store.set("k", json!(1)).await.unwrap();
        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn file_store_concurrent_writes_to_one_key_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(JsonFileStore::open(dir.path()).await.unwrap());
        let big = json!({"blob": "x".repeat(512 * 1024)});

        for _ in 0..10 {
            let writes: Vec<_> = (0..2)
                .map(|_| {
                    let store = std::sync::Arc::clone(&store);
                    let value = big.clone();
                    tokio::spawn(async move { store.set("pins:doc", value).await })
                })
                .collect();
            for write in writes {
                write.await.unwrap().unwrap();
            }
        }

        assert_eq!(store.get("pins:doc").await.unwrap(), Some(big));
        assert_eq!(store.keys().await.unwrap(), vec!["pins:doc".to_string()]);
    }

    #[tokio::test]
    async fn file_store_corrupt_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("k.json"), b"{ not json").unwrap();
        assert_matches!(store.get("k").await, Err(CoreError::Storage(_)));
    }

    // -- storage_usage ------------------------------------------------------

    #[tokio::test]
    async fn usage_counts_keys_and_values() {
        let store = MemoryStore::new();
        store.set("ab", json!("xyz")).await.unwrap();

        let usage = storage_usage(&store).await.unwrap();
        // "ab" + "\"xyz\""
        assert_eq!(usage.bytes_used, 7);
        assert_eq!(usage.quota_bytes, STORAGE_QUOTA_BYTES);
        assert!(!usage.is_over_quota());
        assert!(usage.fraction() < 0.001);
    }
}
