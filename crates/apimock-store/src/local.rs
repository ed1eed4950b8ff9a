//! JSON-file (or purely in-memory) key-value store.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info};

use crate::{KeyValueStore, StorageChange, StoreError};

const CHANGE_CAPACITY: usize = 64;

/// Key-value store backed by a single JSON object.
///
/// Use [`in_memory`](Self::in_memory) for an ephemeral store and
/// [`open`](Self::open) for a file-backed one. File-backed stores rewrite the
/// whole file through a temp file and rename after every `set`, so a crash
/// leaves either the old or the new contents.
pub struct LocalStore {
    data: Mutex<Map<String, Value>>,
    path: Option<PathBuf>,
    changes: broadcast::Sender<StorageChange>,
}

impl LocalStore {
    pub fn in_memory() -> Self {
        Self::with_data(Map::new(), None)
    }

    /// Open or create a store file. Missing parent directories are created.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let data = match std::fs::read_to_string(path) {
            Ok(text) if text.trim().is_empty() => Map::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e.into()),
        };
        info!(path = %path.display(), keys = data.len(), "opened local store");

        Ok(Self::with_data(data, Some(path.to_path_buf())))
    }

    fn with_data(data: Map<String, Value>, path: Option<PathBuf>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            data: Mutex::new(data),
            path,
            changes,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn persist(&self, data: &Map<String, Value>) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, data)?;
        tmp.write_all(b"\n")?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for LocalStore {
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StoreError> {
        let data = self.data.lock().await;
        Ok(keys
            .iter()
            .filter_map(|key| data.get(*key).map(|v| (key.to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, entries: Map<String, Value>) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }

        let keys: Vec<String> = entries.keys().cloned().collect();
        {
            let mut data = self.data.lock().await;
            let mut next = data.clone();
            next.extend(entries);
            self.persist(&next)?;
            *data = next;
        }
        debug!(keys = ?keys, "store updated");

        // No receivers is fine.
        let _ = self.changes.send(StorageChange { keys });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entries(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("entries must be an object"),
        }
    }

    #[tokio::test]
    async fn get_returns_only_present_keys() {
        let store = LocalStore::in_memory();
        store.set(entries(json!({"a": 1}))).await.unwrap();

        let got = store.get(&["a", "b"]).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got["a"], 1);
    }

    #[tokio::test]
    async fn set_notifies_subscribers() {
        let store = LocalStore::in_memory();
        let mut rx = store.subscribe();

        store.set(entries(json!({"mocks": [], "x": true}))).await.unwrap();
        let change = rx.recv().await.unwrap();
        assert!(change.touches("mocks"));
        assert!(change.touches("x"));
        assert!(!change.touches("globalEnabled"));
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let store = LocalStore::open(&path).unwrap();
        store
            .set(entries(json!({"globalEnabled": false, "mocks": [{"id": 1}]})))
            .await
            .unwrap();
        drop(store);

        let reopened = LocalStore::open(&path).unwrap();
        let got = reopened.get(&["globalEnabled", "mocks"]).await.unwrap();
        assert_eq!(got["globalEnabled"], false);
        assert_eq!(got["mocks"], json!([{"id": 1}]));
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(LocalStore::open(&path), Err(StoreError::Json(_))));
    }
}
