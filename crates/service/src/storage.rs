//! Small key/value persistence for the engine's logs.
//!
//! Values are JSON strings under fixed keys. Writes go through a
//! [`Persister`] task so the engine loop never waits on disk.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// One `<key>.json` file per key under a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        // write then rename so a crash never leaves a truncated file
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Load a persisted JSON array. Anything that does not decode is discarded
/// with a warning.
pub async fn load_list<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Vec<T> {
    let raw = match store.get(key).await {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(e) => {
            tracing::warn!("failed to read {}: {}", key, e);
            return Vec::new();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("discarding unreadable {}: {}", key, e);
            Vec::new()
        }
    }
}

/// Handle to the background writer
#[derive(Debug, Clone)]
pub struct Persister {
    sender: flume::Sender<(String, String)>,
}

impl Persister {
    /// Spawn the writer task. It exits once every handle is dropped.
    pub fn spawn(store: Arc<dyn KeyValueStore>) -> (Self, tokio::task::JoinHandle<()>) {
        let (sender, receiver) = flume::unbounded::<(String, String)>();
        let handle = tokio::spawn(async move {
            while let Ok((key, value)) = receiver.recv_async().await {
                // only the newest queued value per key matters
                let mut latest = HashMap::new();
                latest.insert(key, value);
                for (key, value) in receiver.drain() {
                    latest.insert(key, value);
                }
                for (key, value) in latest {
                    if let Err(e) = store.put(&key, &value).await {
                        tracing::warn!("failed to persist {}: {}", key, e);
                    }
                }
            }
        });
        (Self { sender }, handle)
    }

    pub fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(json) => {
                let _ = self.sender.send((key.to_string(), json));
            }
            Err(e) => tracing::warn!("failed to encode {}: {}", key, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("state"));
        assert_eq!(store.get("activity_log").await.unwrap(), None);
        store.put("activity_log", "[1,2]").await.unwrap();
        assert_eq!(store.get("activity_log").await.unwrap().as_deref(), Some("[1,2]"));
        assert!(!dir.path().join("state/activity_log.json.tmp").exists());
        assert!(matches!(
            store.put("../escape", "x").await,
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_load_list_discards_garbage() {
        let store = MemoryStore::new();
        store.put("connection_log", "{not a list").await.unwrap();
        let entries: Vec<u32> = load_list(&store, "connection_log").await;
        assert!(entries.is_empty());

        store.put("connection_log", "[3,4]").await.unwrap();
        let entries: Vec<u32> = load_list(&store, "connection_log").await;
        assert_eq!(entries, vec![3, 4]);
    }

    #[tokio::test]
    async fn test_persister_writes_latest() {
        let store = Arc::new(MemoryStore::new());
        let (persister, handle) = Persister::spawn(store.clone());
        persister.save("k", &vec![1]);
        persister.save("k", &vec![1, 2]);
        drop(persister);
        handle.await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("[1,2]"));
    }
}
