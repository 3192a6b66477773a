//! Checkpoint storage for `@save` / `@load` hooks.
//!
//! Checkpoints are opaque byte streams. File storage writes to a temporary
//! sibling and renames it into place, so readers never observe a partial file.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use super::value::ContextValue;
use crate::error::CheckpointError;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, key: &str, bytes: &[u8]) -> Result<(), CheckpointError>;
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, CheckpointError>;
    async fn delete(&self, key: &str) -> Result<(), CheckpointError>;
}

/// Encodes a context value into the checkpoint byte stream.
pub fn encode_value(value: &ContextValue) -> Result<Vec<u8>, CheckpointError> {
    serde_json::to_vec(value).map_err(|e| CheckpointError::Serialization(e.to_string()))
}

pub fn decode_value(bytes: &[u8]) -> Result<ContextValue, CheckpointError> {
    serde_json::from_slice(bytes).map_err(|e| CheckpointError::Corrupted(e.to_string()))
}

#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: tokio::sync::RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, key: &str, bytes: &[u8]) -> Result<(), CheckpointError> {
        self.data
            .write()
            .await
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, CheckpointError> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), CheckpointError> {
        self.data.write().await.remove(key);
        Ok(())
    }
}

pub struct FileCheckpointStore {
    dir: PathBuf,
    read_retries: u32,
    retry_delay: Duration,
}

impl FileCheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| CheckpointError::Storage(e.to_string()))?;
        Ok(Self {
            dir,
            read_retries: 3,
            retry_delay: Duration::from_millis(50),
        })
    }

    pub fn with_read_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.read_retries = retries;
        self.retry_delay = delay;
        self
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, CheckpointError> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(CheckpointError::Storage(format!(
                "invalid checkpoint key '{}'",
                key
            )));
        }
        Ok(self.dir.join(relative))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, key: &str, bytes: &[u8]) -> Result<(), CheckpointError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(CheckpointError::Storage(e.to_string()));
        }
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, CheckpointError> {
        let path = self.path_for(key)?;
        let mut attempt = 0;
        loop {
            match tokio::fs::read(&path).await {
                Ok(bytes) => return Ok(Some(bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) if attempt < self.read_retries => {
                    attempt += 1;
                    tracing::warn!(key, attempt, error = %e, "Checkpoint read failed, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(CheckpointError::Storage(e.to_string())),
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CheckpointError> {
        let path = self.path_for(key)?;
        let _ = tokio::fs::remove_file(path).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_memory_store_save_load_delete() {
        let store = MemoryCheckpointStore::new();
        store.save("users", b"abc").await.unwrap();
        assert_eq!(store.load("users").await.unwrap(), Some(b"abc".to_vec()));
        store.delete("users").await.unwrap();
        assert!(store.load("users").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_roundtrip_is_byte_exact() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();

        let value = ContextValue::Map(BTreeMap::from([
            ("ids".to_string(), ContextValue::List(vec![1.into(), 2.into()])),
            ("raw".to_string(), ContextValue::Bytes(vec![0, 255, 7])),
            ("ratio".to_string(), ContextValue::Float(0.25)),
        ]));
        let written = encode_value(&value).unwrap();
        store.save("state/users.json", &written).await.unwrap();

        let read = store.load("state/users.json").await.unwrap().unwrap();
        assert_eq!(read, written);
        let decoded = decode_value(&read).unwrap();
        assert_eq!(decoded, value);

        store.save("state/users.json", &encode_value(&decoded).unwrap()).await.unwrap();
        let again = store.load("state/users.json").await.unwrap().unwrap();
        assert_eq!(again, written);
    }

    #[tokio::test]
    async fn test_file_store_leaves_no_temporaries() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        store.save("a", b"1").await.unwrap();
        store.save("a", b"2").await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a".to_string()]);
        assert_eq!(store.load("a").await.unwrap(), Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn test_file_store_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        assert!(store.save("../outside", b"x").await.is_err());
        assert!(store.load("/etc/passwd").await.is_err());
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_value(b"not json"),
            Err(CheckpointError::Corrupted(_))
        ));
    }
}
