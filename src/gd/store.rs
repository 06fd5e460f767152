//! Durable record of stream-set membership and completed prefixes.
//!
//! Only persistent reliability tiers are written. A record is the whole
//! stream set: every persisted stream's prefix plus, on the sending side, the
//! message ranges still in doubt so they can be resent after a restart.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::{StreamId, StreamKey, TickRange};

use super::control::CompletedPrefix;
use super::error::StoreError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRange {
    pub key: StreamKey,
    pub range: TickRange,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSetData {
    pub stream_id: StreamId,
    pub prefixes: Vec<CompletedPrefix>,
    #[serde(default)]
    pub messages: Vec<StoredRange>,
}

impl StreamSetData {
    pub fn new(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            prefixes: Vec::new(),
            messages: Vec::new(),
        }
    }

    pub fn prefix_for(&self, key: StreamKey) -> Option<u64> {
        self.prefixes
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.completed_prefix)
    }
}

pub trait StreamStore: Send + Sync {
    fn persist(&self, data: &StreamSetData) -> Result<(), StoreError>;
    fn restore(&self, stream_id: StreamId) -> Result<Option<StreamSetData>, StoreError>;
    fn remove(&self, stream_id: StreamId) -> Result<(), StoreError>;
    fn stream_ids(&self) -> Result<Vec<StreamId>, StoreError>;
}

/// One JSON file per stream set, replaced atomically on every persist.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, stream_id: StreamId) -> PathBuf {
        self.dir.join(format!("{}.json", stream_id.as_uuid()))
    }
}

impl StreamStore for JsonFileStore {
    fn persist(&self, data: &StreamSetData) -> Result<(), StoreError> {
        let path = self.path_for(data.stream_id);
        let bytes = serde_json::to_vec_pretty(data).map_err(|e| StoreError::Codec {
            stream_id: data.stream_id,
            reason: e.to_string(),
        })?;
        atomic_write(&self.dir, &path, &bytes)
    }

    fn restore(&self, stream_id: StreamId) -> Result<Option<StreamSetData>, StoreError> {
        let path = self.path_for(stream_id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        let data: StreamSetData =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Codec {
                stream_id,
                reason: e.to_string(),
            })?;
        if data.stream_id != stream_id {
            return Err(StoreError::Codec {
                stream_id,
                reason: format!("record names stream {}", data.stream_id),
            });
        }
        Ok(Some(data))
    }

    fn remove(&self, stream_id: StreamId) -> Result<(), StoreError> {
        let path = self.path_for(stream_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    fn stream_ids(&self) -> Result<Vec<StreamId>, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match StreamId::parse_str(stem) {
                Ok(id) => ids.push(id),
                Err(err) => tracing::warn!(path = %path.display(), "skipping stray store file: {err}"),
            }
        }
        ids.sort();
        Ok(ids)
    }
}

fn atomic_write(dir: &Path, path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let io = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let temp = tempfile::NamedTempFile::new_in(dir).map_err(io)?;
    fs::write(temp.path(), data).map_err(io)?;
    temp.persist(path).map_err(|e| io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::core::{MessageRef, Priority, Reliability};

    fn key() -> StreamKey {
        StreamKey::new(Priority::DEFAULT, Reliability::AssuredPersistent)
    }

    #[test]
    fn persist_restore_remove() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = JsonFileStore::open(tmp.path().join("streams")).unwrap();
        let id = StreamId::random();
        assert!(store.restore(id).unwrap().is_none());

        let mut data = StreamSetData::new(id);
        data.prefixes.push(CompletedPrefix {
            key: key(),
            completed_prefix: 17,
        });
        data.messages.push(StoredRange {
            key: key(),
            range: TickRange::value(18, MessageRef::new(3)),
        });
        store.persist(&data).unwrap();
        assert_eq!(store.stream_ids().unwrap(), vec![id]);

        let restored = store.restore(id).unwrap().unwrap();
        assert_eq!(restored, data);
        assert_eq!(restored.prefix_for(key()), Some(17));

        store.remove(id).unwrap();
        store.remove(id).unwrap();
        assert!(store.stream_ids().unwrap().is_empty());
    }

    #[test]
    fn malformed_record_is_a_codec_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = JsonFileStore::open(tmp.path()).unwrap();
        let id = StreamId::random();
        fs::write(store.path_for(id), b"not json").unwrap();
        assert!(matches!(
            store.restore(id),
            Err(StoreError::Codec { .. })
        ));
    }
}
