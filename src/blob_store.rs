use crate::TrackerError;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Whole-object key/value storage for partitions and cached tables.
///
/// `put` replaces the object atomically: readers see the old bytes or the
/// new bytes, never a mix. `get` on an absent key is `TrackerError::NotFound`.
pub trait BlobStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Vec<u8>, TrackerError>;
    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), TrackerError>;
    /// `None` when the object does not exist.
    fn last_modified(&self, key: &str) -> Result<Option<DateTime<Utc>>, TrackerError>;

    fn exists(&self, key: &str) -> Result<bool, TrackerError> {
        Ok(self.last_modified(key)?.is_some())
    }
}

impl<T: BlobStore + ?Sized> BlobStore for Box<T> {
    fn get(&self, key: &str) -> Result<Vec<u8>, TrackerError> {
        (**self).get(key)
    }

    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), TrackerError> {
        (**self).put(key, bytes)
    }

    fn last_modified(&self, key: &str) -> Result<Option<DateTime<Utc>>, TrackerError> {
        (**self).last_modified(key)
    }
}

/// Blobs as files under a root directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key.trim_start_matches('/'))
    }
}

impl BlobStore for FsBlobStore {
    fn get(&self, key: &str) -> Result<Vec<u8>, TrackerError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(TrackerError::NotFound(key.to_string())),
            Err(e) => Err(TrackerError::Io(e)),
        }
    }

    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), TrackerError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(TrackerError::Io)?;
        }
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TrackerError::InvalidArgument(format!("blob key has no file name: {}", key)))?;
        let temp_path = path.with_file_name(format!(
            ".{}.tmp-{}-{}",
            file_name,
            std::process::id(),
            uuid::Uuid::new_v4().simple()
        ));

        let written = fs::File::create(&temp_path).and_then(|mut file| {
            file.write_all(&bytes)?;
            file.sync_all()?;
            drop(file);
            fs::rename(&temp_path, &path)
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(TrackerError::Io(e));
        }
        Ok(())
    }

    fn last_modified(&self, key: &str) -> Result<Option<DateTime<Utc>>, TrackerError> {
        match fs::metadata(self.path_for(key)) {
            Ok(meta) => Ok(Some(DateTime::<Utc>::from(meta.modified().map_err(TrackerError::Io)?))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TrackerError::Io(e)),
        }
    }
}

/// In-process store for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: Mutex<BTreeMap<String, (Vec<u8>, DateTime<Utc>)>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object with an explicit modification time.
    pub fn put_with_timestamp(&self, key: &str, bytes: Vec<u8>, modified: DateTime<Utc>) -> Result<(), TrackerError> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| TrackerError::Storage("memory store lock poisoned".to_string()))?;
        objects.insert(key.to_string(), (bytes, modified));
        Ok(())
    }

    pub fn keys(&self) -> Vec<String> {
        match self.objects.lock() {
            Ok(objects) => objects.keys().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &str) -> Result<Vec<u8>, TrackerError> {
        let objects = self
            .objects
            .lock()
            .map_err(|_| TrackerError::Storage("memory store lock poisoned".to_string()))?;
        objects
            .get(key)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| TrackerError::NotFound(key.to_string()))
    }

    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), TrackerError> {
        self.put_with_timestamp(key, bytes, Utc::now())
    }

    fn last_modified(&self, key: &str) -> Result<Option<DateTime<Utc>>, TrackerError> {
        let objects = self
            .objects
            .lock()
            .map_err(|_| TrackerError::Storage("memory store lock poisoned".to_string()))?;
        Ok(objects.get(key).map(|(_, modified)| *modified))
    }
}
