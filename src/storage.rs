//! Key-value storage backing the persistent flag cache.
//!
//! Two backends are provided: [`InMemoryStore`] for tests and ephemeral
//! clients, and [`FileStore`], which keeps one JSON document per key in a
//! directory. File writes go through a temporary file and a rename, under an
//! exclusive lock file so several processes can share a cache directory.
//! Keys too long for a file name are stored under their SHA-256 digest, with
//! the key kept inside the document.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use fs2::FileExt;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::error::{ErrorCode, Result, SyncError};

const DOCUMENT_EXTENSION: &str = "json";
const HASHED_DOCUMENT_EXTENSION: &str = "hjson";
/// Longest encoded key used directly as a file stem. Most filesystems cap names at 255 bytes.
const MAX_ENCODED_NAME_LEN: usize = 200;
const LOCK_FILE_NAME: &str = "flagkit-cache.lock";

/// Minimal durable map of JSON documents.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    fn set(&self, key: &str, value: &serde_json::Value) -> Result<()>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    fn keys(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<BTreeMap<String, serde_json::Value>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        self.entries.write().insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}

/// Directory-backed store, one `<encoded key>.json` file per key.
#[derive(Debug)]
pub struct FileStore {
    directory: PathBuf,
    lock_file_path: PathBuf,
}

impl FileStore {
    /// Opens (creating if needed) a store rooted at `directory`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory).map_err(|e| {
            SyncError::with_source(
                ErrorCode::CacheWriteError,
                format!("Failed to create cache directory: {}", directory.display()),
                e,
            )
        })?;

        let lock_file_path = directory.join(LOCK_FILE_NAME);
        Ok(Self {
            directory,
            lock_file_path,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, key: &str) -> DocumentPath {
        let name = URL_SAFE_NO_PAD.encode(key.as_bytes());
        if name.len() <= MAX_ENCODED_NAME_LEN {
            return DocumentPath::Encoded(self.directory.join(format!("{}.{}", name, DOCUMENT_EXTENSION)));
        }
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        DocumentPath::Hashed(self.directory.join(format!("{}.{}", digest, HASHED_DOCUMENT_EXTENSION)))
    }

    fn key_for(path: &Path) -> Option<String> {
        let extension = path.extension()?;
        if extension == DOCUMENT_EXTENSION {
            let stem = path.file_stem()?.to_str()?;
            let bytes = URL_SAFE_NO_PAD.decode(stem).ok()?;
            return String::from_utf8(bytes).ok();
        }
        if extension == HASHED_DOCUMENT_EXTENSION {
            let contents = fs::read(path).ok()?;
            let document: serde_json::Value = serde_json::from_slice(&contents).ok()?;
            return document.get("key")?.as_str().map(str::to_string);
        }
        None
    }

    fn acquire_lock(&self) -> Result<File> {
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_file_path)
            .map_err(|e| SyncError::with_source(ErrorCode::CacheWriteError, "Failed to open lock file", e))?;

        lock_file.lock_exclusive().map_err(|e| {
            SyncError::with_source(ErrorCode::CacheWriteError, "Failed to acquire file lock", e)
        })?;

        Ok(lock_file)
    }
}

enum DocumentPath {
    /// File stem is the reversible encoding of the key.
    Encoded(PathBuf),
    /// File stem is a digest; the document is `{"key": .., "value": ..}`.
    Hashed(PathBuf),
}

impl DocumentPath {
    fn path(&self) -> &Path {
        match self {
            DocumentPath::Encoded(path) | DocumentPath::Hashed(path) => path,
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let location = self.path_for(key);
        let path = location.path();
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SyncError::with_source(
                    ErrorCode::CacheReadError,
                    format!("Failed to read cache file: {}", path.display()),
                    e,
                ));
            }
        };

        let document: serde_json::Value = serde_json::from_slice(&contents).map_err(|e| {
            SyncError::with_source(
                ErrorCode::CacheInvalidData,
                format!("Cache file is not valid JSON: {}", path.display()),
                e,
            )
        })?;

        match &location {
            DocumentPath::Encoded(_) => Ok(Some(document)),
            DocumentPath::Hashed(_) => match document {
                serde_json::Value::Object(mut fields)
                    if fields.get("key").and_then(|k| k.as_str()) == Some(key) =>
                {
                    Ok(fields.remove("value"))
                }
                _ => Err(SyncError::new(
                    ErrorCode::CacheInvalidData,
                    format!("Cache file does not hold the requested key: {}", path.display()),
                )),
            },
        }
    }

    fn set(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let location = self.path_for(key);
        let path = location.path();
        let temp_path = path.with_extension("tmp");
        let document = match &location {
            DocumentPath::Encoded(_) => value.clone(),
            DocumentPath::Hashed(_) => serde_json::json!({ "key": key, "value": value }),
        };
        let bytes = serde_json::to_vec(&document).map_err(|e| {
            SyncError::with_source(ErrorCode::CacheWriteError, "Failed to serialize cache document", e)
        })?;

        let lock_file = self.acquire_lock()?;

        let mut file = File::create(&temp_path).map_err(|e| {
            SyncError::with_source(ErrorCode::CacheWriteError, "Failed to create cache file", e)
        })?;
        file.write_all(&bytes)
            .and_then(|_| file.sync_all())
            .map_err(|e| SyncError::with_source(ErrorCode::CacheWriteError, "Failed to write cache file", e))?;
        fs::rename(&temp_path, path).map_err(|e| {
            SyncError::with_source(ErrorCode::CacheWriteError, "Failed to replace cache file", e)
        })?;

        drop(lock_file);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let lock_file = self.acquire_lock()?;
        let result = match fs::remove_file(self.path_for(key).path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::with_source(
                ErrorCode::CacheWriteError,
                "Failed to remove cache file",
                e,
            )),
        };
        drop(lock_file);
        result
    }

    fn keys(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.directory).map_err(|e| {
            SyncError::with_source(ErrorCode::CacheReadError, "Failed to read cache directory", e)
        })?;

        let mut keys: Vec<String> = entries
            .flatten()
            .filter_map(|entry| Self::key_for(&entry.path()))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_store() -> (FileStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path().join("cache")).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_in_memory_roundtrip() {
        let store = InMemoryStore::new();
        store.set("a", &json!({"x": 1})).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(json!({"x": 1})));
        store.remove("a").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_file_store_set_get_remove() {
        let (store, _temp_dir) = create_test_store();
        store.set("flagkit.cache.v2", &json!({"u": 1})).unwrap();

        assert_eq!(store.get("flagkit.cache.v2").unwrap(), Some(json!({"u": 1})));
        assert_eq!(store.keys().unwrap(), vec!["flagkit.cache.v2".to_string()]);

        store.remove("flagkit.cache.v2").unwrap();
        assert!(store.get("flagkit.cache.v2").unwrap().is_none());
        store.remove("flagkit.cache.v2").unwrap();
    }

    #[test]
    fn test_file_store_keys_with_path_characters() {
        let (store, _temp_dir) = create_test_store();
        store.set("users/a:b", &json!(true)).unwrap();
        assert_eq!(store.keys().unwrap(), vec!["users/a:b".to_string()]);
    }

    #[test]
    fn test_file_store_ignores_foreign_files() {
        let (store, _temp_dir) = create_test_store();
        fs::write(store.directory().join("notes.txt"), "hello").unwrap();
        store.set("k", &json!(1)).unwrap();
        assert_eq!(store.keys().unwrap(), vec!["k".to_string()]);
    }

    #[test]
    fn test_file_store_corrupt_document() {
        let (store, _temp_dir) = create_test_store();
        fs::write(store.path_for("bad").path(), "{not json").unwrap();
        let err = store.get("bad").unwrap_err();
        assert_eq!(err.code, ErrorCode::CacheInvalidData);
    }

    #[test]
    fn test_file_store_long_key_uses_hashed_name() {
        let (store, _temp_dir) = create_test_store();
        let key = format!("flagkit.flags.v7.{}", "u".repeat(300));
        store.set(&key, &json!({"on": true})).unwrap();

        assert!(matches!(store.path_for(&key), DocumentPath::Hashed(_)));
        assert_eq!(store.get(&key).unwrap(), Some(json!({"on": true})));
        assert_eq!(store.keys().unwrap(), vec![key.clone()]);

        store.remove(&key).unwrap();
        assert!(store.get(&key).unwrap().is_none());
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = FileStore::open(temp_dir.path()).unwrap();
            store.set("k", &json!({"v": [1, 2]})).unwrap();
        }
        let store = FileStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(json!({"v": [1, 2]})));
    }
}
