use async_trait::async_trait;
use mookka::ports::PersistentBackend;
use shared::{Error, Result};
use std::path::Path;
use tracing::{info, warn};

pub const SCHEMA_VERSION: u32 = 1;

const VERSION_KEY: &[u8] = b"schema_version";

/// Sled-backed durable stores. Each store is its own sled tree.
#[derive(Clone)]
pub struct SledBackend {
    db: sled::Db,
}

impl SledBackend {
    /// Open at the current schema version; an older database is wiped.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_versioned(path, SCHEMA_VERSION, clear_all_trees)
    }

    /// Open a Sled database, running `on_upgrade(db, stored_version)` first
    /// when the stored schema version differs from `version`.
    /// Creates the parent directory if it doesn't exist.
    pub fn open_versioned<F>(path: impl AsRef<Path>, version: u32, on_upgrade: F) -> Result<Self>
    where
        F: FnOnce(&sled::Db, Option<u32>) -> Result<()>,
    {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("Failed to create directory: {}", e)))?;
        }

        let db = sled::open(path.as_ref())
            .map_err(|e| Error::Storage(format!("Failed to open Sled database: {}", e)))?;

        let stored = db
            .get(VERSION_KEY)
            .map_err(|e| Error::Storage(format!("Failed to read schema version: {}", e)))?
            .and_then(|bytes| <[u8; 4]>::try_from(&bytes[..]).ok())
            .map(u32::from_be_bytes);

        if stored != Some(version) {
            info!(
                "Upgrading cache database from {:?} to version {}",
                stored, version
            );
            on_upgrade(&db, stored)?;
            db.insert(VERSION_KEY, &version.to_be_bytes()[..])
                .map_err(|e| Error::Storage(format!("Failed to write schema version: {}", e)))?;
            db.flush()
                .map_err(|e| Error::Storage(format!("Failed to flush database: {}", e)))?;
        }

        Ok(Self { db })
    }

    /// Underlying database, for sharing with other adapters
    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    fn tree(&self, store: &str) -> Result<sled::Tree> {
        self.db
            .open_tree(store)
            .map_err(|e| Error::Storage(format!("Failed to open store '{}': {}", store, e)))
    }
}

/// Default upgrade hook: drop every named tree
pub fn clear_all_trees(db: &sled::Db, _stored: Option<u32>) -> Result<()> {
    let default_tree = db.name();
    for name in db.tree_names() {
        if name == default_tree {
            continue;
        }
        if let Err(e) = db.drop_tree(&name) {
            warn!(
                "Failed to drop tree '{}' during upgrade: {}",
                String::from_utf8_lossy(&name),
                e
            );
        }
    }
    Ok(())
}

#[async_trait]
impl PersistentBackend for SledBackend {
    async fn get(&self, store: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self
            .tree(store)?
            .get(key.as_bytes())
            .map_err(|e| Error::Storage(format!("Failed to get '{}': {}", key, e)))?;
        Ok(value.map(|bytes| bytes.to_vec()))
    }

    async fn put(&self, store: &str, value: Vec<u8>, key: &str) -> Result<()> {
        let tree = self.tree(store)?;
        // sled syncs in the background; see `flush`
        tree.insert(key.as_bytes(), value)
            .map_err(|e| Error::Storage(format!("Failed to put '{}': {}", key, e)))?;
        Ok(())
    }

    async fn delete(&self, store: &str, key: &str) -> Result<()> {
        self.tree(store)?
            .remove(key.as_bytes())
            .map_err(|e| Error::Storage(format!("Failed to delete '{}': {}", key, e)))?;
        Ok(())
    }

    async fn clear(&self, store: &str) -> Result<()> {
        self.tree(store)?
            .clear()
            .map_err(|e| Error::Storage(format!("Failed to clear store '{}': {}", store, e)))
    }

    async fn all_keys(&self, store: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for result in self.tree(store)?.iter().keys() {
            let key = result
                .map_err(|e| Error::Storage(format!("Failed to iterate store '{}': {}", store, e)))?;
            keys.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(keys)
    }

    async fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| Error::Storage(format!("Failed to flush database: {}", e)))?;
        Ok(())
    }
}

impl std::fmt::Debug for SledBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledBackend")
            .field("trees", &self.db.tree_names().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sled_backend_put_get_delete() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = SledBackend::open(temp_dir.path().join("cache.sled")).unwrap();

        backend.put("entries", b"v1".to_vec(), "a").await.unwrap();
        backend.put("entries", b"v2".to_vec(), "b").await.unwrap();
        backend.put("other", b"x".to_vec(), "a").await.unwrap();

        assert_eq!(backend.get("entries", "a").await.unwrap(), Some(b"v1".to_vec()));
        assert_eq!(
            backend.all_keys("entries").await.unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );

        backend.delete("entries", "a").await.unwrap();
        assert!(backend.get("entries", "a").await.unwrap().is_none());

        backend.clear("entries").await.unwrap();
        assert!(backend.all_keys("entries").await.unwrap().is_empty());
        // stores are independent
        assert_eq!(backend.get("other", "a").await.unwrap(), Some(b"x".to_vec()));
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("cache.sled");

        {
            let backend = SledBackend::open(&path).unwrap();
            for i in 0..50 {
                backend
                    .put("entries", format!("v{}", i).into_bytes(), &format!("k{}", i))
                    .await
                    .unwrap();
            }
            // one sync for the whole batch
            backend.flush().await.unwrap();
        }

        let reopened = SledBackend::open(&path).unwrap();
        assert_eq!(reopened.get("entries", "k0").await.unwrap(), Some(b"v0".to_vec()));
        assert_eq!(reopened.get("entries", "k49").await.unwrap(), Some(b"v49".to_vec()));
        assert_eq!(reopened.all_keys("entries").await.unwrap().len(), 50);
    }

    #[tokio::test]
    async fn test_version_bump_runs_upgrade_hook() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("cache.sled");

        {
            let backend = SledBackend::open_versioned(&path, 1, clear_all_trees).unwrap();
            backend.put("entries", b"old".to_vec(), "k").await.unwrap();
        }

        let mut seen = None;
        let upgraded = SledBackend::open_versioned(&path, 2, |db, stored| {
            seen = Some(stored);
            clear_all_trees(db, stored)
        })
        .unwrap();

        assert_eq!(seen, Some(Some(1)));
        assert!(upgraded.get("entries", "k").await.unwrap().is_none());
    }

    #[test]
    fn test_same_version_skips_upgrade_hook() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("cache.sled");
        drop(SledBackend::open(&path).unwrap());

        let mut ran = false;
        SledBackend::open_versioned(&path, SCHEMA_VERSION, |_, _| {
            ran = true;
            Ok(())
        })
        .unwrap();
        assert!(!ran);
    }
}
