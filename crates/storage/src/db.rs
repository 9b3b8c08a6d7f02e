//! sled database wrapper with serialization helpers.

use qbit_core::Hash;
use sled::Db;
use std::path::Path;
use thiserror::Error;

/// Storage errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Stored chain is corrupted: {0}")]
    Corrupted(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Wrapper around sled database with serialization helpers.
///
/// Cloning is cheap and every clone refers to the same database.
#[derive(Clone)]
pub struct Storage {
    db: Db,
}

impl Storage {
    /// Open a database at the given path.
    ///
    /// sled locks the directory, so a second process opening the same path
    /// fails while a node is running.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Open an in-memory database (for testing).
    pub fn open_temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Store a serializable value.
    pub fn put<K, V>(&self, key: K, value: &V) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: serde::Serialize,
    {
        let encoded = bincode::serialize(value)?;
        self.db.insert(key.as_ref(), encoded)?;
        Ok(())
    }

    /// Retrieve and deserialize a value.
    pub fn get<K, V>(&self, key: K) -> Result<Option<V>>
    where
        K: AsRef<[u8]>,
        V: serde::de::DeserializeOwned,
    {
        match self.db.get(key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Keys starting with `prefix`.
    pub fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.db
            .scan_prefix(prefix)
            .keys()
            .map(|k| k.map(|k| k.to_vec()).map_err(StorageError::from))
            .collect()
    }

    /// Apply multiple operations atomically.
    ///
    /// Either every operation lands or none does, which is what keeps a crash
    /// in the middle of a reorg from leaving a half-written chain.
    pub fn batch(&self, operations: Vec<BatchOp>) -> Result<()> {
        let mut batch = sled::Batch::default();
        for op in operations {
            match op {
                BatchOp::Insert { key, value } => batch.insert(key, value),
                BatchOp::Remove { key } => batch.remove(key),
            }
        }
        self.db.apply_batch(batch)?;
        Ok(())
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    // =========================================================================
    // Key Construction Helpers
    // =========================================================================

    /// Format: "block:height:{height}"
    pub fn block_height_key(height: u64) -> Vec<u8> {
        format!("block:height:{}", height).into_bytes()
    }

    /// Format: "block:hash:" + hash_bytes
    pub fn block_hash_key(hash: &Hash) -> Vec<u8> {
        let mut key = b"block:hash:".to_vec();
        key.extend_from_slice(&hash.0);
        key
    }
}

/// Batch operation for atomic updates.
pub enum BatchOp {
    Insert { key: Vec<u8>, value: Vec<u8> },
    Remove { key: Vec<u8> },
}

impl BatchOp {
    /// An insert of a bincode-encoded value.
    pub fn put<V: serde::Serialize>(key: impl Into<Vec<u8>>, value: &V) -> Result<Self> {
        Ok(BatchOp::Insert {
            key: key.into(),
            value: bincode::serialize(value)?,
        })
    }

    pub fn remove(key: impl Into<Vec<u8>>) -> Self {
        BatchOp::Remove { key: key.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_temporary() {
        let storage = Storage::open_temporary().unwrap();
        assert!(storage.db.is_empty());
    }

    #[test]
    fn test_put_get_remove() {
        let storage = Storage::open_temporary().unwrap();

        storage.put("key1", &42u64).unwrap();
        let value: Option<u64> = storage.get("key1").unwrap();
        assert_eq!(value, Some(42));

        let missing: Option<u64> = storage.get("missing").unwrap();
        assert_eq!(missing, None);

        storage.batch(vec![BatchOp::remove("key1")]).unwrap();
        assert_eq!(storage.get::<_, u64>("key1").unwrap(), None);
    }

    #[test]
    fn test_clones_share_data() {
        let storage = Storage::open_temporary().unwrap();
        let other = storage.clone();
        storage.put("shared", &7u32).unwrap();
        assert_eq!(other.get::<_, u32>("shared").unwrap(), Some(7));
    }

    #[test]
    fn test_batch_operations() {
        let storage = Storage::open_temporary().unwrap();
        storage.put("stale", &0u64).unwrap();

        let ops = vec![
            BatchOp::put("a", &1u64).unwrap(),
            BatchOp::put("b", &2u64).unwrap(),
            BatchOp::remove("stale"),
        ];
        storage.batch(ops).unwrap();

        assert_eq!(storage.get::<_, u64>("a").unwrap(), Some(1));
        assert_eq!(storage.get::<_, u64>("b").unwrap(), Some(2));
        assert_eq!(storage.get::<_, u64>("stale").unwrap(), None);
    }

    #[test]
    fn test_keys_with_prefix() {
        let storage = Storage::open_temporary().unwrap();
        storage.put(Storage::block_height_key(1), &1u8).unwrap();
        storage.put(Storage::block_height_key(2), &2u8).unwrap();
        storage.put("other", &3u8).unwrap();

        let keys = storage.keys_with_prefix(b"block:height:").unwrap();
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_key_construction() {
        assert_eq!(Storage::block_height_key(42), b"block:height:42");
        assert!(Storage::block_hash_key(&Hash([0xBB; 32])).starts_with(b"block:hash:"));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = Storage::open(dir.path()).unwrap();
            storage.put("height", &5u64).unwrap();
            storage.flush().unwrap();
        }
        let storage = Storage::open(dir.path()).unwrap();
        assert_eq!(storage.get::<_, u64>("height").unwrap(), Some(5));
    }
}
