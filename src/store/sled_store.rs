use crate::store::{ObjectHead, ObjectStore, PutObject, StoreError, StoredObject};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sled::Db;
use std::path::Path;

/// Metadata stored alongside each object
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ObjectMetadata {
    pub key: String,
    pub content_type: String,
    pub cache_control: String,
    pub storage_class: String,
    pub size: u64,
    pub created_at: i64,
}

/// Sled-backed object store.
///
/// Each object is two records written in one atomic batch: `data:{key}` with
/// the bytes and `meta:{key}` with JSON [`ObjectMetadata`]. Nothing is ever
/// evicted or overwritten in place; a second put for the same key replaces
/// both records with identical content.
pub struct SledStore {
    db: Db,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)
            .map_err(|e| StoreError::Backend(format!("Failed to open Sled database: {}", e)))?;
        Ok(Self { db })
    }

    /// Throwaway database removed on drop.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    fn metadata_key(key: &str) -> String {
        format!("meta:{}", key)
    }

    fn data_key(key: &str) -> String {
        format!("data:{}", key)
    }

    fn metadata(&self, key: &str) -> Result<Option<ObjectMetadata>, StoreError> {
        match self.db.get(Self::metadata_key(key).as_bytes())? {
            Some(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| StoreError::Backend(format!("Corrupt metadata for {}: {}", key, e))),
            None => Ok(None),
        }
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.db.scan_prefix(b"meta:").count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl ObjectStore for SledStore {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError> {
        let data = match self.db.get(Self::data_key(key).as_bytes())? {
            Some(d) => Bytes::copy_from_slice(&d),
            None => return Ok(None),
        };
        let meta = self.metadata(key)?;

        Ok(Some(StoredObject {
            body: data,
            content_type: meta.as_ref().map(|m| m.content_type.clone()),
            content_disposition: None,
            cache_control: meta.map(|m| m.cache_control),
        }))
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectHead>, StoreError> {
        Ok(self.metadata(key)?.map(|m| ObjectHead {
            content_type: Some(m.content_type),
            content_length: Some(m.size),
        }))
    }

    async fn put(&self, key: &str, object: PutObject) -> Result<(), StoreError> {
        let metadata = ObjectMetadata {
            key: key.to_string(),
            content_type: object.content_type,
            cache_control: object.cache_control,
            storage_class: object.storage_class,
            size: object.body.len() as u64,
            created_at: time::OffsetDateTime::now_utc().unix_timestamp(),
        };
        let meta_bytes = serde_json::to_vec(&metadata)
            .map_err(|e| StoreError::Backend(format!("Failed to encode metadata: {}", e)))?;

        let mut batch = sled::Batch::default();
        batch.insert(Self::data_key(key).as_bytes(), object.body.as_ref());
        batch.insert(Self::metadata_key(key).as_bytes(), meta_bytes);
        self.db
            .apply_batch(batch)
            .map_err(|e| StoreError::Backend(format!("Failed to write object: {}", e)))?;

        self.db.flush()?;
        tracing::debug!("Stored object key={} size={}", key, metadata.size);
        Ok(())
    }
}
