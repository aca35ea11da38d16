use crate::store::{content_type_for_extension, ObjectHead, ObjectStore, PutObject, StoreError, StoredObject};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tokio::fs;

const SIDECAR_SUFFIX: &str = ".meta.json";

#[derive(Serialize, Deserialize, Debug, Clone)]
struct Sidecar {
    content_type: String,
    cache_control: String,
    storage_class: String,
}

/// Filesystem tree store. Keys map to relative paths under `dir`; metadata
/// written by `put` lives in a `<file>.meta.json` sidecar, otherwise the
/// content type is guessed from the extension.
pub struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let rel = Path::new(key);
        let safe = !key.is_empty()
            && rel.components().all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(rel))
    }

    fn sidecar_for(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(SIDECAR_SUFFIX);
        PathBuf::from(name)
    }

    async fn read_sidecar(path: &Path) -> Option<Sidecar> {
        let raw = fs::read(Self::sidecar_for(path)).await.ok()?;
        serde_json::from_slice(&raw).ok()
    }

    fn guessed_type(path: &Path) -> Option<String> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(content_type_for_extension)
            .map(str::to_owned)
    }
}

#[async_trait::async_trait]
impl ObjectStore for DiskStore {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError> {
        let path = self.path_for(key)?;
        let body = match fs::read(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            // A directory at the key is not an object.
            Err(_) if path.is_dir() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let sidecar = Self::read_sidecar(&path).await;

        Ok(Some(StoredObject {
            body: body.into(),
            content_type: sidecar
                .as_ref()
                .map(|s| s.content_type.clone())
                .or_else(|| Self::guessed_type(&path)),
            content_disposition: None,
            cache_control: sidecar.map(|s| s.cache_control),
        }))
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectHead>, StoreError> {
        let path = self.path_for(key)?;
        let meta = match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let content_type = match Self::read_sidecar(&path).await {
            Some(s) => Some(s.content_type),
            None => Self::guessed_type(&path),
        };
        Ok(Some(ObjectHead { content_type, content_length: Some(meta.len()) }))
    }

    async fn put(&self, key: &str, object: PutObject) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let sidecar = Sidecar {
            content_type: object.content_type,
            cache_control: object.cache_control,
            storage_class: object.storage_class,
        };
        let sidecar = serde_json::to_vec(&sidecar).map_err(|e| StoreError::Backend(e.to_string()))?;

        fs::write(&path, &object.body).await?;
        fs::write(Self::sidecar_for(&path), sidecar).await?;
        Ok(())
    }
}
