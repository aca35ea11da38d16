// Re-export modules
pub mod disk;
pub mod http;
pub mod sled_store;

pub use disk::DiskStore;
pub use http::HttpOrigin;
pub use sled_store::SledStore;

use bytes::Bytes;
use thiserror::Error;

/// An object as returned by a store lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    pub cache_control: Option<String>,
}

impl StoredObject {
    pub fn new(body: impl Into<Bytes>, content_type: Option<String>) -> Self {
        Self { body: body.into(), content_type, content_disposition: None, cache_control: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

/// A write request. Stored variants are immutable, so there is no update path.
#[derive(Debug, Clone)]
pub struct PutObject {
    pub body: Bytes,
    pub content_type: String,
    pub cache_control: String,
    pub storage_class: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("upstream status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("store is read-only")]
    ReadOnly,
    #[error("object exceeds size limit of {0} bytes")]
    TooLarge(usize),
    #[error("io error: {0}")]
    Io(String),
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Status a caller should see when this error ends a request.
    pub fn status(&self) -> u16 {
        match self {
            StoreError::Status { status, .. } => *status,
            StoreError::InvalidKey(_) => 403,
            _ => 500,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Object store collaborator. `get` and `head` return `Ok(None)` for a missing key.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError>;

    async fn head(&self, key: &str) -> Result<Option<ObjectHead>, StoreError>;

    async fn put(&self, key: &str, object: PutObject) -> Result<(), StoreError>;
}

/// Content type guessed from a file extension.
pub fn content_type_for_extension(ext: &str) -> Option<&'static str> {
    match ext.to_ascii_lowercase().as_str() {
        "webp" => Some("image/webp"),
        "jpeg" | "jpg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "avif" => Some("image/avif"),
        "svg" => Some("image/svg+xml"),
        "txt" => Some("text/plain"),
        "json" => Some("application/json"),
        "pdf" => Some("application/pdf"),
        "html" | "htm" => Some("text/html"),
        _ => None,
    }
}
