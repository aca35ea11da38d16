use crate::store::StoredObject;
use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;

/// What completes a pending request: an object or a structured error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Object { object: StoredObject, etag: Option<String> },
    Error { status: u16, code: String, message: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("response already delivered")]
    AlreadyDelivered,
    #[error("requester is gone")]
    Closed,
}

/// Response-delivery channel. Each request is completed at most once.
#[async_trait::async_trait]
pub trait ResponseSink: Send + Sync {
    async fn deliver(&self, delivery: Delivery) -> Result<(), DeliveryError>;
}

/// HTTP binding: the handler awaits the receiving half and turns the
/// delivery into the axum response.
pub struct PendingResponse {
    tx: Mutex<Option<oneshot::Sender<Delivery>>>,
}

impl PendingResponse {
    pub fn channel() -> (Self, oneshot::Receiver<Delivery>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Mutex::new(Some(tx)) }, rx)
    }
}

#[async_trait::async_trait]
impl ResponseSink for PendingResponse {
    async fn deliver(&self, delivery: Delivery) -> Result<(), DeliveryError> {
        let tx = self
            .tx
            .lock()
            .map_err(|_| DeliveryError::Closed)?
            .take()
            .ok_or(DeliveryError::AlreadyDelivered)?;
        tx.send(delivery).map_err(|_| DeliveryError::Closed)
    }
}

/// Generate an ETag from a cache key
pub fn etag_for_key(key: &str) -> String {
    use sha2::{Digest, Sha256};
    format!("\"{}\"", hex::encode(Sha256::digest(key.as_bytes())))
}

impl IntoResponse for Delivery {
    fn into_response(self) -> Response {
        match self {
            Delivery::Object { object, etag } => {
                let mut headers = HeaderMap::new();
                let content_type = object.content_type.as_deref().unwrap_or("application/octet-stream");
                let pairs = [
                    (header::CONTENT_TYPE, Some(content_type)),
                    (header::CONTENT_DISPOSITION, object.content_disposition.as_deref()),
                    (header::CACHE_CONTROL, object.cache_control.as_deref()),
                    (header::ETAG, etag.as_deref()),
                ];
                for (name, value) in pairs {
                    if let Some(value) = value.and_then(|v| HeaderValue::from_str(v).ok()) {
                        headers.insert(name, value);
                    }
                }
                (headers, Body::from(object.body)).into_response()
            }
            Delivery::Error { status, code, message } => {
                let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (status, Json(serde_json::json!({ "code": code, "message": message }))).into_response()
            }
        }
    }
}
