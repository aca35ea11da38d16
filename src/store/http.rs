use crate::source::encode_path;
use crate::store::{ObjectHead, ObjectStore, PutObject, StoreError, StoredObject};
use bytes::BytesMut;
use futures::StreamExt;
use reqwest::{header, Client, Response, StatusCode};

/// Read-only source store backed by an upstream HTTP origin.
///
/// Objects are fetched from `{base_url}/{key}`:
/// 1. 404 maps to a missing object, any other non-2xx to `StoreError::Status`
/// 2. Content-Length above `max_size` is rejected before download
/// 3. The body is streamed with the same limit so a lying header cannot
///    exhaust memory
pub struct HttpOrigin {
    client: Client,
    base_url: String,
    max_size: usize,
}

impl HttpOrigin {
    pub fn new(base_url: impl Into<String>, max_size: usize) -> Self {
        Self::with_client(Client::new(), base_url, max_size)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>, max_size: usize) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url, max_size }
    }

    pub fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, encode_path(key.trim_start_matches('/')))
    }

    /// `Ok(None)` for 404, the response for 2xx, `StoreError::Status` otherwise.
    fn check_status(resp: Response) -> Result<Option<Response>, StoreError> {
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
                message: format!("Upstream status: {}", status),
            });
        }
        Ok(Some(resp))
    }

    fn header(resp: &Response, name: header::HeaderName) -> Option<String> {
        resp.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }
}

fn network_error(e: reqwest::Error) -> StoreError {
    StoreError::Status {
        status: e.status().map(|s| s.as_u16()).unwrap_or(502),
        message: e.to_string(),
    }
}

#[async_trait::async_trait]
impl ObjectStore for HttpOrigin {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError> {
        let url = self.url_for(key);
        tracing::debug!("Fetching source {}", url);
        let resp = self.client.get(&url).send().await.map_err(network_error)?;
        let Some(resp) = Self::check_status(resp)? else { return Ok(None) };

        if let Some(len) = resp.content_length() {
            if len as usize > self.max_size {
                return Err(StoreError::TooLarge(self.max_size));
            }
        }

        let content_type = Self::header(&resp, header::CONTENT_TYPE);
        let content_disposition = Self::header(&resp, header::CONTENT_DISPOSITION);
        let cache_control = Self::header(&resp, header::CACHE_CONTROL);

        let mut buf = BytesMut::with_capacity(8192);
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await.transpose().map_err(network_error)? {
            if buf.len() + chunk.len() > self.max_size {
                return Err(StoreError::TooLarge(self.max_size));
            }
            buf.extend_from_slice(&chunk);
        }

        Ok(Some(StoredObject {
            body: buf.freeze(),
            content_type,
            content_disposition,
            cache_control,
        }))
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectHead>, StoreError> {
        let resp = self.client.head(self.url_for(key)).send().await.map_err(network_error)?;
        let Some(resp) = Self::check_status(resp)? else { return Ok(None) };
        Ok(Some(ObjectHead {
            content_type: Self::header(&resp, header::CONTENT_TYPE),
            content_length: resp.content_length(),
        }))
    }

    async fn put(&self, _key: &str, _object: PutObject) -> Result<(), StoreError> {
        Err(StoreError::ReadOnly)
    }
}
