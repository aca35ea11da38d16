//! Get-or-generate-and-store orchestration.
//!
//! Per request: `LOOKUP -> HIT | MISS`, `MISS -> FETCH_SOURCE -> TRANSFORM ->
//! STORE_AND_RESPOND`. Source and transform failures end in a structured error
//! delivery; cache read and write failures are absorbed.

use crate::config::GatewayConfig;
use crate::delivery::{etag_for_key, Delivery, ResponseSink};
use crate::key::{EdgeKey, OriginKey};
use crate::source::SourceRef;
use crate::store::{ObjectStore, PutObject, StoredObject};
use crate::transform::params::{RawTransformQuery, TransformSpec};
use crate::transform::Transform;
use crate::{GatewayError, Result, METRICS};
use mime::Mime;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// One inbound request as seen by the gateway.
#[derive(Debug, Clone, Default)]
pub struct GatewayRequest {
    pub path: String,
    pub query: RawTransformQuery,
    pub accept: Option<String>,
}

impl GatewayRequest {
    pub fn new(path: impl Into<String>, query: &str, accept: Option<&str>) -> Self {
        Self {
            path: path.into(),
            query: RawTransformQuery::from_query(query),
            accept: accept.map(str::to_owned),
        }
    }
}

/// How a request was completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Source delivered unmodified.
    Original,
    Hit { key: String },
    Generated { key: String, stored: bool },
    /// A structured error was delivered.
    Failed { status: u16 },
}

enum Plan {
    Original { key: String },
    Variant { source: SourceRef, spec: TransformSpec, key: String },
}

pub struct Gateway {
    config: Arc<GatewayConfig>,
    variants: Arc<dyn ObjectStore>,
    sources: Arc<dyn ObjectStore>,
    transformer: Arc<dyn Transform>,
}

impl Gateway {
    pub fn new(
        config: Arc<GatewayConfig>,
        variants: Arc<dyn ObjectStore>,
        sources: Arc<dyn ObjectStore>,
        transformer: Arc<dyn Transform>,
    ) -> Self {
        Self { config, variants, sources, transformer }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Completes `request` through `sink`. Only a failure of the sink itself
    /// is returned as an error.
    pub async fn handle(&self, request: &GatewayRequest, sink: &dyn ResponseSink) -> Result<Outcome> {
        tracing::debug!(
            "Processing image request: path={}, query={:?}, accept={:?}",
            request.path, request.query, request.accept
        );

        let outcome = match self.plan(request).await {
            Ok(Plan::Original { key }) => self.respond_original(&key, sink).await,
            Ok(Plan::Variant { source, spec, key }) => self.respond_variant(&source, &spec, key, sink).await,
            Err(failure) => Err(failure),
        };

        match outcome {
            Ok(outcome) => Ok(outcome),
            Err(e @ GatewayError::DeliveryFailed(_)) => Err(e),
            Err(failure) => self.respond_failure(failure, sink).await,
        }
    }

    async fn plan(&self, request: &GatewayRequest) -> Result<Plan> {
        let canonical = if self.config.accept_canonical_paths {
            EdgeKey::decode(&request.path, &self.config.bounds).ok()
        } else {
            None
        };

        let source = match &canonical {
            Some((source, _)) => Some(source.clone()),
            None => SourceRef::parse(&request.path),
        };
        // The original flag wins even on a canonical path; any other query
        // parameter of a canonical path is ignored.
        let source = match source {
            Some(source) if request.query.wants_original() => {
                return Ok(Plan::Original { key: source.key() })
            }
            Some(source) => source,
            None => {
                let key = request.path.trim_start_matches('/').to_string();
                return Ok(Plan::Original { key });
            }
        };

        let source_key = source.key();
        match self.sources.head(&source_key).await {
            Ok(Some(head)) => {
                if let Some(ct) = head.content_type.as_deref() {
                    if !is_image(ct) {
                        tracing::debug!("Ignoring non-image content type {} for {}", ct, source_key);
                        return Ok(Plan::Original { key: source_key });
                    }
                }
            }
            Ok(None) => {
                return Err(GatewayError::SourceUnavailable {
                    status: 404,
                    message: format!("No source object at {}", source_key),
                })
            }
            Err(e) => {
                tracing::error!("Error checking object type for {}: {}", source_key, e);
                return Err(GatewayError::SourceUnavailable { status: e.status(), message: e.to_string() });
            }
        }

        Ok(match canonical {
            Some((source, spec)) => {
                let key = EdgeKey::encode(&source, &spec);
                Plan::Variant { source, spec, key }
            }
            None => {
                let spec = TransformSpec::normalize(
                    &request.query,
                    request.accept.as_deref(),
                    &source.extension,
                    &self.config.bounds,
                );
                let key = OriginKey::encode(&source, &spec);
                Plan::Variant { source, spec, key }
            }
        })
    }

    async fn respond_original(&self, key: &str, sink: &dyn ResponseSink) -> Result<Outcome> {
        let object = self.fetch_source(key).await?;
        METRICS.originals.fetch_add(1, Ordering::Relaxed);
        sink.deliver(Delivery::Object { object, etag: None }).await?;
        Ok(Outcome::Original)
    }

    async fn respond_variant(
        &self,
        source: &SourceRef,
        spec: &TransformSpec,
        key: String,
        sink: &dyn ResponseSink,
    ) -> Result<Outcome> {
        if let Some(object) = self.lookup(&key).await {
            tracing::info!("Cache hit for key={}", key);
            METRICS.cache_hits.fetch_add(1, Ordering::Relaxed);
            let etag = Some(etag_for_key(&key));
            sink.deliver(Delivery::Object { object, etag }).await?;
            return Ok(Outcome::Hit { key });
        }
        METRICS.cache_misses.fetch_add(1, Ordering::Relaxed);

        let original = self.fetch_source(&source.key()).await?;
        let transformed = self
            .transformer
            .transform(original.body.clone(), spec)
            .await
            .map_err(|e| GatewayError::TransformFailed(e.to_string()))?;
        METRICS.transforms.fetch_add(1, Ordering::Relaxed);

        let put = PutObject {
            body: transformed.body.clone(),
            content_type: transformed.content_type.clone(),
            cache_control: self.config.cache_control.clone(),
            storage_class: self.config.storage_class.clone(),
        };
        let object = StoredObject {
            body: transformed.body,
            content_type: Some(transformed.content_type),
            content_disposition: original.content_disposition,
            cache_control: Some(self.config.cache_control.clone()),
        };
        let etag = Some(etag_for_key(&key));

        tracing::info!("Put variant with key={} & deliver", key);
        let (stored, delivered) = tokio::join!(
            self.variants.put(&key, put),
            sink.deliver(Delivery::Object { object, etag }),
        );

        let stored = match stored {
            Ok(()) => true,
            Err(e) => {
                let failure = GatewayError::CacheWriteFailed(e.to_string());
                tracing::warn!("Failed to cache variant {}: {}", key, failure);
                METRICS.cache_write_failures.fetch_add(1, Ordering::Relaxed);
                false
            }
        };
        delivered?;
        Ok(Outcome::Generated { key, stored })
    }

    /// Variant lookup. Errors and empty bodies count as a miss.
    async fn lookup(&self, key: &str) -> Option<StoredObject> {
        match self.variants.get(key).await {
            Ok(Some(object)) if !object.body.is_empty() => Some(object),
            Ok(_) => None,
            Err(e) => {
                let failure = GatewayError::CacheReadFailed(e.to_string());
                tracing::warn!("Get variant {} error: {}", key, failure);
                METRICS.cache_read_failures.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn fetch_source(&self, key: &str) -> Result<StoredObject> {
        match self.sources.get(key).await {
            Ok(Some(object)) => Ok(object),
            Ok(None) => Err(GatewayError::SourceUnavailable {
                status: 404,
                message: format!("No source object at {}", key),
            }),
            Err(e) => Err(GatewayError::SourceUnavailable { status: e.status(), message: e.to_string() }),
        }
    }

    async fn respond_failure(&self, failure: GatewayError, sink: &dyn ResponseSink) -> Result<Outcome> {
        tracing::error!("Request failed: {}", failure);
        METRICS.errors.fetch_add(1, Ordering::Relaxed);
        let status = failure.status();
        sink.deliver(Delivery::Error {
            status,
            code: failure.code().to_string(),
            message: failure.to_string(),
        })
        .await?;
        Ok(Outcome::Failed { status })
    }
}

fn is_image(content_type: &str) -> bool {
    match content_type.parse::<Mime>() {
        Ok(m) => m.type_() == mime::IMAGE,
        Err(_) => content_type.trim().to_ascii_lowercase().starts_with("image/"),
    }
}
