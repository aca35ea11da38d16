use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use thiserror::Error;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::trace::TraceLayer;

pub mod config;
pub mod delivery;
pub mod edge;
pub mod gateway;
pub mod key;
pub mod source;
pub mod store;
pub mod transform;

use crate::config::GatewayConfig;
use crate::delivery::{DeliveryError, PendingResponse};
use crate::gateway::{Gateway, GatewayRequest};
use crate::store::ObjectStore;
use crate::transform::Transform;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Source unavailable ({status}): {message}")]
    SourceUnavailable { status: u16, message: String },
    #[error("Transformation error: {0}")]
    TransformFailed(String),
    #[error("Cache write failed: {0}")]
    CacheWriteFailed(String),
    #[error("Cache read failed: {0}")]
    CacheReadFailed(String),
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),
}

impl GatewayError {
    pub fn status(&self) -> u16 {
        match self {
            GatewayError::SourceUnavailable { status, .. } => *status,
            _ => 500,
        }
    }

    /// Error code sent alongside the status in a structured error delivery.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::TransformFailed(_) => "TransformFailed",
            _ => match self.status() {
                404 => "NoSuchKey",
                403 => "AccessDenied",
                400..=499 => "InvalidRequest",
                _ => "InternalError",
            },
        }
    }
}

impl From<DeliveryError> for GatewayError {
    fn from(err: DeliveryError) -> Self {
        GatewayError::DeliveryFailed(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

async fn image_handler(
    State(gateway): State<Arc<Gateway>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let accept = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok());
    let path = source::decode_path(uri.path());
    let request = GatewayRequest::new(path, uri.query().unwrap_or(""), accept);

    let (sink, delivered) = PendingResponse::channel();
    match gateway.handle(&request, &sink).await {
        Ok(outcome) => tracing::debug!("Completed {} with {:?}", request.path, outcome),
        Err(e) => {
            tracing::error!("Failed to deliver {}: {}", request.path, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    }

    match delivered.await {
        Ok(delivery) => delivery.into_response(),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "No response delivered").into_response(),
    }
}

/// Builds the gateway router: observability endpoints plus the image route,
/// optionally behind the edge normalizer and rate limiting.
pub fn router(
    config: GatewayConfig,
    variants: Arc<dyn ObjectStore>,
    sources: Arc<dyn ObjectStore>,
    transformer: Arc<dyn Transform>,
) -> Router {
    let config = Arc::new(config);
    let gateway = Arc::new(Gateway::new(config.clone(), variants, sources, transformer));

    // Observability endpoints - NO rate limiting
    let observability_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler));

    let mut image_routes = Router::new()
        .route("/*path", get(image_handler))
        .with_state(gateway);

    if config.edge_normalize {
        tracing::info!("Edge normalization enabled");
        image_routes = image_routes.layer(middleware::from_fn_with_state(config.clone(), edge::normalize_uri));
    }

    if let Some(limit) = config.rate_limit {
        match GovernorConfigBuilder::default()
            .per_second(limit.per_second)
            .burst_size(limit.burst_size)
            .finish()
        {
            Some(governor_conf) => {
                tracing::info!(
                    "Router configured with rate limiting: {}/sec, burst {}",
                    limit.per_second, limit.burst_size
                );
                image_routes = image_routes.layer(GovernorLayer {
                    config: Box::leak(Box::new(governor_conf)),
                });
            }
            None => tracing::warn!("Invalid rate limit {:?}, rate limiting disabled", limit),
        }
    } else {
        tracing::info!("Rate limiting disabled");
    }

    Router::new()
        .merge(observability_routes)
        .merge(image_routes)
        .layer(TraceLayer::new_for_http())
}

// ====================================================================================
// OBSERVABILITY
// ====================================================================================

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics tracking
pub struct Metrics {
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub transforms: AtomicU64,
    pub originals: AtomicU64,
    pub errors: AtomicU64,
    pub cache_read_failures: AtomicU64,
    pub cache_write_failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            transforms: AtomicU64::new(0),
            originals: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            cache_read_failures: AtomicU64::new(0),
            cache_write_failures: AtomicU64::new(0),
        }
    }

    /// Prometheus text exposition of every counter.
    pub fn render(&self) -> String {
        let counters = [
            ("cache_hits", "Total number of cache hits", &self.cache_hits),
            ("cache_misses", "Total number of cache misses", &self.cache_misses),
            ("transforms", "Total number of image transformations", &self.transforms),
            ("originals", "Total number of unmodified source deliveries", &self.originals),
            ("errors", "Total number of error deliveries", &self.errors),
            ("cache_read_failures", "Variant store reads that failed and counted as a miss", &self.cache_read_failures),
            ("cache_write_failures", "Variant store writes that failed", &self.cache_write_failures),
        ];
        let mut out = String::new();
        for (name, help, counter) in counters {
            out.push_str(&format!(
                "# HELP imagegate_{name}_total {help}\n# TYPE imagegate_{name}_total counter\nimagegate_{name}_total {}\n",
                counter.load(Ordering::Relaxed)
            ));
        }
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static::lazy_static! {
    pub static ref METRICS: Metrics = Metrics::new();
}

/// Health check endpoint
async fn health_handler() -> impl IntoResponse {
    use serde_json::json;

    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "imagegate"
    }))
}

/// Metrics endpoint (Prometheus-compatible plain text)
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        METRICS.render(),
    )
}
