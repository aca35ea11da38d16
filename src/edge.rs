use crate::config::{GatewayConfig, TransformBounds};
use crate::key::EdgeKey;
use crate::source::{decode_path, encode_path, SourceRef};
use crate::transform::params::{RawTransformQuery, TransformSpec};
use axum::{
    body::Body,
    extract::State,
    http::{header, Request, Uri},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rewrite {
    Unchanged,
    /// Absolute path of the edge-tier canonical key.
    Canonical(String),
}

/// Canonicalizes a request before it reaches any cache. Paths that are
/// already canonical edge keys are left alone, so applying the rewrite twice
/// gives the same result as applying it once.
pub fn rewrite(path: &str, query: &RawTransformQuery, accept: Option<&str>, bounds: &TransformBounds) -> Rewrite {
    if query.wants_original() || EdgeKey::decode(path, bounds).is_ok() {
        return Rewrite::Unchanged;
    }
    let Some(source) = SourceRef::parse(path) else {
        return Rewrite::Unchanged;
    };
    let spec = TransformSpec::normalize(query, accept, &source.extension, bounds);
    Rewrite::Canonical(format!("/{}", EdgeKey::encode(&source, &spec)))
}

/// Axum middleware that rewrites the request URI to its canonical edge path.
/// `rewrite` sees the decoded path; the new URI is escaped again. The query
/// string is dropped from rewritten URIs.
pub async fn normalize_uri(
    State(config): State<Arc<GatewayConfig>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let query = RawTransformQuery::from_query(req.uri().query().unwrap_or(""));
    let accept = req.headers().get(header::ACCEPT).and_then(|v| v.to_str().ok());

    let path = decode_path(req.uri().path());

    if let Rewrite::Canonical(path) = rewrite(&path, &query, accept, &config.bounds) {
        let path = encode_path(&path);
        match path.parse::<Uri>() {
            Ok(uri) => {
                tracing::debug!("Rewrote {} to {}", req.uri(), uri);
                *req.uri_mut() = uri;
            }
            Err(e) => tracing::warn!("Keeping {}: rewritten path {} is not a valid URI: {}", req.uri(), path, e),
        }
    }

    next.run(req).await
}
