//! Cache key codecs.
//!
//! Two layouts exist for the same resolved [`TransformSpec`]:
//!
//! * origin: `prefix?/<token>/name.ext`, where the token is the unpadded
//!   base64url form of a fixed-order JSON object `{w,h,m,q,b,f}`;
//! * edge: `prefix?/<mode>/<size>/<quality>/<format>/name.ext`, readable and
//!   usable as a routing pattern. Blur rides on the quality segment (`hb12`).
//!
//! Decoders only accept what the encoders produce for a normalized spec, so
//! `decode(encode(spec)) == spec` and no two specs share a key.

use crate::config::TransformBounds;
use crate::source::SourceRef;
use crate::transform::params::{Quality, ResizeMode, TransformSpec, MAX_BLUR};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("malformed key: {0}")]
    Malformed(String),
    #[error("key is not canonical: {0}")]
    NotCanonical(String),
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct KeyFields {
    w: u32,
    h: u32,
    m: ResizeMode,
    q: Quality,
    b: u8,
    f: String,
}

pub struct OriginKey;

impl OriginKey {
    pub fn token(spec: &TransformSpec) -> String {
        let fields = KeyFields {
            w: spec.width,
            h: spec.height,
            m: spec.mode,
            q: spec.quality,
            b: spec.blur,
            f: spec.format.clone(),
        };
        // Serializing a plain struct of scalars cannot fail.
        let json = serde_json::to_vec(&fields).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn encode(source: &SourceRef, spec: &TransformSpec) -> String {
        source.key_with(&[&Self::token(spec)])
    }

    pub fn decode_token(token: &str) -> Result<TransformSpec, KeyError> {
        let json = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| KeyError::Malformed(e.to_string()))?;
        let fields: KeyFields =
            serde_json::from_slice(&json).map_err(|e| KeyError::Malformed(e.to_string()))?;
        let spec = TransformSpec {
            width: fields.w,
            height: fields.h,
            mode: fields.m,
            quality: fields.q,
            blur: fields.b,
            format: fields.f,
        };
        if Self::token(&spec) != token {
            return Err(KeyError::NotCanonical(token.to_string()));
        }
        Ok(spec)
    }

    pub fn decode(key: &str, bounds: &TransformBounds) -> Result<(SourceRef, TransformSpec), KeyError> {
        let mut segments = key.rsplitn(3, '/');
        let (file, token) = match (segments.next(), segments.next()) {
            (Some(file), Some(token)) => (file, token),
            _ => return Err(KeyError::Malformed(key.to_string())),
        };
        let source = source_from_parts(segments.next(), file, key)?;
        let spec = Self::decode_token(token)?;
        ensure_canonical(&source, &spec, bounds, key)?;
        Ok((source, spec))
    }
}

pub struct EdgeKey;

impl EdgeKey {
    pub fn encode(source: &SourceRef, spec: &TransformSpec) -> String {
        let size = match spec.mode {
            ResizeMode::Width => spec.width.to_string(),
            ResizeMode::Height => spec.height.to_string(),
            ResizeMode::Crop | ResizeMode::Fit => format!("{}x{}", spec.width, spec.height),
        };
        let quality = if spec.blur > 0 {
            format!("{}b{}", spec.quality.token(), spec.blur)
        } else {
            spec.quality.token().to_string()
        };
        source.key_with(&[spec.mode.token(), &size, &quality, &spec.format])
    }

    /// Recovers the source and spec from a canonical edge path. A leading `/`
    /// is ignored.
    pub fn decode(path: &str, bounds: &TransformBounds) -> Result<(SourceRef, TransformSpec), KeyError> {
        let key = path.strip_prefix('/').unwrap_or(path);
        let malformed = || KeyError::Malformed(key.to_string());

        let mut segments = key.rsplitn(6, '/');
        let file = segments.next().ok_or_else(malformed)?;
        let format = segments.next().ok_or_else(malformed)?;
        let quality_segment = segments.next().ok_or_else(malformed)?;
        let size = segments.next().ok_or_else(malformed)?;
        let mode = segments.next().ok_or_else(malformed)?;
        let source = source_from_parts(segments.next(), file, key)?;

        let mode = ResizeMode::from_token(mode).ok_or_else(malformed)?;

        let first = quality_segment.chars().next().map_or(0, char::len_utf8);
        let (quality, blur) = match quality_segment.split_at(first) {
            (q, "") => (q, 0),
            (q, rest) => {
                let digits = rest.strip_prefix('b').ok_or_else(malformed)?;
                (q, digits.parse::<u8>().map_err(|_| malformed())?)
            }
        };
        let quality = Quality::from_token(quality).ok_or_else(malformed)?;

        let parse_dim = |s: &str| s.parse::<u32>().map_err(|_| malformed());
        let (width, height) = match mode {
            ResizeMode::Width => (parse_dim(size)?, bounds.round_height(bounds.default_height as u64)),
            ResizeMode::Height => (bounds.round_width(bounds.default_width as u64), parse_dim(size)?),
            ResizeMode::Crop | ResizeMode::Fit => {
                let (w, h) = size.split_once('x').ok_or_else(malformed)?;
                (parse_dim(w)?, parse_dim(h)?)
            }
        };

        let spec = TransformSpec { width, height, mode, quality, blur, format: format.to_string() };
        ensure_canonical(&source, &spec, bounds, key)?;
        if Self::encode(&source, &spec) != key {
            return Err(KeyError::NotCanonical(key.to_string()));
        }
        Ok((source, spec))
    }
}

fn source_from_parts(prefix: Option<&str>, file: &str, key: &str) -> Result<SourceRef, KeyError> {
    let (name, extension) = file
        .rsplit_once('.')
        .filter(|(n, e)| !n.is_empty() && !e.is_empty())
        .ok_or_else(|| KeyError::Malformed(key.to_string()))?;
    Ok(SourceRef {
        prefix: prefix.filter(|p| !p.is_empty()).map(str::to_owned),
        name: name.to_owned(),
        extension: extension.to_owned(),
    })
}

/// Rejects any spec that normalization could not have produced for `source`.
fn ensure_canonical(
    source: &SourceRef,
    spec: &TransformSpec,
    bounds: &TransformBounds,
    key: &str,
) -> Result<(), KeyError> {
    let default_width = bounds.round_width(bounds.default_width as u64);
    let default_height = bounds.round_height(bounds.default_height as u64);
    let canonical = spec.width == bounds.round_width(spec.width as u64)
        && spec.height == bounds.round_height(spec.height as u64)
        && spec.blur <= MAX_BLUR
        && (spec.format == bounds.webp_format || spec.format == source.extension)
        && match spec.mode {
            ResizeMode::Width => spec.height == default_height,
            ResizeMode::Height => spec.width == default_width,
            ResizeMode::Crop | ResizeMode::Fit => true,
        };
    if canonical {
        Ok(())
    } else {
        Err(KeyError::NotCanonical(key.to_string()))
    }
}
