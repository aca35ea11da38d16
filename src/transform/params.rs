use crate::config::TransformBounds;
use mime::Mime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MAX_BLUR: u8 = 50;

/// How the target box is applied to the source image. Derived from which
/// dimensions were requested, never supplied directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResizeMode {
    #[serde(rename = "w")]
    Width,
    #[serde(rename = "h")]
    Height,
    #[serde(rename = "c")]
    Crop,
    #[serde(rename = "f")]
    Fit,
}

impl ResizeMode {
    pub fn token(self) -> &'static str {
        match self {
            ResizeMode::Width => "w",
            ResizeMode::Height => "h",
            ResizeMode::Crop => "c",
            ResizeMode::Fit => "f",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "w" => Some(ResizeMode::Width),
            "h" => Some(ResizeMode::Height),
            "c" => Some(ResizeMode::Crop),
            "f" => Some(ResizeMode::Fit),
            _ => None,
        }
    }

    pub fn derive(has_width: bool, has_height: bool, hint: TransformHint) -> Self {
        match (has_width, has_height) {
            (true, true) if hint == TransformHint::Crop => ResizeMode::Crop,
            (true, true) => ResizeMode::Fit,
            (true, false) => ResizeMode::Width,
            (false, true) => ResizeMode::Height,
            (false, false) => ResizeMode::Crop,
        }
    }
}

impl fmt::Display for ResizeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quality {
    #[serde(rename = "l")]
    Low,
    #[serde(rename = "m")]
    Medium,
    #[serde(rename = "h")]
    High,
    #[serde(rename = "b")]
    Best,
}

impl Quality {
    pub fn token(self) -> &'static str {
        match self {
            Quality::Low => "l",
            Quality::Medium => "m",
            Quality::High => "h",
            Quality::Best => "b",
        }
    }

    /// Strict single-letter form used inside cache keys.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "l" => Some(Quality::Low),
            "m" => Some(Quality::Medium),
            "h" => Some(Quality::High),
            "b" => Some(Quality::Best),
            _ => None,
        }
    }

    /// Numeric quality handed to the encoder.
    pub fn encoder_quality(self) -> u8 {
        match self {
            Quality::Low => 40,
            Quality::Medium => 60,
            Quality::High => 80,
            Quality::Best => 100,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "l" | "low" => Ok(Quality::Low),
            "m" | "med" | "medium" => Ok(Quality::Medium),
            "h" | "high" => Ok(Quality::High),
            "b" | "best" => Ok(Quality::Best),
            _ => Err(format!("Invalid quality: {}", s)),
        }
    }
}

/// Caller preference for two-dimension requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformHint {
    Fit,
    Crop,
}

impl FromStr for TransformHint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "f" | "fit" => Ok(TransformHint::Fit),
            "c" | "crop" => Ok(TransformHint::Crop),
            _ => Err(format!("Invalid transform: {}", s)),
        }
    }
}

/// Raw, untyped transform parameters as they arrive on the query string.
/// Long parameter names win over their short aliases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTransformQuery {
    pub width: Option<String>,
    pub height: Option<String>,
    pub transform: Option<String>,
    pub quality: Option<String>,
    pub blur: Option<String>,
    /// `original=true` or `o=true`
    pub original: bool,
}

impl RawTransformQuery {
    /// Parses a query string. Never fails: undecodable or unknown pairs are
    /// ignored and the first occurrence of a repeated key wins.
    pub fn from_query(query: &str) -> Self {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query).unwrap_or_default();
        Self::from_pairs(pairs)
    }

    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut long = Self::default();
        let mut short = Self::default();

        for (key, value) in pairs {
            let slot = match key.as_str() {
                "width" => &mut long.width,
                "w" => &mut short.width,
                "height" => &mut long.height,
                "h" => &mut short.height,
                "transform" => &mut long.transform,
                "t" => &mut short.transform,
                "quality" => &mut long.quality,
                "q" => &mut short.quality,
                "blur" => &mut long.blur,
                "b" => &mut short.blur,
                "original" | "o" => {
                    long.original |= value == "true";
                    continue;
                }
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value);
            }
        }

        Self {
            width: long.width.or(short.width),
            height: long.height.or(short.height),
            transform: long.transform.or(short.transform),
            quality: long.quality.or(short.quality),
            blur: long.blur.or(short.blur),
            original: long.original,
        }
    }

    pub fn wants_original(&self) -> bool {
        self.original
    }
}

/// Fully resolved description of one variant. Both dimensions are always
/// resolved; `target_width`/`target_height` expose which ones the mode uses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransformSpec {
    pub width: u32,
    pub height: u32,
    pub mode: ResizeMode,
    pub quality: Quality,
    pub blur: u8,
    pub format: String,
}

impl TransformSpec {
    /// Resolves raw query input into a canonical spec. Never fails: malformed
    /// numbers count as absent and unknown hints fall back to defaults.
    pub fn normalize(
        query: &RawTransformQuery,
        accept: Option<&str>,
        source_extension: &str,
        bounds: &TransformBounds,
    ) -> Self {
        let width = parse_number(query.width.as_deref()).filter(|v| *v > 0);
        let height = parse_number(query.height.as_deref()).filter(|v| *v > 0);

        let hint = query
            .transform
            .as_deref()
            .and_then(|t| t.parse().ok())
            .unwrap_or(bounds.default_transform);
        let quality = query
            .quality
            .as_deref()
            .and_then(|q| q.parse().ok())
            .unwrap_or(bounds.default_quality);

        let mode = ResizeMode::derive(width.is_some(), height.is_some(), hint);

        let blur = parse_number(query.blur.as_deref())
            .map(|b| b.min(MAX_BLUR as u64) as u8)
            .unwrap_or(0);

        let format = if accepts_subtype(accept, &bounds.webp_format) {
            bounds.webp_format.clone()
        } else {
            source_extension.to_string()
        };

        Self {
            width: bounds.round_width(width.unwrap_or(bounds.default_width as u64)),
            height: bounds.round_height(height.unwrap_or(bounds.default_height as u64)),
            mode,
            quality,
            blur,
            format,
        }
    }

    pub fn target_width(&self) -> Option<u32> {
        match self.mode {
            ResizeMode::Height => None,
            _ => Some(self.width),
        }
    }

    pub fn target_height(&self) -> Option<u32> {
        match self.mode {
            ResizeMode::Width => None,
            _ => Some(self.height),
        }
    }
}

/// Rounds `value` to the nearest multiple of `rounding` (halves away from
/// zero), then clamps into `[min, max]`.
pub fn round_and_limit(value: u64, min: u32, max: u32, rounding: u32) -> u32 {
    let rounding = rounding.max(1) as u64;
    let mut quotient = value / rounding;
    if (value % rounding) * 2 >= rounding {
        quotient += 1;
    }
    let rounded = quotient.saturating_mul(rounding);
    rounded.clamp(min as u64, max as u64) as u32
}

/// Unsigned decimal only; anything else is absent. Oversized values saturate.
///
/// Stricter than prefix parsing: `+300`, `300px` and `3e2` are absent rather
/// than read as 300, so a malformed value never picks a variant.
fn parse_number(raw: Option<&str>) -> Option<u64> {
    let raw = raw?.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(raw.parse::<u64>().unwrap_or(u64::MAX))
}

fn accepts_subtype(accept: Option<&str>, subtype: &str) -> bool {
    let Some(accept) = accept else { return false };
    accept
        .split(',')
        .filter_map(|range| range.trim().parse::<Mime>().ok())
        .any(|m| m.type_() == mime::IMAGE && m.subtype().as_str().eq_ignore_ascii_case(subtype))
}
