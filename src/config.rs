use crate::transform::params::{round_and_limit, Quality, TransformHint};
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_CACHE_CONTROL: &str = "max-age=31536000";
pub const DEFAULT_STORAGE_CLASS: &str = "STANDARD";
pub const WEBP_FORMAT: &str = "webp";

/// Static bounds and defaults used to resolve a transform request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformBounds {
    pub min_width: u32,
    pub max_width: u32,
    pub default_width: u32,
    pub min_height: u32,
    pub max_height: u32,
    pub default_height: u32,
    pub rounding_value: u32,
    pub default_quality: Quality,
    pub default_transform: TransformHint,
    /// Extension forced when the client negotiates webp support.
    pub webp_format: String,
}

impl Default for TransformBounds {
    fn default() -> Self {
        Self {
            min_width: 100,
            max_width: 4100,
            default_width: 640,
            min_height: 100,
            max_height: 4100,
            default_height: 400,
            rounding_value: 10,
            default_quality: Quality::High,
            default_transform: TransformHint::Crop,
            webp_format: WEBP_FORMAT.to_string(),
        }
    }
}

impl TransformBounds {
    pub fn round_width(&self, value: u64) -> u32 {
        round_and_limit(value, self.min_width, self.max_width, self.rounding_value)
    }

    pub fn round_height(&self, value: u64) -> u32 {
        round_and_limit(value, self.min_height, self.max_height, self.rounding_value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub per_second: u64,
    pub burst_size: u32,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bounds: TransformBounds,
    pub port: u16,
    /// Sled database holding generated variants.
    pub cache_dir: PathBuf,
    /// Directory serving source objects when no upstream URL is set.
    pub source_dir: PathBuf,
    pub source_url: Option<String>,
    pub max_input_size: usize, // bytes
    pub cache_control: String,
    pub storage_class: String,
    /// Rewrite raw requests to canonical paths before they reach the gateway.
    pub edge_normalize: bool,
    /// Treat paths that decode as canonical edge keys as self-describing.
    pub accept_canonical_paths: bool,
    pub rate_limit: Option<RateLimit>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bounds: TransformBounds::default(),
            port: 8080,
            cache_dir: PathBuf::from("./cache"),
            source_dir: PathBuf::from("./images"),
            source_url: None,
            max_input_size: 50 * 1024 * 1024,
            cache_control: DEFAULT_CACHE_CONTROL.to_string(),
            storage_class: DEFAULT_STORAGE_CLASS.to_string(),
            edge_normalize: false,
            accept_canonical_paths: true,
            rate_limit: None,
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Rounding value must be > 0")] ZeroRounding,
    #[error("{axis} bounds are inverted: min {min} > max {max}")]
    InvertedBounds { axis: &'static str, min: u32, max: u32 },
    #[error("{axis} bound {value} is not a multiple of rounding value {rounding}")]
    UnalignedBound { axis: &'static str, value: u32, rounding: u32 },
    #[error("Max input size must be > 0")] InvalidMaxInput,
    #[error("Invalid value {value:?} for {name}")]
    InvalidValue { name: &'static str, value: String },
}

impl GatewayConfig {
    /// Builds the configuration from `IMAGEGATE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source, falling back
    /// to defaults for anything unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        fn parsed<T: std::str::FromStr>(
            name: &'static str,
            raw: Option<String>,
        ) -> Result<Option<T>, ConfigError> {
            match raw {
                None => Ok(None),
                Some(value) => value
                    .trim()
                    .parse::<T>()
                    .map(Some)
                    .map_err(|_| ConfigError::InvalidValue { name, value }),
            }
        }

        macro_rules! set {
            ($field:expr, $name:literal) => {
                if let Some(v) = parsed($name, lookup($name))? {
                    $field = v;
                }
            };
        }

        set!(cfg.bounds.min_width, "IMAGEGATE_MIN_WIDTH");
        set!(cfg.bounds.max_width, "IMAGEGATE_MAX_WIDTH");
        set!(cfg.bounds.default_width, "IMAGEGATE_DEFAULT_WIDTH");
        set!(cfg.bounds.min_height, "IMAGEGATE_MIN_HEIGHT");
        set!(cfg.bounds.max_height, "IMAGEGATE_MAX_HEIGHT");
        set!(cfg.bounds.default_height, "IMAGEGATE_DEFAULT_HEIGHT");
        set!(cfg.bounds.rounding_value, "IMAGEGATE_ROUNDING_VALUE");
        set!(cfg.bounds.default_quality, "IMAGEGATE_DEFAULT_QUALITY");
        set!(cfg.bounds.default_transform, "IMAGEGATE_DEFAULT_TRANSFORM");
        set!(cfg.port, "PORT");
        set!(cfg.max_input_size, "IMAGEGATE_MAX_INPUT_SIZE");
        set!(cfg.edge_normalize, "IMAGEGATE_EDGE_NORMALIZE");
        set!(cfg.accept_canonical_paths, "IMAGEGATE_ACCEPT_CANONICAL_PATHS");

        if let Some(dir) = lookup("IMAGEGATE_CACHE_DIR") {
            cfg.cache_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("IMAGEGATE_SOURCE_DIR") {
            cfg.source_dir = PathBuf::from(dir);
        }
        cfg.source_url = lookup("IMAGEGATE_SOURCE_URL").filter(|u| !u.trim().is_empty());
        if let Some(value) = lookup("IMAGEGATE_CACHE_CONTROL") {
            cfg.cache_control = value;
        }
        if let Some(value) = lookup("IMAGEGATE_STORAGE_CLASS") {
            cfg.storage_class = value;
        }

        if lookup("DISABLE_RATE_LIMIT").is_none() {
            let mut limit = RateLimit { per_second: 10, burst_size: 30 };
            set!(limit.per_second, "IMAGEGATE_RATE_PER_SECOND");
            set!(limit.burst_size, "IMAGEGATE_RATE_BURST");
            cfg.rate_limit = Some(limit);
        }

        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let b = &self.bounds;
        if b.rounding_value == 0 { return Err(ConfigError::ZeroRounding); }
        for (axis, min, max) in [("width", b.min_width, b.max_width), ("height", b.min_height, b.max_height)] {
            if min > max {
                return Err(ConfigError::InvertedBounds { axis, min, max });
            }
            // Unaligned bounds would make round-and-clamp non idempotent.
            for value in [min, max] {
                if value % b.rounding_value != 0 {
                    return Err(ConfigError::UnalignedBound { axis, value, rounding: b.rounding_value });
                }
            }
        }
        if b.webp_format.trim().is_empty() {
            return Err(ConfigError::InvalidValue { name: "webp_format", value: b.webp_format.clone() });
        }
        if self.max_input_size == 0 { return Err(ConfigError::InvalidMaxInput); }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        assert!(GatewayConfig::default().validate().is_ok());
    }

    #[test]
    fn lookup_overrides_bounds() {
        let cfg = GatewayConfig::from_lookup(lookup_from(&[
            ("IMAGEGATE_MAX_WIDTH", "2000"),
            ("IMAGEGATE_DEFAULT_QUALITY", "b"),
            ("IMAGEGATE_DEFAULT_TRANSFORM", "fit"),
            ("IMAGEGATE_SOURCE_URL", "https://origin.example.com"),
            ("DISABLE_RATE_LIMIT", "1"),
        ]))
        .unwrap();

        assert_eq!(cfg.bounds.max_width, 2000);
        assert_eq!(cfg.bounds.default_quality, Quality::Best);
        assert_eq!(cfg.bounds.default_transform, TransformHint::Fit);
        assert_eq!(cfg.source_url.as_deref(), Some("https://origin.example.com"));
        assert!(cfg.rate_limit.is_none());
    }

    #[test]
    fn rate_limit_enabled_unless_disabled() {
        let cfg = GatewayConfig::from_lookup(lookup_from(&[("IMAGEGATE_RATE_BURST", "5")])).unwrap();
        assert_eq!(cfg.rate_limit, Some(RateLimit { per_second: 10, burst_size: 5 }));
    }

    #[test]
    fn malformed_number_is_rejected() {
        let err = GatewayConfig::from_lookup(lookup_from(&[("IMAGEGATE_MIN_WIDTH", "wide")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue { name: "IMAGEGATE_MIN_WIDTH", value: "wide".into() }
        );
    }

    #[test]
    fn validate_rejects_bad_bounds() {
        let mut cfg = GatewayConfig::default();
        cfg.bounds.rounding_value = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroRounding));

        let mut cfg = GatewayConfig::default();
        cfg.bounds.min_height = 5000;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvertedBounds { axis: "height", .. })));

        let mut cfg = GatewayConfig::default();
        cfg.bounds.min_width = 105;
        assert!(matches!(cfg.validate(), Err(ConfigError::UnalignedBound { value: 105, .. })));
    }
}
