pub mod params;

use crate::transform::params::{ResizeMode, TransformSpec};
use bytes::Bytes;
use image::codecs::avif::AvifEncoder;
use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, GenericImageView, ImageEncoder};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Encode error: {0}")]
    Encode(String),
    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),
    #[error("Input exceeds size limit of {0} bytes")]
    TooLarge(usize),
    #[error("Transform task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformed {
    pub body: Bytes,
    /// Registered MIME type of the encoded format.
    pub content_type: String,
}

/// Image-processing collaborator: produces the variant bytes for a spec.
#[async_trait::async_trait]
pub trait Transform: Send + Sync {
    async fn transform(&self, source: Bytes, spec: &TransformSpec) -> Result<Transformed, TransformError>;
}

/// Encoders available to [`ImageTransformer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
    Avif,
}

impl OutputFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(OutputFormat::Jpeg),
            "png" => Some(OutputFormat::Png),
            "gif" => Some(OutputFormat::Gif),
            "webp" => Some(OutputFormat::Webp),
            "avif" => Some(OutputFormat::Avif),
            _ => None,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::Gif => "image/gif",
            OutputFormat::Webp => "image/webp",
            OutputFormat::Avif => "image/avif",
        }
    }
}

/// Default [`Transform`] built on the `image` and `webp` crates. CPU work runs
/// on the blocking pool.
pub struct ImageTransformer {
    max_input_size: usize,
}

impl ImageTransformer {
    pub fn new(max_input_size: usize) -> Self {
        Self { max_input_size }
    }
}

#[async_trait::async_trait]
impl Transform for ImageTransformer {
    async fn transform(&self, source: Bytes, spec: &TransformSpec) -> Result<Transformed, TransformError> {
        if source.len() > self.max_input_size {
            return Err(TransformError::TooLarge(self.max_input_size));
        }
        let spec = spec.clone();
        tokio::task::spawn_blocking(move || render(&source, &spec))
            .await
            .map_err(|e| TransformError::Task(e.to_string()))?
    }
}

/// Decode, resize, blur and encode in one pass.
pub fn render(bytes: &[u8], spec: &TransformSpec) -> Result<Transformed, TransformError> {
    let target = OutputFormat::from_extension(&spec.format)
        .ok_or_else(|| TransformError::UnsupportedFormat(spec.format.clone()))?;

    let img = decode_image(bytes)?;
    let mut out = resize_image(img, spec);
    if spec.blur > 0 {
        out = out.blur(spec.blur as f32);
    }
    let body = encode_image(&out, target, spec.quality.encoder_quality())?;

    Ok(Transformed {
        body: Bytes::from(body),
        content_type: target.content_type().to_string(),
    })
}

/// Decodes raw image bytes, detecting the format from magic bytes.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, TransformError> {
    let guessed = image::guess_format(bytes).map_err(|e| TransformError::Decode(e.to_string()))?;
    image::load_from_memory_with_format(bytes, guessed).map_err(|e| TransformError::Decode(e.to_string()))
}

/// Applies the resize mode with Lanczos3 resampling:
///
/// - Crop: cover the box, then center-crop to it
/// - Fit / Width / Height: fit inside the box, preserving aspect ratio. For
///   single-axis modes the other axis holds its default, so it still bounds
///   the output of extreme aspect ratios.
///
/// Minimum dimension is clamped to 1 pixel.
pub fn resize_image(img: DynamicImage, spec: &TransformSpec) -> DynamicImage {
    let (orig_w, orig_h) = img.dimensions();
    if orig_w == 0 || orig_h == 0 {
        return img;
    }

    let (w, h) = (spec.width.max(1), spec.height.max(1));
    match spec.mode {
        ResizeMode::Crop => img.resize_to_fill(w, h, FilterType::Lanczos3),
        ResizeMode::Fit | ResizeMode::Width | ResizeMode::Height => img.resize(w, h, FilterType::Lanczos3),
    }
}

/// Encodes image to the target format. Quality is clamped to [1, 100];
/// PNG and GIF ignore it. GIF output is a single frame.
pub fn encode_image(img: &DynamicImage, fmt: OutputFormat, quality: u8) -> Result<Vec<u8>, TransformError> {
    let mut out = Vec::new();
    let q = quality.clamp(1, 100);

    match fmt {
        OutputFormat::Jpeg => {
            let rgb = img.to_rgb8();
            let (w, h) = rgb.dimensions();
            JpegEncoder::new_with_quality(&mut out, q)
                .write_image(rgb.as_raw(), w, h, ExtendedColorType::Rgb8)
                .map_err(|e| TransformError::Encode(e.to_string()))?;
        }
        OutputFormat::Png => {
            let rgba = img.to_rgba8();
            let (w, h) = rgba.dimensions();
            PngEncoder::new(&mut out)
                .write_image(rgba.as_raw(), w, h, ExtendedColorType::Rgba8)
                .map_err(|e| TransformError::Encode(e.to_string()))?;
        }
        OutputFormat::Gif => {
            let rgba = img.to_rgba8();
            let (w, h) = rgba.dimensions();
            // The trailer is written when the encoder drops.
            let mut encoder = GifEncoder::new(&mut out);
            encoder
                .encode(rgba.as_raw(), w, h, ExtendedColorType::Rgba8)
                .map_err(|e| TransformError::Encode(e.to_string()))?;
        }
        OutputFormat::Webp => {
            let rgb = img.to_rgb8();
            let (w, h) = rgb.dimensions();
            let encoded = webp::Encoder::from_rgb(rgb.as_raw(), w, h).encode(q as f32);
            out.extend_from_slice(&encoded);
        }
        OutputFormat::Avif => {
            let rgba = img.to_rgba8();
            let (w, h) = rgba.dimensions();
            // Speed 4 balances encoding time and compression ratio
            AvifEncoder::new_with_speed_quality(&mut out, 4, q)
                .write_image(rgba.as_raw(), w, h, ExtendedColorType::Rgba8)
                .map_err(|e| TransformError::Encode(e.to_string()))?;
        }
    }

    Ok(out)
}
