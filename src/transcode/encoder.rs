//! Image encoder abstraction
//!
//! Trait-based encoder system so the two output formats share one calling
//! convention and quality handling stays at the encoder boundary.

use super::error::TranscodeError;
use crate::context::OutputFormat;

/// Quality settings for image encoding
///
/// The quality value is carried verbatim from the client request; it is
/// validated, not clamped, when an encoder consumes it. Effort selects the
/// encoder's speed/compression trade-off (0 = fastest).
#[derive(Debug, Clone, Copy)]
pub struct EncoderQuality {
    pub quality: i32,
    pub effort: u8,
}

impl EncoderQuality {
    pub fn new(quality: i32, effort: u8) -> Self {
        Self { quality, effort }
    }

    /// Reject values libwebp/libjpeg would not accept
    fn validated(&self) -> Result<u8, TranscodeError> {
        if (1..=100).contains(&self.quality) {
            Ok(self.quality as u8)
        } else {
            Err(TranscodeError::InvalidQuality {
                quality: self.quality,
            })
        }
    }
}

/// Result of encoding an image
#[derive(Debug)]
pub struct EncodedImage {
    /// The encoded image data
    pub data: Vec<u8>,
    /// The output format
    pub format: OutputFormat,
    /// Content-Type header value
    pub content_type: &'static str,
}

impl EncodedImage {
    pub fn new(data: Vec<u8>, format: OutputFormat) -> Self {
        let content_type = format.content_type();
        Self {
            data,
            format,
            content_type,
        }
    }
}

/// Trait for image encoders
///
/// Implementations encode raw RGBA pixel data (4 bytes per pixel) to their
/// target format. The trait is object-safe to allow dynamic dispatch.
pub trait ImageEncoder: Send + Sync {
    /// The output format this encoder produces
    fn format(&self) -> OutputFormat;

    /// Encode raw RGBA image data to the target format
    fn encode(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        quality: EncoderQuality,
    ) -> Result<EncodedImage, TranscodeError>;
}

/// JPEG encoder using the image crate
pub struct JpegEncoder;

impl ImageEncoder for JpegEncoder {
    fn format(&self) -> OutputFormat {
        OutputFormat::Jpeg
    }

    fn encode(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        quality: EncoderQuality,
    ) -> Result<EncodedImage, TranscodeError> {
        use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;
        use image::ImageEncoder as _;
        use std::io::Cursor;

        let q = quality.validated()?;

        // JPEG carries no alpha channel
        let rgb_data = rgba_to_rgb(data);

        let mut output = Cursor::new(Vec::new());
        let encoder = ImageJpegEncoder::new_with_quality(&mut output, q);

        encoder
            .write_image(&rgb_data, width, height, image::ColorType::Rgb8)
            .map_err(|e| TranscodeError::encode_failed("jpeg", e.to_string()))?;

        Ok(EncodedImage::new(output.into_inner(), OutputFormat::Jpeg))
    }
}

/// Lossy WebP encoder backed by libwebp via the webp crate
///
/// The image crate only writes lossless WebP, which would inflate most
/// photographic sources, so the native encoder is used instead.
pub struct WebpEncoder;

impl ImageEncoder for WebpEncoder {
    fn format(&self) -> OutputFormat {
        OutputFormat::WebP
    }

    fn encode(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        quality: EncoderQuality,
    ) -> Result<EncodedImage, TranscodeError> {
        let q = quality.validated()?;

        let mut config = webp::WebPConfig::new()
            .map_err(|_| TranscodeError::encode_failed("webp", "config init failed"))?;
        config.quality = q as f32;
        // libwebp methods range 0-6; anything above the cap buys nothing
        config.method = quality.effort.min(6) as i32;

        let encoder = webp::Encoder::from_rgba(data, width, height);
        let memory = encoder
            .encode_advanced(&config)
            .map_err(|e| TranscodeError::encode_failed("webp", format!("{:?}", e)))?;

        Ok(EncodedImage::new(memory.to_vec(), OutputFormat::WebP))
    }
}

/// Factory for creating encoders based on output format
pub struct EncoderFactory;

impl EncoderFactory {
    pub fn create(format: OutputFormat) -> Box<dyn ImageEncoder> {
        match format {
            OutputFormat::Jpeg => Box::new(JpegEncoder),
            OutputFormat::WebP => Box::new(WebpEncoder),
        }
    }
}

/// Convert RGBA to RGB by discarding the alpha channel
fn rgba_to_rgb(rgba: &[u8]) -> Vec<u8> {
    let pixel_count = rgba.len() / 4;
    let mut rgb = Vec::with_capacity(pixel_count * 3);

    for chunk in rgba.chunks_exact(4) {
        rgb.push(chunk[0]);
        rgb.push(chunk[1]);
        rgb.push(chunk[2]);
    }

    rgb
}
