//! Image transcoding pipeline
//!
//! Consumes the origin body as a stream, probes dimensions, caps
//! oversized heights, applies grayscale, and re-encodes to the requested
//! format. Per request the pipeline moves through
//! `Fetching → Probing → (Resizing) → Encoding → Streaming`; any failure
//! surfaces as a stage-tagged [`TranscodeError`].
//!
//! CPU-heavy work runs on the blocking thread pool behind a process-wide
//! semaphore sized to the host's parallelism, so a burst of large images
//! cannot starve request-handling threads.

pub mod encoder;
pub mod error;

pub use encoder::{EncodedImage, EncoderFactory, EncoderQuality, ImageEncoder};
pub use error::TranscodeError;

use bytes::Bytes;
use fast_image_resize::{FilterType, Image, PixelType, ResizeAlg, Resizer};
use futures::StreamExt;
use image::io::Reader as ImageReader;
use image::DynamicImage;
use std::fmt;
use std::io::Cursor;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::config::TranscoderConfig;
use crate::constants::WEBP_MAX_DIMENSION;
use crate::context::{OutputFormat, RequestContext};
use crate::fetch::OriginBody;

/// Pipeline stage, used for logging and error tagging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetching,
    Probing,
    Resizing,
    Encoding,
    Streaming,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetching => "fetching",
            Stage::Probing => "probing",
            Stage::Resizing => "resizing",
            Stage::Encoding => "encoding",
            Stage::Streaming => "streaming",
        };
        f.write_str(name)
    }
}

/// Result of a completed transcode
///
/// The final byte count exists only once encoding completes; response
/// headers are synthesized from this value, never earlier.
#[derive(Debug)]
pub struct TranscodeOutput {
    /// Content-Type of the encoded payload
    pub content_type: &'static str,
    /// Final encoded size in bytes
    pub content_length: u64,
    /// Original size minus final size; negative when transcoding inflated
    /// the image, which is reported as-is
    pub bytes_saved: i64,
    /// The encoded payload, shared zero-copy with the response stream
    pub data: Bytes,
}

/// Process-wide transcoder
///
/// Holds the initialize-once tuning (encode effort, worker concurrency).
/// Shared across all requests; carries no per-request state.
pub struct Transcoder {
    effort: u8,
    permits: Arc<Semaphore>,
}

impl Transcoder {
    pub fn new(config: &TranscoderConfig) -> Self {
        Self {
            effort: config.encode_effort,
            permits: Arc::new(Semaphore::new(config.resolved_concurrency())),
        }
    }

    /// Run the full pipeline for one request.
    ///
    /// The origin stream is pulled chunk-by-chunk; the encode itself runs
    /// on the blocking pool once a worker permit is held.
    pub async fn transcode(
        &self,
        ctx: &RequestContext,
        body: OriginBody,
    ) -> Result<TranscodeOutput, TranscodeError> {
        let source = collect_source(body).await?;
        tracing::debug!(
            stage = %Stage::Probing,
            source_bytes = source.len(),
            format = ctx.format.as_str(),
            "origin body collected"
        );

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| TranscodeError::encode_failed(ctx.format.as_str(), "encode pool closed"))?;

        let output_format = ctx.format;
        let grayscale = ctx.grayscale;
        let quality = EncoderQuality::new(ctx.quality, self.effort);

        let encoded =
            tokio::task::spawn_blocking(move || transform(&source, output_format, grayscale, quality))
                .await
                .map_err(|e| {
                    TranscodeError::encode_failed(
                        output_format.as_str(),
                        format!("encode task failed: {}", e),
                    )
                })??;

        let content_length = encoded.data.len() as u64;
        let bytes_saved = ctx.origin_size as i64 - content_length as i64;

        Ok(TranscodeOutput {
            content_type: encoded.content_type,
            content_length,
            bytes_saved,
            data: Bytes::from(encoded.data),
        })
    }
}

/// Drain the origin stream into memory. Pull-based, so a stalled decode
/// propagates backpressure to the upstream connection.
async fn collect_source(mut body: OriginBody) -> Result<Vec<u8>, TranscodeError> {
    let mut buf = Vec::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| TranscodeError::SourceStream {
            message: e.to_string(),
        })?;
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

/// Synchronous transform: probe → decode → height cap → grayscale → encode.
///
/// Exposed for the transcode benchmark; everything here is CPU-bound and
/// must stay off the async runtime threads.
pub fn transform(
    data: &[u8],
    format: OutputFormat,
    grayscale: bool,
    quality: EncoderQuality,
) -> Result<EncodedImage, TranscodeError> {
    let (_, height) = probe_dimensions(data)?;

    let mut img = decode_image(data)?;

    if height >= WEBP_MAX_DIMENSION {
        img = cap_height(&img)?;
    }

    if grayscale {
        img = img.grayscale();
    }

    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();

    let encoder = EncoderFactory::create(format);
    encoder.encode(rgba.as_raw(), width, height, quality)
}

/// Read dimensions from the container header without a full decode
fn probe_dimensions(data: &[u8]) -> Result<(u32, u32), TranscodeError> {
    ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| TranscodeError::probe_failed(e.to_string()))?
        .into_dimensions()
        .map_err(|e| TranscodeError::probe_failed(e.to_string()))
}

fn decode_image(data: &[u8]) -> Result<DynamicImage, TranscodeError> {
    ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| TranscodeError::decode_failed(e.to_string()))?
        .decode()
        .map_err(|e| TranscodeError::decode_failed(e.to_string()))
}

/// Scale down to the WebP container's height limit, preserving aspect
/// ratio. Width is only ever touched through this derivation. Bilinear
/// keeps the resize cheap; output quality is bounded by the lossy encode
/// anyway.
fn cap_height(img: &DynamicImage) -> Result<DynamicImage, TranscodeError> {
    let src_w = img.width();
    let src_h = img.height();

    let target_h = WEBP_MAX_DIMENSION;
    let target_w = (((src_w as u64) * (target_h as u64) + (src_h as u64) / 2) / (src_h as u64))
        .max(1) as u32;

    tracing::debug!(
        stage = %Stage::Resizing,
        src_width = src_w,
        src_height = src_h,
        target_width = target_w,
        target_height = target_h,
        "capping image height"
    );

    let src_width =
        NonZeroU32::new(src_w).ok_or_else(|| TranscodeError::resize_failed("source width is 0"))?;
    let src_height =
        NonZeroU32::new(src_h).ok_or_else(|| TranscodeError::resize_failed("source height is 0"))?;
    let dst_width = NonZeroU32::new(target_w)
        .ok_or_else(|| TranscodeError::resize_failed("target width is 0"))?;
    let dst_height = NonZeroU32::new(target_h)
        .ok_or_else(|| TranscodeError::resize_failed("target height is 0"))?;

    let src_image = Image::from_vec_u8(
        src_width,
        src_height,
        img.to_rgba8().into_raw(),
        PixelType::U8x4,
    )
    .map_err(|e| TranscodeError::resize_failed(format!("source buffer: {:?}", e)))?;

    let mut dst_image = Image::new(dst_width, dst_height, PixelType::U8x4);

    let mut resizer = Resizer::new(ResizeAlg::Convolution(FilterType::Bilinear));
    resizer
        .resize(&src_image.view(), &mut dst_image.view_mut())
        .map_err(|e| TranscodeError::resize_failed(format!("{:?}", e)))?;

    let rgba_image = image::RgbaImage::from_raw(target_w, target_h, dst_image.into_vec())
        .ok_or_else(|| TranscodeError::resize_failed("output buffer size mismatch"))?;

    Ok(DynamicImage::ImageRgba8(rgba_image))
}
