//! Compress-or-bypass decision
//!
//! Pure function of the origin metadata and the requested output format.
//! Rules are evaluated in order; the first matching bypass rule wins.

use crate::constants::{MIN_COMPRESS_LENGTH, MIN_TRANSPARENT_COMPRESS_LENGTH};
use crate::context::{OutputFormat, RequestContext};

/// Decide whether the origin payload is worth re-encoding.
///
/// Bypass when:
/// 1. the payload is not an image,
/// 2. the origin length is unknown,
/// 3. the client asked for a byte range (range semantics are incompatible
///    with re-encoding),
/// 4. a WebP target is already smaller than the minimum worthwhile size,
/// 5. a JPEG target would re-encode a small PNG/GIF (poor compression,
///    transparency loss).
pub fn should_compress(ctx: &RequestContext, has_range: bool) -> bool {
    if !is_image_type(&ctx.origin_type) {
        return false;
    }
    if ctx.origin_size == 0 {
        return false;
    }
    if has_range {
        return false;
    }
    if ctx.format == OutputFormat::WebP && ctx.origin_size < MIN_COMPRESS_LENGTH {
        return false;
    }
    if ctx.format == OutputFormat::Jpeg
        && is_transparent_type(&ctx.origin_type)
        && ctx.origin_size < MIN_TRANSPARENT_COMPRESS_LENGTH
    {
        return false;
    }
    true
}

fn is_image_type(content_type: &str) -> bool {
    content_type.starts_with("image/")
}

/// Formats that carry an alpha channel or palette that JPEG cannot express
fn is_transparent_type(content_type: &str) -> bool {
    content_type.ends_with("png") || content_type.ends_with("gif")
}
