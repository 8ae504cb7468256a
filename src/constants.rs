// Constants module - centralized default values for configuration
//
// This module defines all default values used throughout the codebase.
// Using constants instead of magic numbers improves maintainability
// and makes it easier to understand and modify defaults.

// =============================================================================
// Server defaults
// =============================================================================

/// Default bind address
pub const DEFAULT_ADDRESS: &str = "0.0.0.0";

/// Default listen port
pub const DEFAULT_PORT: u16 = 8080;

// =============================================================================
// Upstream fetch defaults
// =============================================================================

/// Overall connect/response timeout for the origin fetch, in seconds
pub const UPSTREAM_TIMEOUT_SECS: u64 = 10;

/// User-Agent presented to origin servers
pub const PROXY_USER_AGENT: &str = "Bandwidth-Hero Compressor";

/// Via marker sent upstream and checked inbound for loop prevention
pub const PROXY_VIA_SIGNATURE: &str = "1.1 bandwidth-hero";

// =============================================================================
// Compression policy thresholds
// =============================================================================

/// Below this size a WebP re-encode is not worth the transcode cost (bytes)
pub const MIN_COMPRESS_LENGTH: u64 = 1024;

/// Below this size PNG/GIF sources compress poorly as JPEG and lose
/// transparency (bytes)
pub const MIN_TRANSPARENT_COMPRESS_LENGTH: u64 = 100 * 1024;

// =============================================================================
// Transcoder defaults
// =============================================================================

/// Default lossy quality when the client omits or mangles the `l` parameter
pub const DEFAULT_QUALITY: i32 = 40;

/// Hard height limit of the WebP container; taller images are scaled down
pub const WEBP_MAX_DIMENSION: u32 = 16383;

/// Chunk size for streaming encoded output to the client (bytes)
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Buffered chunks in the bypass relay channel; bounds memory held for a
/// slow client
pub const RELAY_CHANNEL_CAPACITY: usize = 16;

// =============================================================================
// Health-check path
// =============================================================================

/// Fixed plaintext body returned when no target URL is supplied
pub const HEALTHCHECK_BODY: &str = "bandwidth-hero-proxy";
