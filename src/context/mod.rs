//! Request context construction
//!
//! Parses the inbound query string (`url`, `jpeg`, `bw`, `l`) into one
//! immutable per-request value. Origin metadata is attached exactly once
//! after the upstream fetch via [`RequestContext::with_origin`]; nothing
//! mutates the context afterwards.

use http::HeaderMap;
use regex::Regex;
use reqwest::Url;
use std::net::IpAddr;
use std::sync::OnceLock;

use crate::constants::{DEFAULT_QUALITY, PROXY_VIA_SIGNATURE};
use crate::error::ProxyError;

/// Output image format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    WebP,
    Jpeg,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebP => "webp",
            Self::Jpeg => "jpeg",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::WebP => "image/webp",
            Self::Jpeg => "image/jpeg",
        }
    }
}

/// Immutable per-request state
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Validated target resource URL
    pub target_url: Url,
    /// Requested output format
    pub format: OutputFormat,
    /// Convert to grayscale before encoding
    pub grayscale: bool,
    /// Requested lossy quality. Stored verbatim; encoders reject values
    /// outside their accepted range at encode time.
    pub quality: i32,
    /// Origin content type; empty until the upstream fetch completes
    pub origin_type: String,
    /// Origin content length; 0 while unknown
    pub origin_size: u64,
}

impl RequestContext {
    /// Build a context from the raw query string of the inbound request.
    ///
    /// Returns `None` when no `url` parameter is present (the health-check
    /// path), otherwise the parsed context or an `InvalidUrl` error.
    pub fn from_query(query: Option<&str>) -> Option<Result<Self, ProxyError>> {
        let pairs = parse_query_pairs(query.unwrap_or(""));

        // Clients historically split long target URLs on unencoded
        // ampersands; every `url` value after the first is a fragment of
        // the same target and is rejoined verbatim.
        let url_parts: Vec<&str> = pairs
            .iter()
            .filter(|(k, _)| k == "url")
            .map(|(_, v)| v.as_str())
            .collect();
        if url_parts.is_empty() {
            return None;
        }
        let raw_url = clean_target_url(&url_parts.join("&url="));

        let target_url = match parse_target_url(&raw_url) {
            Ok(url) => url,
            Err(e) => return Some(Err(e)),
        };

        let first = |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        // JPEG only on explicit opt-out of WebP
        let format = match first("jpeg") {
            Some(v) if !v.is_empty() => OutputFormat::Jpeg,
            _ => OutputFormat::WebP,
        };

        // Grayscale on unless explicitly disabled
        let grayscale = first("bw").map(|v| v != "0").unwrap_or(true);

        // Any parse failure falls back to the fixed default; the value is
        // deliberately not clamped here
        let quality = first("l")
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(DEFAULT_QUALITY);

        Some(Ok(Self {
            target_url,
            format,
            grayscale,
            quality,
            origin_type: String::new(),
            origin_size: 0,
        }))
    }

    /// Attach origin metadata after the upstream fetch. Consumes the
    /// context so the fields are set exactly once.
    pub fn with_origin(mut self, content_type: &str, content_length: u64) -> Self {
        self.origin_type = content_type.to_string();
        self.origin_size = content_length;
        self
    }
}

/// Strip the legacy `http://1.1.x.x/bmi/` wrapper some clients prepend to
/// the target URL.
fn clean_target_url(raw: &str) -> String {
    static BMI_PREFIX: OnceLock<Regex> = OnceLock::new();
    let re = BMI_PREFIX
        .get_or_init(|| Regex::new(r"(?i)http://1\.1\.\d\.\d/bmi/(https?://)?").unwrap());
    re.replace(raw, "http://").into_owned()
}

fn parse_target_url(raw: &str) -> Result<Url, ProxyError> {
    let url = Url::parse(raw).map_err(|e| ProxyError::InvalidUrl(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ProxyError::InvalidUrl(format!(
            "unsupported scheme: {}",
            other
        ))),
    }
}

/// Split and percent-decode the query string. `+` is left untouched since
/// the values are URLs, not form fields.
fn parse_query_pairs(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            let decode = |s: &str| {
                urlencoding::decode(s)
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| s.to_string())
            };
            (decode(key), decode(value))
        })
        .collect()
}

/// Detect a request the proxy has proxied to itself: the upstream via
/// marker matches our own signature and the forwarded client address (or
/// the bare peer address when no forwarding header is present) is
/// loopback. Checked before any upstream connection is opened.
pub fn is_self_request(headers: &HeaderMap, peer: IpAddr) -> bool {
    let via_matches = headers
        .get("via")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == PROXY_VIA_SIGNATURE)
        .unwrap_or(false);
    if !via_matches {
        return false;
    }

    match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(forwarded) => {
            let first = forwarded.split(',').next().unwrap_or("").trim();
            first == "127.0.0.1" || first == "::1"
        }
        None => peer.is_loopback(),
    }
}
