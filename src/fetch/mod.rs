//! Origin fetch
//!
//! Opens exactly one upstream connection per request and surfaces the
//! origin response as status + headers + a single-consumption byte
//! stream. Redirects are never followed; certificate validation is
//! disabled on purpose, trading upstream TLS trust for availability
//! behind captive portals and broken certificate chains.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use http::header::{self, HeaderMap, HeaderValue};
use http::StatusCode;
use std::net::IpAddr;
use std::pin::Pin;
use std::time::Duration;

use crate::constants::{PROXY_USER_AGENT, PROXY_VIA_SIGNATURE, UPSTREAM_TIMEOUT_SECS};
use crate::context::RequestContext;
use crate::error::ProxyError;

/// Single-consumption origin byte stream
pub type OriginBody = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// Client request headers forwarded to the origin
const FORWARDED_HEADERS: [&str; 4] = ["cookie", "dnt", "referer", "range"];

/// Origin response owned for the lifetime of one request
pub struct OriginResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Extracted content-type; empty when the origin omitted it
    pub content_type: String,
    /// Extracted content-length; 0 when unknown
    pub content_length: u64,
    /// Consumed exactly once, by either the transcoder or the bypass relay
    pub body: OriginBody,
}

impl OriginResponse {
    /// An origin answer the proxy will not forward: an error status, or a
    /// redirect (the client is sent back to the original URL instead of
    /// the origin's Location).
    pub fn is_rejected(&self) -> bool {
        self.status.as_u16() >= 400
            || (self.status.is_redirection() && self.headers.contains_key(header::LOCATION))
    }
}

/// Upstream HTTP client, built once at startup
pub struct OriginFetcher {
    client: reqwest::Client,
}

impl OriginFetcher {
    pub fn new() -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(UPSTREAM_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(true)
            // origin connections are always direct, never via system proxies
            .no_proxy()
            .build()
            .map_err(|e| ProxyError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Fetch the target resource. Transport failures (DNS, connect, TLS,
    /// timeout) surface as `ProxyError::Upstream`; any HTTP status is
    /// returned as a response for the caller to classify.
    pub async fn fetch(
        &self,
        ctx: &RequestContext,
        inbound: &HeaderMap,
        peer: IpAddr,
    ) -> Result<OriginResponse, ProxyError> {
        let response = self
            .client
            .get(ctx.target_url.clone())
            .headers(forward_headers(inbound, peer))
            .send()
            .await
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        // None both when the origin omitted the header and when the
        // transport decompressed the body (the original length no longer
        // describes the stream)
        let content_length = response.content_length().unwrap_or(0);

        Ok(OriginResponse {
            status,
            headers,
            content_type,
            content_length,
            body: response.bytes_stream().boxed(),
        })
    }
}

/// Build the upstream request headers: the small allow-list of client
/// headers, the synthetic user-agent, the forwarding chain and the loop
/// marker.
fn forward_headers(inbound: &HeaderMap, peer: IpAddr) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for name in FORWARDED_HEADERS {
        if let Some(value) = inbound.get(name) {
            if let Ok(parsed) = http::header::HeaderName::try_from(name) {
                headers.insert(parsed, value.clone());
            }
        }
    }

    headers.insert(header::USER_AGENT, HeaderValue::from_static(PROXY_USER_AGENT));
    headers.insert(header::VIA, HeaderValue::from_static(PROXY_VIA_SIGNATURE));

    let forwarded_chain = match inbound
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        Some(existing) => format!("{}, {}", existing, peer),
        None => peer.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_chain) {
        headers.insert("x-forwarded-for", value);
    }

    headers
}
