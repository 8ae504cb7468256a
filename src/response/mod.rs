//! Client response construction
//!
//! Builds the three terminal responses (compressed stream, bypass stream,
//! redirect) plus the fixed small responses. Builders return complete
//! `Response` values instead of writing into a live connection; exactly
//! one response value is produced per request, which is what enforces the
//! headers-before-body invariant. Failures after the response value has
//! been handed to the connection can only abort the body stream.

use bytes::Bytes;
use futures::{stream, StreamExt};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use reqwest::Url;
use std::io;

use crate::constants::{HEALTHCHECK_BODY, RELAY_CHANNEL_CAPACITY, STREAM_CHUNK_SIZE};
use crate::fetch::OriginBody;
use crate::transcode::TranscodeOutput;

/// Unified response body type
pub type ProxyBody = UnsyncBoxBody<Bytes, io::Error>;

/// Hop-by-hop headers never copied from the origin; the connection to the
/// client negotiates its own
const HOP_BY_HOP_HEADERS: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Origin headers re-asserted on bypass responses
const BYPASS_PASSTHROUGH_HEADERS: [HeaderName; 4] = [
    header::ACCEPT_RANGES,
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_RANGE,
];

/// Caching headers stripped from redirects so clients do not cache the
/// redirect as if it were the resource
const REDIRECT_STRIPPED_HEADERS: [HeaderName; 4] = [
    header::CACHE_CONTROL,
    header::EXPIRES,
    header::DATE,
    header::ETAG,
];

pub fn full_body(data: impl Into<Bytes>) -> ProxyBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

pub fn empty_body() -> ProxyBody {
    full_body(Bytes::new())
}

/// Stream an in-memory payload to the client in zero-copy chunks
fn chunked_body(data: Bytes) -> ProxyBody {
    let chunks = split_chunks(data, STREAM_CHUNK_SIZE);
    StreamBody::new(stream::iter(
        chunks.into_iter().map(|c| Ok(Frame::data(c))),
    ))
    .boxed_unsync()
}

fn split_chunks(data: Bytes, chunk_size: usize) -> Vec<Bytes> {
    let mut chunks = Vec::with_capacity(data.len() / chunk_size + 1);
    let mut rest = data;
    while rest.len() > chunk_size {
        chunks.push(rest.split_to(chunk_size));
    }
    if !rest.is_empty() {
        chunks.push(rest);
    }
    chunks
}

/// Relay the origin stream to the client through a bounded channel.
///
/// The channel bounds memory held for a slow client; when the client
/// disconnects the receiver drops, the next send fails, and the relay
/// task stops pulling, releasing the upstream connection promptly.
fn relay_body(body: OriginBody) -> ProxyBody {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, io::Error>>(RELAY_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut body = body;
        while let Some(item) = body.next().await {
            let mapped =
                item.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()));
            let upstream_failed = mapped.is_err();
            if tx.send(mapped).await.is_err() {
                tracing::debug!("client disconnected mid-bypass; aborting upstream read");
                return;
            }
            if upstream_failed {
                return;
            }
        }
    });

    let stream = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item.map(Frame::data), rx))
    });
    StreamBody::new(stream).boxed_unsync()
}

/// Copy origin response headers for the client: everything verbatim
/// except hop-by-hop headers, content-encoding forced to identity (the
/// transport already expanded any origin compression into the byte
/// stream), plus the permissive cross-origin set.
pub fn copy_origin_headers(origin: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in origin {
        if HOP_BY_HOP_HEADERS.contains(name) || *name == header::CONTENT_ENCODING {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("identity"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        "cross-origin-resource-policy",
        HeaderValue::from_static("cross-origin"),
    );
    headers.insert(
        "cross-origin-embedder-policy",
        HeaderValue::from_static("unsafe-none"),
    );
    headers
}

/// Fixed plaintext acknowledgement for requests without a target URL
pub fn healthcheck() -> Response<ProxyBody> {
    let mut response = Response::new(full_body(HEALTHCHECK_BODY));
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

pub fn bad_request() -> Response<ProxyBody> {
    status_only(StatusCode::BAD_REQUEST)
}

pub fn not_found() -> Response<ProxyBody> {
    status_only(StatusCode::NOT_FOUND)
}

pub fn method_not_allowed() -> Response<ProxyBody> {
    status_only(StatusCode::METHOD_NOT_ALLOWED)
}

fn status_only(status: StatusCode) -> Response<ProxyBody> {
    let mut response = Response::new(empty_body());
    *response.status_mut() = status;
    response
}

/// 200 with the transcoded payload; headers synthesized only now that the
/// final size is known. A negative savings delta is reported as-is.
pub fn compressed(base_headers: HeaderMap, origin_size: u64, output: TranscodeOutput) -> Response<ProxyBody> {
    let mut response = Response::new(chunked_body(output.data));
    let headers = response.headers_mut();
    *headers = base_headers;

    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(output.content_type),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(output.content_length));
    headers.insert("x-original-size", HeaderValue::from(origin_size));
    headers.insert("x-bytes-saved", HeaderValue::from(output.bytes_saved));

    response
}

/// 200 passing the origin bytes through untouched
pub fn bypass(base_headers: HeaderMap, origin_headers: &HeaderMap, body: OriginBody) -> Response<ProxyBody> {
    let mut response = Response::new(relay_body(body));
    let headers = response.headers_mut();
    *headers = base_headers;

    for name in &BYPASS_PASSTHROUGH_HEADERS {
        if let Some(value) = origin_headers.get(name) {
            headers.insert(name.clone(), value.clone());
        }
    }
    headers.insert("x-proxy-bypass", HeaderValue::from_static("1"));

    response
}

/// 302 back to the original target URL. Caching headers are stripped so
/// the redirect itself is never cached as the resource.
pub fn redirect(target: &Url, base_headers: HeaderMap) -> Response<ProxyBody> {
    let mut response = Response::new(empty_body());
    *response.status_mut() = StatusCode::FOUND;
    let headers = response.headers_mut();
    *headers = base_headers;

    for name in &REDIRECT_STRIPPED_HEADERS {
        headers.remove(name);
    }
    // Url serializes in percent-encoded form, which is always a valid
    // header value
    if let Ok(location) = HeaderValue::from_str(target.as_str()) {
        headers.insert(header::LOCATION, location);
    }
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));

    response
}
