//! Request pipeline
//!
//! One pass per inbound request: context build → loop check → origin
//! fetch → compress-or-bypass decision → response. Every failure routes
//! through the central fallback at the bottom of `handle`, which picks
//! between a 400, a redirect to the original URL, and connection
//! teardown based on the error class. Exactly one terminal response is
//! produced per request.

use http::header;
use http::{Method, Request, Response};
use hyper::body::Incoming;
use std::net::SocketAddr;
use uuid::Uuid;

use crate::config::Config;
use crate::context::{self, RequestContext};
use crate::error::ProxyError;
use crate::fetch::OriginFetcher;
use crate::policy;
use crate::response::{self, ProxyBody};
use crate::transcode::Transcoder;

/// Shared per-process proxy state: the upstream client and the
/// transcoder. Carries no per-request state.
pub struct ProxyService {
    fetcher: OriginFetcher,
    transcoder: Transcoder,
}

impl ProxyService {
    pub fn new(config: &Config) -> Result<Self, ProxyError> {
        Ok(Self {
            fetcher: OriginFetcher::new()?,
            transcoder: Transcoder::new(&config.transcoder),
        })
    }

    /// Handle one inbound request.
    ///
    /// Returns `Err` only for transport-level upstream failures, where no
    /// response state can be trusted; hyper then tears down the client
    /// connection without a response.
    pub async fn handle(
        &self,
        req: Request<Incoming>,
        peer: SocketAddr,
    ) -> Result<Response<ProxyBody>, ProxyError> {
        if req.method() != Method::GET {
            return Ok(response::method_not_allowed());
        }
        if req.uri().path() != "/" {
            return Ok(response::not_found());
        }

        let ctx = match RequestContext::from_query(req.uri().query()) {
            None => return Ok(response::healthcheck()),
            Some(Ok(ctx)) => ctx,
            Some(Err(e)) => {
                tracing::info!(error = %e, "rejecting request with unusable target URL");
                return Ok(response::bad_request());
            }
        };

        let request_id = Uuid::new_v4();
        tracing::debug!(
            request_id = %request_id,
            target = %ctx.target_url,
            format = ctx.format.as_str(),
            grayscale = ctx.grayscale,
            quality = ctx.quality,
            "proxying request"
        );

        // Checked before any upstream connection is opened
        if context::is_self_request(req.headers(), peer.ip()) {
            tracing::info!(request_id = %request_id, "self-proxy loop detected; redirecting");
            return Ok(response::redirect(&ctx.target_url, Default::default()));
        }

        let origin = match self.fetcher.fetch(&ctx, req.headers(), peer.ip()).await {
            Ok(origin) => origin,
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "upstream transport failure");
                return Err(e);
            }
        };

        let ctx = ctx.with_origin(&origin.content_type, origin.content_length);

        if origin.is_rejected() {
            // Dropping the response drains the upstream body; the client
            // is sent back to the original URL, not the origin's Location
            tracing::info!(
                request_id = %request_id,
                status = %origin.status,
                "origin rejected request; redirecting client"
            );
            let base = response::copy_origin_headers(&origin.headers);
            return Ok(response::redirect(&ctx.target_url, base));
        }

        let base_headers = response::copy_origin_headers(&origin.headers);
        let has_range = req.headers().contains_key(header::RANGE);

        if !policy::should_compress(&ctx, has_range) {
            tracing::debug!(
                request_id = %request_id,
                origin_type = %ctx.origin_type,
                origin_size = ctx.origin_size,
                "bypassing compression"
            );
            return Ok(response::bypass(base_headers, &origin.headers, origin.body));
        }

        match self.transcoder.transcode(&ctx, origin.body).await {
            Ok(output) => {
                tracing::info!(
                    request_id = %request_id,
                    origin_size = ctx.origin_size,
                    final_size = output.content_length,
                    bytes_saved = output.bytes_saved,
                    "serving transcoded image"
                );
                Ok(response::compressed(base_headers, ctx.origin_size, output))
            }
            Err(e) => {
                // Headers have not been written yet on this path, so the
                // redirect fallback is always safe here
                tracing::warn!(
                    request_id = %request_id,
                    stage = %e.stage(),
                    error = %e,
                    "transcode failed; redirecting client to origin"
                );
                Ok(response::redirect(&ctx.target_url, base_headers))
            }
        }
    }
}
