// Server module - TCP accept loop and per-connection HTTP serving

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::config::Config;
use crate::error::ProxyError;
use crate::proxy::ProxyService;

/// HTTP server wrapping the proxy pipeline
///
/// One spawned task per accepted connection; no request queue and no
/// admission control, load shedding is left to the OS accept backlog.
pub struct ProxyServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    service: Arc<ProxyService>,
}

impl ProxyServer {
    /// Bind the listen socket and build the shared proxy state
    pub async fn bind(config: &Config) -> Result<Self, ProxyError> {
        let service = Arc::new(ProxyService::new(config)?);
        let addr = config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ProxyError::Config(format!("failed to bind {}: {}", addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ProxyError::Config(format!("failed to read local address: {}", e)))?;

        Ok(Self {
            listener,
            local_addr,
            service,
        })
    }

    /// The bound address, useful when the configured port is 0
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve connections until the process is stopped
    pub async fn run(self) -> Result<(), ProxyError> {
        tracing::info!(address = %self.local_addr, "proxy listening");

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            };

            let service = Arc::clone(&self.service);
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let handler = service_fn(move |req| {
                    let service = Arc::clone(&service);
                    async move { service.handle(req, peer).await }
                });

                // Errors here cover both protocol failures and deliberate
                // teardown on upstream transport errors
                if let Err(e) = http1::Builder::new().serve_connection(io, handler).await {
                    tracing::debug!(peer = %peer, error = %e, "connection closed with error");
                }
            });
        }
    }
}
