// Error types module

use crate::transcode::TranscodeError;
use std::fmt;

/// Centralized error type for the proxy
///
/// Categorizes errors into the fallback classes the request pipeline
/// routes on: a 400 for unusable input, a redirect to the original URL
/// for origin rejections and transcode failures, and connection teardown
/// for transport errors where no response state can be trusted.
#[derive(Debug)]
pub enum ProxyError {
    /// Configuration errors (unreadable file, invalid YAML)
    Config(String),

    /// The target URL did not parse or uses a disallowed scheme
    InvalidUrl(String),

    /// Transport-level upstream failure (DNS, connect, TLS, timeout)
    Upstream(String),

    /// The origin answered but the response is unusable
    /// (status >= 400, or a 3xx carrying a Location header)
    UpstreamRejected { status: u16 },

    /// The image pipeline failed to probe, decode, resize or encode
    Transcode(TranscodeError),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ProxyError::InvalidUrl(msg) => write!(f, "Invalid target URL: {}", msg),
            ProxyError::Upstream(msg) => write!(f, "Upstream error: {}", msg),
            ProxyError::UpstreamRejected { status } => {
                write!(f, "Upstream rejected request with status {}", status)
            }
            ProxyError::Transcode(err) => write!(f, "Transcode error: {}", err),
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProxyError::Transcode(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TranscodeError> for ProxyError {
    fn from(err: TranscodeError) -> Self {
        ProxyError::Transcode(err)
    }
}

impl ProxyError {
    /// True when the client should be redirected to the original URL
    /// instead of receiving a proxy-generated failure page.
    pub fn is_redirectable(&self) -> bool {
        matches!(
            self,
            ProxyError::UpstreamRejected { .. } | ProxyError::Transcode(_)
        )
    }
}
