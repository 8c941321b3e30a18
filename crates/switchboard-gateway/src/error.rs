//! Error types for the gateway.

use std::time::Duration;

use thiserror::Error;

/// Gateway error taxonomy.
///
/// Callers test retryability with [`GatewayError::is_retryable`] rather than
/// matching variants; the retry executor relies on the same flag.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Vendor-reported API error.
    #[error("{provider} API error ({status}): {message}")]
    Api {
        provider: String,
        status: u16,
        message: String,
        /// Vendor-specific error type or code, when reported.
        code: Option<String>,
        /// Parsed `Retry-After` header, when present.
        retry_after: Option<Duration>,
    },

    /// Transport-level failure (connect, timeout, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The circuit breaker rejected the call without attempting it.
    #[error("circuit open ({:.1}s since last failure)", since_last_failure.as_secs_f64())]
    CircuitOpen { since_last_failure: Duration },

    #[error("no provider configured for model {0}")]
    NoProvider(String),

    #[error("model {0} not found in catalog")]
    ModelNotFound(String),

    /// The selected adapter cannot serve the requested feature.
    #[error("{provider} provider does not support {feature}")]
    Unsupported { provider: String, feature: String },

    /// Malformed SSE or JSON chunk; fatal to the current stream.
    #[error("stream parse error: {0}")]
    StreamParse(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl GatewayError {
    /// Whether the retry executor may transparently re-attempt the call.
    ///
    /// Network errors, HTTP 429 and any 5xx are retryable; everything else
    /// is surfaced to the caller on the first failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Http(err) => !err.is_decode(),
            GatewayError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Vendor-requested retry delay, if the error carried one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GatewayError::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Whether this is a rate-limit rejection.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GatewayError::Api { status: 429, .. })
    }

    pub(crate) fn api(
        provider: impl Into<String>,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        GatewayError::Api {
            provider: provider.into(),
            status,
            message: message.into(),
            code: None,
            retry_after: None,
        }
    }

    pub(crate) fn unsupported(provider: impl Into<String>, feature: impl Into<String>) -> Self {
        GatewayError::Unsupported {
            provider: provider.into(),
            feature: feature.into(),
        }
    }
}

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
