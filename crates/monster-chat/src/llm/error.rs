//! LLM error types.

use thiserror::Error;

/// Check an HTTP response for rate-limit errors, returning `RateLimit` for 429.
pub fn check_response_error(response: &reqwest::Response) -> Option<LLMError> {
    rate_limit_error(response.status(), response.headers())
}

/// `RateLimit` for a 429 status, shared by the async and blocking clients.
pub(crate) fn rate_limit_error(
    status: reqwest::StatusCode,
    headers: &reqwest::header::HeaderMap,
) -> Option<LLMError> {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Some(LLMError::RateLimit {
            retry_after: parse_retry_after(headers),
        });
    }
    None
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Errors that can occur when building clients or making LLM API calls.
#[derive(Debug, Error)]
pub enum LLMError {
    /// HTTP request failed, or the HTTP client could not be built
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// API returned an error response
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Rate limited (429)
    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimit { retry_after: Option<u64> },

    /// Base URL could not be parsed
    #[error("invalid base url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Header name or value is not valid HTTP
    #[error("invalid header: {name}")]
    InvalidHeader { name: String },

    /// Extra client parameter with an unknown key or a bad value
    #[error("invalid client parameter '{key}': {reason}")]
    InvalidParam { key: String, reason: String },

    /// HTTP backend failed the startup check
    #[error("http backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl LLMError {
    /// Whether a request that failed with this error may be sent again.
    pub fn is_retryable(&self) -> bool {
        match self {
            LLMError::Request(e) => e.is_connect() || e.is_timeout(),
            LLMError::RateLimit { .. } => true,
            LLMError::Api { status, .. } => *status == 408 || *status == 409 || *status >= 500,
            _ => false,
        }
    }
}
