//! Error types for the upstream client.

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur when talking to the RabbitMQ Management API.
///
/// Payloads are owned strings so the error can be cloned into the snapshot
/// cache and reported on later scrapes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UpstreamError {
    /// Connecting or sending the request failed.
    #[error("request failed: {0}")]
    Transport(String),

    /// The circuit breaker rejected the call without touching the network.
    #[error("circuit breaker is open - too many recent failures")]
    CircuitOpen,

    /// Non-2xx response carrying the broker's structured error body.
    #[error("{error}: {reason}")]
    Api {
        status: u16,
        error: String,
        reason: String,
    },

    /// Non-2xx response without a structured error body.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body was not the expected JSON.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// Response body exceeded the size ceiling.
    #[error("response body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// The call did not complete within its deadline.
    #[error("request timed out")]
    Timeout,

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl UpstreamError {
    /// Stable label for this error, used as the `error_type` metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Transport(_) => "transport",
            UpstreamError::CircuitOpen => "circuit_open",
            UpstreamError::Api { .. } => "api",
            UpstreamError::Status { .. } => "http_status",
            UpstreamError::Decode(_) | UpstreamError::BodyTooLarge { .. } => "decode",
            UpstreamError::Timeout => "timeout",
            UpstreamError::Client(_) => "client",
        }
    }

    /// Whether this outcome should feed the circuit breaker.
    ///
    /// Only circuit-open rejections are excluded: they never reached the
    /// broker.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, UpstreamError::CircuitOpen)
    }

    /// Build the error for a non-2xx response.
    ///
    /// Prefers the broker's `{"error": .., "reason": ..}` body and falls
    /// back to the raw status and (truncated) body text.
    pub(crate) fn from_status(status: u16, body: &[u8]) -> Self {
        if let Ok(ApiErrorBody {
            error: Some(error),
            reason,
        }) = serde_json::from_slice::<ApiErrorBody>(body)
        {
            return UpstreamError::Api {
                status,
                error,
                reason: reason.unwrap_or_default(),
            };
        }

        UpstreamError::Status {
            status,
            body: String::from_utf8_lossy(body)
                .chars()
                .take(MAX_ERROR_BODY_CHARS)
                .collect(),
        }
    }
}

const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout
        } else if err.is_decode() {
            UpstreamError::Decode(err.to_string())
        } else {
            UpstreamError::Transport(err.to_string())
        }
    }
}
