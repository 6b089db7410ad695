//! Error types for ingestion calls made through the limiter.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while ingesting from the provider.
#[derive(Debug, Error)]
pub enum IngestError {
    /// An HTTP request to the provider failed.
    #[error("HTTP error for {key}: {message}")]
    Http { key: String, message: String },

    /// The provider answered with a rate-limit response (HTTP 429).
    #[error("rate limited by provider for {key}")]
    RateLimited { key: String },

    /// The requested property or report does not exist.
    #[error("not found: {key}")]
    NotFound { key: String },

    /// A provider response could not be parsed.
    #[error("parse error for {key}: {message}")]
    Parse { key: String, message: String },

    /// The limiter's retry budget ran out before the call succeeded.
    #[error("giving up on {key} after {attempts} attempts: {last}")]
    RetriesExhausted {
        key: String,
        attempts: u32,
        last: Box<IngestError>,
    },

    /// The limiter asked for a longer wait than the caller allows.
    #[error("giving up on {key}: limiter asked for a {:.1}s wait", .wait.as_secs_f64())]
    WaitExceeded { key: String, wait: Duration },

    /// The limiter could not be built from configuration.
    #[error("configuration error: {0}")]
    Config(#[from] tollgate_core::Error),
}

impl IngestError {
    /// Returns `true` when the error is transient and the call may succeed
    /// if retried after backing off.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Http { .. } | Self::RateLimited { .. })
    }

    /// Returns `true` when the provider throttled the call.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Returns `true` when the entity was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Convenience alias for ingestion results.
pub type IngestResult<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let throttled = IngestError::RateLimited { key: "p".into() };
        assert!(throttled.is_transient());
        assert!(throttled.is_rate_limit());

        let http = IngestError::Http {
            key: "p".into(),
            message: "503".into(),
        };
        assert!(http.is_transient());
        assert!(!http.is_rate_limit());

        let missing = IngestError::NotFound { key: "p".into() };
        assert!(!missing.is_transient());
        assert!(missing.is_not_found());
    }

    #[test]
    fn test_wait_exceeded_message() {
        let err = IngestError::WaitExceeded {
            key: "p".into(),
            wait: Duration::from_millis(2500),
        };
        assert_eq!(err.to_string(), "giving up on p: limiter asked for a 2.5s wait");
    }
}
