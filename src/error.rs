//! Error taxonomy for the pipeline.
//!
//! Stage-local errors ([`FetchError`], [`EnrichmentError`]) stay inside
//! their stage and are converted into counters or fallbacks there; only
//! [`NewsdeskError`] crosses module boundaries.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, NewsdeskError>;

/// Failure modes of one source fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// Failure modes of one polish call.
#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("enrichment API error: {0}")]
    Api(String),

    #[error("invalid enrichment response: {0}")]
    InvalidResponse(String),

    #[error("enrichment response missing field {0}")]
    MissingField(&'static str),
}

/// Top-level error of the pipeline.
#[derive(Debug, Error)]
pub enum NewsdeskError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Enrichment(#[from] EnrichmentError),

    #[error("article store error: {0}")]
    Store(String),

    #[error("progress I/O error: {0}")]
    Progress(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("session aborted: {0}")]
    SessionAbort(String),
}

impl From<serde_yaml::Error> for NewsdeskError {
    fn from(e: serde_yaml::Error) -> Self {
        NewsdeskError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_display() {
        let e = FetchError::Timeout(Duration::from_secs(20));
        assert!(e.to_string().contains("timed out"));
        let e = FetchError::MalformedPayload("not xml".to_string());
        assert!(e.to_string().contains("not xml"));
    }

    #[test]
    fn yaml_errors_become_config_errors() {
        let parse: std::result::Result<serde_yaml::Value, _> =
            serde_yaml::from_str("sources: [unclosed");
        let e: NewsdeskError = parse.unwrap_err().into();
        assert!(matches!(e, NewsdeskError::Config(_)));
    }

    #[test]
    fn session_abort_carries_the_cause() {
        let e = NewsdeskError::SessionAbort("store unwritable".to_string());
        assert_eq!(e.to_string(), "session aborted: store unwritable");
    }
}
