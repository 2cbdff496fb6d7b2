//! Typed failure taxonomy for the enrichment pipeline and search.
//!
//! The queue decides retry policy by matching on variants, never by
//! inspecting message strings. Optional sub-steps (embedding, OCR, vision,
//! link summary) catch these and degrade; the mandatory enrich-by-kind step
//! lets them propagate to the job runner.

/// Pipeline-wide error classes.
#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    /// Network-level failure (timeout, connect, 5xx) on a URL or provider
    /// call. Retryable at the job level.
    #[error("transient fetch failure: {0}")]
    TransientFetch(String),

    /// Provider reachable but the requested model/backend is absent.
    /// Triggers adapter fallback, not a job retry.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Item vanished between enqueue and processing. Fatal, no retry.
    #[error("item {0} not found")]
    ContentNotFound(u64),

    /// Vector index invariant violated. Fatal, surfaces loudly.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Malformed job payload. Dead-lettered immediately, no retry.
    #[error("invalid job payload: {0}")]
    Validation(String),

    /// Provider answered with a non-retryable failure (4xx, malformed body).
    #[error("provider error: {0}")]
    Provider(String),

    /// Item/content store failure. Fatal, no retry.
    #[error("item store failure: {0}")]
    Store(String),
}

impl EnrichError {
    /// Whether the job queue should schedule a backoff retry for this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EnrichError::TransientFetch(_))
    }

    /// Whether the job should be dead-lettered without any retry attempt.
    pub fn is_dead_letter(&self) -> bool {
        matches!(
            self,
            EnrichError::Validation(_) | EnrichError::ContentNotFound(_)
        )
    }
}

/// Classify a reqwest error by its transport facts, not its message text.
impl From<reqwest::Error> for EnrichError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            return EnrichError::TransientFetch(err.to_string());
        }
        if let Some(status) = err.status() {
            if status.is_server_error() {
                return EnrichError::TransientFetch(err.to_string());
            }
        }
        EnrichError::Provider(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(EnrichError::TransientFetch("timeout".into()).is_retryable());
        assert!(!EnrichError::ModelUnavailable("llava".into()).is_retryable());
        assert!(!EnrichError::ContentNotFound(7).is_retryable());
        assert!(!EnrichError::Validation("bad kind".into()).is_retryable());
        assert!(!EnrichError::Provider("400".into()).is_retryable());
        assert!(
            !EnrichError::DimensionMismatch {
                expected: 768,
                got: 1536
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_dead_letter_classes() {
        assert!(EnrichError::Validation("bad".into()).is_dead_letter());
        assert!(EnrichError::ContentNotFound(1).is_dead_letter());
        assert!(!EnrichError::TransientFetch("t".into()).is_dead_letter());
        assert!(!EnrichError::Provider("p".into()).is_dead_letter());
    }
}
