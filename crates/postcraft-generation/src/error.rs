//! Error types for the generation pipeline.

use std::time::Duration;

/// Errors raised by a tool while handling its input.
///
/// The registry never propagates these; they end up in
/// [`ToolInvocation::error`](crate::tools::ToolInvocation).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    /// No tool is registered under this name.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// The input could not be interpreted.
    #[error("invalid tool input: {0}")]
    InvalidInput(String),
}

/// Errors from a language model provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// The provider throttled the request (HTTP 429).
    #[error("rate limited by model provider")]
    RateLimited {
        /// Delay requested by the provider, if any.
        retry_after: Option<Duration>,
    },

    /// Connection-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// The provider did not answer in time.
    #[error("model request timed out")]
    Timeout,

    /// Credentials were rejected.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Any other non-success HTTP status.
    #[error("model provider returned {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or summary.
        message: String,
    },

    /// The provider answered with something we could not parse.
    #[error("invalid model response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Network(_) | Self::Timeout => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Authentication(_) | Self::InvalidResponse(_) => false,
        }
    }
}

/// Errors that terminate a generation run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// The model call failed (after retries, where retryable).
    #[error(transparent)]
    Model(#[from] ModelError),

    /// The whole model interaction exceeded its time budget.
    #[error("generation timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The model finished without producing any content.
    #[error("model returned empty content")]
    EmptyContent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(ModelError::RateLimited { retry_after: None }.is_retryable());
        assert!(ModelError::Network("reset".into()).is_retryable());
        assert!(ModelError::Timeout.is_retryable());
        assert!(ModelError::Api {
            status: 503,
            message: "overloaded".into()
        }
        .is_retryable());

        assert!(!ModelError::Authentication("bad key".into()).is_retryable());
        assert!(!ModelError::Api {
            status: 400,
            message: "bad request".into()
        }
        .is_retryable());
        assert!(!ModelError::InvalidResponse("garbage".into()).is_retryable());
    }
}
