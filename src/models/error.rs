//! Error types for judgekit.
//!
//! Taxonomy:
//! - Validation: bad configuration or dataset shape, raised at construction
//! - Provider: completion failures, classified for the retry policy
//! - Agreement: malformed prediction matrices handed to the kappa engine
//!
//! Model-output anomalies are not errors. They surface as typed warnings
//! (see [`super::EvalWarning`]) and a `None` prediction.

use std::time::Duration;
use thiserror::Error;

/// Top-level error type for judgekit.
#[derive(Debug, Error)]
pub enum EvalError {
    // ═══════════════════════════════════════════════════════════════════
    // VALIDATION: raised before any completion call is made
    // ═══════════════════════════════════════════════════════════════════
    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("{evaluator} requires {required:?}, but the provided dataset has {available:?}")]
    MissingColumns {
        evaluator: String,
        required: Vec<String>,
        available: Vec<String>,
    },

    #[error("Column '{column}' has {actual} values, but the dataset has {expected} rows")]
    ColumnLengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("Column '{0}' already exists")]
    DuplicateColumn(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing input field '{0}'")]
    MissingInput(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    // ═══════════════════════════════════════════════════════════════════
    // PROVIDER: surfaced by the completion collaborator after retries
    // ═══════════════════════════════════════════════════════════════════
    #[error("Completion failed: {0}")]
    Completion(#[from] CompletionError),

    // ═══════════════════════════════════════════════════════════════════
    // AGREEMENT: malformed prediction matrices
    // ═══════════════════════════════════════════════════════════════════
    #[error("Agreement needs at least 2 raters, got {0}")]
    InsufficientRaters(usize),

    #[error("Rater {0} has no predictions")]
    EmptyPredictions(usize),

    #[error("Rater {rater} has {actual} predictions, expected {expected}")]
    RaterLengthMismatch {
        rater: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Predictions mix categorical and numeric values")]
    MixedRatingTypes,

    #[error("Row {row} has {actual} repeats, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Malformed agreement table: {0}")]
    MalformedTable(String),

    #[error("Reference at row {0} is missing")]
    NoneReference(usize),

    #[error("No predictions left to score after skipping missing ones")]
    NoScorablePredictions,

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EvalError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// How the retry policy should treat a failed completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryKind {
    /// Server-side hiccup: retry on a constant interval
    Transient,
    /// Provider throttling: retry with exponential backoff and jitter
    RateLimited,
    /// Auth, bad request, unknown model: never retried
    Permanent,
}

/// Completion provider errors.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Context window exceeded for model {model}")]
    ContextWindowExceeded { model: String },

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<f64>,
    },

    #[error("Service unavailable (status {status}): {message}")]
    ServiceUnavailable { status: u16, message: String },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl CompletionError {
    /// Classify this error for the retry policy.
    pub fn kind(&self) -> RetryKind {
        match self {
            Self::RateLimited { .. } => RetryKind::RateLimited,
            Self::ServiceUnavailable { .. } | Self::Timeout(_) | Self::InvalidResponse(_) => {
                RetryKind::Transient
            }
            Self::AuthenticationFailed(_)
            | Self::PermissionDenied(_)
            | Self::InvalidRequest(_)
            | Self::ModelNotFound(_)
            | Self::ContextWindowExceeded { .. }
            | Self::Network(_) => RetryKind::Permanent,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.kind() != RetryKind::Permanent
    }

    /// Get retry delay hint in seconds, if the provider sent one.
    pub fn retry_after(&self) -> Option<f64> {
        match self {
            Self::RateLimited {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

/// Result type alias for judgekit.
pub type Result<T> = std::result::Result<T, EvalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_retry_on_constant_interval() {
        let errors = [
            CompletionError::ServiceUnavailable {
                status: 503,
                message: String::new(),
            },
            CompletionError::Timeout(Duration::from_secs(15)),
            CompletionError::InvalidResponse("empty body".to_string()),
        ];
        for e in errors {
            assert_eq!(e.kind(), RetryKind::Transient, "{e}");
        }
    }

    #[test]
    fn test_rate_limit_retries_exponentially() {
        let e = CompletionError::RateLimited {
            message: "slow down".to_string(),
            retry_after_secs: Some(2.0),
        };
        assert_eq!(e.kind(), RetryKind::RateLimited);
        assert_eq!(e.retry_after(), Some(2.0));
    }

    #[test]
    fn test_client_errors_are_never_retried() {
        let errors = [
            CompletionError::AuthenticationFailed("bad key".to_string()),
            CompletionError::PermissionDenied("org".to_string()),
            CompletionError::InvalidRequest("bad".to_string()),
            CompletionError::ModelNotFound("gpt-9".to_string()),
            CompletionError::Network("connection refused".to_string()),
        ];
        for e in errors {
            assert!(!e.is_retryable(), "{e}");
        }
    }

    #[test]
    fn test_missing_columns_message_names_both_sets() {
        let e = EvalError::MissingColumns {
            evaluator: "SimpleEvaluator".to_string(),
            required: vec!["sample".to_string()],
            available: vec!["input".to_string()],
        };
        let msg = e.to_string();
        assert!(msg.contains("SimpleEvaluator"));
        assert!(msg.contains("\"sample\""));
        assert!(msg.contains("\"input\""));
    }
}
