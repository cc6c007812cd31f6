use thiserror::Error;

use crate::abort::AbortReason;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Graph data error: {message}")]
    GraphData { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Errors talking to the reasoning and graph backends
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Stream interrupted: {message}")]
    Stream { message: String },

    #[error("Invalid URL: {message}")]
    InvalidUrl { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Request aborted: {reason}")]
    Aborted { reason: AbortReason },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Query lifecycle errors surfaced to the caller
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Query failed after fallback: {message}")]
    FallbackFailed { message: String },

    #[error("Entry not found: {entry_id}")]
    EntryNotFound { entry_id: String },

    #[error("Query task failed: {message}")]
    TaskFailed { message: String },
}

impl BackendError {
    /// True when the request was stopped by its abort signal.
    pub fn is_aborted(&self) -> bool {
        matches!(self, BackendError::Aborted { .. })
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Result type alias for query lifecycle operations
pub type QueryResult<T> = Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "missing key".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: missing key");

        let err = AppError::GraphData {
            message: "not json".to_string(),
        };
        assert_eq!(err.to_string(), "Graph data error: not json");
    }

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::Unavailable {
            message: "server down".to_string(),
            retries: 3,
        };
        assert_eq!(err.to_string(), "Backend unavailable: server down (retries: 3)");

        let err = BackendError::Api {
            status: 502,
            message: "bad gateway".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 502 - bad gateway");

        let err = BackendError::Timeout { timeout_ms: 5000 };
        assert_eq!(err.to_string(), "Request timeout after 5000ms");

        let err = BackendError::Aborted {
            reason: AbortReason::UserCancelled,
        };
        assert_eq!(err.to_string(), "Request aborted: user_cancelled");
    }

    #[test]
    fn test_backend_error_is_aborted() {
        assert!(BackendError::Aborted {
            reason: AbortReason::Superseded
        }
        .is_aborted());
        assert!(!BackendError::Stream {
            message: "reset".to_string()
        }
        .is_aborted());
    }

    #[test]
    fn test_query_error_display() {
        let err = QueryError::FallbackFailed {
            message: "API error: 500 - boom".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Query failed after fallback: API error: 500 - boom"
        );

        let err = QueryError::EntryNotFound {
            entry_id: "entry-1".to_string(),
        };
        assert_eq!(err.to_string(), "Entry not found: entry-1");
    }

    #[test]
    fn test_conversions_to_app_error() {
        let app_err: AppError = BackendError::Timeout { timeout_ms: 10 }.into();
        assert!(matches!(app_err, AppError::Backend(_)));

        let app_err: AppError = QueryError::TaskFailed {
            message: "panicked".to_string(),
        }
        .into();
        assert!(matches!(app_err, AppError::Query(_)));
    }
}
