//! Unified error types for the library
//!
//! This module defines error types that:
//! - Are serializable so hosts can forward them to a frontend
//! - Provide actionable error messages
//! - Distinguish caller misuse from backing-store failures

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Library error type for subscriptions, windows, and the pool
///
/// All errors are serializable so they can be surfaced to a frontend.
/// Store-consistency findings (duplicate ids, incomplete windows) are
/// logged rather than raised; see the subscription publish step.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum LiveQueryError {
    #[error("Cannot subscribe to an aggregate query: {0}")]
    AggregateQuery(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Window range error: {0}")]
    WindowRange(String),

    #[error("{0}")]
    Other(String),
}

impl From<String> for LiveQueryError {
    fn from(err: String) -> Self {
        LiveQueryError::Other(err)
    }
}

impl From<&str> for LiveQueryError {
    fn from(err: &str) -> Self {
        LiveQueryError::Other(err.to_string())
    }
}

/// Result type alias using LiveQueryError
pub type Result<T> = std::result::Result<T, LiveQueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serialization() {
        let err = LiveQueryError::Store("disk I/O error".to_string());
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"type\":\"Store\""));

        let deserialized: LiveQueryError = serde_json::from_str(&json).unwrap();
        match deserialized {
            LiveQueryError::Store(msg) => assert_eq!(msg, "disk I/O error"),
            _ => panic!("Wrong error variant"),
        }
    }

    #[test]
    fn test_error_from_str() {
        let err: LiveQueryError = "something odd".into();
        assert_eq!(err.to_string(), "something odd");
    }
}
