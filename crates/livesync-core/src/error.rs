//! Error handling for the sync core
//!
//! Transport and hook failures are carried through unmodified so callers can
//! downcast them back to whatever their collaborator produced. Failures that
//! originate inside the core are typed.

use thiserror::Error;

use crate::data::HookFailed;
use crate::instance::ClientId;

/// Errors raised while evaluating a query set
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlgebraError {
    /// The query set cannot be interpreted
    #[error("Malformed query set: {0}")]
    MalformedQuery(String),

    /// A sort clause names a field whose values cannot be ordered
    #[error("Cannot order by '{field}': {details}")]
    Unorderable { field: String, details: String },

    /// A filter clause could not be evaluated against a record
    #[error("Predicate failed for clause '{clause}': {details}")]
    Predicate { clause: String, details: String },
}

/// A single view that could not be brought up to date during list-sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewFailure {
    /// Canonical key of the view's query set
    pub key: String,
    /// What went wrong
    pub error: AlgebraError,
}

/// Errors that can occur during sync operations
#[derive(Error, Debug)]
pub enum SyncError {
    /// The transport rejected the operation
    #[error(transparent)]
    Transport(anyhow::Error),

    /// A user hook rejected the transport's data
    #[error("{hook} hook failed: {source}")]
    Hook {
        hook: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Query set evaluation failed outside of a list-sync pass
    #[error("Query error: {0}")]
    Algebra(#[from] AlgebraError),

    /// One or more views failed during a list-sync pass
    ///
    /// The remaining views were still brought up to date.
    #[error("List sync failed for {} view(s); first: {}", .failures.len(), first_failure(.failures))]
    ListSync { failures: Vec<ViewFailure> },

    /// A pending create referenced a client id the store does not know
    #[error("No pending instance with client id {0}")]
    UnknownClientId(ClientId),

    /// Raw data from the transport has an unexpected shape
    #[error("Malformed {operation} payload: {details}")]
    MalformedPayload {
        operation: &'static str,
        details: String,
    },
}

impl SyncError {
    pub(crate) fn malformed(operation: &'static str, details: impl Into<String>) -> Self {
        SyncError::MalformedPayload {
            operation,
            details: details.into(),
        }
    }

    /// Classify an error surfaced by a transport pipeline
    ///
    /// Hook failures are unwrapped back into [`SyncError::Hook`]; anything
    /// else came from the transport itself and is kept as is.
    pub(crate) fn from_pipeline(err: anyhow::Error) -> Self {
        match err.downcast::<HookFailed>() {
            Ok(failed) => SyncError::Hook {
                hook: failed.hook,
                source: failed.source,
            },
            Err(err) => SyncError::Transport(err),
        }
    }

    /// Check if retrying the operation could succeed
    ///
    /// The core never classifies an error as retryable; retry policy belongs
    /// to the transport.
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Keys of the views that failed during list-sync, if any
    pub fn failed_views(&self) -> Vec<&str> {
        match self {
            SyncError::ListSync { failures } => failures.iter().map(|f| f.key.as_str()).collect(),
            _ => Vec::new(),
        }
    }
}

fn first_failure(failures: &[ViewFailure]) -> String {
    failures
        .first()
        .map(|f| format!("{} ({})", f.key, f.error))
        .unwrap_or_default()
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_is_transparent() {
        let err = SyncError::Transport(anyhow::anyhow!("connection refused"));
        assert_eq!(err.to_string(), "connection refused");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_hook_error_keeps_original() {
        #[derive(Debug, Error)]
        #[error("bad shape")]
        struct BadShape;

        let failed = HookFailed {
            hook: "updated_data",
            source: anyhow::Error::new(BadShape),
        };
        let err = SyncError::from_pipeline(failed.into());
        assert_eq!(err.to_string(), "updated_data hook failed: bad shape");
        match err {
            SyncError::Hook { hook, source } => {
                assert_eq!(hook, "updated_data");
                assert!(source.downcast_ref::<BadShape>().is_some());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_pipeline_error_defaults_to_transport() {
        let err = SyncError::from_pipeline(anyhow::anyhow!("timeout"));
        assert!(matches!(err, SyncError::Transport(_)));
        assert_eq!(err.to_string(), "timeout");
    }

    #[test]
    fn test_list_sync_display() {
        let err = SyncError::ListSync {
            failures: vec![
                ViewFailure {
                    key: r#"{"sort":"tags"}"#.to_string(),
                    error: AlgebraError::Unorderable {
                        field: "tags".to_string(),
                        details: "array values".to_string(),
                    },
                },
                ViewFailure {
                    key: "{}".to_string(),
                    error: AlgebraError::MalformedQuery("bad".to_string()),
                },
            ],
        };

        let msg = err.to_string();
        assert!(msg.contains("2 view(s)"));
        assert!(msg.contains("tags"));
        assert_eq!(err.failed_views(), vec![r#"{"sort":"tags"}"#, "{}"]);
    }

    #[test]
    fn test_malformed_payload_display() {
        let err = SyncError::malformed("create", "expected an object");
        assert_eq!(
            err.to_string(),
            "Malformed create payload: expected an object"
        );
        assert!(err.failed_views().is_empty());
    }
}
