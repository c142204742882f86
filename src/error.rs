//! Error types for the SonarCloud provider.

use thiserror::Error;

use crate::client::ClientError;
use crate::reconcile::{ConvergeError, ReconcileError};
use crate::schema::Diagnostic;

/// Errors returned by provider operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested resource was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A SonarCloud API call failed.
    #[error("SonarCloud API error: {0}")]
    Remote(#[from] ClientError),

    /// Reconciling a set-valued resource failed.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// Operation failed due to current state (precondition not met).
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// Operation not implemented.
    #[error("Unimplemented: {0}")]
    Unimplemented(String),
}

impl ProviderError {
    /// Get the error message as a string.
    ///
    /// Wrapped errors render through their own `Display`.
    pub fn message(&self) -> String {
        match self {
            Self::NotFound(msg)
            | Self::Validation(msg)
            | Self::Configuration(msg)
            | Self::UnknownResource(msg)
            | Self::FailedPrecondition(msg)
            | Self::Unimplemented(msg) => msg.clone(),
            Self::Serialization(err) => err.to_string(),
            Self::Remote(err) => err.to_string(),
            Self::Reconcile(err) => err.to_string(),
        }
    }

    /// Whether running the same operation again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote(err) => err.is_retryable(),
            Self::Reconcile(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Render the error as a host-facing diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        let summary = match self {
            Self::NotFound(_) => "Resource not found",
            Self::Validation(_) => "Invalid configuration",
            Self::Configuration(_) => "Provider configuration error",
            Self::UnknownResource(_) => "Unknown resource type",
            Self::Serialization(_) => "Could not decode state",
            Self::Remote(_) => "SonarCloud API request failed",
            Self::Reconcile(ReconcileError::Convergence {
                source: ConvergeError::Timeout { .. },
                ..
            }) => "Remote state did not converge",
            Self::Reconcile(_) => "Could not reconcile associations",
            Self::FailedPrecondition(_) => "Provider not ready",
            Self::Unimplemented(_) => "Operation not supported",
        };
        let mut detail = self.message();
        if self.is_retryable() {
            detail.push_str(". The failure looks transient; running the operation again may succeed.");
        }
        Diagnostic::error(summary).with_detail(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::{association_set, BatchError, FailedMutation, Mutation};
    use crate::schema::DiagnosticSeverity;

    #[test]
    fn test_error_display() {
        let err = ProviderError::NotFound("project web".to_string());
        assert_eq!(format!("{}", err), "Resource not found: project web");

        let err = ProviderError::Validation("invalid input".to_string());
        assert_eq!(format!("{}", err), "Validation error: invalid input");

        let err = ProviderError::UnknownResource("sonarcloud_thing".to_string());
        assert_eq!(format!("{}", err), "Unknown resource type: sonarcloud_thing");
    }

    #[test]
    fn test_message_method() {
        let err = ProviderError::Configuration("missing token".to_string());
        assert_eq!(err.message(), "missing token");

        let err = ProviderError::Remote(ClientError::http(403, r#"{"errors":[{"msg":"denied"}]}"#));
        assert_eq!(err.message(), "HTTP 403: denied");
    }

    #[test]
    fn test_remote_error_diagnostic() {
        let err: ProviderError = ClientError::http(503, "").into();
        assert!(err.is_retryable());

        let diag = err.to_diagnostic();
        assert_eq!(diag.severity, DiagnosticSeverity::Error);
        assert_eq!(diag.summary, "SonarCloud API request failed");
        assert!(diag.detail.as_deref().unwrap().contains("transient"));
    }

    #[test]
    fn test_convergence_timeout_diagnostic() {
        let err: ProviderError = ReconcileError::Convergence {
            entity: "group 'devs'".into(),
            source: ConvergeError::Timeout {
                attempts: 8,
                desired: association_set(["scan"]),
                last_observed: Some(association_set([] as [&str; 0])),
            },
        }
        .into();

        let diag = err.to_diagnostic();
        assert_eq!(diag.summary, "Remote state did not converge");
        let detail = diag.detail.unwrap();
        assert!(detail.contains("group 'devs'"), "{}", detail);
        assert!(detail.contains("scan"), "{}", detail);
    }

    #[test]
    fn test_partial_batch_failure_diagnostic() {
        let err: ProviderError = ReconcileError::Mutation {
            entity: "user 'ana'".into(),
            source: BatchError {
                succeeded: vec![Mutation::Remove("admin".into())],
                failed: vec![FailedMutation {
                    mutation: Mutation::Remove("scan".into()),
                    reason: "HTTP 400: not allowed".into(),
                    retryable: false,
                }],
                ..Default::default()
            },
        }
        .into();

        assert!(!err.is_retryable());
        let diag = err.to_diagnostic();
        assert_eq!(diag.summary, "Could not reconcile associations");
        assert!(diag.detail.unwrap().contains("remove 'scan'"));
    }
}
