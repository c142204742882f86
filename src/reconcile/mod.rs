//! State reconciliation for many-valued associations.
//!
//! Several SonarCloud resources manage a *set* of associations hanging off a
//! single entity: the permissions granted to a group or user, or the projects
//! selected on a quality gate. The remote API offers no batch or transactional
//! update and its reads lag behind its own writes, so every such resource goes
//! through the same pipeline:
//!
//! 1. [`diff`] computes the keys to add and remove,
//! 2. [`MutationExecutor`] issues one remote call per key with bounded
//!    concurrency and a batch deadline,
//! 3. [`ConvergencePoller`] re-reads the remote set with exponential backoff
//!    until it matches the desired set, reapplying the diff when it does not,
//! 4. [`AssociationHandler`] wires the three together for
//!    create / read / update / delete.
//!
//! The remote side is abstracted by [`AssociationStore`].

mod diff;
mod executor;
mod handler;
mod poller;
mod store;

use std::collections::BTreeSet;

use thiserror::Error;

pub use diff::{diff, Reconciliation};
pub use executor::{
    BatchError, ExecutorConfig, FailedMutation, Mutation, MutationExecutor, MutationReport,
};
pub use handler::{AssociationHandler, ReconcileError};
pub use poller::{ConvergeError, ConvergencePoller, RetryPolicy};
pub use store::AssociationStore;

/// Identifies one element of a many-valued relation (a permission name, a project key).
///
/// Equality is exact string match, no normalization is applied.
pub type AssociationKey = String;

/// An unordered, duplicate-free collection of association keys.
pub type AssociationSet = BTreeSet<AssociationKey>;

/// Build an [`AssociationSet`] from anything that yields keys.
pub fn association_set<I, K>(keys: I) -> AssociationSet
where
    I: IntoIterator<Item = K>,
    K: Into<AssociationKey>,
{
    keys.into_iter().map(Into::into).collect()
}

/// A failure reported by an [`AssociationStore`].
///
/// The remote API only hands back opaque messages, so the store classifies
/// each failure as retryable or permanent when it creates the error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StoreError {
    message: String,
    retryable: bool,
}

impl StoreError {
    /// A failure that may succeed if the same call is issued again later.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that will not go away by retrying.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether retrying the call can help.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

/// Tuning for the executor and poller used by association resources.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReconcileSettings {
    /// Backoff policy for convergence polling.
    pub retry: RetryPolicy,
    /// Concurrency and deadline for mutation batches.
    pub executor: ExecutorConfig,
}

/// Render a set as `[a, b, c]` for log lines and error messages.
pub(crate) fn format_keys<'a, I>(keys: I) -> String
where
    I: IntoIterator<Item = &'a AssociationKey>,
{
    let joined = keys
        .into_iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    format!("[{}]", joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_association_set_collapses_duplicates() {
        let set = association_set(["scan", "admin", "scan"]);
        assert_eq!(set.len(), 2);
        assert!(set.contains("scan"));
        assert!(set.contains("admin"));
    }

    #[test]
    fn test_store_error_classification() {
        let err = StoreError::retryable("HTTP 503");
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "HTTP 503");

        let err = StoreError::permanent("HTTP 400");
        assert!(!err.is_retryable());
        assert_eq!(err.message(), "HTTP 400");
    }

    #[test]
    fn test_format_keys() {
        let set = association_set(["b", "a"]);
        assert_eq!(format_keys(&set), "[a, b]");
        assert_eq!(format_keys(&AssociationSet::new()), "[]");
    }
}
