use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument};

use super::{
    diff, format_keys, AssociationSet, AssociationStore, BatchError, ConvergeError,
    ConvergencePoller, MutationExecutor, Reconciliation, ReconcileSettings, StoreError,
};

/// Failure of a reconciling lifecycle operation.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Reading the remote set failed.
    #[error("failed to read associations of {entity}: {source}")]
    Store {
        /// The entity being reconciled.
        entity: String,
        #[source]
        source: StoreError,
    },

    /// One or more add/remove calls failed.
    #[error("failed to update associations of {entity}: {source}")]
    Mutation {
        /// The entity being reconciled.
        entity: String,
        #[source]
        source: BatchError,
    },

    /// The remote set never matched the desired set.
    #[error("associations of {entity} did not settle: {source}")]
    Convergence {
        /// The entity being reconciled.
        entity: String,
        #[source]
        source: ConvergeError,
    },
}

impl ReconcileError {
    /// Whether the operation may succeed if the whole thing is run again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store { source, .. } => source.is_retryable(),
            Self::Mutation { source, .. } => source.is_retryable(),
            Self::Convergence { source, .. } => matches!(source, ConvergeError::Timeout { .. }),
        }
    }
}

/// Runs create / read / update / delete for a set-valued resource.
///
/// Create and update apply the diff and then poll until the remote set
/// reflects it. Delete does not poll: once the entity's associations are
/// removed nothing reads them back.
pub struct AssociationHandler<S> {
    store: Arc<S>,
    executor: MutationExecutor,
    poller: ConvergencePoller,
}

impl<S: AssociationStore> AssociationHandler<S> {
    /// Bind a handler to `store`.
    pub fn new(store: S, settings: &ReconcileSettings) -> Self {
        Self {
            store: Arc::new(store),
            executor: MutationExecutor::new(settings.executor.clone()),
            poller: ConvergencePoller::new(settings.retry.clone()),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Grant every key in `desired`, starting from nothing.
    #[instrument(skip_all, fields(entity = %self.store.describe()))]
    pub async fn create(&self, desired: &AssociationSet) -> Result<AssociationSet, ReconcileError> {
        self.reconcile(&AssociationSet::new(), desired).await
    }

    /// Read the current set; `None` when the entity no longer exists.
    #[instrument(skip_all, fields(entity = %self.store.describe()))]
    pub async fn read(&self) -> Result<Option<AssociationSet>, ReconcileError> {
        self.store.search().await.map_err(|source| ReconcileError::Store {
            entity: self.store.describe(),
            source,
        })
    }

    /// Move the remote set from `prior` to `desired`.
    #[instrument(skip_all, fields(entity = %self.store.describe()))]
    pub async fn update(
        &self,
        prior: &AssociationSet,
        desired: &AssociationSet,
    ) -> Result<AssociationSet, ReconcileError> {
        self.reconcile(prior, desired).await
    }

    /// Revoke every key in `current`.
    #[instrument(skip_all, fields(entity = %self.store.describe()))]
    pub async fn delete(&self, current: &AssociationSet) -> Result<(), ReconcileError> {
        let plan = diff(current, &AssociationSet::new());
        self.executor
            .execute(&self.store, &plan)
            .await
            .map_err(|source| ReconcileError::Mutation {
                entity: self.store.describe(),
                source,
            })?;
        info!(removed = plan.to_remove.len(), "associations revoked");
        Ok(())
    }

    async fn reconcile(
        &self,
        prior: &AssociationSet,
        desired: &AssociationSet,
    ) -> Result<AssociationSet, ReconcileError> {
        let entity = self.store.describe();
        let plan = diff(prior, desired);
        info!(
            add = %format_keys(&plan.to_add),
            remove = %format_keys(&plan.to_remove),
            "reconciling associations"
        );

        self.executor
            .execute(&self.store, &plan)
            .await
            .map_err(|source| ReconcileError::Mutation {
                entity: entity.clone(),
                source,
            })?;

        let fetch = || async move {
            match self.store.search().await {
                Ok(Some(observed)) => Ok(observed),
                Ok(None) => Err(StoreError::retryable(format!(
                    "{} not found",
                    self.store.describe()
                ))),
                Err(err) => Err(err),
            }
        };
        let mutate = |plan: Reconciliation| async move {
            self.executor.execute(&self.store, &plan).await
        };

        let observed = self
            .poller
            .converge(desired, fetch, mutate)
            .await
            .map_err(|source| ReconcileError::Convergence {
                entity: entity.clone(),
                source,
            })?;

        info!(associations = %format_keys(&observed), "associations converged");
        Ok(observed)
    }
}
