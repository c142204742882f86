use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{Id, JoinSet};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::{AssociationKey, AssociationStore, Reconciliation, StoreError};

/// Concurrency and deadline settings for mutation batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Maximum number of remote calls in flight at once.
    pub max_concurrency: usize,
    /// Wall-clock budget for one batch; calls still running are cancelled.
    pub batch_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            batch_timeout: Duration::from_secs(30),
        }
    }
}

/// A single remote change.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Mutation {
    /// Create the association.
    Add(AssociationKey),
    /// Delete the association.
    Remove(AssociationKey),
}

impl Mutation {
    /// The association key this mutation touches.
    pub fn key(&self) -> &str {
        match self {
            Self::Add(key) | Self::Remove(key) => key,
        }
    }

    async fn apply<S: AssociationStore + ?Sized>(&self, store: &S) -> Result<(), StoreError> {
        match self {
            Self::Add(key) => store.add(key).await,
            Self::Remove(key) => store.remove(key).await,
        }
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add(key) => write!(f, "add '{}'", key),
            Self::Remove(key) => write!(f, "remove '{}'", key),
        }
    }
}

/// A mutation that was attempted and did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedMutation {
    /// The mutation that failed.
    pub mutation: Mutation,
    /// Why it failed.
    pub reason: String,
    /// Whether issuing it again could help.
    pub retryable: bool,
}

/// The mutations applied by a successful execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationReport {
    /// Mutations confirmed by the remote store, in completion order.
    pub succeeded: Vec<Mutation>,
}

/// Composite error for a partially applied reconciliation.
///
/// Nothing is rolled back: `succeeded` lists the calls that landed remotely.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchError {
    /// Calls that completed successfully.
    pub succeeded: Vec<Mutation>,
    /// Calls that returned an error or ran past the batch deadline.
    pub failed: Vec<FailedMutation>,
    /// Calls in flight when the batch was aborted; they may or may not have landed.
    pub cancelled: Vec<Mutation>,
    /// Calls never issued because the batch was aborted first.
    pub not_attempted: Vec<Mutation>,
}

impl BatchError {
    /// True when every failure is transient.
    pub fn is_retryable(&self) -> bool {
        self.failed.iter().all(|f| f.retryable)
    }

    /// Keys of the failed mutations.
    pub fn failed_keys(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.mutation.key()).collect()
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} association change(s) failed", self.failed.len())?;
        for failure in &self.failed {
            write!(f, "; {}: {}", failure.mutation, failure.reason)?;
        }
        write!(f, " ({} succeeded", self.succeeded.len())?;
        if !self.cancelled.is_empty() {
            write!(f, ", {} cancelled", self.cancelled.len())?;
        }
        if !self.not_attempted.is_empty() {
            write!(f, ", {} not attempted", self.not_attempted.len())?;
        }
        write!(f, ")")
    }
}

impl std::error::Error for BatchError {}

/// Issues one remote call per key of a [`Reconciliation`].
///
/// Removals run as one batch and additions as a second one. The key sets are
/// disjoint, so the order between batches does not matter for correctness.
/// Within a batch calls fan out up to `max_concurrency`; the first failure
/// cancels whatever is still running and skips the rest.
#[derive(Debug, Clone, Default)]
pub struct MutationExecutor {
    config: ExecutorConfig,
}

impl MutationExecutor {
    /// Create an executor with the given settings.
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Apply `plan` against `store`.
    #[instrument(
        skip_all,
        fields(entity = %store.describe(), add = plan.to_add.len(), remove = plan.to_remove.len())
    )]
    pub async fn execute<S: AssociationStore>(
        &self,
        store: &Arc<S>,
        plan: &Reconciliation,
    ) -> Result<MutationReport, BatchError> {
        let batches = [
            plan.to_remove
                .iter()
                .cloned()
                .map(Mutation::Remove)
                .collect::<Vec<_>>(),
            plan.to_add
                .iter()
                .cloned()
                .map(Mutation::Add)
                .collect::<Vec<_>>(),
        ];

        let mut report = MutationReport::default();
        let mut batches = batches.into_iter().filter(|b| !b.is_empty());

        while let Some(batch) = batches.next() {
            match self.run_batch(store, batch).await {
                Ok(succeeded) => report.succeeded.extend(succeeded),
                Err(mut err) => {
                    report.succeeded.append(&mut err.succeeded);
                    err.succeeded = report.succeeded;
                    err.not_attempted.extend(batches.flatten());
                    warn!(error = %err, "association batch failed");
                    return Err(err);
                }
            }
        }

        debug!(applied = report.succeeded.len(), "association changes applied");
        Ok(report)
    }

    async fn run_batch<S: AssociationStore>(
        &self,
        store: &Arc<S>,
        batch: Vec<Mutation>,
    ) -> Result<Vec<Mutation>, BatchError> {
        let limit = self.config.max_concurrency.max(1);
        let deadline = batch_deadline(Instant::now(), self.config.batch_timeout);

        let mut pending: VecDeque<Mutation> = batch.into();
        let mut in_flight: HashMap<Id, Mutation> = HashMap::new();
        let mut tasks: JoinSet<Result<(), StoreError>> = JoinSet::new();
        let mut outcome = BatchError::default();
        let mut aborted = false;

        loop {
            while !aborted && tasks.len() < limit {
                let Some(mutation) = pending.pop_front() else {
                    break;
                };
                let store = Arc::clone(store);
                let call = mutation.clone();
                let handle = tasks.spawn(async move { call.apply(store.as_ref()).await });
                in_flight.insert(handle.id(), mutation);
            }

            let joined = match tokio::time::timeout_at(deadline, tasks.join_next_with_id()).await {
                Ok(Some(joined)) => joined,
                Ok(None) => break,
                Err(_) => {
                    tasks.shutdown().await;
                    for (_, mutation) in in_flight.drain() {
                        outcome.failed.push(FailedMutation {
                            mutation,
                            reason: format!(
                                "timed out after {:?}, call cancelled",
                                self.config.batch_timeout
                            ),
                            retryable: true,
                        });
                    }
                    break;
                }
            };

            match joined {
                Ok((id, result)) => {
                    let Some(mutation) = in_flight.remove(&id) else {
                        continue;
                    };
                    match result {
                        Ok(()) => {
                            debug!(%mutation, "association change applied");
                            outcome.succeeded.push(mutation);
                        }
                        Err(err) => {
                            warn!(%mutation, error = %err, "association change failed");
                            outcome.failed.push(FailedMutation {
                                mutation,
                                reason: err.message().to_string(),
                                retryable: err.is_retryable(),
                            });
                            if !aborted {
                                aborted = true;
                                tasks.abort_all();
                            }
                        }
                    }
                }
                Err(join_err) => {
                    let Some(mutation) = in_flight.remove(&join_err.id()) else {
                        continue;
                    };
                    if join_err.is_cancelled() {
                        outcome.cancelled.push(mutation);
                    } else {
                        outcome.failed.push(FailedMutation {
                            mutation,
                            reason: format!("call panicked: {}", join_err),
                            retryable: false,
                        });
                        if !aborted {
                            aborted = true;
                            tasks.abort_all();
                        }
                    }
                }
            }
        }

        if outcome.failed.is_empty() && outcome.cancelled.is_empty() {
            return Ok(outcome.succeeded);
        }
        outcome.not_attempted.extend(pending);
        Err(outcome)
    }
}

/// `start + timeout`, saturating at roughly thirty years out.
fn batch_deadline(start: Instant, timeout: Duration) -> Instant {
    const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);
    start
        .checked_add(timeout)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}
