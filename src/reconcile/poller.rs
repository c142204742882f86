use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{diff, format_keys, AssociationSet, BatchError, MutationReport, Reconciliation, StoreError};

/// Exponential backoff policy for convergence polling.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of remote reads, including the first one.
    pub max_attempts: u32,
    /// Wait after the first read that does not match.
    pub initial_interval: Duration,
    /// Growth factor applied to the wait after each attempt.
    pub multiplier: f64,
    /// Upper bound for a single wait.
    pub max_interval: Duration,
    /// Total time budget; a wait that would cross it ends polling.
    pub max_elapsed: Duration,
    /// Symmetric jitter fraction applied to each wait (0.0..=1.0).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_interval: Duration::from_millis(500),
            multiplier: 1.5,
            max_interval: Duration::from_secs(10),
            max_elapsed: Duration::from_secs(60),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// A policy that polls `max_attempts` times without waiting.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_interval: Duration::ZERO,
            multiplier: 1.0,
            max_interval: Duration::ZERO,
            max_elapsed: Duration::MAX,
            jitter: 0.0,
        }
    }

    /// Wait after the given 1-based attempt, before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let scaled = self.initial_interval.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = scaled.min(self.max_interval.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            Duration::ZERO
        }
    }

    /// Wait after the given 1-based attempt, with jitter applied.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        apply_jitter(self.base_delay(attempt), self.jitter)
    }
}

fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 || delay.is_zero() {
        return delay;
    }
    let spread = jitter.min(1.0);
    let factor = 1.0 + rand::rng().random_range(-spread..=spread);
    Duration::from_secs_f64((delay.as_secs_f64() * factor).max(0.0))
}

/// Why convergence did not complete.
#[derive(Debug, Clone, PartialEq)]
pub enum ConvergeError {
    /// The attempt or time budget ran out before the remote set matched.
    Timeout {
        /// Remote reads performed.
        attempts: u32,
        /// The set that was expected.
        desired: AssociationSet,
        /// The last set actually read, if any read succeeded.
        last_observed: Option<AssociationSet>,
    },
    /// A read failed with a non-retryable error.
    Store(StoreError),
    /// Reapplying the diff failed with a non-retryable error.
    Mutation(BatchError),
}

impl ConvergeError {
    /// Keys expected but missing from the last read.
    pub fn missing(&self) -> Vec<&str> {
        match self {
            Self::Timeout {
                desired,
                last_observed: Some(observed),
                ..
            } => desired.difference(observed).map(String::as_str).collect(),
            Self::Timeout { desired, .. } => desired.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Keys present in the last read but not expected.
    pub fn unexpected(&self) -> Vec<&str> {
        match self {
            Self::Timeout {
                desired,
                last_observed: Some(observed),
                ..
            } => observed.difference(desired).map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for ConvergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout {
                attempts,
                desired,
                last_observed,
            } => {
                write!(
                    f,
                    "remote state did not converge after {} attempt(s): expected {}",
                    attempts,
                    format_keys(desired)
                )?;
                match last_observed {
                    Some(observed) => write!(
                        f,
                        ", last read {} (missing {:?}, unexpected {:?})",
                        format_keys(observed),
                        self.missing(),
                        self.unexpected()
                    ),
                    None => write!(f, ", no successful read"),
                }
            }
            Self::Store(err) => write!(f, "reading remote state failed: {}", err),
            Self::Mutation(err) => write!(f, "reapplying changes failed: {}", err),
        }
    }
}

impl std::error::Error for ConvergeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Timeout { .. } => None,
            Self::Store(err) => Some(err),
            Self::Mutation(err) => Some(err),
        }
    }
}

/// Re-reads remote state until it equals the desired set.
///
/// Each attempt reads the set and, when it differs, reapplies the diff
/// through `mutate` before backing off. Reapplying rather than only
/// re-reading covers writes the server accepted and then lost.
#[derive(Debug, Clone, Default)]
pub struct ConvergencePoller {
    policy: RetryPolicy,
}

impl ConvergencePoller {
    /// Create a poller with the given backoff policy.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// The backoff policy in use.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Poll until `fetch` returns `desired`.
    ///
    /// Retryable read and write failures consume an attempt. Permanent ones
    /// end polling immediately.
    pub async fn converge<F, FFut, M, MFut>(
        &self,
        desired: &AssociationSet,
        mut fetch: F,
        mut mutate: M,
    ) -> Result<AssociationSet, ConvergeError>
    where
        F: FnMut() -> FFut,
        FFut: Future<Output = Result<AssociationSet, StoreError>>,
        M: FnMut(Reconciliation) -> MFut,
        MFut: Future<Output = Result<MutationReport, BatchError>>,
    {
        let started = Instant::now();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_observed = None;
        let mut attempts = 0;

        while attempts < max_attempts {
            attempts += 1;

            match fetch().await {
                Ok(observed) => {
                    let plan = diff(&observed, desired);
                    if plan.is_empty() {
                        debug!(attempts, "remote state converged");
                        return Ok(observed);
                    }
                    debug!(
                        attempts,
                        missing = plan.to_add.len(),
                        unexpected = plan.to_remove.len(),
                        "remote state not yet converged"
                    );
                    last_observed = Some(observed);

                    if attempts == max_attempts {
                        break;
                    }
                    if let Err(err) = mutate(plan).await {
                        if !err.is_retryable() {
                            return Err(ConvergeError::Mutation(err));
                        }
                        warn!(attempts, error = %err, "reapplying changes failed, will retry");
                    }
                }
                Err(err) if err.is_retryable() => {
                    warn!(attempts, error = %err, "reading remote state failed, will retry");
                }
                Err(err) => return Err(ConvergeError::Store(err)),
            }

            if attempts == max_attempts {
                break;
            }
            let delay = self.policy.delay_for_attempt(attempts);
            if started.elapsed().saturating_add(delay) > self.policy.max_elapsed {
                info!(attempts, "convergence time budget exhausted");
                break;
            }
            tokio::time::sleep(delay).await;
        }

        Err(ConvergeError::Timeout {
            attempts,
            desired: desired.clone(),
            last_observed,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::reconcile::{association_set, Mutation};

    fn no_mutation(_: Reconciliation) -> std::future::Ready<Result<MutationReport, BatchError>> {
        std::future::ready(Ok(MutationReport::default()))
    }

    /// Returns an empty set until the given call, then the desired set.
    fn lagging_fetch(
        visible_on: u32,
        desired: AssociationSet,
    ) -> (
        Arc<AtomicU32>,
        impl FnMut() -> std::future::Ready<Result<AssociationSet, StoreError>>,
    ) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let fetch = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let observed = if n >= visible_on {
                desired.clone()
            } else {
                AssociationSet::new()
            };
            std::future::ready(Ok(observed))
        };
        (calls, fetch)
    }

    #[test]
    fn test_base_delay_grows_and_caps() {
        let policy = RetryPolicy {
            initial_interval: Duration::from_millis(100),
            multiplier: 2.0,
            max_interval: Duration::from_millis(500),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.base_delay(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay(2), Duration::from_millis(200));
        assert_eq!(policy.base_delay(3), Duration::from_millis(400));
        assert_eq!(policy.base_delay(4), Duration::from_millis(500));
        assert_eq!(policy.base_delay(60), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..200 {
            let delay = policy.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(400), "{:?}", delay);
            assert!(delay <= Duration::from_millis(600), "{:?}", delay);
        }
    }

    #[tokio::test]
    async fn test_converges_when_write_becomes_visible() {
        let desired = association_set(["provisioning"]);
        let (calls, fetch) = lagging_fetch(3, desired.clone());

        let observed = ConvergencePoller::new(RetryPolicy::immediate(3))
            .converge(&desired, fetch, no_mutation)
            .await
            .unwrap();

        assert_eq!(observed, desired);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_times_out_when_budget_too_small() {
        let desired = association_set(["provisioning"]);
        let (calls, fetch) = lagging_fetch(3, desired.clone());

        let err = ConvergencePoller::new(RetryPolicy::immediate(2))
            .converge(&desired, fetch, no_mutation)
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match &err {
            ConvergeError::Timeout {
                attempts,
                last_observed,
                ..
            } => {
                assert_eq!(*attempts, 2);
                assert_eq!(last_observed.as_ref(), Some(&AssociationSet::new()));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(err.missing(), vec!["provisioning"]);
        assert!(err.to_string().contains("did not converge after 2 attempt(s)"));
    }

    #[tokio::test]
    async fn test_reapplies_diff_between_reads() {
        let desired = association_set(["admin", "scan"]);
        let (_, fetch) = lagging_fetch(2, desired.clone());
        let mut reapplied = Vec::new();

        ConvergencePoller::new(RetryPolicy::immediate(5))
            .converge(&desired, fetch, |plan: Reconciliation| {
                reapplied.push(plan.clone());
                std::future::ready(Ok(MutationReport {
                    succeeded: plan.to_add.into_iter().map(Mutation::Add).collect(),
                }))
            })
            .await
            .unwrap();

        assert_eq!(reapplied.len(), 1);
        assert_eq!(reapplied[0].to_add, vec!["admin".to_string(), "scan".to_string()]);
    }

    #[tokio::test]
    async fn test_permanent_read_error_escalates() {
        let desired = association_set(["scan"]);
        let err = ConvergencePoller::new(RetryPolicy::immediate(5))
            .converge(
                &desired,
                || std::future::ready(Err(StoreError::permanent("HTTP 403"))),
                no_mutation,
            )
            .await
            .unwrap_err();

        assert_eq!(err, ConvergeError::Store(StoreError::permanent("HTTP 403")));
    }

    #[tokio::test]
    async fn test_retryable_read_error_consumes_attempt() {
        let desired = association_set(["scan"]);
        let calls = AtomicU32::new(0);

        let observed = ConvergencePoller::new(RetryPolicy::immediate(3))
            .converge(
                &desired,
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    std::future::ready(if n == 0 {
                        Err(StoreError::retryable("HTTP 503"))
                    } else {
                        Ok(association_set(["scan"]))
                    })
                },
                no_mutation,
            )
            .await
            .unwrap();

        assert_eq!(observed, desired);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_mutation_error_escalates() {
        let desired = association_set(["scan"]);
        let err = ConvergencePoller::new(RetryPolicy::immediate(5))
            .converge(
                &desired,
                || std::future::ready(Ok(AssociationSet::new())),
                |_| {
                    std::future::ready(Err(BatchError {
                        failed: vec![crate::reconcile::FailedMutation {
                            mutation: Mutation::Add("scan".into()),
                            reason: "HTTP 400".into(),
                            retryable: false,
                        }],
                        ..BatchError::default()
                    }))
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ConvergeError::Mutation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_budget_stops_polling() {
        let policy = RetryPolicy {
            max_attempts: 100,
            initial_interval: Duration::from_secs(1),
            multiplier: 1.0,
            max_interval: Duration::from_secs(1),
            max_elapsed: Duration::from_millis(3500),
            jitter: 0.0,
        };
        let calls = AtomicU32::new(0);
        let desired = association_set(["scan"]);

        let err = ConvergencePoller::new(policy)
            .converge(
                &desired,
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    std::future::ready(Ok(AssociationSet::new()))
                },
                no_mutation,
            )
            .await
            .unwrap_err();

        // Reads at t=0, 1, 2, 3; the next wait would end at 4s > 3.5s.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(matches!(err, ConvergeError::Timeout { attempts: 4, .. }));
    }
}
