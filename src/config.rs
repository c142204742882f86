//! Provider configuration.
//!
//! The host passes the provider block as JSON. Values missing there fall back
//! to environment variables, then to built-in defaults.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::{ClientConfig, DEFAULT_BASE_URL};
use crate::error::ProviderError;
use crate::reconcile::{ExecutorConfig, ReconcileSettings, RetryPolicy};

pub const ENV_ORGANIZATION: &str = "SONARCLOUD_ORGANIZATION";
pub const ENV_TOKEN: &str = "SONARCLOUD_TOKEN";
pub const ENV_RETRY_MAX_ATTEMPTS: &str = "SONARCLOUD_RETRY_MAX_ATTEMPTS";
pub const ENV_RETRY_INITIAL_MS: &str = "SONARCLOUD_RETRY_INITIAL_MS";
pub const ENV_RETRY_MAX_INTERVAL_MS: &str = "SONARCLOUD_RETRY_MAX_INTERVAL_MS";
pub const ENV_RETRY_MAX_ELAPSED_MS: &str = "SONARCLOUD_RETRY_MAX_ELAPSED_MS";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const MAX_BATCH_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// The provider configuration block as written by the user.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    pub organization: Option<String>,
    pub token: Option<String>,
    pub base_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub retry: RetrySettings,
    pub executor: ExecutorSettings,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("organization", &self.organization)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("retry", &self.retry)
            .field("executor", &self.executor)
            .finish()
    }
}

/// Overrides for the convergence backoff policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: Option<u32>,
    pub initial_interval_ms: Option<u64>,
    pub multiplier: Option<f64>,
    pub max_interval_ms: Option<u64>,
    pub max_elapsed_ms: Option<u64>,
    pub jitter: Option<f64>,
}

/// Overrides for mutation batches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorSettings {
    pub max_concurrency: Option<usize>,
    pub batch_timeout_secs: Option<u64>,
}

/// Fully resolved settings, ready to build a client and handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub client: ClientConfig,
    pub reconcile: ReconcileSettings,
}

impl ProviderConfig {
    /// Parse the provider block. `null` is treated as an empty block.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ProviderError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone())
            .map_err(|e| ProviderError::Configuration(format!("invalid provider configuration: {}", e)))
    }

    /// Resolve against the process environment.
    pub fn resolve(&self) -> Result<ResolvedConfig, ProviderError> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    /// Resolve using `env` to look up fallback variables.
    pub fn resolve_with<E>(&self, env: E) -> Result<ResolvedConfig, ProviderError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let organization = required(&self.organization, ENV_ORGANIZATION, "organization", &env)?;
        let token = required(&self.token, ENV_TOKEN, "token", &env)?;

        let client = ClientConfig {
            base_url: self
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            organization,
            token,
            timeout: Duration::from_secs(
                self.request_timeout_secs
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
        };

        Ok(ResolvedConfig {
            client,
            reconcile: ReconcileSettings {
                retry: self.retry.resolve(&env)?,
                executor: self.executor.resolve()?,
            },
        })
    }
}

impl RetrySettings {
    fn resolve<E>(&self, env: &E) -> Result<RetryPolicy, ProviderError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let mut policy = RetryPolicy::default();

        if let Some(attempts) = self
            .max_attempts
            .or(parse_env(env, ENV_RETRY_MAX_ATTEMPTS)?)
        {
            if attempts == 0 {
                return Err(ProviderError::Configuration(
                    "retry.max_attempts must be at least 1".to_string(),
                ));
            }
            policy.max_attempts = attempts;
        }
        if let Some(ms) = self
            .initial_interval_ms
            .or(parse_env(env, ENV_RETRY_INITIAL_MS)?)
        {
            policy.initial_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self
            .max_interval_ms
            .or(parse_env(env, ENV_RETRY_MAX_INTERVAL_MS)?)
        {
            policy.max_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self
            .max_elapsed_ms
            .or(parse_env(env, ENV_RETRY_MAX_ELAPSED_MS)?)
        {
            policy.max_elapsed = Duration::from_millis(ms);
        }
        if let Some(multiplier) = self.multiplier {
            if !multiplier.is_finite() || multiplier < 1.0 {
                return Err(ProviderError::Configuration(format!(
                    "retry.multiplier must be at least 1.0, got {}",
                    multiplier
                )));
            }
            policy.multiplier = multiplier;
        }
        if let Some(jitter) = self.jitter {
            policy.jitter = jitter.clamp(0.0, 1.0);
        }

        Ok(policy)
    }
}

impl ExecutorSettings {
    fn resolve(&self) -> Result<ExecutorConfig, ProviderError> {
        let mut config = ExecutorConfig::default();
        if let Some(limit) = self.max_concurrency {
            if limit == 0 {
                return Err(ProviderError::Configuration(
                    "executor.max_concurrency must be at least 1".to_string(),
                ));
            }
            config.max_concurrency = limit;
        }
        if let Some(secs) = self.batch_timeout_secs {
            if secs == 0 || secs > MAX_BATCH_TIMEOUT_SECS {
                return Err(ProviderError::Configuration(format!(
                    "executor.batch_timeout_secs must be between 1 and {}, got {}",
                    MAX_BATCH_TIMEOUT_SECS, secs
                )));
            }
            config.batch_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

fn required<E>(
    value: &Option<String>,
    var: &str,
    attribute: &str,
    env: &E,
) -> Result<String, ProviderError>
where
    E: Fn(&str) -> Option<String>,
{
    value
        .clone()
        .or_else(|| env(var))
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| {
            ProviderError::Configuration(format!(
                "missing {}: set it in the provider configuration or via {}",
                attribute, var
            ))
        })
}

fn parse_env<E, T>(env: &E, var: &str) -> Result<Option<T>, ProviderError>
where
    E: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match env(var) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|e| {
            ProviderError::Configuration(format!("invalid {}={:?}: {}", var, raw, e))
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_explicit_values_win_over_env() {
        let config = ProviderConfig::from_value(&json!({
            "organization": "acme",
            "token": "t0k3n"
        }))
        .unwrap();
        let resolved = config
            .resolve_with(env(&[(ENV_ORGANIZATION, "other"), (ENV_TOKEN, "other")]))
            .unwrap();

        assert_eq!(resolved.client.organization, "acme");
        assert_eq!(resolved.client.token, "t0k3n");
        assert_eq!(resolved.client.base_url, DEFAULT_BASE_URL);
        assert_eq!(resolved.reconcile, ReconcileSettings::default());
    }

    #[test]
    fn test_env_fallback() {
        let resolved = ProviderConfig::default()
            .resolve_with(env(&[
                (ENV_ORGANIZATION, "acme"),
                (ENV_TOKEN, "t0k3n"),
                (ENV_RETRY_MAX_ATTEMPTS, "3"),
                (ENV_RETRY_INITIAL_MS, "50"),
            ]))
            .unwrap();

        assert_eq!(resolved.client.organization, "acme");
        assert_eq!(resolved.reconcile.retry.max_attempts, 3);
        assert_eq!(
            resolved.reconcile.retry.initial_interval,
            Duration::from_millis(50)
        );
    }

    #[test]
    fn test_missing_token_is_configuration_error() {
        let err = ProviderConfig::default()
            .resolve_with(env(&[(ENV_ORGANIZATION, "acme")]))
            .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
        assert!(err.to_string().contains(ENV_TOKEN));
    }

    #[test]
    fn test_blank_organization_is_rejected() {
        let config = ProviderConfig {
            organization: Some("  ".into()),
            token: Some("t".into()),
            ..Default::default()
        };
        assert!(config.resolve_with(env(&[])).is_err());
    }

    #[test]
    fn test_invalid_env_number() {
        let err = ProviderConfig::default()
            .resolve_with(env(&[
                (ENV_ORGANIZATION, "acme"),
                (ENV_TOKEN, "t"),
                (ENV_RETRY_MAX_ELAPSED_MS, "soon"),
            ]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_RETRY_MAX_ELAPSED_MS));
    }

    #[test]
    fn test_overrides_are_validated() {
        let base = env(&[(ENV_ORGANIZATION, "acme"), (ENV_TOKEN, "t")]);

        let config = ProviderConfig::from_value(&json!({"retry": {"multiplier": 0.5}})).unwrap();
        assert!(config.resolve_with(&base).is_err());

        let config =
            ProviderConfig::from_value(&json!({"executor": {"max_concurrency": 0}})).unwrap();
        assert!(config.resolve_with(&base).is_err());

        let config = ProviderConfig::from_value(&json!({
            "retry": {"max_attempts": 12, "jitter": 3.0},
            "executor": {"max_concurrency": 8, "batch_timeout_secs": 5}
        }))
        .unwrap();
        let resolved = config.resolve_with(&base).unwrap();
        assert_eq!(resolved.reconcile.retry.max_attempts, 12);
        assert_eq!(resolved.reconcile.retry.jitter, 1.0);
        assert_eq!(resolved.reconcile.executor.max_concurrency, 8);
        assert_eq!(
            resolved.reconcile.executor.batch_timeout,
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = ProviderConfig::from_value(&json!({"organisation": "acme"})).unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[test]
    fn test_batch_timeout_is_bounded() {
        let base = env(&[(ENV_ORGANIZATION, "acme"), (ENV_TOKEN, "t")]);

        for secs in [0, u64::MAX] {
            let config =
                ProviderConfig::from_value(&json!({"executor": {"batch_timeout_secs": secs}}))
                    .unwrap();
            let err = config.resolve_with(&base).unwrap_err();
            assert!(matches!(err, ProviderError::Configuration(_)));
            assert!(err.to_string().contains("batch_timeout_secs"));
        }

        let config = ProviderConfig::from_value(&json!({
            "executor": {"batch_timeout_secs": MAX_BATCH_TIMEOUT_SECS}
        }))
        .unwrap();
        let resolved = config.resolve_with(&base).unwrap();
        assert_eq!(
            resolved.reconcile.executor.batch_timeout,
            Duration::from_secs(MAX_BATCH_TIMEOUT_SECS)
        );
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = ProviderConfig {
            token: Some("t0k3n".into()),
            ..Default::default()
        };
        assert!(!format!("{:?}", config).contains("t0k3n"));
    }
}
