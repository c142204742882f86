//! Testing utilities.
//!
//! [`ProviderTester`] drives a [`ProviderService`] the way a host would,
//! without a plugin transport. [`InMemorySonarCloud`] is a [`SonarCloudApi`]
//! that keeps everything in memory and can lag its reads behind its writes,
//! which is what the association resources have to cope with in production.
//!
//! # Example
//!
//! ```ignore
//! use sonarcloud_provider::testing::{InMemorySonarCloud, ProviderTester};
//! use sonarcloud_provider::SonarCloudProvider;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::test]
//! async fn grants_scan() {
//!     let api = InMemorySonarCloud::new("acme").with_group("devs", "").with_read_lag(2);
//!     let tester = ProviderTester::new(SonarCloudProvider::with_api(Arc::new(api.clone())));
//!     tester.configure(json!({"organization": "acme", "token": "t"})).await.unwrap();
//!
//!     let state = tester
//!         .lifecycle_create("sonarcloud_user_group_permissions", json!({"name": "devs", "permissions": ["scan"]}))
//!         .await
//!         .unwrap();
//!     assert_eq!(state["permissions"], json!(["scan"]));
//! }
//! ```
//!
//! [`SonarCloudApi`]: crate::client::SonarCloudApi

mod sonarcloud;

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::ProviderError;
use crate::plan::PlanResult;
use crate::provider::ProviderContext;
use crate::reconcile::{ReconcileSettings, RetryPolicy};
use crate::schema::{Diagnostic, ProviderSchema};
use crate::service::{ImportedResource, ProviderService};

pub use sonarcloud::InMemorySonarCloud;

/// A context over `api` that polls without sleeping.
pub fn context(api: &InMemorySonarCloud) -> ProviderContext {
    ProviderContext::new(
        Arc::new(api.clone()),
        ReconcileSettings {
            retry: RetryPolicy::immediate(10),
            ..Default::default()
        },
    )
}

/// A test harness for provider implementations.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    pub fn data_source_types(&self) -> Vec<String> {
        self.provider.metadata().data_sources
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate provider configuration; error diagnostics become `Err`.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider; error diagnostics become `Err`.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    pub async fn stop(&self) -> Result<(), ProviderError> {
        self.provider.stop().await
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a resource creation (no prior state).
    pub async fn plan_create(
        &self,
        resource_type: &str,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider.plan(resource_type, None, proposed_state).await
    }

    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), proposed_state)
            .await
    }

    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null)
            .await
    }

    pub async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Read a resource; `None` means the remote object is gone.
    pub async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Option<Value>, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    pub async fn delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    pub async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: u64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .upgrade_resource_state(resource_type, version, state)
            .await
    }

    // =========================================================================
    // Data Source Operations
    // =========================================================================

    pub async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_data_source_config(data_source_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    pub async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .read_data_source(data_source_type, config)
            .await
    }

    // =========================================================================
    // Lifecycle Helpers
    // =========================================================================

    /// plan → create → read. Returns the state after read.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self.plan_create(resource_type, config).await?;
        let created = self.create(resource_type, plan.planned_state).await?;
        self.read_existing(resource_type, created).await
    }

    /// plan → update → read. Returns the state after read.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self
            .plan_update(resource_type, prior_state.clone(), proposed_state)
            .await?;
        if plan.requires_replace {
            return Err(ProviderError::FailedPrecondition(format!(
                "plan for {} requires replacement, not an in-place update",
                resource_type
            )));
        }
        let updated = self
            .update(resource_type, prior_state, plan.planned_state)
            .await?;
        self.read_existing(resource_type, updated).await
    }

    /// plan → delete.
    pub async fn lifecycle_delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.plan_delete(resource_type, current_state.clone())
            .await?;
        self.delete(resource_type, current_state).await
    }

    /// create → update → delete. Returns the state after the update.
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial_config: Value,
        updated_config: Value,
    ) -> Result<Value, ProviderError> {
        let created = self.lifecycle_create(resource_type, initial_config).await?;
        let updated = self
            .lifecycle_update(resource_type, created, updated_config)
            .await?;
        self.lifecycle_delete(resource_type, updated.clone())
            .await?;
        Ok(updated)
    }

    async fn read_existing(&self, resource_type: &str, state: Value) -> Result<Value, ProviderError> {
        self.read(resource_type, state).await?.ok_or_else(|| {
            ProviderError::NotFound(format!("{} vanished right after it was written", resource_type))
        })
    }
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation returned error diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed outright.
    Provider(ProviderError),
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            }
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics.into_iter().filter(Diagnostic::is_error).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Panics unless the plan creates a new resource.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(
        plan.changes.iter().all(|c| c.before.is_none()) && plan.has_changes(),
        "Expected plan to create, got changes: {:?}",
        plan.changes
    );
}

/// Panics if the plan has any changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "Expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Panics unless the plan requires replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not"
    );
}

/// Panics if the plan requires replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(
        !plan.requires_replace,
        "Expected plan to update in place, but it requires replacement"
    );
}

/// Panics unless the plan changes the attribute at `path`.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    assert!(
        plan.changes.iter().any(|c| c.path == path),
        "Expected plan to change attribute '{}', but it was not changed. Changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Panics if the plan changes the attribute at `path`.
pub fn assert_plan_does_not_change_attribute(plan: &PlanResult, path: &str) {
    assert!(
        !plan.changes.iter().any(|c| c.path == path),
        "Expected plan to not change attribute '{}', but it was changed",
        path
    );
}

/// Panics if any diagnostic is an error.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = diagnostics.iter().filter(|d| d.is_error()).collect();
    assert!(
        errors.is_empty(),
        "Expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// Panics unless at least one diagnostic is an error.
pub fn assert_has_errors(diagnostics: &[Diagnostic]) {
    assert!(
        diagnostics.iter().any(Diagnostic::is_error),
        "Expected at least one error, but got none"
    );
}

/// Panics unless an error diagnostic's summary or detail contains `substring`.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let matches = |d: &&Diagnostic| {
        d.summary.contains(substring)
            || d.detail.as_deref().map_or(false, |detail| detail.contains(substring))
    };
    assert!(
        diagnostics.iter().filter(|d| d.is_error()).any(|d| matches(&d)),
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::provider::SonarCloudProvider;

    fn tester(api: &InMemorySonarCloud) -> ProviderTester<SonarCloudProvider> {
        ProviderTester::new(SonarCloudProvider::with_api(Arc::new(api.clone())))
    }

    fn credentials() -> Value {
        json!({"organization": "acme", "token": "t", "retry": {"initial_interval_ms": 0, "max_interval_ms": 0}})
    }

    #[tokio::test]
    async fn test_tester_configure_surfaces_diagnostics() {
        let tester = tester(&InMemorySonarCloud::new("acme"));
        let err = tester.configure(json!({"organization": 42})).await.unwrap_err();
        assert!(matches!(err, TestError::Diagnostics(_)));
        tokio_test::assert_ok!(tester.configure(credentials()).await);
        assert!(tester.provider().is_configured());

        tester.stop().await.unwrap();
        assert!(!tester.provider().is_configured());
    }

    #[tokio::test]
    async fn test_tester_types() {
        let tester = tester(&InMemorySonarCloud::new("acme"));
        assert!(tester.resource_types().contains(&"sonarcloud_project".to_string()));
        assert!(tester
            .data_source_types()
            .contains(&"sonarcloud_webhooks".to_string()));
        assert!(tester.schema().resources.contains_key("sonarcloud_webhook"));
    }

    #[tokio::test]
    async fn test_tester_plans() {
        let tester = tester(&InMemorySonarCloud::new("acme"));

        let plan = tester
            .plan_create("sonarcloud_project", json!({"name": "Web", "key": "acme_web"}))
            .await
            .unwrap();
        assert_plan_creates(&plan);

        let prior = json!({"id": "acme_web", "name": "Web", "key": "acme_web", "visibility": "public"});
        let plan = tester
            .plan_update("sonarcloud_project", prior.clone(), json!({"name": "Web", "key": "acme_web"}))
            .await
            .unwrap();
        assert_plan_no_changes(&plan);
        assert_eq!(plan.planned_state["visibility"], "public");

        let plan = tester
            .plan_update(
                "sonarcloud_project",
                prior.clone(),
                json!({"name": "Web", "key": "acme_site"}),
            )
            .await
            .unwrap();
        assert_plan_updates_in_place(&plan);
        assert_plan_changes_attribute(&plan, "key");
        assert_plan_does_not_change_attribute(&plan, "name");

        let plan = tester
            .plan_update("sonarcloud_project", prior, json!({"name": "Site", "key": "acme_web"}))
            .await
            .unwrap();
        assert_plan_replaces(&plan);
    }

    #[tokio::test]
    async fn test_tester_project_crud() {
        let api = InMemorySonarCloud::new("acme");
        let tester = tester(&api);
        tester.configure(credentials()).await.unwrap();
        tester
            .validate_resource_config("sonarcloud_project", json!({"name": "Web", "key": "acme_web"}))
            .await
            .unwrap();

        let state = tester
            .lifecycle_crud(
                "sonarcloud_project",
                json!({"name": "Web", "key": "acme_web"}),
                json!({"name": "Web", "key": "acme_web", "visibility": "private"}),
            )
            .await
            .unwrap();

        assert_eq!(state["visibility"], "private");
        assert_eq!(
            tester.read("sonarcloud_project", state).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_tester_upgrade_and_provider_config() {
        let tester = tester(&InMemorySonarCloud::new("acme"));
        let state = tester
            .upgrade_resource_state("sonarcloud_webhook", 0, json!({"key": "AX1"}))
            .await
            .unwrap();
        assert_eq!(state["key"], "AX1");

        tester
            .validate_provider_config(json!({"organization": "acme"}))
            .await
            .unwrap();
        let err = tester
            .validate_provider_config(json!({"organisation": "acme"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("organisation"));
    }

    #[test]
    fn test_assert_no_errors() {
        assert_no_errors(&[Diagnostic::warning("Just a warning")]);
    }

    #[test]
    #[should_panic(expected = "Expected no errors")]
    fn test_assert_no_errors_fails() {
        assert_no_errors(&[Diagnostic::error("An error")]);
    }

    #[test]
    fn test_assert_error_contains_checks_detail() {
        let diagnostics = vec![Diagnostic::error("Invalid String Value").with_detail("got: internal.")];
        assert_has_errors(&diagnostics);
        assert_error_contains(&diagnostics, "Invalid");
        assert_error_contains(&diagnostics, "internal");
    }

    #[test]
    fn test_test_error_display() {
        let err = TestError::Diagnostics(vec![
            Diagnostic::error("First error").with_attribute("field1"),
            Diagnostic::error("Second error").with_detail("More info"),
        ]);

        let display = format!("{}", err);
        assert!(display.contains("First error"));
        assert!(display.contains("Second error"));
        assert!(display.contains("field1"));
        assert!(display.contains("More info"));
    }
}
