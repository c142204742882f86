//! The SonarCloud provider.
//!
//! [`SonarCloudProvider`] routes host calls to the registered [`Resource`]s
//! and [`DataSource`]s. It holds no connection until `configure` runs; every
//! operation that talks to SonarCloud before that fails with
//! [`ProviderError::FailedPrecondition`].

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::client::{Client, SonarCloudApi};
use crate::config::ProviderConfig;
use crate::data_sources::{
    DataSource, ProjectsDataSource, QualityGateDataSource, QualityGatesDataSource,
    UserGroupDataSource, UserGroupMembersDataSource, UserGroupPermissionsDataSource,
    UserGroupsDataSource, UserPermissionsDataSource, WebhooksDataSource,
};
use crate::error::ProviderError;
use crate::plan::PlanResult;
use crate::reconcile::ReconcileSettings;
use crate::resources::{
    ProjectResource, QualityGateSelectionResource, Resource, UserGroupPermissionsResource,
    UserPermissionsResource, WebhookResource,
};
use crate::schema::{Attribute, AttributeFlags, AttributeType, Diagnostic, ProviderSchema, Schema};
use crate::service::{ImportedResource, ProviderService};
use crate::validation::validate;

/// Everything a resource needs to talk to SonarCloud.
pub struct ProviderContext {
    /// The API, scoped to the configured organization.
    pub api: Arc<dyn SonarCloudApi>,
    /// Executor and poller tuning for association resources.
    pub reconcile: ReconcileSettings,
}

impl ProviderContext {
    pub fn new(api: Arc<dyn SonarCloudApi>, reconcile: ReconcileSettings) -> Self {
        Self { api, reconcile }
    }
}

/// The `sonarcloud` provider.
pub struct SonarCloudProvider {
    resources: HashMap<&'static str, Box<dyn Resource>>,
    data_sources: HashMap<&'static str, Box<dyn DataSource>>,
    api: Option<Arc<dyn SonarCloudApi>>,
    context: RwLock<Option<Arc<ProviderContext>>>,
}

impl Default for SonarCloudProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SonarCloudProvider {
    /// A provider that connects to SonarCloud over HTTPS once configured.
    pub fn new() -> Self {
        let resources: Vec<Box<dyn Resource>> = vec![
            Box::new(ProjectResource),
            Box::new(QualityGateSelectionResource),
            Box::new(UserGroupPermissionsResource),
            Box::new(UserPermissionsResource),
            Box::new(WebhookResource),
        ];
        let data_sources: Vec<Box<dyn DataSource>> = vec![
            Box::new(ProjectsDataSource),
            Box::new(QualityGatesDataSource),
            Box::new(QualityGateDataSource),
            Box::new(UserGroupsDataSource),
            Box::new(UserGroupDataSource),
            Box::new(UserGroupMembersDataSource),
            Box::new(UserGroupPermissionsDataSource),
            Box::new(UserPermissionsDataSource),
            Box::new(WebhooksDataSource),
        ];
        Self {
            resources: resources.into_iter().map(|r| (r.type_name(), r)).collect(),
            data_sources: data_sources.into_iter().map(|d| (d.type_name(), d)).collect(),
            api: None,
            context: RwLock::new(None),
        }
    }

    /// A provider that uses `api` instead of building an HTTPS client.
    ///
    /// `configure` still resolves and validates the configuration.
    pub fn with_api(api: Arc<dyn SonarCloudApi>) -> Self {
        Self {
            api: Some(api),
            ..Self::new()
        }
    }

    /// Whether `configure` has succeeded.
    pub fn is_configured(&self) -> bool {
        self.context
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn context(&self) -> Result<Arc<ProviderContext>, ProviderError> {
        self.context
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| {
                ProviderError::FailedPrecondition(
                    "the provider has not been configured; configure must succeed before any \
                     resource or data source operation"
                        .to_string(),
                )
            })
    }

    fn resource(&self, resource_type: &str) -> Result<&dyn Resource, ProviderError> {
        self.resources
            .get(resource_type)
            .map(|r| r.as_ref())
            .ok_or_else(|| ProviderError::UnknownResource(resource_type.to_string()))
    }

    fn data_source(&self, data_source_type: &str) -> Result<&dyn DataSource, ProviderError> {
        self.data_sources
            .get(data_source_type)
            .map(|d| d.as_ref())
            .ok_or_else(|| ProviderError::UnknownResource(data_source_type.to_string()))
    }

    fn provider_config_schema() -> Schema {
        let optional = |ty| Attribute::new(ty, AttributeFlags::optional());
        Schema::v0()
            .with_attribute(
                "organization",
                Attribute::optional_string().with_description(
                    "The SonarCloud organization. Falls back to SONARCLOUD_ORGANIZATION.",
                ),
            )
            .with_attribute(
                "token",
                Attribute::optional_string()
                    .sensitive()
                    .with_description("A SonarCloud API token. Falls back to SONARCLOUD_TOKEN."),
            )
            .with_attribute("base_url", Attribute::optional_string())
            .with_attribute("request_timeout_secs", optional(AttributeType::Int64))
            .with_attribute(
                "retry",
                optional(AttributeType::object([
                    ("max_attempts", AttributeType::Int64),
                    ("initial_interval_ms", AttributeType::Int64),
                    ("max_interval_ms", AttributeType::Int64),
                    ("max_elapsed_ms", AttributeType::Int64),
                ]))
                .with_description("Backoff used while waiting for permission changes to show up."),
            )
            .with_attribute(
                "executor",
                optional(AttributeType::object([
                    ("max_concurrency", AttributeType::Int64),
                    ("batch_timeout_secs", AttributeType::Int64),
                ])),
            )
    }
}

fn ensure_valid(diagnostics: Vec<Diagnostic>) -> Result<(), ProviderError> {
    let errors: Vec<String> = diagnostics
        .iter()
        .filter(|d| d.is_error())
        .map(|d| match &d.detail {
            Some(detail) => format!("{}: {}", d.summary, detail),
            None => d.summary.clone(),
        })
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ProviderError::Validation(errors.join("; ")))
    }
}

#[async_trait::async_trait]
impl ProviderService for SonarCloudProvider {
    fn schema(&self) -> ProviderSchema {
        let mut schema = ProviderSchema::new().with_provider_config(Self::provider_config_schema());
        for (name, resource) in &self.resources {
            schema = schema.with_resource(*name, resource.schema());
        }
        for (name, data_source) in &self.data_sources {
            schema = schema.with_data_source(*name, data_source.schema());
        }
        schema
    }

    #[instrument(skip_all)]
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let diagnostics = validate(&Self::provider_config_schema(), &config);
        if diagnostics.iter().any(Diagnostic::is_error) {
            return Ok(diagnostics);
        }

        let resolved = match ProviderConfig::from_value(&config).and_then(|c| c.resolve()) {
            Ok(resolved) => resolved,
            Err(err @ ProviderError::Configuration(_)) => return Ok(vec![err.to_diagnostic()]),
            Err(err) => return Err(err),
        };

        let api: Arc<dyn SonarCloudApi> = match &self.api {
            Some(api) => Arc::clone(api),
            None => Arc::new(Client::new(resolved.client.clone())?),
        };
        info!(
            organization = %resolved.client.organization,
            base_url = %resolved.client.base_url,
            "provider configured"
        );

        *self.context.write().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::new(ProviderContext::new(api, resolved.reconcile)));
        Ok(diagnostics)
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        self.context
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        debug!("provider stopped");
        Ok(())
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        let schema = self.resource(resource_type)?.schema();
        if !proposed_state.is_null() {
            ensure_valid(validate(&schema, &proposed_state))?;
        }
        Ok(crate::plan::plan(&schema, prior_state.as_ref(), &proposed_state))
    }

    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        let resource = self.resource(resource_type)?;
        resource.create(&*self.context()?, planned_state).await
    }

    async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Option<Value>, ProviderError> {
        let resource = self.resource(resource_type)?;
        resource.read(&*self.context()?, current_state).await
    }

    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let resource = self.resource(resource_type)?;
        resource
            .update(&*self.context()?, prior_state, planned_state)
            .await
    }

    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        let resource = self.resource(resource_type)?;
        resource.delete(&*self.context()?, current_state).await
    }

    #[instrument(skip(self))]
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let resource = self.resource(resource_type)?;
        let partial = resource.import_state(id)?;
        let ctx = self.context()?;
        match resource.read(&ctx, partial).await? {
            Some(state) => Ok(vec![ImportedResource::new(resource_type, state)]),
            None => Err(ProviderError::NotFound(format!(
                "cannot import non-existent remote object {} {:?}",
                resource_type, id
            ))),
        }
    }

    async fn read_data_source(&self, data_source_type: &str, config: Value) -> Result<Value, ProviderError> {
        let data_source = self.data_source(data_source_type)?;
        ensure_valid(validate(&data_source.schema(), &config))?;
        data_source.read(&*self.context()?, config).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::{assert_has_errors, InMemorySonarCloud, ProviderTester};

    fn configured(api: &InMemorySonarCloud) -> ProviderTester<SonarCloudProvider> {
        ProviderTester::new(SonarCloudProvider::with_api(Arc::new(api.clone())))
    }

    fn credentials() -> Value {
        json!({
            "organization": "acme",
            "token": "t0k3n",
            "retry": {"max_attempts": 5, "initial_interval_ms": 0, "max_interval_ms": 0}
        })
    }

    #[test]
    fn test_schema_lists_everything() {
        let provider = SonarCloudProvider::new();
        let metadata = provider.metadata();
        assert_eq!(
            metadata.resources,
            vec![
                "sonarcloud_project",
                "sonarcloud_quality_gate_selection",
                "sonarcloud_user_group_permissions",
                "sonarcloud_user_permissions",
                "sonarcloud_webhook",
            ]
        );
        assert_eq!(metadata.data_sources.len(), 9);
        assert!(provider.schema().provider.attributes["token"].flags.sensitive);
    }

    #[tokio::test]
    async fn test_operations_fail_before_configure() {
        let provider = SonarCloudProvider::with_api(Arc::new(InMemorySonarCloud::new("acme")));
        let err = provider
            .read("sonarcloud_project", json!({"key": "web"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::FailedPrecondition(_)));

        let err = provider
            .read_data_source("sonarcloud_projects", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::FailedPrecondition(_)));
    }

    #[tokio::test]
    async fn test_configure_reports_bad_config() {
        let provider = SonarCloudProvider::with_api(Arc::new(InMemorySonarCloud::new("acme")));

        let diags = provider
            .configure(json!({"organization": "acme", "token": "x", "region": "eu"}))
            .await
            .unwrap();
        assert_has_errors(&diags);
        assert!(!provider.is_configured());

        let diags = provider
            .configure(json!({"organization": "acme", "token": "x", "executor": {"max_concurrency": 0}}))
            .await
            .unwrap();
        assert_has_errors(&diags);
        assert!(!provider.is_configured());
    }

    #[tokio::test]
    async fn test_group_permissions_lifecycle() {
        let api = InMemorySonarCloud::new("acme").with_group("devs", "Developers");
        let tester = configured(&api);
        tester.configure(credentials()).await.unwrap();

        let state = tester
            .lifecycle_create(
                "sonarcloud_user_group_permissions",
                json!({"name": "devs", "project_key": "web", "permissions": ["scan"]}),
            )
            .await
            .unwrap();
        assert_eq!(state["id"], "web-devs");

        let state = tester
            .lifecycle_update(
                "sonarcloud_user_group_permissions",
                state,
                json!({"name": "devs", "project_key": "web", "permissions": ["scan", "user"]}),
            )
            .await
            .unwrap();
        assert_eq!(state["permissions"], json!(["scan", "user"]));

        tester
            .lifecycle_delete("sonarcloud_user_group_permissions", state)
            .await
            .unwrap();
        assert!(api.group_permissions_of("devs", Some("web")).is_empty());
    }

    #[tokio::test]
    async fn test_plan_rejects_invalid_permission() {
        let api = InMemorySonarCloud::new("acme");
        let tester = configured(&api);

        let err = tester
            .plan_create(
                "sonarcloud_user_group_permissions",
                json!({"name": "devs", "permissions": ["root"]}),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("root"));
    }

    #[tokio::test]
    async fn test_import_existing_and_missing() {
        let api = InMemorySonarCloud::new("acme").with_group("devs", "");
        api.grant_group("devs", Some("web"), ["admin"]);
        let tester = configured(&api);
        tester.configure(credentials()).await.unwrap();

        let imported = tester
            .import_resource("sonarcloud_user_group_permissions", "devs,web")
            .await
            .unwrap();
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].state["permissions"], json!(["admin"]));

        let err = tester
            .import_resource("sonarcloud_user_group_permissions", "devs,api")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("non-existent"));
    }

    #[tokio::test]
    async fn test_read_data_source_validates_config() {
        let api = InMemorySonarCloud::new("acme").with_group("devs", "");
        let tester = configured(&api);
        tester.configure(credentials()).await.unwrap();

        let diags = tester
            .validate_data_source_config("sonarcloud_user_group", json!({}))
            .await
            .unwrap_err();
        assert!(diags.to_string().contains("name"));

        let group = tester
            .read_data_source("sonarcloud_user_group", json!({"name": "devs"}))
            .await
            .unwrap();
        assert_eq!(group["name"], "devs");
    }
}
