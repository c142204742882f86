//! SonarCloud web API client.
//!
//! [`SonarCloudApi`] is the surface resources and data sources talk to.
//! [`Client`] implements it over HTTPS; the `testing` module provides an
//! in-memory implementation.

mod error;
mod http;
pub mod models;

use async_trait::async_trait;

pub use error::ClientError;
pub use http::{Client, ClientConfig, DEFAULT_BASE_URL};
pub use models::{
    CreateProject, CreateWebhook, GateCondition, GateProject, GroupMember, GroupPermissions,
    Project, QualityGate, UpdateWebhook, UserGroup, UserPermissions, Webhook,
};

/// Operations against one SonarCloud organization.
///
/// `project_key: None` addresses organization-level permissions.
/// List operations return every page.
#[async_trait]
pub trait SonarCloudApi: Send + Sync + 'static {
    /// The organization every call is scoped to.
    fn organization(&self) -> &str;

    // permissions

    async fn group_permissions(
        &self,
        project_key: Option<&str>,
    ) -> Result<Vec<GroupPermissions>, ClientError>;

    async fn add_group_permission(
        &self,
        group: &str,
        permission: &str,
        project_key: Option<&str>,
    ) -> Result<(), ClientError>;

    async fn remove_group_permission(
        &self,
        group: &str,
        permission: &str,
        project_key: Option<&str>,
    ) -> Result<(), ClientError>;

    async fn user_permissions(
        &self,
        project_key: Option<&str>,
    ) -> Result<Vec<UserPermissions>, ClientError>;

    async fn add_user_permission(
        &self,
        login: &str,
        permission: &str,
        project_key: Option<&str>,
    ) -> Result<(), ClientError>;

    async fn remove_user_permission(
        &self,
        login: &str,
        permission: &str,
        project_key: Option<&str>,
    ) -> Result<(), ClientError>;

    // quality gates

    /// Projects currently selected on the gate.
    /// Every gate of the organization, built-in ones included.
    async fn quality_gates(&self) -> Result<Vec<QualityGate>, ClientError>;

    async fn quality_gate_projects(&self, gate_id: &str) -> Result<Vec<GateProject>, ClientError>;

    async fn select_quality_gate(&self, gate_id: &str, project_key: &str)
        -> Result<(), ClientError>;

    async fn deselect_quality_gate(
        &self,
        gate_id: &str,
        project_key: &str,
    ) -> Result<(), ClientError>;

    // projects

    async fn create_project(&self, project: &CreateProject) -> Result<Project, ClientError>;

    /// Search projects; an empty `keys` slice lists all of them.
    async fn search_projects(&self, keys: &[String]) -> Result<Vec<Project>, ClientError>;

    async fn delete_project(&self, key: &str) -> Result<(), ClientError>;

    async fn update_project_key(&self, from: &str, to: &str) -> Result<(), ClientError>;

    async fn update_project_visibility(
        &self,
        key: &str,
        visibility: &str,
    ) -> Result<(), ClientError>;

    // webhooks

    async fn create_webhook(&self, webhook: &CreateWebhook) -> Result<Webhook, ClientError>;

    async fn list_webhooks(&self, project: Option<&str>) -> Result<Vec<Webhook>, ClientError>;

    async fn update_webhook(&self, webhook: &UpdateWebhook) -> Result<(), ClientError>;

    async fn delete_webhook(&self, key: &str) -> Result<(), ClientError>;

    // user groups

    async fn user_groups(&self) -> Result<Vec<UserGroup>, ClientError>;

    async fn user_group_members(&self, group: &str) -> Result<Vec<GroupMember>, ClientError>;
}
