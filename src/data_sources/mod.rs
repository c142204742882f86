//! Read-only data sources.

mod permissions;
mod projects;
mod quality_gates;
mod user_groups;
mod webhooks;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProviderError;
use crate::provider::ProviderContext;
use crate::schema::{Attribute, AttributeFlags, AttributeType, Schema};

pub use permissions::{UserGroupPermissionsDataSource, UserPermissionsDataSource};
pub use projects::ProjectsDataSource;
pub use quality_gates::{QualityGateDataSource, QualityGatesDataSource};
pub use user_groups::{UserGroupDataSource, UserGroupMembersDataSource, UserGroupsDataSource};
pub use webhooks::WebhooksDataSource;

/// A read-only view of remote state.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Type name, e.g. `sonarcloud_projects`.
    fn type_name(&self) -> &'static str;

    fn schema(&self) -> Schema;

    /// Read a snapshot for the given (already validated) configuration.
    async fn read(&self, ctx: &ProviderContext, config: Value) -> Result<Value, ProviderError>;
}

pub(crate) fn computed(attr_type: AttributeType) -> Attribute {
    Attribute::new(attr_type, AttributeFlags::computed())
}

/// Optional string argument of a data source config.
pub(crate) fn optional_str<'a>(config: &'a Value, name: &str) -> Option<&'a str> {
    config.get(name).and_then(Value::as_str).filter(|s| !s.is_empty())
}

pub(crate) fn required_str<'a>(config: &'a Value, name: &str) -> Result<&'a str, ProviderError> {
    optional_str(config, name)
        .ok_or_else(|| ProviderError::Validation(format!("Missing required argument: {}", name)))
}
