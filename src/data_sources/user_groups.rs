use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::instrument;

use super::{computed, required_str, DataSource};
use crate::client::UserGroup;
use crate::error::ProviderError;
use crate::provider::ProviderContext;
use crate::schema::{Attribute, AttributeType, Schema};

fn group_fields() -> Vec<(&'static str, AttributeType)> {
    vec![
        ("id", AttributeType::String),
        ("name", AttributeType::String),
        ("description", AttributeType::String),
        ("members_count", AttributeType::Int64),
        ("default", AttributeType::Bool),
    ]
}

fn group_value(group: UserGroup) -> Value {
    json!({
        "id": group.id,
        "name": group.name,
        "description": group.description,
        "members_count": group.members_count,
        "default": group.default,
    })
}

/// `sonarcloud_user_groups`
pub struct UserGroupsDataSource;

#[async_trait]
impl DataSource for UserGroupsDataSource {
    fn type_name(&self) -> &'static str {
        "sonarcloud_user_groups"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Lists the user groups of the configured organization.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "groups",
                computed(AttributeType::list(AttributeType::object(group_fields()))),
            )
    }

    #[instrument(skip_all, fields(data_source = self.type_name()))]
    async fn read(&self, ctx: &ProviderContext, _config: Value) -> Result<Value, ProviderError> {
        let groups: Vec<Value> = ctx
            .api
            .user_groups()
            .await?
            .into_iter()
            .map(group_value)
            .collect();
        Ok(json!({"id": ctx.api.organization(), "groups": groups}))
    }
}

/// `sonarcloud_user_group`: a single group looked up by name.
pub struct UserGroupDataSource;

#[async_trait]
impl DataSource for UserGroupDataSource {
    fn type_name(&self) -> &'static str {
        "sonarcloud_user_group"
    }

    fn schema(&self) -> Schema {
        let mut schema = Schema::v0().with_description("Reads a single user group.");
        for (name, ty) in group_fields() {
            schema = schema.with_attribute(name, computed(ty));
        }
        schema.with_attribute(
            "name",
            Attribute::required_string().with_description("The name of the user group."),
        )
    }

    #[instrument(skip_all, fields(data_source = self.type_name()))]
    async fn read(&self, ctx: &ProviderContext, config: Value) -> Result<Value, ProviderError> {
        let name = required_str(&config, "name")?;
        ctx.api
            .user_groups()
            .await?
            .into_iter()
            .find(|g| g.name == name)
            .map(group_value)
            .ok_or_else(|| {
                ProviderError::NotFound(format!(
                    "user group '{}' in organization '{}'",
                    name,
                    ctx.api.organization()
                ))
            })
    }
}

/// `sonarcloud_user_group_members`
pub struct UserGroupMembersDataSource;

#[async_trait]
impl DataSource for UserGroupMembersDataSource {
    fn type_name(&self) -> &'static str {
        "sonarcloud_user_group_members"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Lists the members of a user group.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("group", Attribute::required_string())
            .with_attribute(
                "users",
                computed(AttributeType::list(AttributeType::object([
                    ("login", AttributeType::String),
                    ("name", AttributeType::String),
                ]))),
            )
    }

    #[instrument(skip_all, fields(data_source = self.type_name()))]
    async fn read(&self, ctx: &ProviderContext, config: Value) -> Result<Value, ProviderError> {
        let group = required_str(&config, "group")?;
        let users: Vec<Value> = ctx
            .api
            .user_group_members(group)
            .await?
            .into_iter()
            .map(|m| json!({"login": m.login, "name": m.name}))
            .collect();
        Ok(json!({"id": group, "group": group, "users": users}))
    }
}
