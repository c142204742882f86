use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::instrument;

use super::{computed, optional_str, DataSource};
use crate::error::ProviderError;
use crate::provider::ProviderContext;
use crate::reconcile::association_set;
use crate::schema::{Attribute, AttributeType, Schema};

fn scope_id(ctx: &ProviderContext, project_key: Option<&str>) -> String {
    match project_key {
        Some(project) => format!("{}-{}", ctx.api.organization(), project),
        None => ctx.api.organization().to_string(),
    }
}

/// `sonarcloud_user_group_permissions`: every group and its permissions.
pub struct UserGroupPermissionsDataSource;

#[async_trait]
impl DataSource for UserGroupPermissionsDataSource {
    fn type_name(&self) -> &'static str {
        "sonarcloud_user_group_permissions"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Lists user groups and their permissions.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "project_key",
                Attribute::optional_string()
                    .with_description("Project to read permissions of. Omit for organization permissions."),
            )
            .with_attribute(
                "groups",
                computed(AttributeType::list(AttributeType::object([
                    ("id", AttributeType::String),
                    ("name", AttributeType::String),
                    ("description", AttributeType::String),
                    ("permissions", AttributeType::set(AttributeType::String)),
                ]))),
            )
    }

    #[instrument(skip_all, fields(data_source = self.type_name()))]
    async fn read(&self, ctx: &ProviderContext, config: Value) -> Result<Value, ProviderError> {
        let project_key = optional_str(&config, "project_key");
        let groups: Vec<Value> = ctx
            .api
            .group_permissions(project_key)
            .await?
            .into_iter()
            .map(|g| {
                json!({
                    "id": g.id,
                    "name": g.name,
                    "description": g.description,
                    "permissions": association_set(g.permissions),
                })
            })
            .collect();
        Ok(json!({
            "id": scope_id(ctx, project_key),
            "project_key": project_key,
            "groups": groups,
        }))
    }
}

/// `sonarcloud_user_permissions`: every user holding a permission.
pub struct UserPermissionsDataSource;

#[async_trait]
impl DataSource for UserPermissionsDataSource {
    fn type_name(&self) -> &'static str {
        "sonarcloud_user_permissions"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Lists users and their permissions.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("project_key", Attribute::optional_string())
            .with_attribute(
                "users",
                computed(AttributeType::list(AttributeType::object([
                    ("login", AttributeType::String),
                    ("name", AttributeType::String),
                    ("avatar", AttributeType::String),
                    ("permissions", AttributeType::set(AttributeType::String)),
                ]))),
            )
    }

    #[instrument(skip_all, fields(data_source = self.type_name()))]
    async fn read(&self, ctx: &ProviderContext, config: Value) -> Result<Value, ProviderError> {
        let project_key = optional_str(&config, "project_key");
        let users: Vec<Value> = ctx
            .api
            .user_permissions(project_key)
            .await?
            .into_iter()
            .map(|u| {
                json!({
                    "login": u.login,
                    "name": u.name,
                    "avatar": u.avatar,
                    "permissions": association_set(u.permissions),
                })
            })
            .collect();
        Ok(json!({
            "id": scope_id(ctx, project_key),
            "project_key": project_key,
            "users": users,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, InMemorySonarCloud};

    #[tokio::test]
    async fn test_group_permissions_on_project() {
        let api = InMemorySonarCloud::new("acme").with_group("devs", "Developers");
        api.grant_group("devs", Some("web"), ["user", "codeviewer"]);
        let ctx = context(&api);

        let value = UserGroupPermissionsDataSource
            .read(&ctx, json!({"project_key": "web"}))
            .await
            .unwrap();

        assert_eq!(value["id"], "acme-web");
        assert_eq!(value["groups"][0]["name"], "devs");
        assert_eq!(value["groups"][0]["permissions"], json!(["codeviewer", "user"]));
    }

    #[tokio::test]
    async fn test_user_permissions_in_organization() {
        let api = InMemorySonarCloud::new("acme").with_user("ana", "Ana");
        api.grant_user("ana", None, ["scan"]);
        let ctx = context(&api);

        let value = UserPermissionsDataSource.read(&ctx, json!({})).await.unwrap();

        assert_eq!(value["id"], "acme");
        assert!(value["project_key"].is_null());
        assert_eq!(value["users"][0]["login"], "ana");
        assert_eq!(value["users"][0]["permissions"], json!(["scan"]));
    }
}
