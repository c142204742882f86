use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::instrument;

use super::{computed, DataSource};
use crate::error::ProviderError;
use crate::provider::ProviderContext;
use crate::schema::{Attribute, AttributeType, Schema};

/// `sonarcloud_projects`: every project of the organization.
pub struct ProjectsDataSource;

#[async_trait]
impl DataSource for ProjectsDataSource {
    fn type_name(&self) -> &'static str {
        "sonarcloud_projects"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Lists the projects of the configured organization.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "projects",
                computed(AttributeType::list(AttributeType::object([
                    ("id", AttributeType::String),
                    ("name", AttributeType::String),
                    ("key", AttributeType::String),
                    ("visibility", AttributeType::String),
                ]))),
            )
    }

    #[instrument(skip_all, fields(data_source = self.type_name()))]
    async fn read(&self, ctx: &ProviderContext, _config: Value) -> Result<Value, ProviderError> {
        let projects: Vec<Value> = ctx
            .api
            .search_projects(&[])
            .await?
            .into_iter()
            .map(|p| {
                json!({
                    "id": p.key,
                    "name": p.name,
                    "key": p.key,
                    "visibility": p.visibility,
                })
            })
            .collect();
        Ok(json!({
            "id": ctx.api.organization(),
            "projects": projects,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, InMemorySonarCloud};

    #[tokio::test]
    async fn test_lists_projects() {
        let api = InMemorySonarCloud::new("acme")
            .with_project("acme_web", "Web")
            .with_project("acme_api", "API");
        let ctx = context(&api);

        let value = ProjectsDataSource.read(&ctx, Value::Null).await.unwrap();
        assert_eq!(value["id"], "acme");
        let keys: Vec<&str> = value["projects"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["key"].as_str().unwrap())
            .collect();
        assert_eq!(keys, vec!["acme_api", "acme_web"]);
    }
}
