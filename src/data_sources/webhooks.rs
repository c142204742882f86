use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::instrument;

use super::{computed, optional_str, DataSource};
use crate::error::ProviderError;
use crate::provider::ProviderContext;
use crate::schema::{Attribute, AttributeType, Schema};

/// `sonarcloud_webhooks`: webhooks of a project, or of the organization.
pub struct WebhooksDataSource;

#[async_trait]
impl DataSource for WebhooksDataSource {
    fn type_name(&self) -> &'static str {
        "sonarcloud_webhooks"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Lists the webhooks of a project or the organization.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("project", Attribute::optional_string())
            .with_attribute(
                "webhooks",
                computed(AttributeType::list(AttributeType::object([
                    ("key", AttributeType::String),
                    ("name", AttributeType::String),
                    ("url", AttributeType::String),
                    ("has_secret", AttributeType::Bool),
                ]))),
            )
    }

    #[instrument(skip_all, fields(data_source = self.type_name()))]
    async fn read(&self, ctx: &ProviderContext, config: Value) -> Result<Value, ProviderError> {
        let project = optional_str(&config, "project");
        let webhooks: Vec<Value> = ctx
            .api
            .list_webhooks(project)
            .await?
            .into_iter()
            .map(|w| {
                json!({
                    "key": w.key,
                    "name": w.name,
                    "url": w.url,
                    "has_secret": w.has_secret,
                })
            })
            .collect();
        Ok(json!({
            "id": format!("{}-{}", ctx.api.organization(), project.unwrap_or_default()),
            "project": project,
            "webhooks": webhooks,
        }))
    }
}
