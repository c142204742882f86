use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use super::{decode, encode, parse_import_id, Resource};
use crate::client::{CreateWebhook, UpdateWebhook, Webhook};
use crate::error::ProviderError;
use crate::provider::ProviderContext;
use crate::schema::{Attribute, Schema};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct State {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    secret: Option<String>,
    #[serde(default)]
    url: String,
}

impl State {
    /// The API never returns the secret, so it is carried over from `secret`.
    fn observed(webhook: Webhook, project: Option<String>, secret: Option<String>) -> Self {
        Self {
            id: Some(webhook.key.clone()),
            key: Some(webhook.key),
            project,
            name: webhook.name,
            secret,
            url: webhook.url,
        }
    }

    fn lookup_key(&self) -> Result<&str, ProviderError> {
        self.key
            .as_deref()
            .or(self.id.as_deref())
            .ok_or_else(|| ProviderError::Validation("webhook state has no key".to_string()))
    }
}

async fn find_webhook(
    ctx: &ProviderContext,
    project: Option<&str>,
    key: &str,
) -> Result<Option<Webhook>, ProviderError> {
    let webhooks = ctx.api.list_webhooks(project).await?;
    Ok(webhooks.into_iter().find(|w| w.key == key))
}

/// `sonarcloud_webhook`
pub struct WebhookResource;

#[async_trait]
impl Resource for WebhookResource {
    fn type_name(&self) -> &'static str {
        "sonarcloud_webhook"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("A project or organization webhook.")
            .with_attribute(
                "id",
                Attribute::computed_string().with_description("Equal to the webhook key."),
            )
            .with_attribute("key", Attribute::computed_string())
            .with_attribute(
                "project",
                Attribute::optional_string().with_force_new().with_description(
                    "The key of the project to add the webhook to. Omit for an organization webhook.",
                ),
            )
            .with_attribute("name", Attribute::required_string())
            .with_attribute(
                "secret",
                Attribute::optional_string().sensitive().with_description(
                    "Key for the HMAC digest sent in the `X-Sonar-Webhook-HMAC-SHA256` header.",
                ),
            )
            .with_attribute("url", Attribute::required_string())
    }

    #[instrument(skip_all, fields(resource = self.type_name()))]
    async fn create(&self, ctx: &ProviderContext, planned: Value) -> Result<Value, ProviderError> {
        let planned: State = decode(planned)?;
        let created = ctx
            .api
            .create_webhook(&CreateWebhook {
                name: planned.name.clone(),
                url: planned.url.clone(),
                project: planned.project.clone(),
                secret: planned.secret.clone(),
            })
            .await?;
        debug!(key = %created.key, "webhook created");
        encode(&State::observed(created, planned.project, planned.secret))
    }

    #[instrument(skip_all, fields(resource = self.type_name()))]
    async fn read(&self, ctx: &ProviderContext, state: Value) -> Result<Option<Value>, ProviderError> {
        let state: State = decode(state)?;
        let key = state.lookup_key()?;
        match find_webhook(ctx, state.project.as_deref(), key).await? {
            Some(webhook) => Ok(Some(encode(&State::observed(
                webhook,
                state.project.clone(),
                state.secret.clone(),
            ))?)),
            None => Ok(None),
        }
    }

    #[instrument(skip_all, fields(resource = self.type_name()))]
    async fn update(
        &self,
        ctx: &ProviderContext,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let prior: State = decode(prior)?;
        let planned: State = decode(planned)?;
        let key = prior.lookup_key()?;

        ctx.api
            .update_webhook(&UpdateWebhook {
                key: key.to_string(),
                name: planned.name.clone(),
                url: planned.url.clone(),
                secret: planned.secret.clone(),
            })
            .await?;

        match find_webhook(ctx, prior.project.as_deref(), key).await? {
            Some(webhook) => encode(&State::observed(webhook, prior.project, planned.secret)),
            None => Err(ProviderError::NotFound(format!(
                "webhook '{}' not found after update",
                key
            ))),
        }
    }

    #[instrument(skip_all, fields(resource = self.type_name()))]
    async fn delete(&self, ctx: &ProviderContext, state: Value) -> Result<(), ProviderError> {
        let state: State = decode(state)?;
        ctx.api.delete_webhook(state.lookup_key()?).await?;
        Ok(())
    }

    fn import_state(&self, id: &str) -> Result<Value, ProviderError> {
        let mut parts = parse_import_id(id, &["key", "project"], 1)?.into_iter();
        let key = parts.next().flatten();
        encode(&State {
            id: key.clone(),
            key,
            project: parts.next().flatten(),
            name: String::new(),
            secret: None,
            url: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::{context, InMemorySonarCloud};

    #[tokio::test]
    async fn test_secret_is_kept_from_plan() {
        let api = InMemorySonarCloud::new("acme");
        let ctx = context(&api);

        let state = WebhookResource
            .create(
                &ctx,
                json!({"name": "ci", "url": "https://ci.example.com", "project": "web", "secret": "s3cr3t"}),
            )
            .await
            .unwrap();
        assert_eq!(state["secret"], "s3cr3t");
        assert_eq!(state["id"], state["key"]);

        let read = WebhookResource.read(&ctx, state).await.unwrap().unwrap();
        assert_eq!(read["secret"], "s3cr3t");
        assert_eq!(read["project"], "web");
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let api = InMemorySonarCloud::new("acme");
        let ctx = context(&api);

        let state = WebhookResource
            .create(&ctx, json!({"name": "ci", "url": "https://ci.example.com"}))
            .await
            .unwrap();
        let mut planned = state.clone();
        planned["url"] = json!("https://ci2.example.com");

        let updated = WebhookResource.update(&ctx, state, planned).await.unwrap();
        assert_eq!(updated["url"], "https://ci2.example.com");

        WebhookResource.delete(&ctx, updated.clone()).await.unwrap();
        assert_eq!(WebhookResource.read(&ctx, updated).await.unwrap(), None);
    }

    #[test]
    fn test_import_state() {
        let state = WebhookResource.import_state("AXw,web").unwrap();
        assert_eq!(state["id"], "AXw");
        assert_eq!(state["key"], "AXw");
        assert_eq!(state["project"], "web");
        assert!(WebhookResource.import_state(",web").is_err());
    }
}
