use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use super::{decode, encode, parse_import_id, Resource};
use crate::client::SonarCloudApi;
use crate::error::ProviderError;
use crate::provider::ProviderContext;
use crate::reconcile::{AssociationHandler, AssociationSet, AssociationStore, StoreError};
use crate::schema::{Attribute, Schema};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct State {
    #[serde(default)]
    id: Option<String>,
    gate_id: String,
    #[serde(default)]
    project_keys: AssociationSet,
}

impl State {
    fn observed(gate_id: &str, project_keys: AssociationSet) -> Self {
        Self {
            id: Some(gate_id.to_string()),
            gate_id: gate_id.to_string(),
            project_keys,
        }
    }
}

/// Projects selected on one quality gate.
struct GateSelectionStore {
    api: Arc<dyn SonarCloudApi>,
    gate_id: String,
}

#[async_trait]
impl AssociationStore for GateSelectionStore {
    fn describe(&self) -> String {
        format!("quality gate '{}'", self.gate_id)
    }

    async fn search(&self) -> Result<Option<AssociationSet>, StoreError> {
        match self.api.quality_gate_projects(&self.gate_id).await {
            Ok(projects) => Ok(Some(
                projects
                    .into_iter()
                    .filter(|p| p.selected)
                    .map(|p| p.key)
                    .collect(),
            )),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn add(&self, key: &str) -> Result<(), StoreError> {
        self.api
            .select_quality_gate(&self.gate_id, key)
            .await
            .map_err(Into::into)
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.api
            .deselect_quality_gate(&self.gate_id, key)
            .await
            .map_err(Into::into)
    }
}

/// `sonarcloud_quality_gate_selection`
pub struct QualityGateSelectionResource;

impl QualityGateSelectionResource {
    fn handler(ctx: &ProviderContext, gate_id: &str) -> AssociationHandler<GateSelectionStore> {
        AssociationHandler::new(
            GateSelectionStore {
                api: Arc::clone(&ctx.api),
                gate_id: gate_id.to_string(),
            },
            &ctx.reconcile,
        )
    }
}

#[async_trait]
impl Resource for QualityGateSelectionResource {
    fn type_name(&self) -> &'static str {
        "sonarcloud_quality_gate_selection"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Selects a quality gate for a set of projects.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "gate_id",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("The id of the quality gate."),
            )
            .with_attribute(
                "project_keys",
                Attribute::required_string_set()
                    .with_description("Keys of the projects that use this quality gate."),
            )
    }

    #[instrument(skip_all, fields(resource = self.type_name()))]
    async fn create(&self, ctx: &ProviderContext, planned: Value) -> Result<Value, ProviderError> {
        let planned: State = decode(planned)?;
        let observed = Self::handler(ctx, &planned.gate_id)
            .create(&planned.project_keys)
            .await?;
        encode(&State::observed(&planned.gate_id, observed))
    }

    #[instrument(skip_all, fields(resource = self.type_name()))]
    async fn read(&self, ctx: &ProviderContext, state: Value) -> Result<Option<Value>, ProviderError> {
        let state: State = decode(state)?;
        match Self::handler(ctx, &state.gate_id).read().await? {
            Some(keys) => Ok(Some(encode(&State::observed(&state.gate_id, keys))?)),
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
        let observed = Self::handler(ctx, &planned.gate_id)
            .update(&prior.project_keys, &planned.project_keys)
            .await?;
        encode(&State::observed(&planned.gate_id, observed))
    }

    #[instrument(skip_all, fields(resource = self.type_name()))]
    async fn delete(&self, ctx: &ProviderContext, state: Value) -> Result<(), ProviderError> {
        let state: State = decode(state)?;
        Self::handler(ctx, &state.gate_id)
            .delete(&state.project_keys)
            .await?;
        Ok(())
    }

    fn import_state(&self, id: &str) -> Result<Value, ProviderError> {
        let gate_id = parse_import_id(id, &["gate_id"], 1)?
            .into_iter()
            .next()
            .flatten()
            .unwrap_or_default();
        encode(&State {
            id: None,
            gate_id,
            project_keys: AssociationSet::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::reconcile::association_set;
    use crate::testing::{context, InMemorySonarCloud};

    #[tokio::test]
    async fn test_select_and_deselect_projects() {
        let api = InMemorySonarCloud::new("acme").with_quality_gate("9");
        let ctx = context(&api);

        let state = QualityGateSelectionResource
            .create(&ctx, json!({"gate_id": "9", "project_keys": ["web", "api"]}))
            .await
            .unwrap();
        assert_eq!(state["id"], "9");
        assert_eq!(state["project_keys"], json!(["api", "web"]));

        let state = QualityGateSelectionResource
            .update(&ctx, state, json!({"id": "9", "gate_id": "9", "project_keys": ["api"]}))
            .await
            .unwrap();
        assert_eq!(state["project_keys"], json!(["api"]));
        assert_eq!(api.gate_projects("9"), association_set(["api"]));

        QualityGateSelectionResource.delete(&ctx, state).await.unwrap();
        assert!(api.gate_projects("9").is_empty());
    }

    #[tokio::test]
    async fn test_create_then_read_round_trips() {
        let api = InMemorySonarCloud::new("acme").with_quality_gate("9");
        let ctx = context(&api);

        for keys in [json!([]), json!(["web"]), json!(["api", "mobile", "web"])] {
            let state = QualityGateSelectionResource
                .create(&ctx, json!({"gate_id": "9", "project_keys": keys.clone()}))
                .await
                .unwrap();
            assert_eq!(state["project_keys"], keys);

            let read = QualityGateSelectionResource
                .read(&ctx, state.clone())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(read["project_keys"], keys);
            assert_eq!(read["id"], "9");

            QualityGateSelectionResource.delete(&ctx, state).await.unwrap();
            assert!(api.gate_projects("9").is_empty());
        }
    }

    #[tokio::test]
    async fn test_unknown_gate_reads_as_removed() {
        let api = InMemorySonarCloud::new("acme");
        let ctx = context(&api);

        let state = QualityGateSelectionResource
            .read(&ctx, json!({"id": "404", "gate_id": "404", "project_keys": []}))
            .await
            .unwrap();
        assert_eq!(state, None);
    }

    #[test]
    fn test_import_state() {
        let state = QualityGateSelectionResource.import_state("9").unwrap();
        assert_eq!(state["gate_id"], "9");
        assert!(QualityGateSelectionResource.import_state("9,extra").is_err());
    }
}
