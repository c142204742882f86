use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::instrument;

use super::{computed, required_str, DataSource};
use crate::client::QualityGate;
use crate::error::ProviderError;
use crate::provider::ProviderContext;
use crate::schema::{Attribute, AttributeType, Schema};

fn condition_type() -> AttributeType {
    AttributeType::list(AttributeType::object([
        ("id", AttributeType::String),
        ("metric", AttributeType::String),
        ("op", AttributeType::String),
        ("error", AttributeType::String),
    ]))
}

fn gate_fields() -> Vec<(&'static str, AttributeType)> {
    vec![
        ("id", AttributeType::String),
        ("name", AttributeType::String),
        ("is_default", AttributeType::Bool),
        ("is_built_in", AttributeType::Bool),
        ("conditions", condition_type()),
    ]
}

fn gate_value(gate: QualityGate) -> Value {
    let conditions: Vec<Value> = gate
        .conditions
        .into_iter()
        .map(|c| json!({"id": c.id, "metric": c.metric, "op": c.op, "error": c.error}))
        .collect();
    json!({
        "id": gate.id,
        "name": gate.name,
        "is_default": gate.is_default,
        "is_built_in": gate.is_built_in,
        "conditions": conditions,
    })
}

/// `sonarcloud_quality_gates`
pub struct QualityGatesDataSource;

#[async_trait]
impl DataSource for QualityGatesDataSource {
    fn type_name(&self) -> &'static str {
        "sonarcloud_quality_gates"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Lists the quality gates of the configured organization.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "quality_gates",
                computed(AttributeType::list(AttributeType::object(gate_fields()))),
            )
    }

    #[instrument(skip_all, fields(data_source = self.type_name()))]
    async fn read(&self, ctx: &ProviderContext, _config: Value) -> Result<Value, ProviderError> {
        let gates: Vec<Value> = ctx
            .api
            .quality_gates()
            .await?
            .into_iter()
            .map(gate_value)
            .collect();
        Ok(json!({"id": ctx.api.organization(), "quality_gates": gates}))
    }
}

/// `sonarcloud_quality_gate`: a single gate looked up by name.
pub struct QualityGateDataSource;

#[async_trait]
impl DataSource for QualityGateDataSource {
    fn type_name(&self) -> &'static str {
        "sonarcloud_quality_gate"
    }

    fn schema(&self) -> Schema {
        let mut schema = Schema::v0().with_description("Reads a single quality gate.");
        for (name, ty) in gate_fields() {
            schema = schema.with_attribute(name, computed(ty));
        }
        schema.with_attribute(
            "name",
            Attribute::required_string().with_description("The name of the quality gate."),
        )
    }

    #[instrument(skip_all, fields(data_source = self.type_name()))]
    async fn read(&self, ctx: &ProviderContext, config: Value) -> Result<Value, ProviderError> {
        let name = required_str(&config, "name")?;
        ctx.api
            .quality_gates()
            .await?
            .into_iter()
            .find(|g| g.name == name)
            .map(gate_value)
            .ok_or_else(|| {
                ProviderError::NotFound(format!(
                    "quality gate '{}' in organization '{}'",
                    name,
                    ctx.api.organization()
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, InMemorySonarCloud};

    fn organization() -> InMemorySonarCloud {
        InMemorySonarCloud::new("acme")
            .with_named_quality_gate("9", "Sonar way", true)
            .with_named_quality_gate("12", "Strict", false)
            .with_gate_condition("12", "new_coverage", "LT", "90")
    }

    #[tokio::test]
    async fn test_lists_quality_gates() {
        let api = organization();
        let ctx = context(&api);

        let value = QualityGatesDataSource.read(&ctx, Value::Null).await.unwrap();

        assert_eq!(value["id"], "acme");
        let gates = value["quality_gates"].as_array().unwrap();
        assert_eq!(gates.len(), 2);
        let strict = gates.iter().find(|g| g["name"] == "Strict").unwrap();
        assert_eq!(strict["is_default"], false);
        assert_eq!(strict["conditions"][0]["metric"], "new_coverage");
        assert_eq!(strict["conditions"][0]["error"], "90");
    }

    #[tokio::test]
    async fn test_reads_gate_by_name() {
        let api = organization();
        let ctx = context(&api);

        let gate = QualityGateDataSource
            .read(&ctx, json!({"name": "Sonar way"}))
            .await
            .unwrap();
        assert_eq!(gate["id"], "9");
        assert_eq!(gate["is_default"], true);
        assert_eq!(gate["conditions"], json!([]));

        let err = QualityGateDataSource
            .read(&ctx, json!({"name": "Lenient"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }
}
