use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use super::{decode, encode, parse_import_id, Resource};
use crate::client::{CreateProject, Project};
use crate::error::ProviderError;
use crate::provider::ProviderContext;
use crate::schema::{Attribute, AttributeValidator, Schema};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct State {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: String,
    key: String,
    #[serde(default)]
    visibility: Option<String>,
}

impl From<Project> for State {
    fn from(project: Project) -> Self {
        Self {
            id: Some(project.key.clone()),
            name: project.name,
            key: project.key,
            visibility: Some(project.visibility).filter(|v| !v.is_empty()),
        }
    }
}

async fn find_project(ctx: &ProviderContext, key: &str) -> Result<Option<Project>, ProviderError> {
    let projects = ctx.api.search_projects(&[key.to_string()]).await?;
    Ok(projects.into_iter().find(|p| p.key == key))
}

/// `sonarcloud_project`
pub struct ProjectResource;

#[async_trait]
impl Resource for ProjectResource {
    fn type_name(&self) -> &'static str {
        "sonarcloud_project"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Manages a project.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "name",
                Attribute::required_string()
                    .with_force_new()
                    .with_validator(AttributeValidator::length_between(1, 255))
                    .with_description("The name of the project. Changing it recreates the project."),
            )
            .with_attribute(
                "key",
                Attribute::required_string()
                    .with_validator(AttributeValidator::length_between(1, 400))
                    .with_description("The key of the project. Must be globally unique."),
            )
            .with_attribute(
                "visibility",
                Attribute::optional_computed_string()
                    .with_validator(AttributeValidator::one_of(["public", "private"]))
                    .with_description(
                        "`public` or `private`. Defaults to the organization's default visibility.",
                    ),
            )
    }

    #[instrument(skip_all, fields(resource = self.type_name()))]
    async fn create(&self, ctx: &ProviderContext, planned: Value) -> Result<Value, ProviderError> {
        let planned: State = decode(planned)?;
        let created = ctx
            .api
            .create_project(&CreateProject {
                name: planned.name.clone(),
                key: planned.key.clone(),
                visibility: planned.visibility.clone(),
            })
            .await?;
        debug!(key = %created.key, "project created");

        let mut state = State::from(created);
        if planned.visibility.is_some() {
            state.visibility = planned.visibility;
        }
        encode(&state)
    }

    #[instrument(skip_all, fields(resource = self.type_name()))]
    async fn read(&self, ctx: &ProviderContext, state: Value) -> Result<Option<Value>, ProviderError> {
        let state: State = decode(state)?;
        match find_project(ctx, &state.key).await? {
            Some(project) => Ok(Some(encode(&State::from(project))?)),
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

        if prior.key != planned.key {
            ctx.api.update_project_key(&prior.key, &planned.key).await?;
            debug!(from = %prior.key, to = %planned.key, "project key updated");
        }
        if let Some(visibility) = &planned.visibility {
            if prior.visibility.as_ref() != Some(visibility) {
                ctx.api
                    .update_project_visibility(&planned.key, visibility)
                    .await?;
            }
        }

        match find_project(ctx, &planned.key).await? {
            Some(project) => encode(&State::from(project)),
            None => Err(ProviderError::NotFound(format!(
                "project '{}' not found after update",
                planned.key
            ))),
        }
    }

    #[instrument(skip_all, fields(resource = self.type_name()))]
    async fn delete(&self, ctx: &ProviderContext, state: Value) -> Result<(), ProviderError> {
        let state: State = decode(state)?;
        ctx.api.delete_project(&state.key).await?;
        Ok(())
    }

    fn import_state(&self, id: &str) -> Result<Value, ProviderError> {
        let key = parse_import_id(id, &["key"], 1)?
            .into_iter()
            .next()
            .flatten()
            .unwrap_or_default();
        encode(&State {
            id: None,
            name: String::new(),
            key,
            visibility: None,
        })
    }
}
