use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use super::{all_permissions, decode, encode, parse_import_id, scoped_id, Resource};
use crate::client::{GroupPermissions, SonarCloudApi};
use crate::error::ProviderError;
use crate::provider::ProviderContext;
use crate::reconcile::{
    association_set, AssociationHandler, AssociationSet, AssociationStore, StoreError,
};
use crate::schema::{Attribute, AttributeValidator, Schema};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct State {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    project_key: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    permissions: AssociationSet,
}

/// Permissions of one group, on a project or organization-wide.
struct GroupPermissionStore {
    api: Arc<dyn SonarCloudApi>,
    group: String,
    project_key: Option<String>,
    last_seen: Mutex<Option<GroupPermissions>>,
}

impl GroupPermissionStore {
    fn new(ctx: &ProviderContext, group: &str, project_key: Option<&str>) -> Self {
        Self {
            api: Arc::clone(&ctx.api),
            group: group.to_string(),
            project_key: project_key.map(str::to_string),
            last_seen: Mutex::new(None),
        }
    }

    fn description(&self) -> Option<String> {
        self.last_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|g| g.description.clone())
    }

    fn state(&self, permissions: AssociationSet) -> State {
        State {
            id: Some(scoped_id(self.project_key.as_deref(), &self.group)),
            name: self.group.clone(),
            project_key: self.project_key.clone(),
            description: Some(self.description().unwrap_or_default()),
            permissions,
        }
    }
}

#[async_trait]
impl AssociationStore for GroupPermissionStore {
    fn describe(&self) -> String {
        match &self.project_key {
            Some(project) => format!("group '{}' on project '{}'", self.group, project),
            None => format!("group '{}' in organization '{}'", self.group, self.api.organization()),
        }
    }

    async fn search(&self) -> Result<Option<AssociationSet>, StoreError> {
        let groups = match self.api.group_permissions(self.project_key.as_deref()).await {
            Ok(groups) => groups,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let found = groups.into_iter().find(|g| g.name == self.group);
        let permissions = found.as_ref().map(|g| association_set(g.permissions.iter().cloned()));
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = found;
        Ok(permissions)
    }

    async fn add(&self, key: &str) -> Result<(), StoreError> {
        self.api
            .add_group_permission(&self.group, key, self.project_key.as_deref())
            .await
            .map_err(Into::into)
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.api
            .remove_group_permission(&self.group, key, self.project_key.as_deref())
            .await
            .map_err(Into::into)
    }
}

/// `sonarcloud_user_group_permissions`
pub struct UserGroupPermissionsResource;

impl UserGroupPermissionsResource {
    fn handler(ctx: &ProviderContext, state: &State) -> AssociationHandler<GroupPermissionStore> {
        AssociationHandler::new(
            GroupPermissionStore::new(ctx, &state.name, state.project_key.as_deref()),
            &ctx.reconcile,
        )
    }
}

#[async_trait]
impl Resource for UserGroupPermissionsResource {
    fn type_name(&self) -> &'static str {
        "sonarcloud_user_group_permissions"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description(
                "Manages the permissions of a user group, organization-wide or on a single project.",
            )
            .with_attribute(
                "id",
                Attribute::computed_string().with_description("`<project_key>-<name>`, or `<name>` without a project."),
            )
            .with_attribute(
                "project_key",
                Attribute::optional_string()
                    .with_force_new()
                    .with_description("The key of the project. Omit to manage organization permissions."),
            )
            .with_attribute(
                "name",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("The name of the user group."),
            )
            .with_attribute(
                "description",
                Attribute::computed_string().with_description("The description of the user group."),
            )
            .with_attribute(
                "permissions",
                Attribute::required_string_set()
                    .with_validator(AttributeValidator::set_elements_one_of(all_permissions()))
                    .with_description("Permissions to grant to the group."),
            )
    }

    #[instrument(skip_all, fields(resource = self.type_name()))]
    async fn create(&self, ctx: &ProviderContext, planned: Value) -> Result<Value, ProviderError> {
        let planned: State = decode(planned)?;
        let handler = Self::handler(ctx, &planned);
        let observed = handler.create(&planned.permissions).await?;
        encode(&handler.store().state(observed))
    }

    #[instrument(skip_all, fields(resource = self.type_name()))]
    async fn read(&self, ctx: &ProviderContext, state: Value) -> Result<Option<Value>, ProviderError> {
        let state: State = decode(state)?;
        let handler = Self::handler(ctx, &state);
        match handler.read().await? {
            Some(permissions) => Ok(Some(encode(&handler.store().state(permissions))?)),
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
        let handler = Self::handler(ctx, &planned);
        let observed = handler.update(&prior.permissions, &planned.permissions).await?;
        encode(&handler.store().state(observed))
    }

    #[instrument(skip_all, fields(resource = self.type_name()))]
    async fn delete(&self, ctx: &ProviderContext, state: Value) -> Result<(), ProviderError> {
        let state: State = decode(state)?;
        Self::handler(ctx, &state).delete(&state.permissions).await?;
        Ok(())
    }

    fn import_state(&self, id: &str) -> Result<Value, ProviderError> {
        let parts = parse_import_id(id, &["name", "project_key"], 1)?;
        let mut parts = parts.into_iter();
        let name = parts.next().flatten().unwrap_or_default();
        let project_key = parts.next().flatten();
        encode(&State {
            id: None,
            name,
            project_key,
            description: None,
            permissions: AssociationSet::new(),
        })
    }
}
