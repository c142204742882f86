use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use super::{all_permissions, decode, encode, parse_import_id, scoped_id, Resource};
use crate::client::{SonarCloudApi, UserPermissions};
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
    login: String,
    #[serde(default)]
    project_key: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    avatar: Option<String>,
    #[serde(default)]
    permissions: AssociationSet,
}

/// Permissions of one user.
///
/// `permissions/users` only lists users holding at least one permission, so
/// an unlisted login reads as the empty set. Only a 404 for the scope itself
/// means the resource is gone.
struct UserPermissionStore {
    api: Arc<dyn SonarCloudApi>,
    login: String,
    project_key: Option<String>,
    /// Profile fields from prior state, kept while the user is unlisted.
    known: (Option<String>, Option<String>),
    last_seen: Mutex<Option<UserPermissions>>,
}

impl UserPermissionStore {
    fn state(&self, permissions: AssociationSet) -> State {
        let seen = self
            .last_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        State {
            id: Some(scoped_id(self.project_key.as_deref(), &self.login)),
            login: self.login.clone(),
            project_key: self.project_key.clone(),
            name: Some(match &seen {
                Some(user) => user.name.clone(),
                None => self.known.0.clone().unwrap_or_default(),
            }),
            avatar: Some(match seen {
                Some(user) => user.avatar,
                None => self.known.1.clone().unwrap_or_default(),
            }),
            permissions,
        }
    }
}

#[async_trait]
impl AssociationStore for UserPermissionStore {
    fn describe(&self) -> String {
        match &self.project_key {
            Some(project) => format!("user '{}' on project '{}'", self.login, project),
            None => format!("user '{}' in organization '{}'", self.login, self.api.organization()),
        }
    }

    async fn search(&self) -> Result<Option<AssociationSet>, StoreError> {
        let users = match self.api.user_permissions(self.project_key.as_deref()).await {
            Ok(users) => users,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let found = users.into_iter().find(|u| u.login == self.login);
        let permissions = found
            .as_ref()
            .map(|u| association_set(u.permissions.iter().cloned()))
            .unwrap_or_default();
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = found;
        Ok(Some(permissions))
    }

    async fn add(&self, key: &str) -> Result<(), StoreError> {
        self.api
            .add_user_permission(&self.login, key, self.project_key.as_deref())
            .await
            .map_err(Into::into)
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.api
            .remove_user_permission(&self.login, key, self.project_key.as_deref())
            .await
            .map_err(Into::into)
    }
}

/// `sonarcloud_user_permissions`
pub struct UserPermissionsResource;

impl UserPermissionsResource {
    fn handler(ctx: &ProviderContext, state: &State) -> AssociationHandler<UserPermissionStore> {
        AssociationHandler::new(
            UserPermissionStore {
                api: Arc::clone(&ctx.api),
                login: state.login.clone(),
                project_key: state.project_key.clone(),
                known: (state.name.clone(), state.avatar.clone()),
                last_seen: Mutex::new(None),
            },
            &ctx.reconcile,
        )
    }
}

#[async_trait]
impl Resource for UserPermissionsResource {
    fn type_name(&self) -> &'static str {
        "sonarcloud_user_permissions"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Manages the permissions of a single user.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "project_key",
                Attribute::optional_string()
                    .with_force_new()
                    .with_description("The key of the project. Omit to manage organization permissions."),
            )
            .with_attribute(
                "login",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("The login of the user."),
            )
            .with_attribute("name", Attribute::computed_string())
            .with_attribute("avatar", Attribute::computed_string())
            .with_attribute(
                "permissions",
                Attribute::required_string_set()
                    .with_validator(AttributeValidator::set_elements_one_of(all_permissions())),
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
        let mut parts = parse_import_id(id, &["login", "project_key"], 1)?.into_iter();
        encode(&State {
            id: None,
            login: parts.next().flatten().unwrap_or_default(),
            project_key: parts.next().flatten(),
            name: None,
            avatar: None,
            permissions: AssociationSet::new(),
        })
    }
}
