//! Managed resources.
//!
//! Set-valued resources (permissions, quality gate selections) go through
//! [`AssociationHandler`](crate::reconcile::AssociationHandler). Projects and
//! webhooks are plain sequential CRUD.

mod project;
mod quality_gate_selection;
mod user_group_permissions;
mod user_permissions;
mod webhook;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::ProviderError;
use crate::provider::ProviderContext;
use crate::schema::Schema;

pub use project::ProjectResource;
pub use quality_gate_selection::QualityGateSelectionResource;
pub use user_group_permissions::UserGroupPermissionsResource;
pub use user_permissions::UserPermissionsResource;
pub use webhook::WebhookResource;

/// Organization-level permissions.
pub const GLOBAL_PERMISSIONS: &[&str] = &["admin", "profileadmin", "gateadmin", "scan", "provisioning"];

/// Project-level permissions.
pub const PROJECT_PERMISSIONS: &[&str] = &[
    "admin",
    "codeviewer",
    "issueadmin",
    "securityhotspotadmin",
    "scan",
    "user",
];

/// Every permission accepted by the permission resources.
pub fn all_permissions() -> Vec<&'static str> {
    let mut all: Vec<&str> = GLOBAL_PERMISSIONS
        .iter()
        .chain(PROJECT_PERMISSIONS)
        .copied()
        .collect();
    all.sort_unstable();
    all.dedup();
    all
}

/// A resource type the provider manages.
///
/// State is passed as JSON shaped by [`Resource::schema`]. Every method gets
/// the provider context explicitly.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Type name, e.g. `sonarcloud_project`.
    fn type_name(&self) -> &'static str;

    /// Attribute schema.
    fn schema(&self) -> Schema;

    /// Create the remote object and return the resulting state.
    async fn create(&self, ctx: &ProviderContext, planned: Value) -> Result<Value, ProviderError>;

    /// Refresh state; `None` when the remote object is gone.
    async fn read(&self, ctx: &ProviderContext, state: Value) -> Result<Option<Value>, ProviderError>;

    /// Apply an in-place change.
    async fn update(
        &self,
        ctx: &ProviderContext,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError>;

    /// Delete the remote object.
    async fn delete(&self, ctx: &ProviderContext, state: Value) -> Result<(), ProviderError>;

    /// Turn an import identifier into the partial state `read` starts from.
    fn import_state(&self, id: &str) -> Result<Value, ProviderError>;
}

/// Split an import identifier on `,` into at least `required` and at most
/// `fields.len()` segments. The first segment must not be empty.
pub(crate) fn parse_import_id(
    id: &str,
    fields: &[&str],
    required: usize,
) -> Result<Vec<Option<String>>, ProviderError> {
    let parts: Vec<&str> = id.split(',').collect();
    if parts.len() < required || parts.len() > fields.len() || parts[0].is_empty() {
        let formats: Vec<String> = (required..=fields.len())
            .map(|n| fields[..n].join(","))
            .collect();
        return Err(ProviderError::Validation(format!(
            "Expected import identifier with format: {}. Got: {:?}",
            formats.join(" OR "),
            id
        )));
    }
    Ok(fields
        .iter()
        .enumerate()
        .map(|(i, _)| {
            parts
                .get(i)
                .filter(|p| !p.is_empty())
                .map(|p| p.to_string())
        })
        .collect())
}

pub(crate) fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ProviderError> {
    Ok(serde_json::from_value(value)?)
}

pub(crate) fn encode<T: Serialize>(state: &T) -> Result<Value, ProviderError> {
    Ok(serde_json::to_value(state)?)
}

/// Composite id for resources scoped to an optional project.
pub(crate) fn scoped_id(project_key: Option<&str>, name: &str) -> String {
    match project_key {
        Some(project) => format!("{}-{}", project, name),
        None => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_import_id_name_only() {
        let parts = parse_import_id("devs", &["name", "project_key"], 1).unwrap();
        assert_eq!(parts, vec![Some("devs".to_string()), None]);
    }

    #[test]
    fn test_parse_import_id_with_project() {
        let parts = parse_import_id("devs,web", &["name", "project_key"], 1).unwrap();
        assert_eq!(parts, vec![Some("devs".to_string()), Some("web".to_string())]);
    }

    #[test]
    fn test_parse_import_id_rejects_bad_shapes() {
        for id in ["", ",web", "devs,web,extra"] {
            let err = parse_import_id(id, &["name", "project_key"], 1).unwrap_err();
            match err {
                ProviderError::Validation(msg) => assert_eq!(
                    msg,
                    format!(
                        "Expected import identifier with format: name OR name,project_key. Got: {:?}",
                        id
                    )
                ),
                other => panic!("unexpected error: {:?}", other),
            }
        }
    }

    #[test]
    fn test_all_permissions() {
        let all = all_permissions();
        assert_eq!(all.len(), 9);
        assert!(all.contains(&"securityhotspotadmin"));
        assert!(all.contains(&"provisioning"));
    }

    #[test]
    fn test_scoped_id() {
        assert_eq!(scoped_id(Some("web"), "devs"), "web-devs");
        assert_eq!(scoped_id(None, "devs"), "devs");
    }
}
