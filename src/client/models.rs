//! Wire types for the SonarCloud web API.

use serde::{Deserialize, Deserializer, Serialize};

/// Permissions held by a group, from `permissions/groups`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPermissions {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Permissions held by a user, from `permissions/users`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPermissions {
    pub login: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// A project associated with a quality gate, from `qualitygates/search`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateProject {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub selected: bool,
}

/// A quality gate with its conditions, from `qualitygates/list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityGate {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_built_in: bool,
    #[serde(default)]
    pub conditions: Vec<GateCondition>,
}

/// One metric threshold of a [`QualityGate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateCondition {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    pub metric: String,
    #[serde(default)]
    pub op: String,
    #[serde(default)]
    pub error: String,
}

/// A project, from `projects/search` and `projects/create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub visibility: String,
    #[serde(default)]
    pub qualifier: String,
}

/// Parameters of `projects/create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateProject {
    pub name: String,
    pub key: String,
    pub visibility: Option<String>,
}

/// A webhook, from `webhooks/list` and `webhooks/create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    pub key: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub has_secret: bool,
}

/// Parameters of `webhooks/create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateWebhook {
    pub name: String,
    pub url: String,
    pub project: Option<String>,
    pub secret: Option<String>,
}

/// Parameters of `webhooks/update`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateWebhook {
    pub key: String,
    pub name: String,
    pub url: String,
    pub secret: Option<String>,
}

/// A user group of the organization, from `user_groups/search`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserGroup {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub members_count: u64,
    #[serde(default)]
    pub default: bool,
}

/// A member of a user group, from `user_groups/users`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub login: String,
    #[serde(default)]
    pub name: String,
}

/// The `paging` object of paginated responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paging {
    pub page_index: u64,
    pub page_size: u64,
    pub total: u64,
}

/// Ids come back as numbers from some endpoints and strings from others.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(serde_json::Number),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Num(n) => n.to_string(),
    })
}
