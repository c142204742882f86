use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use super::models::{
    CreateProject, CreateWebhook, GateProject, GroupMember, GroupPermissions, Paging, Project,
    QualityGate, UpdateWebhook, UserGroup, UserPermissions, Webhook,
};
use super::{ClientError, SonarCloudApi};

/// Public SonarCloud API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://sonarcloud.io/api";

const PAGE_SIZE: u64 = 100;

/// Connection settings for [`Client`].
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub organization: String,
    pub token: String,
    pub timeout: Duration,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("organization", &self.organization)
            .field("token", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// HTTPS client for one SonarCloud organization.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    organization: String,
    token: String,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url)
            .field("organization", &self.organization)
            .finish_non_exhaustive()
    }
}

type Params<'a> = Vec<(&'a str, String)>;

impl Client {
    /// Build a client. Fails only if the TLS backend cannot be initialized.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("sonarcloud-provider/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            organization: config.organization,
            token: config.token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn org(&self) -> (&'static str, String) {
        ("organization", self.organization.clone())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, ClientError> {
        debug!(path, "GET");
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;
        let body = Self::body(response).await?;
        serde_json::from_str(&body).map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn post(&self, path: &str, form: &[(&str, String)]) -> Result<String, ClientError> {
        debug!(path, "POST");
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.token)
            .form(form)
            .send()
            .await?;
        Self::body(response).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, String)],
    ) -> Result<T, ClientError> {
        let body = self.post(path, form).await?;
        serde_json::from_str(&body).map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn body(response: reqwest::Response) -> Result<String, ClientError> {
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(ClientError::http(status.as_u16(), &body))
        }
    }

    /// Fetch every page of a paginated endpoint and collect `field`.
    async fn get_all<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        field: &str,
    ) -> Result<Vec<T>, ClientError> {
        let mut items = Vec::new();
        let mut page = 1u64;
        loop {
            let mut params = query.to_vec();
            params.push(("p", page.to_string()));
            params.push(("ps", PAGE_SIZE.to_string()));

            let mut body: Value = self.get(path, &params).await?;
            let batch: Vec<T> = match body.get_mut(field).map(Value::take) {
                Some(values) => serde_json::from_value(values)
                    .map_err(|e| ClientError::Decode(format!("{}: {}", field, e)))?,
                None => Vec::new(),
            };

            let empty = batch.is_empty();
            items.extend(batch);
            if empty || !has_next_page(&body) {
                break;
            }
            page += 1;
        }
        debug!(path, count = items.len(), pages = page, "fetched all pages");
        Ok(items)
    }

    fn with_project<'a>(mut params: Params<'a>, project_key: Option<&str>) -> Params<'a> {
        if let Some(key) = project_key {
            params.push(("projectKey", key.to_string()));
        }
        params
    }
}

#[derive(Deserialize)]
struct LegacyPaging {
    p: u64,
    ps: u64,
    total: u64,
}

/// Whether a paginated response has pages after this one.
///
/// Understands the `paging` object, the legacy top-level `p`/`ps`/`total`
/// fields and the `more` flag used by quality gate searches.
pub(crate) fn has_next_page(body: &Value) -> bool {
    if let Some(more) = body.get("more").and_then(Value::as_bool) {
        return more;
    }
    let paging = body
        .get("paging")
        .and_then(|p| Paging::deserialize(p).ok())
        .map(|p| (p.page_index, p.page_size, p.total))
        .or_else(|| {
            LegacyPaging::deserialize(body)
                .ok()
                .map(|p| (p.p, p.ps, p.total))
        });
    match paging {
        Some((index, size, total)) => index.saturating_mul(size) < total,
        None => false,
    }
}

#[derive(Deserialize)]
struct ProjectEnvelope {
    project: Project,
}

#[derive(Deserialize)]
struct WebhookEnvelope {
    webhook: Webhook,
}

#[derive(Deserialize)]
struct QualityGateList {
    #[serde(default)]
    qualitygates: Vec<QualityGate>,
}

#[derive(Deserialize)]
struct WebhookList {
    #[serde(default)]
    webhooks: Vec<Webhook>,
}

#[async_trait]
impl SonarCloudApi for Client {
    fn organization(&self) -> &str {
        &self.organization
    }

    #[instrument(skip(self))]
    async fn group_permissions(
        &self,
        project_key: Option<&str>,
    ) -> Result<Vec<GroupPermissions>, ClientError> {
        let params = Self::with_project(vec![self.org()], project_key);
        self.get_all("permissions/groups", &params, "groups").await
    }

    #[instrument(skip(self))]
    async fn add_group_permission(
        &self,
        group: &str,
        permission: &str,
        project_key: Option<&str>,
    ) -> Result<(), ClientError> {
        let params = Self::with_project(
            vec![
                self.org(),
                ("groupName", group.to_string()),
                ("permission", permission.to_string()),
            ],
            project_key,
        );
        self.post("permissions/add_group", &params).await.map(drop)
    }

    #[instrument(skip(self))]
    async fn remove_group_permission(
        &self,
        group: &str,
        permission: &str,
        project_key: Option<&str>,
    ) -> Result<(), ClientError> {
        let params = Self::with_project(
            vec![
                self.org(),
                ("groupName", group.to_string()),
                ("permission", permission.to_string()),
            ],
            project_key,
        );
        self.post("permissions/remove_group", &params).await.map(drop)
    }

    #[instrument(skip(self))]
    async fn user_permissions(
        &self,
        project_key: Option<&str>,
    ) -> Result<Vec<UserPermissions>, ClientError> {
        let params = Self::with_project(vec![self.org()], project_key);
        self.get_all("permissions/users", &params, "users").await
    }

    #[instrument(skip(self))]
    async fn add_user_permission(
        &self,
        login: &str,
        permission: &str,
        project_key: Option<&str>,
    ) -> Result<(), ClientError> {
        let params = Self::with_project(
            vec![
                self.org(),
                ("login", login.to_string()),
                ("permission", permission.to_string()),
            ],
            project_key,
        );
        self.post("permissions/add_user", &params).await.map(drop)
    }

    #[instrument(skip(self))]
    async fn remove_user_permission(
        &self,
        login: &str,
        permission: &str,
        project_key: Option<&str>,
    ) -> Result<(), ClientError> {
        let params = Self::with_project(
            vec![
                self.org(),
                ("login", login.to_string()),
                ("permission", permission.to_string()),
            ],
            project_key,
        );
        self.post("permissions/remove_user", &params).await.map(drop)
    }

    #[instrument(skip(self))]
    async fn quality_gates(&self) -> Result<Vec<QualityGate>, ClientError> {
        let list: QualityGateList = self.get("qualitygates/list", &[self.org()]).await?;
        Ok(list.qualitygates)
    }

    #[instrument(skip(self))]
    async fn quality_gate_projects(&self, gate_id: &str) -> Result<Vec<GateProject>, ClientError> {
        let params = vec![
            self.org(),
            ("gateId", gate_id.to_string()),
            ("selected", "selected".to_string()),
        ];
        self.get_all("qualitygates/search", &params, "results").await
    }

    #[instrument(skip(self))]
    async fn select_quality_gate(
        &self,
        gate_id: &str,
        project_key: &str,
    ) -> Result<(), ClientError> {
        let params = vec![
            self.org(),
            ("gateId", gate_id.to_string()),
            ("projectKey", project_key.to_string()),
        ];
        self.post("qualitygates/select", &params).await.map(drop)
    }

    #[instrument(skip(self))]
    async fn deselect_quality_gate(
        &self,
        gate_id: &str,
        project_key: &str,
    ) -> Result<(), ClientError> {
        let params = vec![
            self.org(),
            ("gateId", gate_id.to_string()),
            ("projectKey", project_key.to_string()),
        ];
        self.post("qualitygates/deselect", &params).await.map(drop)
    }

    #[instrument(skip(self))]
    async fn create_project(&self, project: &CreateProject) -> Result<Project, ClientError> {
        let mut params = vec![
            self.org(),
            ("name", project.name.clone()),
            ("project", project.key.clone()),
        ];
        if let Some(visibility) = &project.visibility {
            params.push(("visibility", visibility.clone()));
        }
        let created: ProjectEnvelope = self.post_json("projects/create", &params).await?;
        Ok(created.project)
    }

    #[instrument(skip(self))]
    async fn search_projects(&self, keys: &[String]) -> Result<Vec<Project>, ClientError> {
        let mut params = vec![self.org()];
        if !keys.is_empty() {
            params.push(("projects", keys.join(",")));
        }
        self.get_all("projects/search", &params, "components").await
    }

    #[instrument(skip(self))]
    async fn delete_project(&self, key: &str) -> Result<(), ClientError> {
        let params = vec![self.org(), ("project", key.to_string())];
        self.post("projects/delete", &params).await.map(drop)
    }

    #[instrument(skip(self))]
    async fn update_project_key(&self, from: &str, to: &str) -> Result<(), ClientError> {
        let params = vec![("from", from.to_string()), ("to", to.to_string())];
        self.post("projects/update_key", &params).await.map(drop)
    }

    #[instrument(skip(self))]
    async fn update_project_visibility(
        &self,
        key: &str,
        visibility: &str,
    ) -> Result<(), ClientError> {
        let params = vec![
            self.org(),
            ("project", key.to_string()),
            ("visibility", visibility.to_string()),
        ];
        self.post("projects/update_visibility", &params)
            .await
            .map(drop)
    }

    #[instrument(skip(self, webhook), fields(name = %webhook.name))]
    async fn create_webhook(&self, webhook: &CreateWebhook) -> Result<Webhook, ClientError> {
        let mut params = vec![
            self.org(),
            ("name", webhook.name.clone()),
            ("url", webhook.url.clone()),
        ];
        if let Some(project) = &webhook.project {
            params.push(("project", project.clone()));
        }
        if let Some(secret) = &webhook.secret {
            params.push(("secret", secret.clone()));
        }
        let created: WebhookEnvelope = self.post_json("webhooks/create", &params).await?;
        Ok(created.webhook)
    }

    #[instrument(skip(self))]
    async fn list_webhooks(&self, project: Option<&str>) -> Result<Vec<Webhook>, ClientError> {
        let mut params = vec![self.org()];
        if let Some(project) = project {
            params.push(("project", project.to_string()));
        }
        let list: WebhookList = self.get("webhooks/list", &params).await?;
        Ok(list.webhooks)
    }

    #[instrument(skip(self, webhook), fields(key = %webhook.key))]
    async fn update_webhook(&self, webhook: &UpdateWebhook) -> Result<(), ClientError> {
        let mut params = vec![
            ("webhook", webhook.key.clone()),
            ("name", webhook.name.clone()),
            ("url", webhook.url.clone()),
        ];
        if let Some(secret) = &webhook.secret {
            params.push(("secret", secret.clone()));
        }
        self.post("webhooks/update", &params).await.map(drop)
    }

    #[instrument(skip(self))]
    async fn delete_webhook(&self, key: &str) -> Result<(), ClientError> {
        let params = vec![("webhook", key.to_string())];
        self.post("webhooks/delete", &params).await.map(drop)
    }

    #[instrument(skip(self))]
    async fn user_groups(&self) -> Result<Vec<UserGroup>, ClientError> {
        self.get_all("user_groups/search", &[self.org()], "groups")
            .await
    }

    #[instrument(skip(self))]
    async fn user_group_members(&self, group: &str) -> Result<Vec<GroupMember>, ClientError> {
        let params = vec![self.org(), ("name", group.to_string())];
        self.get_all("user_groups/users", &params, "users").await
    }
}
