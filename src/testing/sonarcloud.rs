use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::client::{
    ClientError, CreateProject, CreateWebhook, GateCondition, GateProject, GroupMember,
    GroupPermissions, Project, QualityGate, SonarCloudApi, UpdateWebhook, UserGroup,
    UserPermissions, Webhook,
};
use crate::reconcile::{AssociationKey, AssociationSet};

type Scope = Option<String>;

#[derive(Debug, Clone, Default)]
struct Group {
    id: String,
    description: String,
    members: BTreeSet<String>,
}

#[derive(Debug, Clone)]
struct StoredWebhook {
    project: Scope,
    webhook: Webhook,
}

/// Everything a read can observe.
#[derive(Debug, Clone, Default)]
struct Data {
    groups: BTreeMap<String, Group>,
    users: BTreeMap<String, String>,
    group_grants: BTreeMap<(Scope, String), AssociationSet>,
    user_grants: BTreeMap<(Scope, String), AssociationSet>,
    projects: BTreeMap<String, Project>,
    gates: BTreeMap<String, AssociationSet>,
    gate_details: BTreeMap<String, QualityGate>,
    webhooks: Vec<StoredWebhook>,
}

#[derive(Debug, Default)]
struct Inner {
    data: Data,
    // Served instead of `data` while the counter is above zero.
    stale: Option<(Data, usize)>,
    read_lag: usize,
    implicit_group_grants: BTreeMap<(Scope, String), AssociationSet>,
    failures: HashMap<(String, String), u16>,
    calls: Vec<String>,
    next_id: u64,
}

impl Inner {
    fn view(&mut self) -> Data {
        if let Some((snapshot, remaining)) = self.stale.as_mut() {
            if *remaining > 0 {
                *remaining -= 1;
                return snapshot.clone();
            }
        }
        self.stale = None;
        self.data.clone()
    }

    /// Record a mutating call, fail it if scripted, and start a lag window.
    fn mutate(&mut self, op: &str, args: &[&str], key: &str) -> Result<(), ClientError> {
        self.calls.push(format!("{} {}", op, args.join(" ")));
        if let Some(status) = self.failures.get(&(op.to_string(), key.to_string())) {
            return Err(ClientError::http(
                *status,
                &format!(r#"{{"errors":[{{"msg":"{} {} rejected"}}]}}"#, op, key),
            ));
        }
        if self.read_lag > 0 && self.stale.is_none() {
            self.stale = Some((self.data.clone(), self.read_lag));
        }
        Ok(())
    }

    fn next_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }
}

fn not_found(what: impl std::fmt::Display) -> ClientError {
    ClientError::http(404, &format!(r#"{{"errors":[{{"msg":"{} not found"}}]}}"#, what))
}

/// An in-memory SonarCloud organization.
///
/// Clones share state, so a test can keep one handle for inspection while
/// the provider owns another.
#[derive(Debug, Clone)]
pub struct InMemorySonarCloud {
    organization: String,
    inner: Arc<Mutex<Inner>>,
}

impl InMemorySonarCloud {
    pub fn new(organization: &str) -> Self {
        Self {
            organization: organization.to_string(),
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_group(self, name: &str, description: &str) -> Self {
        {
            let mut inner = self.lock();
            let id = inner.next_id();
            inner.data.groups.insert(
                name.to_string(),
                Group {
                    id,
                    description: description.to_string(),
                    members: BTreeSet::new(),
                },
            );
        }
        self
    }

    pub fn with_user(self, login: &str, name: &str) -> Self {
        self.lock()
            .data
            .users
            .insert(login.to_string(), name.to_string());
        self
    }

    pub fn with_member(self, group: &str, login: &str) -> Self {
        if let Some(group) = self.lock().data.groups.get_mut(group) {
            group.members.insert(login.to_string());
        }
        self
    }

    /// A project with `public` visibility.
    pub fn with_project(self, key: &str, name: &str) -> Self {
        self.lock().data.projects.insert(
            key.to_string(),
            Project {
                key: key.to_string(),
                name: name.to_string(),
                visibility: "public".to_string(),
                qualifier: "TRK".to_string(),
            },
        );
        self
    }

    pub fn with_quality_gate(self, gate_id: &str) -> Self {
        self.with_named_quality_gate(gate_id, gate_id, false)
    }

    pub fn with_named_quality_gate(self, gate_id: &str, name: &str, is_default: bool) -> Self {
        {
            let mut inner = self.lock();
            inner
                .data
                .gates
                .insert(gate_id.to_string(), AssociationSet::new());
            inner.data.gate_details.insert(
                gate_id.to_string(),
                QualityGate {
                    id: gate_id.to_string(),
                    name: name.to_string(),
                    is_default,
                    is_built_in: false,
                    conditions: Vec::new(),
                },
            );
        }
        self
    }

    /// Add a condition to a gate registered with one of the gate builders.
    pub fn with_gate_condition(self, gate_id: &str, metric: &str, op: &str, error: &str) -> Self {
        {
            let mut inner = self.lock();
            let id = inner.next_id();
            if let Some(gate) = inner.data.gate_details.get_mut(gate_id) {
                gate.conditions.push(GateCondition {
                    id,
                    metric: metric.to_string(),
                    op: op.to_string(),
                    error: error.to_string(),
                });
            }
        }
        self
    }

    /// After each write, serve the pre-write state to the next `reads` reads.
    pub fn with_read_lag(self, reads: usize) -> Self {
        self.lock().read_lag = reads;
        self
    }

    /// A permission the group always reports and that cannot be revoked,
    /// like those SonarCloud grants to organization owners.
    pub fn with_implicit_group_permission(
        self,
        group: &str,
        project_key: Option<&str>,
        permission: &str,
    ) -> Self {
        self.lock()
            .implicit_group_grants
            .entry((project_key.map(str::to_string), group.to_string()))
            .or_default()
            .insert(permission.to_string());
        self
    }

    /// Fail every `op` call whose key argument equals `key` with `status`.
    pub fn fail_on(self, op: &str, key: &str, status: u16) -> Self {
        self.lock()
            .failures
            .insert((op.to_string(), key.to_string()), status);
        self
    }

    pub fn grant_group<I, K>(&self, group: &str, project_key: Option<&str>, permissions: I)
    where
        I: IntoIterator<Item = K>,
        K: Into<AssociationKey>,
    {
        self.lock()
            .data
            .group_grants
            .entry((project_key.map(str::to_string), group.to_string()))
            .or_default()
            .extend(permissions.into_iter().map(Into::into));
    }

    pub fn grant_user<I, K>(&self, login: &str, project_key: Option<&str>, permissions: I)
    where
        I: IntoIterator<Item = K>,
        K: Into<AssociationKey>,
    {
        self.lock()
            .data
            .user_grants
            .entry((project_key.map(str::to_string), login.to_string()))
            .or_default()
            .extend(permissions.into_iter().map(Into::into));
    }

    /// Live permissions of a group, bypassing read lag.
    pub fn group_permissions_of(&self, group: &str, project_key: Option<&str>) -> AssociationSet {
        self.lock()
            .data
            .group_grants
            .get(&(project_key.map(str::to_string), group.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn user_permissions_of(&self, login: &str, project_key: Option<&str>) -> AssociationSet {
        self.lock()
            .data
            .user_grants
            .get(&(project_key.map(str::to_string), login.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Live project keys selected on a gate.
    pub fn gate_projects(&self, gate_id: &str) -> AssociationSet {
        self.lock()
            .data
            .gates
            .get(gate_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Every call so far, e.g. `GET permissions/groups` or `add_group_permission devs admin`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }
}

#[async_trait]
impl SonarCloudApi for InMemorySonarCloud {
    fn organization(&self) -> &str {
        &self.organization
    }

    async fn group_permissions(
        &self,
        project_key: Option<&str>,
    ) -> Result<Vec<GroupPermissions>, ClientError> {
        let mut inner = self.lock();
        inner.calls.push("GET permissions/groups".to_string());
        let data = inner.view();
        let scope = project_key.map(str::to_string);
        Ok(data
            .groups
            .iter()
            .map(|(name, group)| {
                let key = (scope.clone(), name.clone());
                let mut permissions = data.group_grants.get(&key).cloned().unwrap_or_default();
                if let Some(implicit) = inner.implicit_group_grants.get(&key) {
                    permissions.extend(implicit.iter().cloned());
                }
                GroupPermissions {
                    id: group.id.clone(),
                    name: name.clone(),
                    description: group.description.clone(),
                    permissions: permissions.into_iter().collect(),
                }
            })
            .collect())
    }

    async fn add_group_permission(
        &self,
        group: &str,
        permission: &str,
        project_key: Option<&str>,
    ) -> Result<(), ClientError> {
        let mut inner = self.lock();
        inner.mutate("add_group_permission", &[group, permission], permission)?;
        if !inner.data.groups.contains_key(group) {
            return Err(not_found(format!("group '{}'", group)));
        }
        inner
            .data
            .group_grants
            .entry((project_key.map(str::to_string), group.to_string()))
            .or_default()
            .insert(permission.to_string());
        Ok(())
    }

    async fn remove_group_permission(
        &self,
        group: &str,
        permission: &str,
        project_key: Option<&str>,
    ) -> Result<(), ClientError> {
        let mut inner = self.lock();
        inner.mutate("remove_group_permission", &[group, permission], permission)?;
        if let Some(grants) = inner
            .data
            .group_grants
            .get_mut(&(project_key.map(str::to_string), group.to_string()))
        {
            grants.remove(permission);
        }
        Ok(())
    }

    async fn user_permissions(
        &self,
        project_key: Option<&str>,
    ) -> Result<Vec<UserPermissions>, ClientError> {
        let mut inner = self.lock();
        inner.calls.push("GET permissions/users".to_string());
        let data = inner.view();
        Ok(data
            .user_grants
            .iter()
            .filter(|((scope, _), grants)| scope.as_deref() == project_key && !grants.is_empty())
            .map(|((_, login), grants)| UserPermissions {
                login: login.clone(),
                name: data.users.get(login).cloned().unwrap_or_default(),
                avatar: String::new(),
                permissions: grants.iter().cloned().collect(),
            })
            .collect())
    }

    async fn add_user_permission(
        &self,
        login: &str,
        permission: &str,
        project_key: Option<&str>,
    ) -> Result<(), ClientError> {
        let mut inner = self.lock();
        inner.mutate("add_user_permission", &[login, permission], permission)?;
        if !inner.data.users.contains_key(login) {
            return Err(not_found(format!("user '{}'", login)));
        }
        inner
            .data
            .user_grants
            .entry((project_key.map(str::to_string), login.to_string()))
            .or_default()
            .insert(permission.to_string());
        Ok(())
    }

    async fn remove_user_permission(
        &self,
        login: &str,
        permission: &str,
        project_key: Option<&str>,
    ) -> Result<(), ClientError> {
        let mut inner = self.lock();
        inner.mutate("remove_user_permission", &[login, permission], permission)?;
        if let Some(grants) = inner
            .data
            .user_grants
            .get_mut(&(project_key.map(str::to_string), login.to_string()))
        {
            grants.remove(permission);
        }
        Ok(())
    }

    async fn quality_gates(&self) -> Result<Vec<QualityGate>, ClientError> {
        let mut inner = self.lock();
        inner.calls.push("GET qualitygates/list".to_string());
        Ok(inner.view().gate_details.into_values().collect())
    }

    async fn quality_gate_projects(&self, gate_id: &str) -> Result<Vec<GateProject>, ClientError> {
        let mut inner = self.lock();
        inner.calls.push("GET qualitygates/search".to_string());
        let data = inner.view();
        let selected = data
            .gates
            .get(gate_id)
            .ok_or_else(|| not_found(format!("quality gate '{}'", gate_id)))?;
        Ok(selected
            .iter()
            .map(|key| GateProject {
                id: key.clone(),
                key: key.clone(),
                name: data
                    .projects
                    .get(key)
                    .map(|p| p.name.clone())
                    .unwrap_or_default(),
                selected: true,
            })
            .collect())
    }

    async fn select_quality_gate(&self, gate_id: &str, project_key: &str) -> Result<(), ClientError> {
        let mut inner = self.lock();
        inner.mutate("select_quality_gate", &[gate_id, project_key], project_key)?;
        inner
            .data
            .gates
            .get_mut(gate_id)
            .ok_or_else(|| not_found(format!("quality gate '{}'", gate_id)))?
            .insert(project_key.to_string());
        Ok(())
    }

    async fn deselect_quality_gate(
        &self,
        gate_id: &str,
        project_key: &str,
    ) -> Result<(), ClientError> {
        let mut inner = self.lock();
        inner.mutate("deselect_quality_gate", &[gate_id, project_key], project_key)?;
        inner
            .data
            .gates
            .get_mut(gate_id)
            .ok_or_else(|| not_found(format!("quality gate '{}'", gate_id)))?
            .remove(project_key);
        Ok(())
    }

    async fn create_project(&self, project: &CreateProject) -> Result<Project, ClientError> {
        let mut inner = self.lock();
        inner.mutate("create_project", &[&project.key], &project.key)?;
        if inner.data.projects.contains_key(&project.key) {
            return Err(ClientError::http(
                400,
                &format!(
                    r#"{{"errors":[{{"msg":"Could not create Project, key already exists: {}"}}]}}"#,
                    project.key
                ),
            ));
        }
        let created = Project {
            key: project.key.clone(),
            name: project.name.clone(),
            visibility: project
                .visibility
                .clone()
                .unwrap_or_else(|| "public".to_string()),
            qualifier: "TRK".to_string(),
        };
        inner
            .data
            .projects
            .insert(created.key.clone(), created.clone());
        Ok(created)
    }

    async fn search_projects(&self, keys: &[String]) -> Result<Vec<Project>, ClientError> {
        let mut inner = self.lock();
        inner.calls.push("GET projects/search".to_string());
        Ok(inner
            .view()
            .projects
            .into_values()
            .filter(|p| keys.is_empty() || keys.contains(&p.key))
            .collect())
    }

    async fn delete_project(&self, key: &str) -> Result<(), ClientError> {
        let mut inner = self.lock();
        inner.mutate("delete_project", &[key], key)?;
        inner
            .data
            .projects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| not_found(format!("project '{}'", key)))
    }

    async fn update_project_key(&self, from: &str, to: &str) -> Result<(), ClientError> {
        let mut inner = self.lock();
        inner.mutate("update_project_key", &[from, to], from)?;
        let mut project = inner
            .data
            .projects
            .remove(from)
            .ok_or_else(|| not_found(format!("project '{}'", from)))?;
        project.key = to.to_string();
        inner.data.projects.insert(to.to_string(), project);
        Ok(())
    }

    async fn update_project_visibility(&self, key: &str, visibility: &str) -> Result<(), ClientError> {
        let mut inner = self.lock();
        inner.mutate("update_project_visibility", &[key, visibility], key)?;
        inner
            .data
            .projects
            .get_mut(key)
            .ok_or_else(|| not_found(format!("project '{}'", key)))?
            .visibility = visibility.to_string();
        Ok(())
    }

    async fn create_webhook(&self, webhook: &CreateWebhook) -> Result<Webhook, ClientError> {
        let mut inner = self.lock();
        inner.mutate("create_webhook", &[&webhook.name], &webhook.name)?;
        let created = Webhook {
            key: format!("AX{}", inner.next_id()),
            name: webhook.name.clone(),
            url: webhook.url.clone(),
            has_secret: webhook.secret.is_some(),
        };
        inner.data.webhooks.push(StoredWebhook {
            project: webhook.project.clone(),
            webhook: created.clone(),
        });
        Ok(created)
    }

    async fn list_webhooks(&self, project: Option<&str>) -> Result<Vec<Webhook>, ClientError> {
        let mut inner = self.lock();
        inner.calls.push("GET webhooks/list".to_string());
        Ok(inner
            .view()
            .webhooks
            .into_iter()
            .filter(|w| w.project.as_deref() == project)
            .map(|w| w.webhook)
            .collect())
    }

    async fn update_webhook(&self, webhook: &UpdateWebhook) -> Result<(), ClientError> {
        let mut inner = self.lock();
        inner.mutate("update_webhook", &[&webhook.key], &webhook.key)?;
        let stored = inner
            .data
            .webhooks
            .iter_mut()
            .find(|w| w.webhook.key == webhook.key)
            .ok_or_else(|| not_found(format!("webhook '{}'", webhook.key)))?;
        stored.webhook.name = webhook.name.clone();
        stored.webhook.url = webhook.url.clone();
        stored.webhook.has_secret = webhook.secret.is_some();
        Ok(())
    }

    async fn delete_webhook(&self, key: &str) -> Result<(), ClientError> {
        let mut inner = self.lock();
        inner.mutate("delete_webhook", &[key], key)?;
        let before = inner.data.webhooks.len();
        inner.data.webhooks.retain(|w| w.webhook.key != key);
        if inner.data.webhooks.len() == before {
            return Err(not_found(format!("webhook '{}'", key)));
        }
        Ok(())
    }

    async fn user_groups(&self) -> Result<Vec<UserGroup>, ClientError> {
        let mut inner = self.lock();
        inner.calls.push("GET user_groups/search".to_string());
        Ok(inner
            .view()
            .groups
            .into_iter()
            .map(|(name, group)| UserGroup {
                id: group.id,
                name: name.clone(),
                description: group.description,
                members_count: group.members.len() as u64,
                default: name == "Members",
            })
            .collect())
    }

    async fn user_group_members(&self, group: &str) -> Result<Vec<GroupMember>, ClientError> {
        let mut inner = self.lock();
        inner.calls.push("GET user_groups/users".to_string());
        let data = inner.view();
        let found = data
            .groups
            .get(group)
            .ok_or_else(|| not_found(format!("group '{}'", group)))?;
        Ok(found
            .members
            .iter()
            .map(|login| GroupMember {
                login: login.clone(),
                name: data.users.get(login).cloned().unwrap_or_default(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::association_set;

    #[tokio::test]
    async fn test_reads_lag_behind_writes() {
        let api = InMemorySonarCloud::new("acme")
            .with_group("devs", "")
            .with_read_lag(2);

        api.add_group_permission("devs", "scan", None).await.unwrap();

        for _ in 0..2 {
            let groups = api.group_permissions(None).await.unwrap();
            assert!(groups[0].permissions.is_empty());
        }
        let groups = api.group_permissions(None).await.unwrap();
        assert_eq!(groups[0].permissions, vec!["scan"]);
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let api = InMemorySonarCloud::new("acme")
            .with_group("devs", "")
            .fail_on("add_group_permission", "admin", 503);

        let err = api
            .add_group_permission("devs", "admin", None)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "HTTP 503: add_group_permission admin rejected");
        assert!(api.group_permissions_of("devs", None).is_empty());
    }

    #[tokio::test]
    async fn test_implicit_permission_survives_removal() {
        let api = InMemorySonarCloud::new("acme")
            .with_group("owners", "")
            .with_implicit_group_permission("owners", None, "admin");

        api.remove_group_permission("owners", "admin", None)
            .await
            .unwrap();

        let groups = api.group_permissions(None).await.unwrap();
        assert_eq!(association_set(groups[0].permissions.clone()), association_set(["admin"]));
    }

    #[tokio::test]
    async fn test_unknown_gate_is_not_found() {
        let api = InMemorySonarCloud::new("acme");
        let err = api.quality_gate_projects("1").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
