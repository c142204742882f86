//! Attribute-level plan computation.
//!
//! A plan compares the prior state of a resource with the configuration the
//! user proposes, using the resource [`Schema`] to decide how each attribute
//! is compared and what a change to it means.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::{AttributeType, Schema};

/// A change to a single attribute during a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// The attribute that changed.
    pub path: String,
    /// The value before the change (None if creating).
    pub before: Option<Value>,
    /// The value after the change (None if deleting or unknown until apply).
    pub after: Option<Value>,
}

impl AttributeChange {
    /// Create a new attribute change.
    pub fn new(path: impl Into<String>, before: Option<Value>, after: Option<Value>) -> Self {
        Self {
            path: path.into(),
            before,
            after,
        }
    }

    /// Create a change for a new attribute.
    pub fn added(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, None, Some(value))
    }

    /// Create a change for a removed attribute.
    pub fn removed(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, Some(value), None)
    }

    /// Create a change for a modified attribute.
    pub fn modified(path: impl Into<String>, before: Value, after: Value) -> Self {
        Self::new(path, Some(before), Some(after))
    }
}

/// The result of a plan operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    /// The state expected after apply. `Null` plans a destroy.
    pub planned_state: Value,
    /// The attributes that change.
    pub changes: Vec<AttributeChange>,
    /// Whether the resource must be destroyed and created again.
    pub requires_replace: bool,
}

impl PlanResult {
    /// Create a plan result with no changes.
    pub fn no_change(state: Value) -> Self {
        Self {
            planned_state: state,
            changes: Vec::new(),
            requires_replace: false,
        }
    }

    /// True when applying the plan would change anything.
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// Plan the move from `prior` to `proposed`.
///
/// - `prior: None` plans a create; `proposed: Null` plans a destroy.
/// - Set-typed attributes compare without regard to order or duplicates.
/// - Computed attributes left unset in `proposed` keep their prior value,
///   unless the resource is being replaced.
/// - A change to a force-new attribute of an existing resource sets
///   `requires_replace`.
pub fn plan(schema: &Schema, prior: Option<&Value>, proposed: &Value) -> PlanResult {
    let prior = prior.and_then(Value::as_object);

    let Some(proposed) = proposed.as_object() else {
        let changes = prior
            .map(|p| {
                sorted(p)
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| AttributeChange::removed(k.as_str(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        return PlanResult {
            planned_state: Value::Null,
            changes,
            requires_replace: false,
        };
    };

    let requires_replace = prior.map_or(false, |prior| {
        schema.attributes.iter().any(|(name, attr)| {
            attr.force_new
                && !attr.flags.is_computed_only()
                && !values_equal(
                    &attr.attr_type,
                    prior.get(name).unwrap_or(&Value::Null),
                    proposed.get(name).unwrap_or(&Value::Null),
                )
        })
    });

    let mut planned = proposed.clone();
    if let Some(prior) = prior {
        if !requires_replace {
            for (name, attr) in &schema.attributes {
                let unset = planned.get(name).map_or(true, Value::is_null);
                if attr.flags.computed && unset {
                    if let Some(value) = prior.get(name).filter(|v| !v.is_null()) {
                        planned.insert(name.clone(), value.clone());
                    }
                }
            }
        }
    }

    let mut changes = Vec::new();
    let mut names: Vec<&String> = schema.attributes.keys().collect();
    names.sort();
    for name in names {
        let attr_type = &schema.attributes[name].attr_type;
        let before = prior.and_then(|p| p.get(name)).filter(|v| !v.is_null());
        let after = planned.get(name).filter(|v| !v.is_null());
        let equal = match (before, after) {
            (Some(b), Some(a)) => values_equal(attr_type, b, a),
            (None, None) => true,
            _ => false,
        };
        if !equal {
            changes.push(AttributeChange::new(name.as_str(), before.cloned(), after.cloned()));
        }
    }

    PlanResult {
        planned_state: Value::Object(planned),
        changes,
        requires_replace,
    }
}

fn sorted(map: &Map<String, Value>) -> impl Iterator<Item = (&String, &Value)> {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries.into_iter()
}

/// Compare two values as the schema type says they should be compared.
pub(crate) fn values_equal(attr_type: &AttributeType, a: &Value, b: &Value) -> bool {
    match (attr_type, a, b) {
        (AttributeType::Set(_), Value::Array(x), Value::Array(y)) => canonical_set(x) == canonical_set(y),
        _ => a == b,
    }
}

fn canonical_set(values: &[Value]) -> Vec<String> {
    let mut keys: Vec<String> = values.iter().map(Value::to_string).collect();
    keys.sort();
    keys.dedup();
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, AttributeValidator};
    use serde_json::json;

    fn group_permissions_schema() -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("name", Attribute::required_string().with_force_new())
            .with_attribute("project_key", Attribute::optional_string().with_force_new())
            .with_attribute("description", Attribute::computed_string())
            .with_attribute(
                "permissions",
                Attribute::required_string_set()
                    .with_validator(AttributeValidator::set_elements_one_of(["admin", "scan"])),
            )
    }

    fn prior() -> Value {
        json!({
            "id": "web-devs",
            "name": "devs",
            "project_key": "web",
            "description": "Developers",
            "permissions": ["scan", "admin"]
        })
    }

    #[test]
    fn test_plan_create() {
        let result = plan(
            &group_permissions_schema(),
            None,
            &json!({"name": "devs", "permissions": ["scan"]}),
        );
        assert!(!result.requires_replace);
        let paths: Vec<_> = result.changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["name", "permissions"]);
        assert!(result.changes.iter().all(|c| c.before.is_none()));
    }

    #[test]
    fn test_plan_set_order_is_ignored() {
        let result = plan(
            &group_permissions_schema(),
            Some(&prior()),
            &json!({"name": "devs", "project_key": "web", "permissions": ["admin", "scan"]}),
        );
        assert!(!result.has_changes(), "{:?}", result.changes);
        // Computed attributes are carried from prior state.
        assert_eq!(result.planned_state["id"], "web-devs");
        assert_eq!(result.planned_state["description"], "Developers");
    }

    #[test]
    fn test_plan_set_change_is_in_place() {
        let result = plan(
            &group_permissions_schema(),
            Some(&prior()),
            &json!({"name": "devs", "project_key": "web", "permissions": ["scan"]}),
        );
        assert!(!result.requires_replace);
        assert_eq!(
            result.changes,
            vec![AttributeChange::modified(
                "permissions",
                json!(["scan", "admin"]),
                json!(["scan"])
            )]
        );
    }

    #[test]
    fn test_plan_force_new_requires_replace() {
        let result = plan(
            &group_permissions_schema(),
            Some(&prior()),
            &json!({"name": "ops", "project_key": "web", "permissions": ["scan", "admin"]}),
        );
        assert!(result.requires_replace);
        // Replaced resources get fresh computed values.
        assert!(result.planned_state.get("id").is_none());
        assert!(result.changes.iter().any(|c| c.path == "name"));
        assert!(result.changes.iter().any(|c| c.path == "id" && c.after.is_none()));
    }

    #[test]
    fn test_plan_removing_optional_force_new_requires_replace() {
        let result = plan(
            &group_permissions_schema(),
            Some(&prior()),
            &json!({"name": "devs", "permissions": ["scan", "admin"]}),
        );
        assert!(result.requires_replace);
    }

    #[test]
    fn test_plan_destroy() {
        let result = plan(&group_permissions_schema(), Some(&prior()), &Value::Null);
        assert_eq!(result.planned_state, Value::Null);
        assert_eq!(result.changes.len(), 5);
        assert!(result.changes.iter().all(|c| c.after.is_none()));
    }

    #[test]
    fn test_values_equal_for_sets() {
        let set = AttributeType::set(AttributeType::String);
        assert!(values_equal(&set, &json!(["a", "b"]), &json!(["b", "a", "a"])));
        assert!(!values_equal(&set, &json!(["a"]), &json!(["a", "b"])));

        let list = AttributeType::list(AttributeType::String);
        assert!(!values_equal(&list, &json!(["a", "b"]), &json!(["b", "a"])));
    }
}
