//! Schema validation helpers.
//!
//! This module validates a `serde_json::Value` configuration against a [`Schema`].
//! Resources and data sources run it before any remote call so users get
//! attribute-level diagnostics instead of API errors.
//!
//! # Example
//!
//! ```
//! use sonarcloud_provider::schema::{Attribute, AttributeValidator, Schema};
//! use sonarcloud_provider::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("name", Attribute::required_string()
//!         .with_validator(AttributeValidator::length_between(1, 255)))
//!     .with_attribute("visibility", Attribute::optional_computed_string()
//!         .with_validator(AttributeValidator::one_of(["public", "private"])));
//!
//! let diagnostics = validate(&schema, &json!({"name": "web"}));
//! assert!(diagnostics.is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"name": "web", "visibility": "secret"}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("visibility".to_string()));
//! ```

use crate::schema::{Attribute, AttributeType, Diagnostic, DiagnosticSeverity, Schema};
use serde_json::Value;
use std::collections::BTreeMap;

/// Validate a configuration value against a schema.
///
/// Returns a list of diagnostics for any validation errors found.
/// An empty list means the value is valid.
///
/// # Validation Rules
///
/// - The value must be an object (or null, treated as empty)
/// - Required attributes must be present and non-null
/// - Computed-only attributes must not be set
/// - Attributes unknown to the schema are rejected
/// - Attribute types must match the schema
/// - Attribute validators run on present, well-typed values
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let empty = serde_json::Map::new();
    let obj = match value {
        Value::Object(map) => map,
        Value::Null => &empty,
        _ => {
            diagnostics.push(
                Diagnostic::error("Expected object").with_detail(format!("Got {}", value_type_name(value))),
            );
            return diagnostics;
        }
    };

    let mut names: Vec<&String> = schema.attributes.keys().collect();
    names.sort();
    for name in names {
        if let Some(attr) = schema.attributes.get(name) {
            validate_attribute(attr, obj.get(name), name, &mut diagnostics);
        }
    }

    for name in obj.keys() {
        if !schema.attributes.contains_key(name) {
            diagnostics.push(
                Diagnostic::error("Unsupported argument")
                    .with_detail(format!("An argument named '{}' is not expected here", name))
                    .with_attribute(name.as_str()),
            );
        }
    }

    diagnostics
}

/// Validate a configuration value, returning Ok if valid or Err with diagnostics.
///
/// This is a convenience wrapper around [`validate`] that returns a Result.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Check if a configuration value is valid against a schema.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        }
        Some(_) if attr.flags.is_computed_only() => {
            diagnostics.push(
                Diagnostic::error(format!("Invalid configuration for read-only attribute '{}'", path))
                    .with_detail("This attribute is computed by the provider and cannot be set")
                    .with_attribute(path),
            );
        }
        Some(v) => {
            let before = diagnostics.len();
            validate_attribute_type(&attr.attr_type, v, path, diagnostics);
            if diagnostics.len() == before {
                for validator in &attr.validators {
                    diagnostics.extend(validator.check(v, path));
                }
            }
        }
    }
}

fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
            }
        }
        AttributeType::Int64 => {
            if !is_int64(value) {
                diagnostics.push(type_error(path, "int64", value));
            }
        }
        AttributeType::Bool => {
            if !value.is_boolean() {
                diagnostics.push(type_error(path, "bool", value));
            }
        }
        AttributeType::List(element_type) | AttributeType::Set(element_type) => {
            // Sets are represented as arrays in JSON
            if let Some(arr) = value.as_array() {
                for (i, elem) in arr.iter().enumerate() {
                    let elem_path = format!("{}.{}", path, i);
                    validate_attribute_type(element_type, elem, &elem_path, diagnostics);
                }
            } else {
                let expected = if attr_type.is_set() { "set" } else { "list" };
                diagnostics.push(type_error(path, expected, value));
            }
        }
        AttributeType::Object(attrs) => {
            if let Some(obj) = value.as_object() {
                validate_object_type(attrs, obj, path, diagnostics);
            } else {
                diagnostics.push(type_error(path, "object", value));
            }
        }
    }
}

fn validate_object_type(
    attrs: &BTreeMap<String, AttributeType>,
    obj: &serde_json::Map<String, Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for (name, attr_type) in attrs {
        if let Some(value) = obj.get(name) {
            if !value.is_null() {
                let attr_path = format!("{}.{}", path, name);
                validate_attribute_type(attr_type, value, &attr_path, diagnostics);
            }
        }
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_int64(value: &Value) -> bool {
    match value {
        Value::Number(n) => {
            n.is_i64()
                || n.as_f64().map_or(false, |f| {
                    f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64
                })
        }
        _ => false,
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic {
        severity: DiagnosticSeverity::Error,
        summary: format!("Invalid type for attribute '{}'", path),
        detail: Some(format!(
            "Expected {}, got {}",
            expected,
            value_type_name(got)
        )),
        attribute: Some(path.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeValidator;
    use serde_json::json;

    fn permissions_schema() -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("name", Attribute::required_string())
            .with_attribute("project_key", Attribute::optional_string())
            .with_attribute(
                "permissions",
                Attribute::required_string_set()
                    .with_validator(AttributeValidator::set_elements_one_of(["admin", "scan"])),
            )
    }

    #[test]
    fn test_validate_valid_config() {
        let diags = validate(
            &permissions_schema(),
            &json!({"name": "devs", "permissions": ["scan"]}),
        );
        assert!(diags.is_empty(), "{:?}", diags);
    }

    #[test]
    fn test_validate_required_attributes() {
        let diags = validate(&permissions_schema(), &json!({"project_key": null}));
        let attrs: Vec<_> = diags.iter().filter_map(|d| d.attribute.as_deref()).collect();
        assert_eq!(attrs, vec!["name", "permissions"]);
        assert!(diags[0].summary.contains("Missing required attribute 'name'"));
    }

    #[test]
    fn test_validate_null_is_empty_object() {
        assert_eq!(validate(&permissions_schema(), &Value::Null).len(), 2);
    }

    #[test]
    fn test_validate_computed_attribute_cannot_be_set() {
        let diags = validate(
            &permissions_schema(),
            &json!({"id": "x", "name": "devs", "permissions": []}),
        );
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].attribute.as_deref(), Some("id"));
    }

    #[test]
    fn test_validate_unknown_attribute() {
        let diags = validate(
            &permissions_schema(),
            &json!({"name": "devs", "permissions": [], "colour": "red"}),
        );
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].summary, "Unsupported argument");
    }

    #[test]
    fn test_validate_type_mismatch_skips_validators() {
        let diags = validate(
            &permissions_schema(),
            &json!({"name": "devs", "permissions": "scan"}),
        );
        assert_eq!(diags.len(), 1);
        assert_eq!(
            diags[0].detail.as_deref(),
            Some("Expected set, got string")
        );

        let diags = validate(
            &permissions_schema(),
            &json!({"name": "devs", "permissions": ["scan", 7]}),
        );
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].attribute.as_deref(), Some("permissions.1"));
    }

    #[test]
    fn test_validate_runs_validators() {
        let diags = validate(
            &permissions_schema(),
            &json!({"name": "devs", "permissions": ["scan", "root"]}),
        );
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].summary, "Invalid String Element in Set");
    }

    #[test]
    fn test_validate_int64_and_bool() {
        let schema = Schema::v0()
            .with_attribute(
                "timeout",
                Attribute::new(AttributeType::Int64, crate::schema::AttributeFlags::optional()),
            )
            .with_attribute(
                "enabled",
                Attribute::new(AttributeType::Bool, crate::schema::AttributeFlags::optional()),
            );
        assert!(is_valid(&schema, &json!({"timeout": 30, "enabled": true})));
        assert!(is_valid(&schema, &json!({"timeout": 30.0})));
        assert!(!is_valid(&schema, &json!({"timeout": 1.5})));
        assert!(!is_valid(&schema, &json!({"enabled": "yes"})));
    }

    #[test]
    fn test_validate_object_list() {
        let schema = Schema::v0().with_attribute(
            "projects",
            Attribute::new(
                AttributeType::list(AttributeType::object([
                    ("key", AttributeType::String),
                    ("name", AttributeType::String),
                ])),
                crate::schema::AttributeFlags::optional(),
            ),
        );
        assert!(is_valid(&schema, &json!({"projects": [{"key": "a", "name": "A"}]})));

        let diags = validate(&schema, &json!({"projects": [{"key": 1}]}));
        assert_eq!(diags[0].attribute.as_deref(), Some("projects.0.key"));
    }

    #[test]
    fn test_validate_root_not_object() {
        let diags = validate(&permissions_schema(), &json!([1, 2]));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].summary, "Expected object");
    }

    #[test]
    fn test_validate_result_helper() {
        assert!(validate_result(&permissions_schema(), &json!({"name": "a", "permissions": []})).is_ok());
        let errs = validate_result(&permissions_schema(), &json!({})).unwrap_err();
        assert_eq!(errs.len(), 2);
    }
}
