//! Schema validation for entity documents.
//!
//! [`SchemaCheck`] turns a raw JSON document into a typed [`Entity`] or a list
//! of field errors. [`TypedSchema`] is the default: serde does the structural
//! work (and drops fields the target type does not declare), then a handful of
//! field rules run over the typed value.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids;
use crate::models::{Entity, EntityType, SubItem, SubItemKind};
use crate::slug;

/// One failed field rule, reported as `"path: message"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl FieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Flatten field errors into `"path: message"` strings.
pub fn flatten_errors(errors: &[FieldError]) -> Vec<String> {
    errors.iter().map(ToString::to_string).collect()
}

pub trait SchemaCheck: Send + Sync {
    fn parse(&self, entity_type: EntityType, document: Value) -> Result<Entity, Vec<FieldError>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TypedSchema;

impl SchemaCheck for TypedSchema {
    fn parse(&self, entity_type: EntityType, document: Value) -> Result<Entity, Vec<FieldError>> {
        let Value::Object(mut map) = document else {
            return Err(vec![FieldError::new("$", "document must be a JSON object")]);
        };

        match map.get("type").and_then(Value::as_str) {
            Some(declared) if declared != entity_type.as_str() => {
                return Err(vec![FieldError::new(
                    "type",
                    format!("expected {entity_type}, found {declared}"),
                )]);
            }
            Some(_) => {}
            None => {
                map.insert("type".into(), Value::from(entity_type.as_str()));
            }
        }

        let entity: Entity = serde_json::from_value(Value::Object(map))
            .map_err(|e| vec![FieldError::new("$", e.to_string())])?;

        let errors = check_fields(&entity);
        if errors.is_empty() {
            Ok(entity)
        } else {
            Err(errors)
        }
    }
}

fn check_fields(entity: &Entity) -> Vec<FieldError> {
    let mut errors = Vec::new();
    let meta = entity.meta();

    if meta.number == 0 {
        errors.push(FieldError::new("number", "must be a positive integer"));
    }
    if !slug::is_valid_slug(&meta.slug) {
        errors.push(FieldError::new(
            "slug",
            "must be lowercase letters and digits separated by single hyphens",
        ));
    }
    if meta.name.trim().is_empty() {
        errors.push(FieldError::new("name", "must not be empty"));
    }
    if meta.updated_at < meta.created_at {
        errors.push(FieldError::new("updated_at", "must not precede created_at"));
    }

    match entity {
        Entity::Requirement(r) => {
            check_children("criteria", &r.criteria, &mut errors);
            for (i, c) in r.criteria.iter().enumerate() {
                if c.description.trim().is_empty() {
                    errors.push(FieldError::new(
                        format!("criteria[{i}].description"),
                        "must not be empty",
                    ));
                }
            }
        }
        Entity::Plan(p) => {
            if let Some(criteria_id) = &p.criteria_id {
                let qualified = matches!(
                    ids::parse_child(criteria_id),
                    Some(c) if c.parent.is_some() && c.kind == SubItemKind::Criterion
                );
                if !qualified {
                    errors.push(FieldError::new(
                        "criteria_id",
                        "must be a qualified criterion id like req-001-auth/crit-001",
                    ));
                }
            }
            check_children("tasks", &p.tasks, &mut errors);
            check_children("test_cases", &p.test_cases, &mut errors);
            check_children("api_contracts", &p.api_contracts, &mut errors);
            check_children("data_models", &p.data_models, &mut errors);
        }
        Entity::App(_)
        | Entity::Service(_)
        | Entity::Library(_)
        | Entity::Constitution(_)
        | Entity::Decision(_) => {}
    }

    errors
}

fn check_children<T: SubItem>(field: &str, items: &[T], errors: &mut Vec<FieldError>) {
    for (i, item) in items.iter().enumerate() {
        let well_formed = ids::parse_child(item.id()).is_some_and(|c| c.kind == T::KIND);
        if !well_formed {
            errors.push(FieldError::new(
                format!("{field}[{i}].id"),
                format!("must be a {} id like {}", T::KIND, ids::local_child_id(T::KIND, 1)),
            ));
        }
    }
}
