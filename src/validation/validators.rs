use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::{rules, ValidationContext, ValidationResult};
use crate::ids;
use crate::models::{Entity, SubItem};
use crate::schema::SchemaCheck;

/// A pluggable check run against one entity at a time.
///
/// Validators are registered by name; registering a second validator under an
/// existing name replaces the first.
pub trait EntityValidator: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, entity: &Entity) -> bool;

    fn validate(
        &self,
        entity: &Entity,
        ctx: &ValidationContext<'_>,
    ) -> anyhow::Result<ValidationResult>;
}

/// Re-runs the store's schema check on the entity as it is now.
pub struct SchemaValidator {
    schema: Arc<dyn SchemaCheck>,
}

impl SchemaValidator {
    pub const NAME: &'static str = "schema";

    pub fn new(schema: Arc<dyn SchemaCheck>) -> Self {
        Self { schema }
    }
}

impl EntityValidator for SchemaValidator {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn supports(&self, _entity: &Entity) -> bool {
        true
    }

    fn validate(
        &self,
        entity: &Entity,
        _ctx: &ValidationContext<'_>,
    ) -> anyhow::Result<ValidationResult> {
        let mut result = ValidationResult::new();
        let document = serde_json::to_value(entity)?;
        if let Err(errors) = self.schema.parse(entity.entity_type(), document) {
            let id = entity.id();
            for error in errors {
                result.error(format!("{id}: {error}"));
            }
        }
        Ok(result)
    }
}

/// Every id an entity mentions must resolve to something that exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceValidator;

impl ReferenceValidator {
    pub const NAME: &'static str = "references";
}

impl EntityValidator for ReferenceValidator {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn supports(&self, entity: &Entity) -> bool {
        !matches!(entity, Entity::Requirement(_) | Entity::Constitution(_))
    }

    fn validate(
        &self,
        entity: &Entity,
        ctx: &ValidationContext<'_>,
    ) -> anyhow::Result<ValidationResult> {
        let mut result = ValidationResult::new();
        rules::check_references(entity, ctx.corpus()?, &mut result);
        Ok(result)
    }
}

/// Structural checks on sub-item collections: unique ids, consistent
/// supersession links and criteria ids qualified by their requirement.
#[derive(Debug, Default, Clone, Copy)]
pub struct SubItemValidator;

impl SubItemValidator {
    pub const NAME: &'static str = "sub_items";
}

impl EntityValidator for SubItemValidator {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn supports(&self, entity: &Entity) -> bool {
        matches!(entity, Entity::Requirement(_) | Entity::Plan(_))
    }

    fn validate(
        &self,
        entity: &Entity,
        _ctx: &ValidationContext<'_>,
    ) -> anyhow::Result<ValidationResult> {
        let mut result = ValidationResult::new();
        let id = entity.id();
        match entity {
            Entity::Requirement(requirement) => {
                check_collection(&id, "criteria", &requirement.criteria, &mut result);
                for criterion in &requirement.criteria {
                    let parent = ids::parse_child(&criterion.id).and_then(|c| c.parent);
                    if parent.as_deref() != Some(id.as_str()) {
                        result.error(format!(
                            "{id}: criterion '{}' is not qualified by its requirement id",
                            criterion.id
                        ));
                    }
                }
            }
            Entity::Plan(plan) => {
                check_collection(&id, "tasks", &plan.tasks, &mut result);
                check_collection(&id, "test_cases", &plan.test_cases, &mut result);
                check_collection(&id, "api_contracts", &plan.api_contracts, &mut result);
                check_collection(&id, "data_models", &plan.data_models, &mut result);
            }
            _ => {}
        }
        Ok(result)
    }
}

fn check_collection<T: SubItem>(
    owner: &str,
    field: &str,
    items: &[T],
    result: &mut ValidationResult,
) {
    let mut seen = HashSet::new();
    for item in items {
        if !seen.insert(item.id()) {
            result.error(format!("{owner}: duplicate {field} id '{}'", item.id()));
        }
    }

    let by_id: HashMap<&str, &T> = items.iter().map(|item| (item.id(), item)).collect();
    for item in items {
        let lineage = item.lineage();
        if let Some(next) = &lineage.superseded_by {
            let mirrored = by_id
                .get(next.as_str())
                .is_some_and(|n| n.lineage().supersedes.as_deref() == Some(item.id()));
            if !mirrored {
                result.error(format!(
                    "{owner}: {field} item '{}' is superseded by '{next}' which does not point back",
                    item.id()
                ));
            }
        }
        if let Some(previous) = &lineage.supersedes {
            let mirrored = by_id
                .get(previous.as_str())
                .is_some_and(|p| p.lineage().superseded_by.as_deref() == Some(item.id()));
            if !mirrored {
                result.error(format!(
                    "{owner}: {field} item '{}' supersedes '{previous}' which does not point forward",
                    item.id()
                ));
            }
        }
    }
}
