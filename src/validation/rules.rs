//! Reference integrity and business rules over a loaded corpus.

use std::collections::HashMap;

use super::{Corpus, ValidationResult};
use crate::graph::{self, DependencyGraph};
use crate::models::{Entity, EntityType, Priority, SubItem};

/// Minimum trimmed description length before a component gets a warning.
pub const DEFAULT_MIN_COMPONENT_DESCRIPTION_LEN: usize = 20;

/// Check that every reference `entity` makes resolves.
pub fn check_references(entity: &Entity, corpus: &Corpus, result: &mut ValidationResult) {
    let id = entity.id();
    match entity {
        Entity::Plan(plan) => {
            for dep in &plan.depends_on {
                if !corpus.contains_where(dep, |t| t == EntityType::Plan) {
                    result.error(format!("{id}: depends_on references unknown plan '{dep}'"));
                }
            }
            if let Some(criteria_id) = &plan.criteria_id {
                match corpus.criterion(criteria_id) {
                    None => result.error(format!(
                        "{id}: criteria_id references unknown criterion '{criteria_id}'"
                    )),
                    Some(Some(latest)) => result.warn(format!(
                        "{id}: criteria_id references superseded criterion '{criteria_id}' (superseded by '{latest}')"
                    )),
                    Some(None) => {}
                }
            }
            check_siblings(&id, "tasks", &plan.tasks, result);
            check_siblings(&id, "test_cases", &plan.test_cases, result);
            check_siblings(&id, "api_contracts", &plan.api_contracts, result);
            check_siblings(&id, "data_models", &plan.data_models, result);
        }
        Entity::App(component) | Entity::Service(component) | Entity::Library(component) => {
            for dep in &component.depends_on {
                if !corpus.contains_where(dep, |t| t.is_component()) {
                    result.error(format!(
                        "{id}: depends_on references unknown component '{dep}'"
                    ));
                }
            }
        }
        Entity::Decision(decision) => {
            for reference in &decision.references {
                if !corpus.contains(reference) {
                    result.error(format!(
                        "{id}: references unknown entity '{reference}'"
                    ));
                }
            }
        }
        Entity::Requirement(_) | Entity::Constitution(_) => {}
    }
}

/// Sub-item references must point at siblings in the same collection.
fn check_siblings<T: SubItem>(
    owner: &str,
    field: &str,
    items: &[T],
    result: &mut ValidationResult,
) {
    let by_id: HashMap<&str, &T> = items.iter().map(|item| (item.id(), item)).collect();

    for item in items {
        for reference in item.reference_lists().into_iter().flatten() {
            match by_id.get(reference.as_str()) {
                None => result.error(format!(
                    "{owner}: {field} item '{}' references unknown {} '{reference}'",
                    item.id(),
                    T::KIND
                )),
                Some(target) if target.is_superseded() && !item.is_superseded() => {
                    result.warn(format!(
                        "{owner}: {field} item '{}' references superseded {} '{reference}'",
                        item.id(),
                        T::KIND
                    ))
                }
                Some(_) => {}
            }
        }
    }
}

/// Advisory and structural rules that go beyond single references.
pub fn check_business_rules(corpus: &Corpus, min_description_len: usize) -> ValidationResult {
    let mut result = ValidationResult::new();

    let mut requirements = corpus.of_type(EntityType::Requirement).peekable();
    if requirements.peek().is_some()
        && !requirements
            .any(|e| matches!(e, Entity::Requirement(r) if r.priority == Priority::Critical))
    {
        result.warn("no critical-priority requirement defined");
    }

    for entity in corpus.of_type(EntityType::Plan) {
        let Entity::Plan(plan) = entity else {
            continue;
        };
        let has_acceptance = plan
            .acceptance_criteria
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty());
        if plan.priority == Priority::Critical && !has_acceptance {
            result.error(format!(
                "{}: critical plan has no acceptance criteria",
                entity.id()
            ));
        }

        for cycle in graph::detect_cycles(&plan.tasks) {
            result.error(format!(
                "{}: task dependency cycle: {}",
                entity.id(),
                graph::format_cycle(&cycle)
            ));
        }
    }

    for entity in corpus.components() {
        if entity.meta().description.trim().chars().count() < min_description_len {
            result.warn(format!(
                "{}: description is shorter than {min_description_len} characters",
                entity.id()
            ));
        }
    }

    for cycle in DependencyGraph::from_nodes(corpus.components()).detect_cycles() {
        result.error(format!(
            "dependency cycle among components: {}",
            graph::format_cycle(&cycle)
        ));
    }

    for cycle in DependencyGraph::from_nodes(corpus.of_type(EntityType::Plan)).detect_cycles() {
        result.error(format!(
            "dependency cycle among plans: {}",
            graph::format_cycle(&cycle)
        ));
    }

    result
}
