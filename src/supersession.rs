//! Append-only versioning of sub-items.
//!
//! Superseding an item never removes it. The old item gains `superseded_by`
//! and `superseded_at`, a new sibling with `supersedes` is appended, and every
//! sibling reference to the old id is pointed at the new one.

use std::collections::HashSet;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::ids::{self, IdError};
use crate::models::{Entity, SubItem, SubItemKind, LINEAGE_FIELDS};

#[derive(Debug, Error)]
pub enum SupersessionError {
    #[error("item not found: {id}")]
    NotFound { id: String },

    #[error("item {id} is already superseded by {superseded_by}")]
    AlreadySuperseded { id: String, superseded_by: String },

    #[error("invalid replacement data for {id}: {message}")]
    InvalidData { id: String, message: String },

    #[error("no {kind} numbers left to supersede {id}")]
    Exhausted { id: String, kind: SubItemKind },

    #[error(transparent)]
    InvalidId(#[from] IdError),
}

impl SupersessionError {
    /// The id the failure is about, for echoing back to the caller.
    pub fn id(&self) -> &str {
        match self {
            Self::NotFound { id }
            | Self::AlreadySuperseded { id, .. }
            | Self::InvalidData { id, .. }
            | Self::Exhausted { id, .. } => id,
            Self::InvalidId(IdError::InvalidFormat(id)) => id,
        }
    }
}

/// Replace `old_id` with a new sibling built from `new_data`.
///
/// Fields missing from `new_data` default to the old item's values. Lineage
/// fields and `id` in `new_data` are ignored. Returns the new item.
pub fn supersede<T: SubItem>(
    items: &mut Vec<T>,
    old_id: &str,
    new_data: Value,
) -> Result<T, SupersessionError> {
    let old_index = items
        .iter()
        .position(|item| item.id() == old_id)
        .ok_or_else(|| SupersessionError::NotFound {
            id: old_id.to_string(),
        })?;

    if let Some(superseded_by) = &items[old_index].lineage().superseded_by {
        return Err(SupersessionError::AlreadySuperseded {
            id: old_id.to_string(),
            superseded_by: superseded_by.clone(),
        });
    }

    let number = ids::next_child_number(items.iter().map(SubItem::id), T::KIND).ok_or_else(|| {
        SupersessionError::Exhausted {
            id: old_id.to_string(),
            kind: T::KIND,
        }
    })?;
    let new_id = ids::sibling_child_id(old_id, T::KIND, number)?;

    let invalid = |message: String| SupersessionError::InvalidData {
        id: old_id.to_string(),
        message,
    };

    let mut fields = match serde_json::to_value(&items[old_index]) {
        Ok(Value::Object(map)) => map,
        Ok(_) => return Err(invalid("item does not serialize to an object".into())),
        Err(e) => return Err(invalid(e.to_string())),
    };
    match new_data {
        Value::Object(patch) => overlay(&mut fields, patch),
        Value::Null => {}
        _ => return Err(invalid("replacement data must be a JSON object".into())),
    }
    for field in LINEAGE_FIELDS {
        fields.remove(field);
    }
    fields.insert("id".into(), Value::from(new_id.clone()));
    fields.insert("supersedes".into(), Value::from(old_id));

    let new_item: T =
        serde_json::from_value(Value::Object(fields)).map_err(|e| invalid(e.to_string()))?;

    let lineage = items[old_index].lineage_mut();
    lineage.superseded_by = Some(new_id.clone());
    lineage.superseded_at = Some(Utc::now());

    items.push(new_item.clone());
    let rewritten = rewrite_references(items, old_id, &new_id);

    tracing::debug!(
        kind = %T::KIND,
        old = old_id,
        new = %new_id,
        rewritten,
        "Superseded sub-item"
    );

    // The pushed copy may differ from `new_item` only by a self reference.
    Ok(items.last().cloned().unwrap_or(new_item))
}

fn overlay(fields: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        if key == "id" || LINEAGE_FIELDS.contains(&key.as_str()) {
            continue;
        }
        fields.insert(key, value);
    }
}

/// Point every reference to `old_id` at `new_id`, across every
/// reference-bearing field of every item. Returns the number of rewrites.
pub fn rewrite_references<T: SubItem>(items: &mut [T], old_id: &str, new_id: &str) -> usize {
    let mut count = 0;
    for item in items.iter_mut() {
        for list in item.reference_lists_mut() {
            for reference in list.iter_mut().filter(|r| r.as_str() == old_id) {
                *reference = new_id.to_string();
                count += 1;
            }
        }
    }
    count
}

/// [`get_history`] over the collection of `entity` that holds `kind`, each
/// version encoded as JSON. `Ok(None)` when the entity owns no such collection.
pub fn history_in(
    entity: &Entity,
    kind: SubItemKind,
    id: &str,
) -> serde_json::Result<Option<Vec<Value>>> {
    let versions = match (entity, kind) {
        (Entity::Requirement(r), SubItemKind::Criterion) => {
            encode_all(get_history(&r.criteria, id))
        }
        (Entity::Plan(p), SubItemKind::Task) => encode_all(get_history(&p.tasks, id)),
        (Entity::Plan(p), SubItemKind::TestCase) => encode_all(get_history(&p.test_cases, id)),
        (Entity::Plan(p), SubItemKind::ApiContract) => {
            encode_all(get_history(&p.api_contracts, id))
        }
        (Entity::Plan(p), SubItemKind::DataModel) => {
            encode_all(get_history(&p.data_models, id))
        }
        _ => return Ok(None),
    };
    versions.map(Some)
}

fn encode_all<T: Serialize>(items: Vec<&T>) -> serde_json::Result<Vec<Value>> {
    items.into_iter().map(serde_json::to_value).collect()
}

/// The lineage ending at `id`, oldest first. Empty if `id` is unknown.
///
/// Stops at a `supersedes` link that points to a missing item.
pub fn get_history<'a, T: SubItem>(items: &'a [T], id: &str) -> Vec<&'a T> {
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut current = find(items, id);

    while let Some(item) = current {
        if !seen.insert(item.id()) {
            break;
        }
        chain.push(item);
        current = item
            .lineage()
            .supersedes
            .as_deref()
            .and_then(|prev| find(items, prev));
    }

    chain.reverse();
    chain
}

/// The current tip of the lineage containing `id`.
///
/// Stops at a `superseded_by` link that points to a missing item.
pub fn get_latest<'a, T: SubItem>(items: &'a [T], id: &str) -> Option<&'a T> {
    let mut current = find(items, id)?;
    let mut seen = HashSet::from([current.id()]);

    while let Some(next) = current
        .lineage()
        .superseded_by
        .as_deref()
        .and_then(|next| find(items, next))
    {
        if !seen.insert(next.id()) {
            break;
        }
        current = next;
    }

    Some(current)
}

/// Items nobody has superseded yet.
pub fn active_items<T: SubItem>(items: &[T]) -> impl Iterator<Item = &T> {
    items.iter().filter(|item| !item.is_superseded())
}

fn find<'a, T: SubItem>(items: &'a [T], id: &str) -> Option<&'a T> {
    items.iter().find(|item| item.id() == id)
}
