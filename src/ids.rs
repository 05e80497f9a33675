//! Canonical identifiers.
//!
//! Entities are named `prefix-NNN-slug` (`req-001-auth`). Sub-items are named
//! `kind-NNN` (`task-001`), optionally qualified by their parent
//! (`req-001-auth/crit-001`).

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::models::{EntityType, SubItemKind};

static ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(req|pln|app|svc|lib|con|dec)-(\d{3,})-([a-z0-9]+(?:-[a-z0-9]+)*)$")
        .expect("entity id pattern is valid")
});

static CHILD_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(.+)/)?(crit|task|tc|api|dm)-(\d{3,})$").expect("child id pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("invalid id format: {0}")]
    InvalidFormat(String),
}

/// The components of an entity identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedId {
    pub entity_type: EntityType,
    pub number: u32,
    pub slug: String,
}

/// The components of a sub-item identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedChildId {
    /// Parent entity id for qualified ids like `req-001-auth/crit-001`.
    pub parent: Option<String>,
    pub kind: SubItemKind,
    pub number: u32,
}

pub fn generate(entity_type: EntityType, number: u32, slug: &str) -> String {
    format!("{}-{:03}-{}", entity_type.prefix(), number, slug)
}

/// Parse an entity id. Malformed input yields `None`.
pub fn parse(id: &str) -> Option<ParsedId> {
    let caps = ID_PATTERN.captures(id)?;
    Some(ParsedId {
        entity_type: EntityType::from_prefix(&caps[1])?,
        number: caps[2].parse().ok()?,
        slug: caps[3].to_string(),
    })
}

/// Whether `id` is a well-formed id of `entity_type`.
pub fn is_valid_for_type(entity_type: EntityType, id: &str) -> bool {
    parse(id).is_some_and(|p| p.entity_type == entity_type)
}

/// `max(existing numbers of entity_type) + 1`, or 1. Ids of other types and
/// malformed ids are ignored. `None` once `u32::MAX` is in use.
pub fn next_number<S: AsRef<str>>(existing_ids: &[S], entity_type: EntityType) -> Option<u32> {
    existing_ids
        .iter()
        .filter_map(|id| parse(id.as_ref()))
        .filter(|p| p.entity_type == entity_type)
        .map(|p| p.number)
        .max()
        .map_or(Some(1), |n| n.checked_add(1))
}

/// Qualified child id, e.g. `req-001-auth/crit-001`.
///
/// Fails hard on a malformed parent since callers control that input.
pub fn child_id(parent_id: &str, kind: SubItemKind, n: u32) -> Result<String, IdError> {
    if parse(parent_id).is_none() {
        return Err(IdError::InvalidFormat(parent_id.to_string()));
    }
    Ok(format!("{}/{}", parent_id, local_child_id(kind, n)))
}

/// Unqualified child id, e.g. `task-001`.
pub fn local_child_id(kind: SubItemKind, n: u32) -> String {
    format!("{}-{:03}", kind.prefix(), n)
}

/// Parse a qualified or unqualified child id.
pub fn parse_child(id: &str) -> Option<ParsedChildId> {
    let caps = CHILD_PATTERN.captures(id)?;
    let parent = caps.get(1).map(|m| m.as_str().to_string());
    if let Some(parent) = &parent {
        parse(parent)?;
    }
    Some(ParsedChildId {
        parent,
        kind: SubItemKind::from_prefix(&caps[2])?,
        number: caps[3].parse().ok()?,
    })
}

/// Next free child number of `kind` among `existing_ids`, or `None` once
/// `u32::MAX` is in use.
pub fn next_child_number<'a>(
    existing_ids: impl IntoIterator<Item = &'a str>,
    kind: SubItemKind,
) -> Option<u32> {
    existing_ids
        .into_iter()
        .filter_map(parse_child)
        .filter(|c| c.kind == kind)
        .map(|c| c.number)
        .max()
        .map_or(Some(1), |n| n.checked_add(1))
}

/// A new id of `kind` numbered `n`, qualified the same way as `sibling_id`.
pub fn sibling_child_id(sibling_id: &str, kind: SubItemKind, n: u32) -> Result<String, IdError> {
    match sibling_id.rsplit_once('/') {
        Some((parent, _)) => child_id(parent, kind, n),
        None => Ok(local_child_id(kind, n)),
    }
}
