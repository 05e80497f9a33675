//! Number and slug reservation for new entities of one type.

use std::collections::HashMap;

use crate::db::Persistence;
use crate::ids;
use crate::models::EntityType;
use crate::slug;

use super::{Result, StoreError};

/// What is already taken for one entity type: stored numbers and slugs plus
/// those claimed by earlier drafts of the same batch.
pub(super) struct Allocation<'a> {
    persistence: &'a dyn Persistence,
    entity_type: EntityType,
    next: Option<u32>,
    /// Highest stored number. Explicit numbers must exceed it.
    highest: u32,
    claimed: HashMap<u32, String>,
    slugs: Vec<String>,
}

impl<'a> Allocation<'a> {
    pub(super) fn load(persistence: &'a dyn Persistence, entity_type: EntityType) -> Result<Self> {
        let next = persistence.next_number(entity_type)?;
        let slugs = persistence
            .list_ids(entity_type)?
            .iter()
            .filter_map(|id| ids::parse(id))
            .map(|parsed| parsed.slug)
            .collect();

        Ok(Self {
            persistence,
            entity_type,
            next,
            highest: next.map_or(u32::MAX, |n| n - 1),
            claimed: HashMap::new(),
            slugs,
        })
    }

    /// Start automatic numbering above `explicit`.
    pub(super) fn skip_past(&mut self, explicit: u32) {
        self.next = self
            .next
            .and_then(|next| Some(next.max(explicit.checked_add(1)?)));
    }

    /// The draft's own number after checking it is free, or the next one.
    pub(super) fn number(&mut self, explicit: Option<u32>) -> Result<u32> {
        let Some(number) = explicit else {
            let number = self.next.ok_or_else(|| {
                StoreError::ValidationFailed(vec![format!(
                    "number: no {} numbers left",
                    self.entity_type
                )])
            })?;
            self.next = number.checked_add(1);
            return Ok(number);
        };

        let owner = match self.claimed.get(&number) {
            Some(id) => Some(id.clone()),
            None => self.persistence.number_owner(self.entity_type, number)?,
        };
        if let Some(id) = owner {
            return Err(StoreError::AlreadyExists {
                entity_type: self.entity_type,
                id,
            });
        }
        if number <= self.highest {
            return Err(StoreError::ValidationFailed(vec![format!(
                "number: must be greater than {}, the highest {} number in use",
                self.highest, self.entity_type
            )]));
        }
        Ok(number)
    }

    /// A slug derived from `name` that no other entity of the type uses.
    pub(super) fn slug_for(&self, name: &str) -> String {
        slug::unique_slug(&slug::slugify(name), &self.slugs)
    }

    pub(super) fn claim(&mut self, number: u32, slug: String, id: String) {
        self.claimed.insert(number, id);
        self.slugs.push(slug);
    }
}
