//! CRUD over persisted entities.
//!
//! The store owns identity: it assigns numbers and slugs, derives ids, stamps
//! timestamps and renumbers requirement criteria so their ids always carry the
//! parent's real id. Every write goes through the schema check first.
//!
//! Mutating calls on one `EntityStore` are serialized by an internal lock, so
//! load, merge and write of an update cannot interleave with another update
//! through the same store. Writers in other processes are not coordinated.

mod allocation;
mod error;
mod query;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};

pub use error::{Result, StoreError};
pub use query::{ListOptions, SortDirection, SortSpec};

use allocation::Allocation;

use crate::db::{Persistence, PersistenceError};
use crate::ids;
use crate::models::{Entity, EntityType, SubItemKind};
use crate::schema::{self, SchemaCheck, TypedSchema};
use crate::supersession;

/// Fields an update can never change.
const PRESERVED_FIELDS: [&str; 6] = ["id", "type", "number", "slug", "created_at", "updated_at"];

pub struct EntityStore {
    persistence: Arc<dyn Persistence>,
    schema: Arc<dyn SchemaCheck>,
    write_lock: Mutex<()>,
}

impl EntityStore {
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self::with_schema(persistence, Arc::new(TypedSchema))
    }

    pub fn with_schema(persistence: Arc<dyn Persistence>, schema: Arc<dyn SchemaCheck>) -> Self {
        Self {
            persistence,
            schema,
            write_lock: Mutex::new(()),
        }
    }

    pub fn schema(&self) -> Arc<dyn SchemaCheck> {
        Arc::clone(&self.schema)
    }

    // ============================================================
    // Reads
    // ============================================================

    pub fn get(&self, entity_type: EntityType, id: &str) -> Result<Option<Entity>> {
        if !ids::is_valid_for_type(entity_type, id) {
            return Err(StoreError::invalid_id(entity_type, id));
        }
        let Some(document) = self.persistence.read_entity(entity_type, id)? else {
            return Ok(None);
        };
        self.decode(entity_type, id, document).map(Some)
    }

    /// [`get`](Self::get) with the type taken from the id's prefix.
    pub fn get_by_id(&self, id: &str) -> Result<Option<Entity>> {
        let parsed = ids::parse(id).ok_or_else(|| {
            StoreError::ValidationFailed(vec![format!("id: unrecognised entity id {id}")])
        })?;
        self.get(parsed.entity_type, id)
    }

    pub fn exists(&self, entity_type: EntityType, id: &str) -> Result<bool> {
        Ok(self.persistence.entity_exists(entity_type, id)?)
    }

    pub fn list(&self, entity_type: EntityType, options: &ListOptions) -> Result<Vec<Entity>> {
        let known_ids = self.persistence.list_ids(entity_type)?;
        let mut rows = Vec::with_capacity(known_ids.len());

        for id in &known_ids {
            let Some(document) = self.persistence.read_entity(entity_type, id)? else {
                continue;
            };
            let entity = self.decode(entity_type, id, document.clone())?;
            let mut view = document;
            view["id"] = Value::from(id.as_str());
            if options.matches(&view) {
                rows.push((view, entity));
            }
        }

        rows.sort_by(|(a, _), (b, _)| options.compare(a, b));
        let entities = rows.into_iter().map(|(_, entity)| entity).collect();

        tracing::debug!(%entity_type, total = known_ids.len(), "Listed entities");
        Ok(options.paginate(entities))
    }

    pub fn list_all(&self, types: &[EntityType]) -> Result<Vec<Entity>> {
        let mut all = Vec::new();
        for entity_type in types {
            all.extend(self.list(*entity_type, &ListOptions::default())?);
        }
        Ok(all)
    }

    pub fn find_by_slug(&self, entity_type: EntityType, slug: &str) -> Result<Option<Entity>> {
        let known_ids = self.persistence.list_ids(entity_type)?;
        let found = known_ids
            .iter()
            .find(|id| ids::parse(id).is_some_and(|p| p.slug == slug));
        match found {
            Some(id) => self.get(entity_type, id),
            None => Ok(None),
        }
    }

    // ============================================================
    // Writes
    // ============================================================

    pub fn create(&self, entity_type: EntityType, draft: Value) -> Result<Entity> {
        let _guard = self.lock();
        let mut allocation = Allocation::load(&*self.persistence, entity_type)?;
        let (id, entity) = self.prepare_create(entity_type, draft, &mut allocation)?;

        if self.persistence.entity_exists(entity_type, &id)? {
            return Err(StoreError::AlreadyExists { entity_type, id });
        }

        self.persistence
            .write_entity(entity_type, &id, &Value::Object(document(&entity)?))?;
        tracing::info!(%entity_type, %id, "Created entity");
        Ok(entity)
    }

    /// Shallow-merge `patch` over the stored document. Identity fields and
    /// `created_at` are preserved; `updated_at` is bumped.
    pub fn update(
        &self,
        entity_type: EntityType,
        id: &str,
        patch: Value,
    ) -> Result<Option<Entity>> {
        let _guard = self.lock();
        let Some(existing) = self.get(entity_type, id)? else {
            return Ok(None);
        };

        let entity = self.prepare_update(existing, patch)?;
        self.persistence
            .write_entity(entity_type, id, &Value::Object(document(&entity)?))?;
        tracing::info!(%entity_type, %id, "Updated entity");
        Ok(Some(entity))
    }

    pub fn delete(&self, entity_type: EntityType, id: &str) -> Result<bool> {
        if !ids::is_valid_for_type(entity_type, id) {
            return Err(StoreError::invalid_id(entity_type, id));
        }
        let _guard = self.lock();
        let deleted = self.persistence.delete_entity(entity_type, id)?;
        if deleted {
            tracing::info!(%entity_type, %id, "Deleted entity");
        }
        Ok(deleted)
    }

    /// Create every draft or none. All drafts are prepared and validated
    /// before anything is written.
    pub fn batch_create(&self, entity_type: EntityType, drafts: Vec<Value>) -> Result<Vec<Entity>> {
        let _guard = self.lock();

        let mut allocation = Allocation::load(&*self.persistence, entity_type)?;
        let highest_explicit = drafts
            .iter()
            .filter_map(|d| d.get("number").and_then(Value::as_u64))
            .filter_map(|n| u32::try_from(n).ok())
            .max();
        if let Some(explicit) = highest_explicit {
            allocation.skip_past(explicit);
        }

        let mut prepared = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let (id, entity) = self.prepare_create(entity_type, draft, &mut allocation)?;
            if self.persistence.entity_exists(entity_type, &id)? {
                return Err(StoreError::AlreadyExists { entity_type, id });
            }
            prepared.push((id, entity));
        }

        let documents = prepared
            .iter()
            .map(|(id, entity)| Ok((id.clone(), Value::Object(document(entity)?))))
            .collect::<Result<Vec<_>>>()?;
        self.persistence.write_batch(entity_type, &documents)?;

        tracing::info!(%entity_type, count = prepared.len(), "Created entities in batch");
        Ok(prepared.into_iter().map(|(_, entity)| entity).collect())
    }

    /// Apply every `(id, patch)` or none. A missing id fails the batch.
    pub fn batch_update(
        &self,
        entity_type: EntityType,
        updates: Vec<(String, Value)>,
    ) -> Result<Vec<Entity>> {
        let _guard = self.lock();

        let mut seen = HashSet::new();
        let mut prepared = Vec::with_capacity(updates.len());
        for (id, patch) in updates {
            if !seen.insert(id.clone()) {
                return Err(StoreError::ValidationFailed(vec![format!(
                    "{id}: appears more than once in batch"
                )]));
            }
            let existing = self.get(entity_type, &id)?.ok_or_else(|| {
                StoreError::ValidationFailed(vec![format!("{id}: entity not found")])
            })?;
            prepared.push((id, self.prepare_update(existing, patch)?));
        }

        let documents = prepared
            .iter()
            .map(|(id, entity)| Ok((id.clone(), Value::Object(document(entity)?))))
            .collect::<Result<Vec<_>>>()?;
        self.persistence.write_batch(entity_type, &documents)?;

        tracing::info!(%entity_type, count = prepared.len(), "Updated entities in batch");
        Ok(prepared.into_iter().map(|(_, entity)| entity).collect())
    }

    /// Supersede one sub-item of an entity and persist the result.
    ///
    /// Returns the new sub-item, or `None` if the entity does not exist.
    pub fn supersede_sub_item(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        kind: SubItemKind,
        old_id: &str,
        new_data: Value,
    ) -> Result<Option<Value>> {
        let _guard = self.lock();
        let Some(mut entity) = self.get(entity_type, entity_id)? else {
            return Ok(None);
        };

        let new_item = match (&mut entity, kind) {
            (Entity::Requirement(r), SubItemKind::Criterion) => {
                encode(&supersession::supersede(&mut r.criteria, old_id, new_data)?)?
            }
            (Entity::Plan(p), SubItemKind::Task) => {
                encode(&supersession::supersede(&mut p.tasks, old_id, new_data)?)?
            }
            (Entity::Plan(p), SubItemKind::TestCase) => {
                encode(&supersession::supersede(&mut p.test_cases, old_id, new_data)?)?
            }
            (Entity::Plan(p), SubItemKind::ApiContract) => {
                encode(&supersession::supersede(&mut p.api_contracts, old_id, new_data)?)?
            }
            (Entity::Plan(p), SubItemKind::DataModel) => {
                encode(&supersession::supersede(&mut p.data_models, old_id, new_data)?)?
            }
            _ => return Err(StoreError::UnsupportedSubItem { entity_type, kind }),
        };

        entity.meta_mut().updated_at = Utc::now();
        let entity = self.check(entity_type, Value::Object(document(&entity)?))?;
        self.persistence
            .write_entity(entity_type, entity_id, &Value::Object(document(&entity)?))?;

        tracing::info!(
            %entity_type,
            id = entity_id,
            %kind,
            old = old_id,
            new = new_item.get("id").and_then(serde_json::Value::as_str).unwrap_or_default(),
            "Superseded sub-item"
        );
        Ok(Some(new_item))
    }

    // ============================================================
    // Helpers
    // ============================================================

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().expect("store write lock poisoned")
    }

    fn prepare_create(
        &self,
        entity_type: EntityType,
        draft: Value,
        allocation: &mut Allocation<'_>,
    ) -> Result<(String, Entity)> {
        let mut doc = into_object(draft)?;
        doc.remove("id");
        doc.insert("type".into(), Value::from(entity_type.as_str()));

        let explicit = match doc.get("number") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                value
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .filter(|&n| n > 0)
                    .ok_or_else(|| {
                        StoreError::ValidationFailed(vec![
                            "number: must be a positive integer".into(),
                        ])
                    })?,
            ),
        };
        let number = allocation.number(explicit)?;
        doc.insert("number".into(), Value::from(number));

        let slug = match doc.get("slug").and_then(Value::as_str) {
            Some(slug) => slug.to_string(),
            None => {
                let name = doc.get("name").and_then(Value::as_str).unwrap_or_default();
                let slug = allocation.slug_for(name);
                doc.insert("slug".into(), Value::from(slug.clone()));
                slug
            }
        };

        let id = ids::generate(entity_type, number, &slug);
        let now = Value::from(Utc::now().to_rfc3339());
        doc.insert("created_at".into(), now.clone());
        doc.insert("updated_at".into(), now);

        if entity_type == EntityType::Requirement {
            renumber_criteria(&id, &mut doc);
        }
        fill_child_ids(entity_type, &id, &mut doc);

        let entity = self.check(entity_type, Value::Object(doc))?;
        allocation.claim(number, slug, id.clone());
        Ok((id, entity))
    }

    fn prepare_update(&self, existing: Entity, patch: Value) -> Result<Entity> {
        let entity_type = existing.entity_type();
        let id = existing.id();
        let mut doc = document(&existing)?;

        for (key, value) in into_object(patch)? {
            if !PRESERVED_FIELDS.contains(&key.as_str()) {
                doc.insert(key, value);
            }
        }
        doc.insert("updated_at".into(), Value::from(Utc::now().to_rfc3339()));
        fill_child_ids(entity_type, &id, &mut doc);

        self.check(entity_type, Value::Object(doc))
    }

    fn check(&self, entity_type: EntityType, document: Value) -> Result<Entity> {
        self.schema.parse(entity_type, document).map_err(|errors| {
            let errors = schema::flatten_errors(&errors);
            tracing::warn!(%entity_type, ?errors, "Rejected invalid document");
            StoreError::ValidationFailed(errors)
        })
    }

    fn decode(&self, entity_type: EntityType, id: &str, document: Value) -> Result<Entity> {
        let corrupt = |message: String| StoreError::Parse {
            entity_type,
            id: id.to_string(),
            message,
        };
        let entity: Entity = serde_json::from_value(document).map_err(|e| corrupt(e.to_string()))?;
        if entity.entity_type() != entity_type || entity.id() != id {
            return Err(corrupt(format!(
                "document describes {} {}",
                entity.entity_type(),
                entity.id()
            )));
        }
        Ok(entity)
    }
}

fn into_object(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::ValidationFailed(vec![
            "$: document must be a JSON object".into(),
        ])),
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| StoreError::Persistence(PersistenceError::Encode(e)))
}

fn document(entity: &Entity) -> Result<Map<String, Value>> {
    match encode(entity)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::ValidationFailed(vec![format!(
            "$: entity encoded as {other} instead of an object"
        )])),
    }
}

/// Sub-item collections each entity type owns.
fn child_kinds(entity_type: EntityType) -> &'static [SubItemKind] {
    match entity_type {
        EntityType::Requirement => &[SubItemKind::Criterion],
        EntityType::Plan => &[
            SubItemKind::Task,
            SubItemKind::TestCase,
            SubItemKind::ApiContract,
            SubItemKind::DataModel,
        ],
        EntityType::App
        | EntityType::Service
        | EntityType::Library
        | EntityType::Constitution
        | EntityType::Decision => &[],
    }
}

/// Rewrite every criterion id to `{id}/crit-NNN` in list order, so drafts
/// written against a placeholder id end up under the id actually assigned.
fn renumber_criteria(id: &str, doc: &mut Map<String, Value>) {
    let Some(Value::Array(criteria)) = doc.get_mut("criteria") else {
        return;
    };
    for (n, criterion) in (1u32..).zip(criteria.iter_mut()) {
        let Value::Object(fields) = criterion else {
            continue;
        };
        if let Ok(child) = ids::child_id(id, SubItemKind::Criterion, n) {
            fields.insert("id".into(), Value::from(child));
        }
    }
}

/// Give sub-items that arrive without an id the next free one.
fn fill_child_ids(entity_type: EntityType, id: &str, doc: &mut Map<String, Value>) {
    for &kind in child_kinds(entity_type) {
        let Some(Value::Array(items)) = doc.get_mut(kind.collection_field()) else {
            continue;
        };
        let mut next = ids::next_child_number(
            items
                .iter()
                .filter_map(|item| item.get("id").and_then(Value::as_str)),
            kind,
        );

        for item in items.iter_mut() {
            let Value::Object(fields) = item else {
                continue;
            };
            let has_id = fields
                .get("id")
                .and_then(Value::as_str)
                .is_some_and(|s| !s.is_empty());
            if has_id {
                continue;
            }
            // Items left without an id fail the schema check.
            let Some(n) = next else {
                break;
            };
            let child = match kind {
                SubItemKind::Criterion => ids::child_id(id, kind, n).ok(),
                _ => Some(ids::local_child_id(kind, n)),
            };
            if let Some(child) = child {
                fields.insert("id".into(), Value::from(child));
                next = n.checked_add(1);
            }
        }
    }
}
