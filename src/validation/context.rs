use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::ids;
use crate::models::{Entity, EntityType};
use crate::store::{self, EntityStore};

/// Every persisted entity, indexed for reference lookups.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    entities: Vec<Entity>,
    ids: HashSet<String>,
    /// Criterion id to the id that superseded it, if any.
    criteria: HashMap<String, Option<String>>,
}

impl Corpus {
    pub fn load(store: &EntityStore) -> store::Result<Self> {
        Ok(Self::from_entities(store.list_all(&EntityType::ALL)?))
    }

    pub fn from_entities(entities: Vec<Entity>) -> Self {
        let ids = entities.iter().map(Entity::id).collect();
        let criteria = entities
            .iter()
            .filter_map(|e| match e {
                Entity::Requirement(r) => Some(&r.criteria),
                _ => None,
            })
            .flatten()
            .map(|c| (c.id.clone(), c.lineage.superseded_by.clone()))
            .collect();
        Self {
            entities,
            ids,
            criteria,
        }
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn of_type(&self, entity_type: EntityType) -> impl Iterator<Item = &Entity> {
        self.entities
            .iter()
            .filter(move |e| e.entity_type() == entity_type)
    }

    pub fn components(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(|e| e.entity_type().is_component())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Whether `id` names an existing entity whose type satisfies `accept`.
    pub fn contains_where(&self, id: &str, accept: impl Fn(EntityType) -> bool) -> bool {
        self.contains(id) && ids::parse(id).is_some_and(|p| accept(p.entity_type))
    }

    /// `None` if no such criterion; `Some(superseded_by)` otherwise.
    pub fn criterion(&self, id: &str) -> Option<Option<&str>> {
        self.criteria.get(id).map(Option::as_deref)
    }
}

/// What a validator can see while checking one entity.
///
/// The corpus is loaded on first use and then shared, so a validator that
/// never looks across entities costs no extra reads.
pub struct ValidationContext<'a> {
    store: &'a EntityStore,
    corpus: OnceCell<Arc<Corpus>>,
}

impl<'a> ValidationContext<'a> {
    pub fn new(store: &'a EntityStore) -> Self {
        Self {
            store,
            corpus: OnceCell::new(),
        }
    }

    pub fn with_corpus(store: &'a EntityStore, corpus: Arc<Corpus>) -> Self {
        Self {
            store,
            corpus: OnceCell::with_value(corpus),
        }
    }

    pub fn store(&self) -> &EntityStore {
        self.store
    }

    pub fn corpus(&self) -> store::Result<&Corpus> {
        self.corpus
            .get_or_try_init(|| Corpus::load(self.store).map(Arc::new))
            .map(Arc::as_ref)
    }
}
