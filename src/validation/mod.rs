//! Validation engine.
//!
//! Validators are pluggable per-entity checks ([`EntityValidator`]). On top of
//! them the engine runs corpus-wide passes: reference integrity and business
//! rules. No pass ever fails as a call; every problem, including a validator
//! that errored, ends up as a message in a [`ValidationResult`].

mod context;
mod result;
pub mod rules;
mod validators;

use std::sync::Arc;

use tokio::task::JoinSet;

pub use context::{Corpus, ValidationContext};
pub use result::ValidationResult;
pub use rules::DEFAULT_MIN_COMPONENT_DESCRIPTION_LEN;
pub use validators::{EntityValidator, ReferenceValidator, SchemaValidator, SubItemValidator};

use crate::models::Entity;
use crate::store::EntityStore;

pub struct ValidationEngine {
    store: Arc<EntityStore>,
    validators: Vec<Arc<dyn EntityValidator>>,
    min_component_description_len: usize,
}

impl ValidationEngine {
    /// An engine with no validators registered. Entity checks fall back to
    /// reference validation until something is registered.
    pub fn new(store: Arc<EntityStore>) -> Self {
        Self {
            store,
            validators: Vec::new(),
            min_component_description_len: DEFAULT_MIN_COMPONENT_DESCRIPTION_LEN,
        }
    }

    pub fn with_default_validators(store: Arc<EntityStore>) -> Self {
        let schema = store.schema();
        let mut engine = Self::new(store);
        engine.register(Arc::new(SchemaValidator::new(schema)));
        engine.register(Arc::new(ReferenceValidator));
        engine.register(Arc::new(SubItemValidator));
        engine
    }

    pub fn with_min_component_description_len(mut self, len: usize) -> Self {
        self.min_component_description_len = len;
        self
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    /// Add a validator, replacing any already registered under the same name.
    pub fn register(&mut self, validator: Arc<dyn EntityValidator>) {
        match self
            .validators
            .iter_mut()
            .find(|v| v.name() == validator.name())
        {
            Some(slot) => *slot = validator,
            None => self.validators.push(validator),
        }
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.validators.len();
        self.validators.retain(|v| v.name() != name);
        self.validators.len() != before
    }

    pub fn validator_names(&self) -> Vec<&str> {
        self.validators.iter().map(|v| v.name()).collect()
    }

    /// Run every applicable validator against one entity.
    pub fn validate_entity(&self, entity: &Entity) -> ValidationResult {
        let ctx = ValidationContext::new(&self.store);
        self.validate_entity_with(entity, &ctx)
    }

    fn validate_entity_with(
        &self,
        entity: &Entity,
        ctx: &ValidationContext<'_>,
    ) -> ValidationResult {
        if self.validators.is_empty() {
            return run_validator(&ReferenceValidator, entity, ctx);
        }

        ValidationResult::union(
            self.validators
                .iter()
                .filter(|v| v.supports(entity))
                .map(|v| run_validator(v.as_ref(), entity, ctx)),
        )
    }

    /// Validate every persisted entity, one blocking task per entity.
    ///
    /// Messages come back in list order regardless of which task finishes
    /// first.
    pub async fn validate_all(self: &Arc<Self>) -> ValidationResult {
        let corpus = match self.load_corpus().await {
            Ok(corpus) => Arc::new(corpus),
            Err(message) => return ValidationResult::failed(message),
        };

        let mut tasks = JoinSet::new();
        for (index, entity) in corpus.entities().iter().cloned().enumerate() {
            let engine = Arc::clone(self);
            let corpus = Arc::clone(&corpus);
            tasks.spawn_blocking(move || {
                let ctx = ValidationContext::with_corpus(&engine.store, corpus);
                (index, engine.validate_entity_with(&entity, &ctx))
            });
        }

        let mut outcomes = Vec::with_capacity(corpus.entities().len());
        let mut failures = ValidationResult::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => failures.error(format!("validation task failed: {e}")),
            }
        }
        outcomes.sort_by_key(|(index, _)| *index);

        let mut result = ValidationResult::union(outcomes.into_iter().map(|(_, r)| r));
        result.merge(failures);

        tracing::debug!(
            entities = corpus.entities().len(),
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "Validated all entities"
        );
        result
    }

    /// Check every reference across the whole corpus.
    pub fn validate_references(&self) -> ValidationResult {
        let corpus = match Corpus::load(&self.store) {
            Ok(corpus) => corpus,
            Err(e) => return ValidationResult::failed(format!("failed to load entities: {e}")),
        };

        let mut result = ValidationResult::new();
        for entity in corpus.entities() {
            rules::check_references(entity, &corpus, &mut result);
        }
        result
    }

    pub fn validate_business_rules(&self) -> ValidationResult {
        match Corpus::load(&self.store) {
            Ok(corpus) => rules::check_business_rules(&corpus, self.min_component_description_len),
            Err(e) => ValidationResult::failed(format!("failed to load entities: {e}")),
        }
    }

    /// Entity validation, reference checks and business rules run together
    /// and unioned into one report.
    pub async fn run_full_validation(self: &Arc<Self>) -> ValidationResult {
        let references = {
            let engine = Arc::clone(self);
            tokio::task::spawn_blocking(move || engine.validate_references())
        };
        let business_rules = {
            let engine = Arc::clone(self);
            tokio::task::spawn_blocking(move || engine.validate_business_rules())
        };

        let (entities, references, business_rules) =
            tokio::join!(self.validate_all(), references, business_rules);

        let mut result = entities;
        for joined in [references, business_rules] {
            match joined {
                Ok(r) => result.merge(r),
                Err(e) => result.error(format!("validation task failed: {e}")),
            }
        }

        tracing::info!(
            valid = result.valid,
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "Full validation complete"
        );
        result
    }

    async fn load_corpus(self: &Arc<Self>) -> Result<Corpus, String> {
        let engine = Arc::clone(self);
        match tokio::task::spawn_blocking(move || Corpus::load(&engine.store)).await {
            Ok(Ok(corpus)) => Ok(corpus),
            Ok(Err(e)) => Err(format!("failed to load entities: {e}")),
            Err(e) => Err(format!("validation task failed: {e}")),
        }
    }
}

fn run_validator(
    validator: &dyn EntityValidator,
    entity: &Entity,
    ctx: &ValidationContext<'_>,
) -> ValidationResult {
    match validator.validate(entity, ctx) {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(
                validator = validator.name(),
                id = %entity.id(),
                error = %e,
                "Validator failed"
            );
            ValidationResult::failed(format!(
                "{}: validator '{}' failed: {e:#}",
                entity.id(),
                validator.name()
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    struct Named(&'static str);

    impl EntityValidator for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn supports(&self, _entity: &Entity) -> bool {
            true
        }

        fn validate(
            &self,
            _entity: &Entity,
            _ctx: &ValidationContext<'_>,
        ) -> anyhow::Result<ValidationResult> {
            Ok(ValidationResult::new())
        }
    }

    fn engine() -> ValidationEngine {
        let db = Database::open_memory().expect("open memory db");
        ValidationEngine::new(Arc::new(EntityStore::new(Arc::new(db))))
    }

    #[test]
    fn register_replaces_same_name_in_place() {
        let mut engine = engine();
        engine.register(Arc::new(Named("a")));
        engine.register(Arc::new(Named("b")));
        engine.register(Arc::new(Named("a")));
        assert_eq!(engine.validator_names(), vec!["a", "b"]);
    }

    #[test]
    fn unregister_reports_whether_removed() {
        let mut engine = engine();
        engine.register(Arc::new(Named("a")));
        assert!(engine.unregister("a"));
        assert!(!engine.unregister("a"));
        assert!(engine.validator_names().is_empty());
    }

    #[test]
    fn merge_deduplicates_and_tracks_validity() {
        let mut a = ValidationResult::failed("x");
        a.warn("w");
        let mut b = ValidationResult::new();
        b.error("x");
        b.error("y");
        b.warn("w");
        a.merge(b);
        assert_eq!(a.errors, vec!["x", "y"]);
        assert_eq!(a.warnings, vec!["w"]);
        assert!(!a.valid);
        assert!(ValidationResult::union(Vec::new()).valid);
    }
}
