use std::sync::Arc;
use std::thread;

use serde_json::{json, Value};
use specgraph::db::Database;
use specgraph::models::*;
use specgraph::store::{EntityStore, ListOptions, SortDirection, StoreError};
use speculate2::speculate;

fn memory_store() -> EntityStore {
    let db = Database::open_memory().expect("Failed to create in-memory database");
    db.migrate().expect("Failed to run migrations");
    EntityStore::new(Arc::new(db))
}

fn requirement(store: &EntityStore, name: &str, priority: &str) -> Entity {
    store
        .create(EntityType::Requirement, json!({
            "name": name,
            "priority": priority,
            "criteria": [{ "description": format!("{name} works") }],
        }))
        .expect("Failed to create requirement")
}

fn names(entities: &[Entity]) -> Vec<&str> {
    entities.iter().map(|e| e.meta().name.as_str()).collect()
}

speculate! {
    before {
        let store = memory_store();
    }

    describe "create" {
        it "assigns number, slug and id" {
            let entity = requirement(&store, "User Auth", "critical");
            assert_eq!(entity.id(), "req-001-user-auth");
            assert_eq!(entity.meta().number, 1);
            assert_eq!(entity.meta().slug, "user-auth");
            assert_eq!(entity.meta().created_at, entity.meta().updated_at);
        }

        it "numbers each type independently" {
            requirement(&store, "Auth", "high");
            let second = requirement(&store, "Billing", "high");
            let plan = store
                .create(EntityType::Plan, json!({ "name": "Login" }))
                .expect("Failed to create plan");

            assert_eq!(second.id(), "req-002-billing");
            assert_eq!(plan.id(), "pln-001-login");
        }

        it "derives a slug no other entity of the type uses" {
            requirement(&store, "Auth", "high");
            let second = requirement(&store, "Auth", "high");
            let third = requirement(&store, "Auth", "high");
            let plan = store
                .create(EntityType::Plan, json!({ "name": "Auth" }))
                .expect("Failed to create plan");

            assert_eq!(second.id(), "req-002-auth-1");
            assert_eq!(second.meta().slug, "auth-1");
            assert_eq!(third.id(), "req-003-auth-2");
            assert_eq!(plan.id(), "pln-001-auth");

            let found = store
                .find_by_slug(EntityType::Requirement, "auth-1")
                .expect("Query failed")
                .expect("missing");
            assert_eq!(found.id(), "req-002-auth-1");
        }

        it "qualifies criteria ids with the assigned requirement id" {
            let entity = store
                .create(EntityType::Requirement, json!({
                    "name": "Auth",
                    "criteria": [
                        { "id": "draft/crit-009", "description": "Users can log in" },
                        { "description": "Users can log out" },
                    ],
                }))
                .expect("Failed to create");

            let Entity::Requirement(req) = entity else { panic!("expected requirement") };
            let ids: Vec<&str> = req.criteria.iter().map(|c| c.id.as_str()).collect();
            assert_eq!(ids, vec!["req-001-auth/crit-001", "req-001-auth/crit-002"]);
        }

        it "gives plan sub-items local ids" {
            let entity = store
                .create(EntityType::Plan, json!({
                    "name": "Login",
                    "tasks": [
                        { "description": "Build form" },
                        { "id": "task-005", "description": "Wire API" },
                        { "description": "Style form" },
                    ],
                    "test_cases": [{ "name": "happy path" }],
                }))
                .expect("Failed to create");

            let Entity::Plan(plan) = entity else { panic!("expected plan") };
            let ids: Vec<&str> = plan.tasks.iter().map(|t| t.id.as_str()).collect();
            assert_eq!(ids, vec!["task-006", "task-005", "task-007"]);
            assert_eq!(plan.test_cases[0].id, "tc-001");
        }

        it "rejects an explicit number that is taken" {
            requirement(&store, "Auth", "high");
            let err = store
                .create(EntityType::Requirement, json!({ "name": "Auth", "number": 1 }))
                .unwrap_err();
            assert!(matches!(err, StoreError::AlreadyExists { ref id, .. } if id == "req-001-auth"));
            assert!(!err.is_fatal());
        }

        it "rejects an explicit number held under another slug" {
            requirement(&store, "Auth", "high");
            let err = store
                .create(EntityType::Requirement, json!({ "name": "Login", "number": 1 }))
                .unwrap_err();

            assert!(matches!(err, StoreError::AlreadyExists { ref id, .. } if id == "req-001-auth"));
            assert!(!store.exists(EntityType::Requirement, "req-001-login").expect("Query failed"));
            let all = store.list(EntityType::Requirement, &ListOptions::default()).expect("Query failed");
            assert_eq!(names(&all), vec!["Auth"]);
        }

        it "rejects an explicit number below the highest in use" {
            store
                .create(EntityType::Library, json!({ "name": "Core", "number": 5 }))
                .expect("Failed to create");
            let err = store
                .create(EntityType::Library, json!({ "name": "Utils", "number": 3 }))
                .unwrap_err();

            let StoreError::ValidationFailed(errors) = err else { panic!("expected validation failure") };
            assert_eq!(errors, vec!["number: must be greater than 5, the highest library number in use"]);

            let next = store
                .create(EntityType::Library, json!({ "name": "Utils" }))
                .expect("Failed to create");
            assert_eq!(next.id(), "lib-006-utils");
        }

        it "runs out of numbers without wrapping" {
            let last = store
                .create(EntityType::Library, json!({ "name": "Max", "number": 4294967295u32 }))
                .expect("Failed to create");
            assert_eq!(last.id(), "lib-4294967295-max");

            let err = store
                .create(EntityType::Library, json!({ "name": "Next" }))
                .unwrap_err();
            let StoreError::ValidationFailed(errors) = err else { panic!("expected validation failure") };
            assert_eq!(errors, vec!["number: no library numbers left"]);

            let err = store
                .batch_create(EntityType::Library, vec![json!({ "name": "Next" })])
                .unwrap_err();
            assert!(matches!(err, StoreError::ValidationFailed(_)));
            let all = store.list(EntityType::Library, &ListOptions::default()).expect("Query failed");
            assert_eq!(names(&all), vec!["Max"]);
        }

        it "reports every schema failure" {
            let err = store
                .create(EntityType::Requirement, json!({ "name": "  " }))
                .unwrap_err();
            let StoreError::ValidationFailed(errors) = err else { panic!("expected validation failure") };
            assert!(errors.iter().any(|e| e.starts_with("slug:")));
            assert!(errors.contains(&"name: must not be empty".to_string()));
        }

        it "rejects a plan pointing at an unqualified criterion" {
            let err = store
                .create(EntityType::Plan, json!({ "name": "Login", "criteria_id": "crit-001" }))
                .unwrap_err();
            let StoreError::ValidationFailed(errors) = err else { panic!("expected validation failure") };
            assert!(errors[0].starts_with("criteria_id:"));
        }

        it "rejects documents that are not objects" {
            let err = store.create(EntityType::App, json!(["nope"])).unwrap_err();
            assert!(matches!(err, StoreError::ValidationFailed(_)));
        }
    }

    describe "get" {
        it "returns None for an id nobody created" {
            assert!(store.get(EntityType::Requirement, "req-099-none").expect("Query failed").is_none());
        }

        it "rejects a malformed id" {
            let err = store.get(EntityType::Requirement, "auth").unwrap_err();
            assert!(matches!(err, StoreError::InvalidIdFormat { .. }));
        }

        it "rejects an id of another type" {
            let err = store.get(EntityType::Plan, "req-001-auth").unwrap_err();
            assert!(matches!(err, StoreError::InvalidIdFormat { .. }));
        }

        it "round-trips what was created" {
            let created = requirement(&store, "Auth", "high");
            let found = store.get(EntityType::Requirement, "req-001-auth").expect("Query failed");
            assert_eq!(found, Some(created.clone()));
            assert_eq!(store.get_by_id("req-001-auth").expect("Query failed"), Some(created));
        }

        it "finds by slug" {
            requirement(&store, "Auth", "high");
            requirement(&store, "Billing", "low");
            let found = store
                .find_by_slug(EntityType::Requirement, "billing")
                .expect("Query failed")
                .expect("missing");
            assert_eq!(found.id(), "req-002-billing");
            assert!(store.find_by_slug(EntityType::Requirement, "none").expect("Query failed").is_none());
        }
    }

    describe "list" {
        before {
            requirement(&store, "Charlie", "low");
            requirement(&store, "Alpha", "critical");
            requirement(&store, "Bravo", "critical");
        }

        it "orders by number by default" {
            let all = store.list(EntityType::Requirement, &ListOptions::default()).expect("Query failed");
            assert_eq!(names(&all), vec!["Charlie", "Alpha", "Bravo"]);
        }

        it "filters by field value" {
            let options = ListOptions::default().filter("priority", json!("critical"));
            let critical = store.list(EntityType::Requirement, &options).expect("Query failed");
            assert_eq!(names(&critical), vec!["Alpha", "Bravo"]);
        }

        it "accepts any of several values for one field" {
            let options = ListOptions::default()
                .filter("priority", json!("low"))
                .filter("priority", json!("high"));
            let matched = store.list(EntityType::Requirement, &options).expect("Query failed");
            assert_eq!(names(&matched), vec!["Charlie"]);
        }

        it "can filter on the derived id" {
            let options = ListOptions::default().filter("id", json!("req-002-alpha"));
            let matched = store.list(EntityType::Requirement, &options).expect("Query failed");
            assert_eq!(names(&matched), vec!["Alpha"]);
        }

        it "sorts then paginates" {
            let options = ListOptions::default()
                .sort_by("name", SortDirection::Desc)
                .page(1, 1);
            let page = store.list(EntityType::Requirement, &options).expect("Query failed");
            assert_eq!(names(&page), vec!["Bravo"]);
        }

        it "matches array fields by containment" {
            store.create(EntityType::Service, json!({
                "name": "Gateway",
                "description": "Routes every inbound request",
                "tech_stack": ["rust", "tokio"],
            })).expect("Failed to create");
            store.create(EntityType::Service, json!({
                "name": "Reports",
                "description": "Builds monthly usage reports",
                "tech_stack": ["python"],
            })).expect("Failed to create");

            let options = ListOptions::default().filter("tech_stack", json!("tokio"));
            let services = store.list(EntityType::Service, &options).expect("Query failed");
            assert_eq!(names(&services), vec!["Gateway"]);
        }

        it "gathers several types" {
            store.create(EntityType::Plan, json!({ "name": "Login" })).expect("Failed to create");
            let all = store
                .list_all(&[EntityType::Plan, EntityType::Requirement])
                .expect("Query failed");
            assert_eq!(names(&all), vec!["Login", "Charlie", "Alpha", "Bravo"]);
        }
    }

    describe "update" {
        it "merges the patch and keeps identity fields" {
            let created = requirement(&store, "Auth", "high");
            let updated = store
                .update(EntityType::Requirement, "req-001-auth", json!({
                    "description": "Sign-in for every user",
                    "number": 9,
                    "slug": "renamed",
                    "created_at": "2000-01-01T00:00:00Z",
                }))
                .expect("Update failed")
                .expect("missing");

            assert_eq!(updated.id(), "req-001-auth");
            assert_eq!(updated.meta().description, "Sign-in for every user");
            assert_eq!(updated.meta().created_at, created.meta().created_at);
            assert!(updated.meta().updated_at >= created.meta().updated_at);

            let stored = store.get(EntityType::Requirement, "req-001-auth").expect("Query failed");
            assert_eq!(stored, Some(updated));
        }

        it "returns None for a missing entity" {
            let result = store
                .update(EntityType::Requirement, "req-001-auth", json!({ "description": "x" }))
                .expect("Update failed");
            assert!(result.is_none());
        }

        it "keeps every patch when threads update the same entity" {
            let store = Arc::new(memory_store());
            requirement(&store, "Auth", "high");
            let patches = [
                json!({ "name": "Authentication" }),
                json!({ "description": "Sign-in for every user" }),
                json!({ "priority": "low" }),
                json!({ "criteria": [
                    { "id": "req-001-auth/crit-001", "description": "Auth works" },
                    { "description": "Sessions expire" },
                ] }),
            ];

            let workers: Vec<_> = patches
                .into_iter()
                .map(|patch| {
                    let store = Arc::clone(&store);
                    thread::spawn(move || {
                        for _ in 0..25 {
                            store
                                .update(EntityType::Requirement, "req-001-auth", patch.clone())
                                .expect("Update failed")
                                .expect("missing");
                        }
                    })
                })
                .collect();
            for worker in workers {
                worker.join().expect("worker panicked");
            }

            let Some(Entity::Requirement(req)) = store
                .get(EntityType::Requirement, "req-001-auth")
                .expect("Query failed")
            else {
                panic!("expected requirement");
            };
            assert_eq!(req.meta.name, "Authentication");
            assert_eq!(req.meta.description, "Sign-in for every user");
            assert_eq!(req.priority, Priority::Low);
            let ids: Vec<&str> = req.criteria.iter().map(|c| c.id.as_str()).collect();
            assert_eq!(ids, vec!["req-001-auth/crit-001", "req-001-auth/crit-002"]);
        }

        it "refuses a patch that breaks the schema" {
            requirement(&store, "Auth", "high");
            let err = store
                .update(EntityType::Requirement, "req-001-auth", json!({ "name": "" }))
                .unwrap_err();
            assert!(matches!(err, StoreError::ValidationFailed(_)));

            let stored = store.get(EntityType::Requirement, "req-001-auth").expect("Query failed").expect("missing");
            assert_eq!(stored.meta().name, "Auth");
        }
    }

    describe "delete" {
        it "removes the entity once" {
            requirement(&store, "Auth", "high");
            assert!(store.delete(EntityType::Requirement, "req-001-auth").expect("Delete failed"));
            assert!(!store.delete(EntityType::Requirement, "req-001-auth").expect("Delete failed"));
            assert!(!store.exists(EntityType::Requirement, "req-001-auth").expect("Query failed"));
        }
    }

    describe "batch_create" {
        it "numbers drafts in order" {
            let created = store
                .batch_create(EntityType::Library, vec![
                    json!({ "name": "Core" }),
                    json!({ "name": "Utils" }),
                ])
                .expect("Batch failed");
            let ids: Vec<String> = created.iter().map(Entity::id).collect();
            assert_eq!(ids, vec!["lib-001-core", "lib-002-utils"]);
        }

        it "numbers around explicit numbers" {
            let created = store
                .batch_create(EntityType::Library, vec![
                    json!({ "name": "Core", "number": 5 }),
                    json!({ "name": "Utils" }),
                ])
                .expect("Batch failed");
            let ids: Vec<String> = created.iter().map(Entity::id).collect();
            assert_eq!(ids, vec!["lib-005-core", "lib-006-utils"]);
        }

        it "writes nothing when one draft is invalid" {
            let err = store
                .batch_create(EntityType::Library, vec![
                    json!({ "name": "Core" }),
                    json!({ "name": "" }),
                ])
                .unwrap_err();
            assert!(matches!(err, StoreError::ValidationFailed(_)));
            assert!(store.list(EntityType::Library, &ListOptions::default()).expect("Query failed").is_empty());
        }

        it "rejects duplicate ids within the batch" {
            let err = store
                .batch_create(EntityType::Library, vec![
                    json!({ "name": "Core", "number": 1 }),
                    json!({ "name": "Core", "number": 1 }),
                ])
                .unwrap_err();
            assert!(matches!(err, StoreError::AlreadyExists { .. }));
        }

        it "rejects a number claimed twice within the batch" {
            let err = store
                .batch_create(EntityType::Library, vec![
                    json!({ "name": "Core", "number": 2 }),
                    json!({ "name": "Utils", "number": 2 }),
                ])
                .unwrap_err();
            assert!(matches!(err, StoreError::AlreadyExists { ref id, .. } if id == "lib-002-core"));
            assert!(store.list(EntityType::Library, &ListOptions::default()).expect("Query failed").is_empty());
        }

        it "rejects a number already stored under another slug" {
            store.create(EntityType::Library, json!({ "name": "Core" })).expect("Failed to create");
            let err = store
                .batch_create(EntityType::Library, vec![
                    json!({ "name": "Utils", "number": 1 }),
                ])
                .unwrap_err();
            assert!(matches!(err, StoreError::AlreadyExists { ref id, .. } if id == "lib-001-core"));
        }

        it "keeps derived slugs unique across the batch" {
            store.create(EntityType::Library, json!({ "name": "Core" })).expect("Failed to create");
            let created = store
                .batch_create(EntityType::Library, vec![
                    json!({ "name": "Core" }),
                    json!({ "name": "Core" }),
                ])
                .expect("Batch failed");
            let ids: Vec<String> = created.iter().map(Entity::id).collect();
            assert_eq!(ids, vec!["lib-002-core-1", "lib-003-core-2"]);
        }
    }

    describe "batch_update" {
        it "applies every patch" {
            requirement(&store, "Auth", "high");
            requirement(&store, "Billing", "high");
            let updated = store
                .batch_update(EntityType::Requirement, vec![
                    ("req-001-auth".to_string(), json!({ "priority": "low" })),
                    ("req-002-billing".to_string(), json!({ "priority": "critical" })),
                ])
                .expect("Batch failed");
            assert_eq!(updated.len(), 2);

            let options = ListOptions::default().filter("priority", json!("critical"));
            let critical = store.list(EntityType::Requirement, &options).expect("Query failed");
            assert_eq!(names(&critical), vec!["Billing"]);
        }

        it "applies nothing when an id is missing" {
            requirement(&store, "Auth", "high");
            let err = store
                .batch_update(EntityType::Requirement, vec![
                    ("req-001-auth".to_string(), json!({ "priority": "low" })),
                    ("req-002-gone".to_string(), json!({ "priority": "low" })),
                ])
                .unwrap_err();
            let StoreError::ValidationFailed(errors) = err else { panic!("expected validation failure") };
            assert_eq!(errors, vec!["req-002-gone: entity not found"]);

            let options = ListOptions::default().filter("priority", json!("low"));
            assert!(store.list(EntityType::Requirement, &options).expect("Query failed").is_empty());
        }
    }

    describe "plans and criteria" {
        it "links a plan to a qualified criterion" {
            requirement(&store, "Auth", "critical");
            let plan = store
                .create(EntityType::Plan, json!({
                    "name": "Login",
                    "criteria_id": "req-001-auth/crit-001",
                    "acceptance_criteria": "User reaches the dashboard",
                }))
                .expect("Failed to create plan");

            let Entity::Plan(plan) = plan else { panic!("expected plan") };
            assert_eq!(plan.criteria_id.as_deref(), Some("req-001-auth/crit-001"));
        }
    }

    describe "corrupt storage" {
        it "surfaces an unreadable document as a fatal parse error" {
            let dir = tempfile::tempdir().expect("Failed to create temp dir");
            let path = dir.path().join("specs.db");
            let db = Database::open(path.clone()).expect("Failed to open database");
            db.migrate().expect("Failed to run migrations");
            let store = EntityStore::new(Arc::new(db));
            requirement(&store, "Auth", "high");

            let raw = rusqlite::Connection::open(&path).expect("Failed to open raw connection");
            raw.execute("UPDATE entities SET document = 'not json' WHERE id = 'req-001-auth'", [])
                .expect("Failed to corrupt document");

            let err = store.get(EntityType::Requirement, "req-001-auth").unwrap_err();
            assert!(matches!(err, StoreError::Parse { ref id, .. } if id == "req-001-auth"));
            assert!(err.is_fatal());

            let err = store.list(EntityType::Requirement, &ListOptions::default()).unwrap_err();
            assert!(err.is_fatal());
        }

        it "rejects a document that describes another entity" {
            let dir = tempfile::tempdir().expect("Failed to create temp dir");
            let path = dir.path().join("specs.db");
            let db = Database::open(path.clone()).expect("Failed to open database");
            db.migrate().expect("Failed to run migrations");
            let store = EntityStore::new(Arc::new(db));
            let entity = requirement(&store, "Auth", "high");

            let mut document = serde_json::to_value(&entity).expect("encode");
            document["slug"] = Value::from("other");
            let raw = rusqlite::Connection::open(&path).expect("Failed to open raw connection");
            raw.execute(
                "UPDATE entities SET document = ?1 WHERE id = 'req-001-auth'",
                [document.to_string()],
            )
            .expect("Failed to rewrite document");

            let err = store.get(EntityType::Requirement, "req-001-auth").unwrap_err();
            assert!(matches!(err, StoreError::Parse { .. }));
        }
    }
}
