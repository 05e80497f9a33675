//! Persistence for entity documents.
//!
//! [`Persistence`] is the contract the entity store consumes. [`Database`] is
//! the SQLite implementation: one row per entity, the document stored as JSON
//! text next to the columns needed for ordering.

mod error;
mod schema;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;

pub use error::{PersistenceError, Result};

use crate::ids;
use crate::models::EntityType;

/// Storage contract for entity documents, keyed by `(type, id)`.
pub trait Persistence: Send + Sync {
    /// `Ok(None)` when absent; [`PersistenceError::Corrupt`] when the stored
    /// content cannot be decoded.
    fn read_entity(&self, entity_type: EntityType, id: &str) -> Result<Option<Value>>;

    fn write_entity(&self, entity_type: EntityType, id: &str, document: &Value) -> Result<()>;

    /// Write every document or none of them.
    fn write_batch(&self, entity_type: EntityType, documents: &[(String, Value)]) -> Result<()>;

    fn list_ids(&self, entity_type: EntityType) -> Result<Vec<String>>;

    fn delete_entity(&self, entity_type: EntityType, id: &str) -> Result<bool>;

    fn entity_exists(&self, entity_type: EntityType, id: &str) -> Result<bool> {
        Ok(self.read_entity(entity_type, id)?.is_some())
    }

    /// `None` once every number of the type is in use.
    fn next_number(&self, entity_type: EntityType) -> Result<Option<u32>> {
        Ok(ids::next_number(&self.list_ids(entity_type)?, entity_type))
    }

    /// The id already holding `number`, if any.
    fn number_owner(&self, entity_type: EntityType, number: u32) -> Result<Option<String>> {
        Ok(self
            .list_ids(entity_type)?
            .into_iter()
            .find(|id| ids::parse(id).is_some_and(|p| p.number == number)))
    }
}

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_default() -> anyhow::Result<Self> {
        Self::open(default_path()?)
    }

    pub fn open_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        schema::run_migrations(&conn)
    }
}

/// `<data dir>/specgraph.db` for the current user.
pub fn default_path() -> anyhow::Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "specgraph")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
    Ok(dirs.data_dir().join("specgraph.db"))
}

/// Columns mirrored out of the document for ordering and inspection.
struct Columns<'a> {
    number: i64,
    created_at: String,
    updated_at: String,
    document: &'a Value,
}

impl<'a> Columns<'a> {
    fn from_document(document: &'a Value) -> Self {
        let text = |field: &str| {
            document
                .get(field)
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Utc::now().to_rfc3339())
        };
        Self {
            number: document.get("number").and_then(Value::as_i64).unwrap_or(0),
            created_at: text("created_at"),
            updated_at: text("updated_at"),
            document,
        }
    }
}

const UPSERT: &str = "INSERT INTO entities (entity_type, id, number, document, created_at, updated_at)
     VALUES (?, ?, ?, ?, ?, ?)
     ON CONFLICT (entity_type, id) DO UPDATE SET
        number = excluded.number,
        document = excluded.document,
        updated_at = excluded.updated_at";

fn upsert(conn: &Connection, entity_type: EntityType, id: &str, document: &Value) -> Result<()> {
    let columns = Columns::from_document(document);
    conn.execute(
        UPSERT,
        (
            entity_type.as_str(),
            id,
            columns.number,
            serde_json::to_string(columns.document)?,
            &columns.created_at,
            &columns.updated_at,
        ),
    )?;
    Ok(())
}

impl Persistence for Database {
    fn read_entity(&self, entity_type: EntityType, id: &str) -> Result<Option<Value>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let text: Option<String> = conn
            .query_row(
                "SELECT document FROM entities WHERE entity_type = ? AND id = ?",
                (entity_type.as_str(), id),
                |row| row.get(0),
            )
            .optional()?;

        text.map(|t| {
            serde_json::from_str(&t).map_err(|source| PersistenceError::Corrupt {
                entity_type,
                id: id.to_string(),
                source,
            })
        })
        .transpose()
    }

    fn write_entity(&self, entity_type: EntityType, id: &str, document: &Value) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        upsert(&conn, entity_type, id, document)
    }

    fn write_batch(&self, entity_type: EntityType, documents: &[(String, Value)]) -> Result<()> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;
        for (id, document) in documents {
            upsert(&tx, entity_type, id, document)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn list_ids(&self, entity_type: EntityType) -> Result<Vec<String>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt =
            conn.prepare("SELECT id FROM entities WHERE entity_type = ? ORDER BY number, id")?;
        let ids = stmt
            .query_map([entity_type.as_str()], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn delete_entity(&self, entity_type: EntityType, id: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute(
            "DELETE FROM entities WHERE entity_type = ? AND id = ?",
            (entity_type.as_str(), id),
        )?;
        Ok(rows > 0)
    }

    fn entity_exists(&self, entity_type: EntityType, id: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entities WHERE entity_type = ? AND id = ?",
            (entity_type.as_str(), id),
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn next_number(&self, entity_type: EntityType) -> Result<Option<u32>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let max: i64 = conn.query_row(
            "SELECT COALESCE(MAX(number), 0) FROM entities WHERE entity_type = ?",
            [entity_type.as_str()],
            |row| row.get(0),
        )?;
        Ok(u32::try_from(max).unwrap_or(0).checked_add(1))
    }

    fn number_owner(&self, entity_type: EntityType, number: u32) -> Result<Option<String>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let id = conn
            .query_row(
                "SELECT id FROM entities WHERE entity_type = ? AND number = ? ORDER BY id LIMIT 1",
                (entity_type.as_str(), number),
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }
}
