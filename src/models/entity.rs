use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ApiContract, Criterion, DataModel, Task, TestCase};
use crate::ids;

/// The closed set of top-level document types.
///
/// `App`, `Service` and `Library` are the component subtypes; a component's
/// `depends_on` may point at any of the three.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Requirement,
    Plan,
    App,
    Service,
    Library,
    Constitution,
    Decision,
}

impl EntityType {
    pub const ALL: [EntityType; 7] = [
        Self::Requirement,
        Self::Plan,
        Self::App,
        Self::Service,
        Self::Library,
        Self::Constitution,
        Self::Decision,
    ];

    pub const COMPONENTS: [EntityType; 3] = [Self::App, Self::Service, Self::Library];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requirement => "requirement",
            Self::Plan => "plan",
            Self::App => "app",
            Self::Service => "service",
            Self::Library => "library",
            Self::Constitution => "constitution",
            Self::Decision => "decision",
        }
    }

    /// Identifier prefix used by [`ids::generate`].
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Requirement => "req",
            Self::Plan => "pln",
            Self::App => "app",
            Self::Service => "svc",
            Self::Library => "lib",
            Self::Constitution => "con",
            Self::Decision => "dec",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.prefix() == prefix)
    }

    pub fn is_component(&self) -> bool {
        matches!(self, Self::App | Self::Service | Self::Library)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a type name outside the closed set reaches the engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown entity type: {0}")]
pub struct UnknownEntityType(pub String);

impl FromStr for EntityType {
    type Err = UnknownEntityType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownEntityType(s.to_string()))
    }
}

/// Priority shared by requirements, plans and tasks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
    NiceToHave,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::NiceToHave => "nice-to-have",
        }
    }
}

/// Fields every entity carries. The identifier is derived from `number` and
/// `slug` and never stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityMeta {
    pub number: u32,
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What the system must do. Owns its acceptance criteria.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Requirement {
    #[serde(flatten)]
    pub meta: EntityMeta,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub criteria: Vec<Criterion>,
}

/// How a criterion gets delivered. Owns the versioned work breakdown.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    #[serde(flatten)]
    pub meta: EntityMeta,
    #[serde(default)]
    pub priority: Priority,
    /// Criterion this plan fulfils, e.g. `req-001-auth/crit-001`.
    #[serde(default)]
    pub criteria_id: Option<String>,
    /// Other plans that must land first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Option<String>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub api_contracts: Vec<ApiContract>,
    #[serde(default)]
    pub data_models: Vec<DataModel>,
}

/// Shared shape of apps, services and libraries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Component {
    #[serde(flatten)]
    pub meta: EntityMeta,
    /// Component ids of any subtype.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub tech_stack: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub principle: String,
    #[serde(default)]
    pub rationale: Option<String>,
}

/// Project-wide principles every plan is expected to honour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Constitution {
    #[serde(flatten)]
    pub meta: EntityMeta,
    #[serde(default)]
    pub articles: Vec<Article>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    #[default]
    Proposed,
    Accepted,
    Rejected,
    Superseded,
}

/// An architecture decision record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    #[serde(flatten)]
    pub meta: EntityMeta,
    #[serde(default)]
    pub status: DecisionStatus,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub decision: String,
    #[serde(default)]
    pub consequences: Vec<String>,
    /// Ids of any entities this decision affects.
    #[serde(default)]
    pub references: Vec<String>,
}

/// A persisted specification document, discriminated by `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Entity {
    Requirement(Requirement),
    Plan(Plan),
    App(Component),
    Service(Component),
    Library(Component),
    Constitution(Constitution),
    Decision(Decision),
}

impl Entity {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Requirement(_) => EntityType::Requirement,
            Self::Plan(_) => EntityType::Plan,
            Self::App(_) => EntityType::App,
            Self::Service(_) => EntityType::Service,
            Self::Library(_) => EntityType::Library,
            Self::Constitution(_) => EntityType::Constitution,
            Self::Decision(_) => EntityType::Decision,
        }
    }

    pub fn meta(&self) -> &EntityMeta {
        match self {
            Self::Requirement(r) => &r.meta,
            Self::Plan(p) => &p.meta,
            Self::App(c) | Self::Service(c) | Self::Library(c) => &c.meta,
            Self::Constitution(c) => &c.meta,
            Self::Decision(d) => &d.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut EntityMeta {
        match self {
            Self::Requirement(r) => &mut r.meta,
            Self::Plan(p) => &mut p.meta,
            Self::App(c) | Self::Service(c) | Self::Library(c) => &mut c.meta,
            Self::Constitution(c) => &mut c.meta,
            Self::Decision(d) => &mut d.meta,
        }
    }

    /// The derived identifier, `prefix-NNN-slug`.
    pub fn id(&self) -> String {
        let meta = self.meta();
        ids::generate(self.entity_type(), meta.number, &meta.slug)
    }

    /// Dependency ids for types that declare `depends_on`; empty otherwise.
    pub fn depends_on(&self) -> &[String] {
        match self {
            Self::Plan(p) => &p.depends_on,
            Self::App(c) | Self::Service(c) | Self::Library(c) => &c.depends_on,
            Self::Requirement(_) | Self::Constitution(_) | Self::Decision(_) => &[],
        }
    }

    pub fn as_component(&self) -> Option<&Component> {
        match self {
            Self::App(c) | Self::Service(c) | Self::Library(c) => Some(c),
            _ => None,
        }
    }
}
