use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::Priority;

/// Field names owned by the versioning chain. Never copied between items.
pub const LINEAGE_FIELDS: [&str; 3] = ["supersedes", "superseded_by", "superseded_at"];

/// Version pointers carried by every sub-item.
///
/// `supersedes` and `superseded_by` mirror each other across a lineage:
/// if `a.superseded_by == b.id` then `b.supersedes == a.id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Lineage {
    #[serde(default)]
    pub supersedes: Option<String>,
    #[serde(default)]
    pub superseded_by: Option<String>,
    #[serde(default)]
    pub superseded_at: Option<DateTime<Utc>>,
}

/// The kinds of versioned items owned by an entity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SubItemKind {
    Criterion,
    Task,
    TestCase,
    ApiContract,
    DataModel,
}

impl SubItemKind {
    pub const ALL: [SubItemKind; 5] = [
        Self::Criterion,
        Self::Task,
        Self::TestCase,
        Self::ApiContract,
        Self::DataModel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Criterion => "criterion",
            Self::Task => "task",
            Self::TestCase => "test_case",
            Self::ApiContract => "api_contract",
            Self::DataModel => "data_model",
        }
    }

    /// Child id prefix, as in `task-001` or `req-001-auth/crit-001`.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Criterion => "crit",
            Self::Task => "task",
            Self::TestCase => "tc",
            Self::ApiContract => "api",
            Self::DataModel => "dm",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.prefix() == prefix)
    }

    /// Name of the owning collection field in the parent document.
    pub fn collection_field(&self) -> &'static str {
        match self {
            Self::Criterion => "criteria",
            Self::Task => "tasks",
            Self::TestCase => "test_cases",
            Self::ApiContract => "api_contracts",
            Self::DataModel => "data_models",
        }
    }
}

impl fmt::Display for SubItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s || k.prefix() == s)
            .ok_or_else(|| format!("unknown sub-item kind: {s}"))
    }
}

/// A versioned element owned by exactly one entity.
///
/// `REFERENCE_PATHS` lists, for documentation and auditing, every field that
/// can hold a sibling id; `reference_lists_mut` must visit exactly those.
pub trait SubItem: Clone + Serialize + DeserializeOwned {
    const KIND: SubItemKind;
    const REFERENCE_PATHS: &'static [&'static str];

    fn id(&self) -> &str;
    fn lineage(&self) -> &Lineage;
    fn lineage_mut(&mut self) -> &mut Lineage;
    fn reference_lists(&self) -> Vec<&[String]>;
    fn reference_lists_mut(&mut self) -> Vec<&mut Vec<String>>;

    fn is_superseded(&self) -> bool {
        self.lineage().superseded_by.is_some()
    }
}

/// An acceptance criterion of a requirement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Criterion {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(flatten)]
    pub lineage: Lineage,
}

impl SubItem for Criterion {
    const KIND: SubItemKind = SubItemKind::Criterion;
    const REFERENCE_PATHS: &'static [&'static str] = &[];

    fn id(&self) -> &str {
        &self.id
    }

    fn lineage(&self) -> &Lineage {
        &self.lineage
    }

    fn lineage_mut(&mut self) -> &mut Lineage {
        &mut self.lineage
    }

    fn reference_lists(&self) -> Vec<&[String]> {
        Vec::new()
    }

    fn reference_lists_mut(&mut self) -> Vec<&mut Vec<String>> {
        Vec::new()
    }
}

/// Something holding a task back, and what it waits on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Blocker {
    pub reason: String,
    #[serde(default)]
    pub blocked_by: Vec<String>,
    #[serde(default)]
    pub blocked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved: bool,
}

/// A unit of work inside a plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub blocked: Vec<Blocker>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub verified: bool,
    #[serde(flatten)]
    pub lineage: Lineage,
}

impl SubItem for Task {
    const KIND: SubItemKind = SubItemKind::Task;
    const REFERENCE_PATHS: &'static [&'static str] = &["depends_on", "blocked[].blocked_by"];

    fn id(&self) -> &str {
        &self.id
    }

    fn lineage(&self) -> &Lineage {
        &self.lineage
    }

    fn lineage_mut(&mut self) -> &mut Lineage {
        &mut self.lineage
    }

    fn reference_lists(&self) -> Vec<&[String]> {
        let mut lists = vec![self.depends_on.as_slice()];
        lists.extend(self.blocked.iter().map(|b| b.blocked_by.as_slice()));
        lists
    }

    fn reference_lists_mut(&mut self) -> Vec<&mut Vec<String>> {
        let mut lists = vec![&mut self.depends_on];
        lists.extend(self.blocked.iter_mut().map(|b| &mut b.blocked_by));
        lists
    }
}

/// A verification scenario for a plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestCase {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub expected_result: String,
    #[serde(default)]
    pub implemented: bool,
    #[serde(default)]
    pub passing: bool,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(flatten)]
    pub lineage: Lineage,
}

/// An interface a plan exposes or consumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiContract {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(flatten)]
    pub lineage: Lineage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
}

/// A persisted shape a plan introduces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataModel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub fields: Vec<DataField>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(flatten)]
    pub lineage: Lineage,
}

macro_rules! depends_on_sub_item {
    ($ty:ty, $kind:expr) => {
        impl SubItem for $ty {
            const KIND: SubItemKind = $kind;
            const REFERENCE_PATHS: &'static [&'static str] = &["depends_on"];

            fn id(&self) -> &str {
                &self.id
            }

            fn lineage(&self) -> &Lineage {
                &self.lineage
            }

            fn lineage_mut(&mut self) -> &mut Lineage {
                &mut self.lineage
            }

            fn reference_lists(&self) -> Vec<&[String]> {
                vec![self.depends_on.as_slice()]
            }

            fn reference_lists_mut(&mut self) -> Vec<&mut Vec<String>> {
                vec![&mut self.depends_on]
            }
        }
    };
}

depends_on_sub_item!(TestCase, SubItemKind::TestCase);
depends_on_sub_item!(ApiContract, SubItemKind::ApiContract);
depends_on_sub_item!(DataModel, SubItemKind::DataModel);
