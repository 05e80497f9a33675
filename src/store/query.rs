use std::cmp::Ordering;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

/// Options for [`EntityStore::list`](super::EntityStore::list).
///
/// Each filter maps a top-level document field to its accepted values. A
/// document passes a filter if its field matches any accepted value (or, for
/// array fields, contains one); it must pass every filter. Sorting happens
/// before pagination, which is applied last.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListOptions {
    #[serde(default)]
    pub filters: IndexMap<String, Vec<Value>>,
    #[serde(default)]
    pub sort: Option<SortSpec>,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ListOptions {
    pub fn filter(mut self, field: impl Into<String>, accepted: Value) -> Self {
        self.filters.entry(field.into()).or_default().push(accepted);
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort = Some(SortSpec {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = Some(offset);
        self.limit = Some(limit);
        self
    }

    pub(crate) fn matches(&self, document: &Value) -> bool {
        self.filters.iter().all(|(field, accepted)| {
            let Some(actual) = document.get(field) else {
                return false;
            };
            match actual {
                Value::Array(values) => values
                    .iter()
                    .any(|v| accepted.iter().any(|a| same_value(v, a))),
                _ => accepted.iter().any(|a| same_value(actual, a)),
            }
        })
    }

    pub(crate) fn compare(&self, a: &Value, b: &Value) -> Ordering {
        let Some(sort) = &self.sort else {
            return Ordering::Equal;
        };
        match (a.get(&sort.field), b.get(&sort.field)) {
            (Some(x), Some(y)) => {
                let ordering = compare_values(x, y);
                match sort.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            }
            // Missing values sort last in either direction.
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }

    pub(crate) fn paginate<T>(&self, items: Vec<T>) -> Vec<T> {
        let offset = self.offset.unwrap_or(0);
        let iter = items.into_iter().skip(offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn same_value(actual: &Value, accepted: &Value) -> bool {
    actual == accepted || text(actual) == text(accepted)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Numeric comparison when both sides read as numbers, string otherwise.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => text(a).cmp(&text(b)),
    }
}
