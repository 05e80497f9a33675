//! Domain models for specgraph.
//!
//! # Core Concepts
//!
//! ## Entities
//!
//! - [`Entity`]: a top-level specification document, one of the closed set of
//!   [`EntityType`]s. Its identifier (`req-001-auth`) is derived from
//!   `number` and `slug` and never stored.
//! - [`Requirement`], [`Plan`], [`Component`] (app/service/library),
//!   [`Constitution`], [`Decision`]: the concrete document shapes.
//!
//! ## Sub-items
//!
//! Versioned elements owned by one entity, implementing [`SubItem`]:
//!
//! - [`Criterion`] inside a requirement.
//! - [`Task`], [`TestCase`], [`ApiContract`], [`DataModel`] inside a plan.
//!
//! Sub-items are never deleted when replaced. The old item keeps its
//! [`Lineage`] pointers and a new sibling is appended, giving an append-only
//! audit trail.

mod entity;
mod sub_item;

pub use entity::*;
pub use sub_item::*;
