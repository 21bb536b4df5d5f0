//! # Facade Module
//!
//! Facades are the surface domain code talks to. Each one binds a physical
//! collection and composes query translation, the CRUD executor
//! ([`crate::repo::Repository`]), ownership stamping and the change feed into
//! the same handful of operations for every entity:
//! `list`, `filter`, `get`, `create`, `bulk_create`, `update`, `delete`,
//! `subscribe` and `schema`.
//!
//! * [`FacadeEntity`] is parameterised by an entity marker type, its
//!   collection is known at compile time.
//! * [`FacadeCollection`] is the untyped form, obtained by logical name
//!   through [`FacadeRegistry::by_name`].
//! * [`FacadeRegistry`] builds every facade over an injected store and
//!   identity provider.

mod facade_error;
pub use facade_error::*;

mod facade_entity;
pub use facade_entity::*;

mod facade_registry;
pub use facade_registry::*;
