pub mod bootstrap;
pub mod model;
pub mod registry;

#[cfg(test)]
pub mod fixtures;

pub use bootstrap::{build_registry, introspect, StaticSchemas};
pub use model::{Column, ColumnKind, Relation, RelationKind, Table};
pub use registry::{SchemaRegistry, SharedRegistry};
