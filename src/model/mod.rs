#![forbid(unsafe_code)]

//! Entity metadata: raw declarations, validated descriptors, and the registry
//! that caches them.

/// Raw declarations supplied by an external descriptor source.
pub mod decl;

/// Validated, immutable entity descriptors.
pub mod descriptor;

/// Deferred relation handles.
pub mod reference;

/// Descriptor cache and declaration sources.
pub mod registry;

pub use decl::{ColumnDecl, ComponentDecl, EntityDecl, FieldDecl, InlineDecl, RelationDecl};
pub use descriptor::{Column, EntityDescriptor, Field, FieldKind, Relation};
pub use reference::Ref;
pub use registry::{Catalog, DescriptorSource, Registry};
