#![forbid(unsafe_code)]

//! Query compilation.
//!
//! Templates and builders describe statements in terms of entities and field
//! paths; the compiler turns them into SQL text with ordered bound
//! parameters.

/// Per-scope alias bookkeeping.
pub mod alias;

/// Fluent select builder and nested predicate groups.
pub mod builder;

pub(crate) mod clause;

/// Template compiler.
///
/// Resolves entity and column references, infers joins, and renders
/// placeholders in occurrence order.
pub mod compiler;

/// Method-name query derivation.
pub mod derive;

/// Insert, update and delete builders.
pub mod dml;

/// Relation graph search for automatic joins.
pub mod graph;

/// Version predicates and zero-row classification.
pub mod lock;

/// Navigation paths over entity descriptors.
pub mod metamodel;

/// Predicate trees.
pub mod predicate;

/// Template segments.
pub mod template;

pub use builder::{LockMode, Order, PredicateBuilder, Projection, QueryBuilder};
pub use compiler::{Compiler, ProjectedColumn, Statement, StatementKind};
pub use derive::{Arg, DerivedQuery, ParamKind, Subject};
pub use dml::{DeleteBuilder, InsertBuilder, UpdateBuilder};
pub use metamodel::Metamodel;
pub use predicate::{Operand, Operator, Predicate};
pub use template::{
    ColumnRef, EntityRef, JoinKind, JoinOn, JoinSpec, ScopeQualifier, Segment, Template,
};
