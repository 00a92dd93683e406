//! Quarry: typed query compilation for entity-mapped SQL.
//!
//! Entities are described by [`EntityDecl`]s and validated into immutable
//! [`EntityDescriptor`]s. Statements are assembled from [`Template`]
//! fragments or the fluent builders in [`query`], then compiled into SQL
//! text with positionally ordered parameters. Joins between related
//! entities are inferred from foreign keys; aliases are unique per scope.
//!
//! ```no_run
//! use quarry::{Catalog, CompileConfig, Context, EntityDecl, Predicate, QueryBuilder};
//!
//! let ctx = Context::from_catalog(
//!     Catalog::new()
//!         .with(EntityDecl::new("owner", "owner").id("id").column("last_name"))
//!         .with(EntityDecl::new("pet", "pet").id("id").column("name").relation("owner", "owner")),
//!     CompileConfig::default(),
//! );
//! let statement = QueryBuilder::new("pet")
//!     .filter(Predicate::eq("owner.last_name", "Davis"))
//!     .to_statement(&ctx)?;
//! assert_eq!(statement.params.len(), 1);
//! # Ok::<(), quarry::QueryError>(())
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod exec;
pub mod model;
pub mod query;
pub mod value;

pub use config::{AliasResolveStrategy, CompileConfig, PlaceholderStyle, DEFAULT_BATCH_SIZE};
pub use context::Context;
pub use error::{ExecutorError, ExecutorErrorKind, QueryError, QueryErrorWithCode, Result};
pub use exec::{
    BatchCursor, BatchOutcome, DerivedOutcome, RecordMaterializer, ResultMaterializer, Row,
    Session, StatementExecutor,
};
pub use model::{
    Catalog, ColumnDecl, ComponentDecl, EntityDecl, EntityDescriptor, Ref, RelationDecl, Registry,
};
pub use query::{
    Arg, ColumnRef, DeleteBuilder, DerivedQuery, EntityRef, InsertBuilder, JoinKind, JoinSpec,
    Metamodel, Operand, Operator, ParamKind, Predicate, QueryBuilder, Statement, Template,
    UpdateBuilder,
};
pub use value::{BoundParam, Record, SqlType, Value};

#[cfg(feature = "sqlite")]
pub use exec::sqlite::SqliteExecutor;
