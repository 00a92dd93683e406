//! Fragment-builder API.
//!
//! A [`Template`] is an ordered list of [`Segment`]s: literal SQL text
//! interleaved with typed elements (tables, columns, parameters, nested
//! statements, joins). The [`Compiler`](super::Compiler) resolves the typed
//! elements and produces the final SQL text and parameter list.

use crate::query::metamodel::Metamodel;
use crate::query::predicate::Predicate;
use crate::value::{BoundParam, SqlType, Value};

/// Which alias scope a reference resolves against.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ScopeQualifier {
    /// Current scope first, then enclosing scopes.
    #[default]
    Auto,
    /// Current scope only.
    Inner,
    /// The directly enclosing scope only.
    Outer,
}

/// Reference to an entity usage: the root, a joined relation, or an explicit join.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityRef {
    pub entity: String,
    /// Relation path from the scope root disambiguating which usage is meant.
    pub path: Option<Metamodel>,
    /// Explicit alias of a joined usage.
    pub alias: Option<String>,
    pub scope: ScopeQualifier,
}

impl EntityRef {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            path: None,
            alias: None,
            scope: ScopeQualifier::Auto,
        }
    }

    /// Disambiguates through a relation path (`pet1.owner`).
    pub fn via(mut self, path: impl Into<Metamodel>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Selects the usage declared with this alias.
    pub fn aliased(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn outer(mut self) -> Self {
        self.scope = ScopeQualifier::Outer;
        self
    }

    pub fn inner(mut self) -> Self {
        self.scope = ScopeQualifier::Inner;
        self
    }
}

impl From<&str> for EntityRef {
    fn from(entity: &str) -> Self {
        EntityRef::new(entity)
    }
}

impl From<String> for EntityRef {
    fn from(entity: String) -> Self {
        EntityRef::new(entity)
    }
}

/// Reference to one or more columns through a metamodel path.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnRef {
    /// Usage the path is anchored at; the scope root when absent.
    pub anchor: Option<EntityRef>,
    pub path: Metamodel,
    pub scope: ScopeQualifier,
}

impl ColumnRef {
    pub fn new(path: impl Into<Metamodel>) -> Self {
        Self {
            anchor: None,
            path: path.into(),
            scope: ScopeQualifier::Auto,
        }
    }

    /// Anchors the path at another entity usage.
    pub fn of(anchor: impl Into<EntityRef>, path: impl Into<Metamodel>) -> Self {
        Self {
            anchor: Some(anchor.into()),
            path: path.into(),
            scope: ScopeQualifier::Auto,
        }
    }

    pub fn outer(mut self) -> Self {
        self.scope = ScopeQualifier::Outer;
        if let Some(anchor) = self.anchor.as_mut() {
            anchor.scope = ScopeQualifier::Outer;
        }
        self
    }

    pub fn inner(mut self) -> Self {
        self.scope = ScopeQualifier::Inner;
        if let Some(anchor) = self.anchor.as_mut() {
            anchor.scope = ScopeQualifier::Inner;
        }
        self
    }
}

impl From<&str> for ColumnRef {
    fn from(path: &str) -> Self {
        ColumnRef::new(path)
    }
}

impl From<Metamodel> for ColumnRef {
    fn from(path: Metamodel) -> Self {
        ColumnRef::new(path)
    }
}

/// Join flavour.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JoinKind {
    Inner,
    Left,
    Cross,
}

impl JoinKind {
    pub(crate) fn keyword(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Cross => "CROSS JOIN",
        }
    }
}

/// Condition of an explicit entity join.
#[derive(Clone, Debug, PartialEq)]
pub enum JoinOn {
    /// Caller-written condition.
    Template(Template),
    /// Foreign key between the joined entity and a usage already in scope
    /// (optionally restricted to the given one).
    Relation(Option<EntityRef>),
    /// No condition (cross join).
    None,
}

/// Explicit join requested by the caller.
#[derive(Clone, Debug, PartialEq)]
pub enum JoinSpec {
    /// Join along a relation path from the scope root. This is how a deferred
    /// relation becomes joinable; auto-joins on the same path reuse it.
    Path {
        path: Metamodel,
        kind: JoinKind,
        alias: Option<String>,
    },
    /// Join another entity.
    Entity {
        entity: String,
        kind: JoinKind,
        alias: Option<String>,
        on: JoinOn,
    },
}

impl JoinSpec {
    pub fn path(path: impl Into<Metamodel>, kind: JoinKind) -> Self {
        JoinSpec::Path {
            path: path.into(),
            kind,
            alias: None,
        }
    }

    pub fn entity(entity: impl Into<String>, kind: JoinKind, on: JoinOn) -> Self {
        JoinSpec::Entity {
            entity: entity.into(),
            kind,
            alias: None,
            on,
        }
    }

    /// Attaches an explicit alias.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        match &mut self {
            JoinSpec::Path { alias: a, .. } | JoinSpec::Entity { alias: a, .. } => {
                *a = Some(alias.into());
            }
        }
        self
    }
}

/// One element of a fragment sequence.
#[derive(Clone, Debug, PartialEq)]
pub enum Segment {
    /// Literal SQL text; must not contain parameter markers.
    Text(String),
    /// Position-dependent table reference: column list in SELECT, `table alias`
    /// in FROM/JOIN, bare table name after INTO/UPDATE, alias elsewhere.
    Table(EntityRef),
    /// Column list of an entity usage.
    Select(EntityRef),
    /// Root table with optional explicit alias, followed by its auto-joins.
    From {
        entity: String,
        alias: Option<String>,
    },
    /// Unaliased DML target; joins are unavailable in its scope.
    Target(String),
    /// Alias of an entity usage.
    Alias(EntityRef),
    /// `alias.column` (comma separated when the path maps to several columns).
    Column(ColumnRef),
    /// Bound parameter.
    Param(BoundParam),
    /// Predicate tree, grouped in parentheses when it is a junction or raw
    /// fragment so surrounding text cannot change its precedence.
    Predicate(Predicate),
    /// Predicate forming a whole `WHERE`/`HAVING`/`ON` body; emitted ungrouped.
    Condition(Predicate),
    /// Nested statement, wrapped in parentheses, compiled in its own scope.
    Subquery(Template),
    /// Explicit join.
    Join(JoinSpec),
    /// Verbatim SQL whose `?` markers bind `params` in order.
    Raw { sql: String, params: Vec<BoundParam> },
}

/// Ordered fragment sequence.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn push(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }

    pub(crate) fn push_mut(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    /// Appends all segments of `other`.
    pub fn append(mut self, other: Template) -> Self {
        self.segments.extend(other.segments);
        self
    }

    pub fn sql(self, text: impl Into<String>) -> Self {
        self.push(Segment::Text(text.into()))
    }

    pub fn table(self, entity: impl Into<EntityRef>) -> Self {
        self.push(Segment::Table(entity.into()))
    }

    pub fn select(self, entity: impl Into<EntityRef>) -> Self {
        self.push(Segment::Select(entity.into()))
    }

    pub fn from(self, entity: impl Into<String>) -> Self {
        self.push(Segment::From {
            entity: entity.into(),
            alias: None,
        })
    }

    /// Unaliased target of an `UPDATE` or `DELETE`.
    pub fn target(self, entity: impl Into<String>) -> Self {
        self.push(Segment::Target(entity.into()))
    }

    pub fn from_as(self, entity: impl Into<String>, alias: impl Into<String>) -> Self {
        self.push(Segment::From {
            entity: entity.into(),
            alias: Some(alias.into()),
        })
    }

    pub fn alias(self, entity: impl Into<EntityRef>) -> Self {
        self.push(Segment::Alias(entity.into()))
    }

    pub fn column(self, column: impl Into<ColumnRef>) -> Self {
        self.push(Segment::Column(column.into()))
    }

    pub fn param(self, value: impl Into<Value>) -> Self {
        self.push(Segment::Param(BoundParam::new(value)))
    }

    pub fn typed_param(self, value: impl Into<Value>, hint: SqlType) -> Self {
        self.push(Segment::Param(BoundParam::typed(value, hint)))
    }

    pub fn predicate(self, predicate: Predicate) -> Self {
        self.push(Segment::Predicate(predicate))
    }

    pub fn condition(self, predicate: Predicate) -> Self {
        self.push(Segment::Condition(predicate))
    }

    pub fn subquery(self, template: Template) -> Self {
        self.push(Segment::Subquery(template))
    }

    pub fn join(self, join: JoinSpec) -> Self {
        self.push(Segment::Join(join))
    }

    pub fn raw(self, sql: impl Into<String>, params: Vec<BoundParam>) -> Self {
        self.push(Segment::Raw {
            sql: sql.into(),
            params,
        })
    }
}
