//! Template compiler: resolves typed segments and emits SQL text plus the
//! positionally ordered parameter list.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::config::{AliasResolveStrategy, PlaceholderStyle};
use crate::context::Context;
use crate::error::{QueryError, Result};
use crate::model::EntityDescriptor;
use crate::query::alias::AliasTable;
use crate::query::clause::{Clause, ClauseTracker, Transition};
use crate::query::graph::{ambiguity, JoinGraph};
use crate::query::metamodel::{check_relation_arity, Leaf, Metamodel, PathResolver, ResolvedPath};
use crate::query::predicate::{Operand, Operator, Predicate, Target};
use crate::query::template::{
    ColumnRef, EntityRef, JoinKind, JoinOn, JoinSpec, ScopeQualifier, Segment, Template,
};
use crate::value::{BoundParam, Record, SqlType, Value};

/// What a compiled statement does.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Other,
}

/// One column of an expanded entity projection.
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectedColumn {
    /// Relation path from the selected entity, `""` for its own columns.
    pub node: String,
    /// Entity owning the column.
    pub entity: String,
    pub column: String,
    /// Owning column in the parent entity when this is an identity column of
    /// a joined relation.
    pub parent_column: Option<String>,
}

/// Final SQL text plus bound parameters, ready for a statement executor.
#[derive(Clone, Debug, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<BoundParam>,
    pub kind: StatementKind,
    /// Root entity of the outermost scope.
    pub root: Option<String>,
    /// Columns of the first expanded entity in the outer select list.
    pub projection: Vec<ProjectedColumn>,
    /// A zero-row result means the version check failed.
    pub version_checked: bool,
    /// A zero-row result means the targeted row is gone.
    pub expects_row: bool,
    /// Columns returned by a `RETURNING` clause.
    pub returning: Vec<String>,
}

/// Compiles fragment sequences against a [`Context`].
///
/// Each call owns its alias table; compilers can be shared freely.
pub struct Compiler<'c> {
    ctx: &'c Context,
}

impl<'c> Compiler<'c> {
    pub fn new(ctx: &'c Context) -> Self {
        Self { ctx }
    }

    /// Compiles a template into a statement. Nothing is emitted on error.
    pub fn compile(&self, template: &Template) -> Result<Statement> {
        let mut compilation = Compilation::new(self.ctx);
        collect_aliases(template, &mut compilation.aliases)?;
        let scope = compilation.compile_scope(None, template)?;
        let statement = compilation.finish(scope)?;
        debug!(
            root = ?statement.root,
            params = statement.params.len(),
            sql_len = statement.sql.len(),
            "compiler.statement.compiled"
        );
        Ok(statement)
    }
}

#[derive(Clone, Debug)]
enum Chunk {
    Text(String),
    Param(BoundParam),
    Slot(usize),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Origin {
    /// FROM root of the scope.
    Root,
    /// Further table written into the FROM list or a literal JOIN.
    Listed,
    /// Join added while resolving a reference.
    Auto,
    /// Explicit join along a relation path.
    Path,
    /// Explicit join of another entity.
    Entity,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SlotState {
    Idle,
    Open,
    Placed,
}

#[derive(Debug)]
struct Node {
    descriptor: Arc<EntityDescriptor>,
    alias: String,
    explicit_alias: bool,
    origin: Origin,
    kind: JoinKind,
    parent: Option<usize>,
    relation: Option<usize>,
    /// (anchor node, relation path from the anchor).
    key: (usize, String),
    order: usize,
    on: Vec<Chunk>,
}

#[derive(Debug)]
struct Scope {
    parent: Option<usize>,
    nodes: Vec<Node>,
    paths: FxHashMap<(usize, String), usize>,
    root: Option<usize>,
    dml: bool,
    slot: SlotState,
}

struct Compilation<'c> {
    ctx: &'c Context,
    aliases: AliasTable,
    scopes: Vec<Scope>,
    out: Vec<Chunk>,
    projection: Option<Vec<ProjectedColumn>>,
    first_clause: Option<Clause>,
    order: usize,
}

/// A comparison's left-hand side.
enum Lhs<'t> {
    Columns(Vec<(String, Option<SqlType>)>, Option<ResolvedPath>),
    Expr(&'t Template),
}

impl Lhs<'_> {
    fn width(&self) -> usize {
        match self {
            Lhs::Columns(columns, _) => columns.len(),
            Lhs::Expr(_) => 1,
        }
    }

    fn hint(&self, i: usize) -> Option<SqlType> {
        match self {
            Lhs::Columns(columns, _) => columns[i].1,
            Lhs::Expr(_) => None,
        }
    }
}

impl<'c> Compilation<'c> {
    fn new(ctx: &'c Context) -> Self {
        Self {
            ctx,
            aliases: AliasTable::new(),
            scopes: Vec::new(),
            out: Vec::new(),
            projection: None,
            first_clause: None,
            order: 0,
        }
    }

    fn resolver(&self) -> PathResolver<'c> {
        PathResolver::new(self.ctx.registry(), self.ctx.config().max_join_depth)
    }

    fn graph(&self) -> JoinGraph<'c> {
        JoinGraph::new(self.ctx.registry(), self.ctx.config().max_join_depth)
    }

    fn strategy(&self) -> AliasResolveStrategy {
        self.ctx.config().alias_strategy
    }

    fn next_order(&mut self) -> usize {
        self.order += 1;
        self.order
    }

    fn push_text(&mut self, text: impl Into<String>) {
        self.out.push(Chunk::Text(text.into()));
    }

    fn node(&self, scope: usize, node: usize) -> &Node {
        &self.scopes[scope].nodes[node]
    }

    // ----- scopes and registration -------------------------------------

    fn compile_scope(&mut self, parent: Option<usize>, template: &Template) -> Result<usize> {
        let scope = self.aliases.push_scope(parent);
        self.scopes.push(Scope {
            parent,
            nodes: Vec::new(),
            paths: FxHashMap::default(),
            root: None,
            dml: false,
            slot: SlotState::Idle,
        });
        let registered = self.prepass(scope, template.segments())?;
        let mut tracker = ClauseTracker::new();
        self.emit(scope, template.segments(), Some(registered.as_slice()), &mut tracker)?;
        tracker.finish()?;
        if self.scopes[scope].slot == SlotState::Open {
            self.out.push(Chunk::Slot(scope));
            self.scopes[scope].slot = SlotState::Placed;
        }
        if parent.is_none() {
            self.first_clause = tracker.first();
        }
        Ok(scope)
    }

    /// Registers the tables a scope declares before any reference is resolved.
    fn prepass(&mut self, scope: usize, segments: &[Segment]) -> Result<Vec<Option<usize>>> {
        let mut registered = vec![None; segments.len()];
        let mut tracker = ClauseTracker::new();
        let mut joins = Vec::new();
        for (i, segment) in segments.iter().enumerate() {
            match segment {
                Segment::Text(text) => {
                    tracker.feed(text)?;
                }
                Segment::Raw { sql, .. } => {
                    tracker.feed_raw(sql)?;
                }
                Segment::From { entity, alias } => {
                    registered[i] = Some(self.register_table(scope, entity, alias.as_deref())?);
                }
                Segment::Target(entity) => {
                    registered[i] = Some(self.register_target(scope, entity)?);
                }
                Segment::Table(entity) => match tracker.clause() {
                    Clause::From | Clause::Join => {
                        if entity.path.is_some() {
                            return Err(QueryError::template(format!(
                                "table '{}' in a FROM list cannot carry a relation path",
                                entity.entity
                            )));
                        }
                        registered[i] = Some(self.register_table(
                            scope,
                            &entity.entity,
                            entity.alias.as_deref(),
                        )?);
                    }
                    Clause::Into | Clause::Update | Clause::Delete => {
                        registered[i] = Some(self.register_target(scope, &entity.entity)?);
                    }
                    _ => {}
                },
                Segment::Join(_) => joins.push(i),
                _ => {}
            }
        }

        let mut pending_on = Vec::new();
        for i in joins {
            if let Segment::Join(spec) = &segments[i] {
                let node = self.register_join(scope, spec)?;
                registered[i] = Some(node);
                if let JoinSpec::Entity {
                    on: JoinOn::Template(on),
                    ..
                } = spec
                {
                    pending_on.push((node, on));
                }
            }
        }
        for (node, on) in pending_on {
            let saved = std::mem::take(&mut self.out);
            let mut tracker = ClauseTracker::starting(Clause::On);
            let emitted = self.emit(scope, on.segments(), None, &mut tracker);
            let chunks = std::mem::replace(&mut self.out, saved);
            emitted?;
            tracker.finish()?;
            let order = self.next_order();
            let target = &mut self.scopes[scope].nodes[node];
            target.on = chunks;
            target.order = order;
        }
        Ok(registered)
    }

    fn add_node(
        &mut self,
        scope: usize,
        descriptor: Arc<EntityDescriptor>,
        alias: Option<&str>,
        origin: Origin,
        kind: JoinKind,
        link: Option<(usize, usize)>,
        key: Option<(usize, String)>,
    ) -> Result<usize> {
        let (alias, explicit_alias) = match alias {
            Some(alias) => (alias.to_owned(), true),
            None => (self.aliases.generate(descriptor.table()), false),
        };
        let idx = self.scopes[scope].nodes.len();
        self.aliases.bind(scope, &alias, idx)?;
        let order = self.next_order();
        let key = key.unwrap_or((idx, String::new()));
        let (parent, relation) = match link {
            Some((parent, relation)) => (Some(parent), Some(relation)),
            None => (None, None),
        };
        self.scopes[scope].nodes.push(Node {
            descriptor,
            alias,
            explicit_alias,
            origin,
            kind,
            parent,
            relation,
            key: key.clone(),
            order,
            on: Vec::new(),
        });
        self.scopes[scope].paths.insert(key, idx);
        Ok(idx)
    }

    fn check_duplicate_use(&self, scope: usize, entity: &str, alias: Option<&str>) -> Result<()> {
        if alias.is_some() {
            return Ok(());
        }
        let duplicate = self.scopes[scope].nodes.iter().any(|n| {
            matches!(n.origin, Origin::Root | Origin::Listed | Origin::Entity)
                && !n.explicit_alias
                && n.descriptor.name() == entity
        });
        if duplicate {
            return Err(QueryError::template(format!(
                "duplicate unaliased use of '{entity}'; give one of them an alias"
            )));
        }
        Ok(())
    }

    fn register_table(&mut self, scope: usize, entity: &str, alias: Option<&str>) -> Result<usize> {
        if self.scopes[scope].dml {
            return Err(QueryError::template(
                "a DML target cannot be combined with a FROM list",
            ));
        }
        let descriptor = self.ctx.descriptor(entity)?;
        self.check_duplicate_use(scope, entity, alias)?;
        let origin = if self.scopes[scope].root.is_none() {
            Origin::Root
        } else {
            Origin::Listed
        };
        let node = self.add_node(scope, descriptor, alias, origin, JoinKind::Inner, None, None)?;
        if origin == Origin::Root {
            self.scopes[scope].root = Some(node);
        }
        Ok(node)
    }

    fn register_target(&mut self, scope: usize, entity: &str) -> Result<usize> {
        if self.scopes[scope].root.is_some() {
            return Err(QueryError::template(format!(
                "DML target '{entity}' in a scope that already has a root"
            )));
        }
        let descriptor = self.ctx.descriptor(entity)?;
        let table = descriptor.table().to_owned();
        let idx = self.scopes[scope].nodes.len();
        let order = self.next_order();
        let sc = &mut self.scopes[scope];
        sc.nodes.push(Node {
            descriptor,
            alias: table,
            explicit_alias: false,
            origin: Origin::Root,
            kind: JoinKind::Inner,
            parent: None,
            relation: None,
            key: (idx, String::new()),
            order,
            on: Vec::new(),
        });
        sc.paths.insert((idx, String::new()), idx);
        sc.root = Some(idx);
        sc.dml = true;
        Ok(idx)
    }

    fn root_of(&self, scope: usize) -> Result<usize> {
        self.scopes[scope].root.ok_or_else(|| {
            QueryError::template("reference resolved in a scope without a FROM root or target")
        })
    }

    fn register_join(&mut self, scope: usize, spec: &JoinSpec) -> Result<usize> {
        if self.scopes[scope].dml {
            return Err(QueryError::path(
                spec_label(spec),
                "joins are not available in a DML statement",
            ));
        }
        let root = self.root_of(scope)?;
        match spec {
            JoinSpec::Path { path, kind, alias } => {
                if *kind == JoinKind::Cross {
                    return Err(QueryError::template(format!(
                        "relation path '{path}' cannot be cross joined"
                    )));
                }
                let root_desc = Arc::clone(&self.node(scope, root).descriptor);
                let resolved = self.resolver().resolve_node(&root_desc, path)?;
                let Some((last, init)) = resolved.hops.split_last() else {
                    return Err(QueryError::path(path.dotted(), "join path names no relation"));
                };
                let mut parent = root;
                for hop in init {
                    parent = self.join_relation(scope, parent, hop.relation)?;
                }
                let key = self.child_key(scope, parent, last.relation);
                if self.scopes[scope].paths.contains_key(&key) {
                    return Err(QueryError::template(format!(
                        "relation path '{path}' is joined twice"
                    )));
                }
                check_relation_arity(&last.owner, last.relation, &last.target)?;
                self.add_node(
                    scope,
                    Arc::clone(&last.target),
                    alias.as_deref(),
                    Origin::Path,
                    *kind,
                    Some((parent, last.relation)),
                    Some(key),
                )
            }
            JoinSpec::Entity {
                entity,
                kind,
                alias,
                on,
            } => {
                match (kind, on) {
                    (JoinKind::Cross, JoinOn::None) => {}
                    (JoinKind::Cross, _) => {
                        return Err(QueryError::template("a cross join takes no condition"))
                    }
                    (_, JoinOn::None) => {
                        return Err(QueryError::template(format!(
                            "join of '{entity}' needs a condition"
                        )))
                    }
                    _ => {}
                }
                let descriptor = self.ctx.descriptor(entity)?;
                self.check_duplicate_use(scope, entity, alias.as_deref())?;
                let condition = match on {
                    JoinOn::Relation(anchor) => {
                        Some(self.derived_condition(scope, &descriptor, anchor.as_ref())?)
                    }
                    _ => None,
                };
                let node = self.add_node(
                    scope,
                    Arc::clone(&descriptor),
                    alias.as_deref(),
                    Origin::Entity,
                    *kind,
                    None,
                    None,
                )?;
                if let Some((other, relation, forward)) = condition {
                    let on = {
                        let joined = self.node(scope, node);
                        let other = self.node(scope, other);
                        if forward {
                            fk_condition(other, joined, relation)
                        } else {
                            fk_condition(joined, other, relation)
                        }
                    };
                    self.scopes[scope].nodes[node].on = vec![Chunk::Text(on)];
                }
                Ok(node)
            }
        }
    }

    /// Finds the single foreign key linking `joined` to a table already in
    /// scope. Returns (node, relation index, forward) where forward means the
    /// node owns the relation.
    fn derived_condition(
        &mut self,
        scope: usize,
        joined: &Arc<EntityDescriptor>,
        anchor: Option<&EntityRef>,
    ) -> Result<(usize, usize, bool)> {
        let nodes: Vec<usize> = match anchor {
            Some(anchor) => {
                let (found_scope, node) = self.resolve_entity(scope, anchor)?;
                if found_scope != scope {
                    return Err(QueryError::template(format!(
                        "join anchor '{}' belongs to an enclosing scope",
                        anchor.entity
                    )));
                }
                vec![node]
            }
            None => (0..self.scopes[scope].nodes.len()).collect(),
        };
        let mut found = Vec::new();
        for node in nodes {
            let descriptor = &self.node(scope, node).descriptor;
            for (idx, relation) in descriptor.relations().iter().enumerate() {
                if relation.target == joined.name() {
                    found.push((node, idx, true));
                }
            }
            for (idx, relation) in joined.relations().iter().enumerate() {
                if relation.target == descriptor.name() {
                    found.push((node, idx, false));
                }
            }
        }
        match found.len() {
            1 => {
                let (node, relation, forward) = found[0];
                let owner = if forward {
                    Arc::clone(&self.node(scope, node).descriptor)
                } else {
                    Arc::clone(joined)
                };
                let target = if forward {
                    Arc::clone(joined)
                } else {
                    Arc::clone(&self.node(scope, node).descriptor)
                };
                check_relation_arity(&owner, relation, &target)?;
                Ok(found[0])
            }
            0 => Err(QueryError::path(
                joined.name(),
                "no foreign key links it to a table in scope",
            )),
            _ => {
                let candidates: Vec<Metamodel> = found
                    .iter()
                    .map(|&(node, relation, forward)| {
                        let n = self.node(scope, node);
                        let path = if forward {
                            n.descriptor.relation(relation).path.clone()
                        } else {
                            joined.relation(relation).path.clone()
                        };
                        Metamodel::parse(&format!("{}.{path}", n.alias))
                    })
                    .collect();
                Err(ambiguity(
                    joined.name(),
                    &candidates,
                    "name the table to join against or write the condition",
                ))
            }
        }
    }

    fn child_key(&self, scope: usize, parent: usize, relation: usize) -> (usize, String) {
        let node = self.node(scope, parent);
        let rel_path = &node.descriptor.relation(relation).path;
        let (anchor, prefix) = &node.key;
        let path = if prefix.is_empty() {
            rel_path.clone()
        } else {
            format!("{prefix}.{rel_path}")
        };
        (*anchor, path)
    }

    /// Returns the node joined along `relation` of `parent`, adding an
    /// automatic join when none exists yet.
    fn join_relation(&mut self, scope: usize, parent: usize, relation: usize) -> Result<usize> {
        let key = self.child_key(scope, parent, relation);
        if let Some(&node) = self.scopes[scope].paths.get(&key) {
            return Ok(node);
        }
        if self.scopes[scope].dml {
            return Err(QueryError::path(
                key.1,
                "joins are not available in a DML statement",
            ));
        }
        let (owner, rel) = {
            let node = self.node(scope, parent);
            (
                Arc::clone(&node.descriptor),
                node.descriptor.relation(relation).clone(),
            )
        };
        if rel.deferred {
            return Err(QueryError::path(
                key.1,
                "relation is deferred; join it explicitly",
            ));
        }
        let target = self.ctx.descriptor(&rel.target)?;
        check_relation_arity(&owner, relation, &target)?;
        let parent_node = self.node(scope, parent);
        let kind = if rel.nullable || parent_node.kind == JoinKind::Left {
            JoinKind::Left
        } else {
            JoinKind::Inner
        };
        self.add_node(
            scope,
            target,
            None,
            Origin::Auto,
            kind,
            Some((parent, relation)),
            Some(key),
        )
    }

    // ----- reference resolution ----------------------------------------

    fn resolve_entity(&mut self, scope: usize, entity: &EntityRef) -> Result<(usize, usize)> {
        if let Some(alias) = &entity.alias {
            let (found_scope, node) = self
                .aliases
                .lookup(scope, alias, entity.scope)
                .ok_or_else(|| QueryError::template(format!("unregistered alias '{alias}'")))?;
            if self.aliases.is_shadowed(scope, found_scope, alias) {
                return Err(QueryError::template(format!(
                    "alias '{alias}' of an enclosing scope is shadowed here"
                )));
            }
            let descriptor = &self.node(found_scope, node).descriptor;
            if descriptor.name() != entity.entity {
                return Err(QueryError::template(format!(
                    "alias '{alias}' refers to '{}', not '{}'",
                    descriptor.name(),
                    entity.entity
                )));
            }
            return match &entity.path {
                Some(path) => {
                    let node = self.node_at_path(found_scope, node, path)?;
                    Ok((found_scope, node))
                }
                None => Ok((found_scope, node)),
            };
        }

        let mut current = match entity.scope {
            ScopeQualifier::Outer => Some(self.scopes[scope].parent.ok_or_else(|| {
                QueryError::template(format!(
                    "'{}' is qualified as outer but there is no enclosing statement",
                    entity.entity
                ))
            })?),
            _ => Some(scope),
        };
        let mut not_found = None;
        while let Some(candidate) = current {
            match self.find_in_scope(candidate, entity) {
                Ok(node) => {
                    let alias = self.node(candidate, node).alias.clone();
                    if self.aliases.is_shadowed(scope, candidate, &alias) {
                        return Err(QueryError::template(format!(
                            "alias '{alias}' of an enclosing scope is shadowed here"
                        )));
                    }
                    return Ok((candidate, node));
                }
                Err(err @ QueryError::PathResolution { .. })
                    if entity.scope == ScopeQualifier::Auto =>
                {
                    not_found.get_or_insert(err);
                    current = self.scopes[candidate].parent;
                }
                Err(err) => return Err(not_found.unwrap_or(err)),
            }
        }
        Err(not_found.unwrap_or_else(|| QueryError::path(&entity.entity, "not in scope")))
    }

    fn find_in_scope(&mut self, scope: usize, entity: &EntityRef) -> Result<usize> {
        let Some(root) = self.scopes[scope].root else {
            return Err(QueryError::path(&entity.entity, "scope has no root entity"));
        };
        let root_desc = Arc::clone(&self.node(scope, root).descriptor);
        if let Some(path) = &entity.path {
            self.graph()
                .auto_join(&root_desc, &entity.entity, self.strategy(), Some(path))?;
            let node = self.node_at_path(scope, root, path)?;
            let found = self.node(scope, node).descriptor.name();
            if found != entity.entity {
                return Err(QueryError::path(
                    path.dotted(),
                    format!("leads to '{found}', not '{}'", entity.entity),
                ));
            }
            return Ok(node);
        }

        let usages: Vec<usize> = self.scopes[scope]
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.origin != Origin::Auto && n.descriptor.name() == entity.entity)
            .map(|(i, _)| i)
            .collect();
        match usages.len() {
            0 => {}
            1 => return Ok(usages[0]),
            _ => {
                let unaliased: Vec<usize> = usages
                    .iter()
                    .copied()
                    .filter(|&i| !self.node(scope, i).explicit_alias)
                    .collect();
                if unaliased.len() == 1 {
                    return Ok(unaliased[0]);
                }
                return Err(QueryError::template(format!(
                    "'{}' is used more than once in scope; reference it by alias",
                    entity.entity
                )));
            }
        }
        if self.scopes[scope].dml {
            return Err(QueryError::path(
                &entity.entity,
                "joins are not available in a DML statement",
            ));
        }
        let path = self
            .graph()
            .auto_join(&root_desc, &entity.entity, self.strategy(), None)?;
        self.node_at_path(scope, root, &path)
    }

    fn node_at_path(&mut self, scope: usize, anchor: usize, path: &Metamodel) -> Result<usize> {
        let descriptor = Arc::clone(&self.node(scope, anchor).descriptor);
        let resolved = self.resolver().resolve_node(&descriptor, path)?;
        self.ensure_hops(scope, anchor, &resolved)
    }

    fn ensure_hops(&mut self, scope: usize, anchor: usize, resolved: &ResolvedPath) -> Result<usize> {
        let mut node = anchor;
        for hop in &resolved.hops {
            node = self.join_relation(scope, node, hop.relation)?;
        }
        Ok(node)
    }

    /// Anchor node of a column reference.
    fn column_anchor(&mut self, scope: usize, column: &ColumnRef) -> Result<(usize, usize)> {
        if let Some(anchor) = &column.anchor {
            return self.resolve_entity(scope, anchor);
        }
        let mut current = match column.scope {
            ScopeQualifier::Outer => self.scopes[scope].parent,
            _ => Some(scope),
        };
        while let Some(candidate) = current {
            if let Some(root) = self.scopes[candidate].root {
                let alias = self.node(candidate, root).alias.clone();
                if candidate != scope && self.aliases.is_shadowed(scope, candidate, &alias) {
                    return Err(QueryError::template(format!(
                        "alias '{alias}' of an enclosing scope is shadowed here"
                    )));
                }
                return Ok((candidate, root));
            }
            if column.scope != ScopeQualifier::Auto {
                break;
            }
            current = self.scopes[candidate].parent;
        }
        Err(QueryError::path(
            column.path.dotted(),
            "no root entity to resolve the column against",
        ))
    }

    /// Resolves a column reference, adding the joins its path needs.
    fn resolve_columns(
        &mut self,
        scope: usize,
        column: &ColumnRef,
    ) -> Result<(Vec<(String, Option<SqlType>)>, ResolvedPath)> {
        let (found_scope, anchor) = self.column_anchor(scope, column)?;
        let descriptor = Arc::clone(&self.node(found_scope, anchor).descriptor);
        let resolved = self.resolver().resolve(&descriptor, &column.path)?;
        let node = self.ensure_hops(found_scope, anchor, &resolved)?;
        let columns = resolved
            .columns
            .iter()
            .map(|&idx| {
                let col = resolved.descriptor.column(idx);
                (self.column_sql(scope, found_scope, node, &col.name), col.sql_type)
            })
            .collect();
        Ok((columns, resolved))
    }

    fn column_sql(&self, current: usize, scope: usize, node: usize, column: &str) -> String {
        let target = self.node(scope, node);
        if self.scopes[scope].dml && target.origin == Origin::Root && current == scope {
            column.to_owned()
        } else {
            format!("{}.{column}", target.alias)
        }
    }

    // ----- emission -----------------------------------------------------

    fn emit(
        &mut self,
        scope: usize,
        segments: &[Segment],
        registered: Option<&[Option<usize>]>,
        tracker: &mut ClauseTracker,
    ) -> Result<()> {
        for (i, segment) in segments.iter().enumerate() {
            if tracker.in_quote() && !matches!(segment, Segment::Text(_)) {
                return Err(QueryError::template(
                    "typed element inside a quoted literal or comment",
                ));
            }
            let preregistered = registered.and_then(|r| r[i]);
            match segment {
                Segment::Text(text) => {
                    let transitions = tracker.feed(text)?;
                    self.emit_text(scope, text, &transitions, registered.is_some());
                }
                Segment::Raw { sql, params } => {
                    let markers = tracker.feed_raw(sql)?;
                    if markers.len() != params.len() {
                        return Err(QueryError::template(format!(
                            "raw fragment has {} marker(s) but {} parameter(s)",
                            markers.len(),
                            params.len()
                        )));
                    }
                    let mut start = 0;
                    for (marker, param) in markers.iter().zip(params) {
                        self.push_text(&sql[start..*marker]);
                        self.out.push(Chunk::Param(param.clone()));
                        start = marker + 1;
                    }
                    self.push_text(&sql[start..]);
                }
                Segment::From { .. } | Segment::Target(_) => {
                    let node = preregistered.ok_or_else(|| {
                        QueryError::template("tables can only be declared at statement level")
                    })?;
                    self.emit_declared(scope, node);
                }
                Segment::Table(entity) => {
                    let clause = tracker.clause();
                    match clause {
                        Clause::Select if tracker.depth() == 0 => {
                            let (found_scope, node) = self.resolve_entity(scope, entity)?;
                            self.expand_select(scope, found_scope, node)?;
                        }
                        Clause::From | Clause::Join | Clause::Into | Clause::Update
                        | Clause::Delete => {
                            let node = preregistered.ok_or_else(|| {
                                QueryError::template(
                                    "tables can only be declared at statement level",
                                )
                            })?;
                            self.emit_declared(scope, node);
                        }
                        Clause::Values => {
                            return Err(QueryError::template(format!(
                                "table '{}' referenced inside VALUES",
                                entity.entity
                            )))
                        }
                        _ => {
                            let (found_scope, node) = self.resolve_entity(scope, entity)?;
                            let alias = self.node(found_scope, node).alias.clone();
                            self.push_text(alias);
                        }
                    }
                }
                Segment::Select(entity) => {
                    let (found_scope, node) = self.resolve_entity(scope, entity)?;
                    self.expand_select(scope, found_scope, node)?;
                }
                Segment::Alias(entity) => {
                    let (found_scope, node) = self.resolve_entity(scope, entity)?;
                    let alias = self.node(found_scope, node).alias.clone();
                    self.push_text(alias);
                }
                Segment::Column(column) => {
                    let (columns, _) = self.resolve_columns(scope, column)?;
                    let sql: Vec<String> = columns.into_iter().map(|(sql, _)| sql).collect();
                    self.push_text(sql.join(", "));
                }
                Segment::Param(param) => {
                    if tracker.clause().expects_table() {
                        return Err(QueryError::template(
                            "parameter where a table reference is required",
                        ));
                    }
                    self.out.push(Chunk::Param(param.clone()));
                }
                Segment::Predicate(predicate) => {
                    self.emit_predicate(scope, predicate, true)?;
                }
                Segment::Condition(predicate) => {
                    self.emit_predicate(scope, predicate, false)?;
                }
                Segment::Subquery(template) => {
                    self.emit_subquery(scope, template)?;
                }
                Segment::Join(_) => {
                    if preregistered.is_none() {
                        return Err(QueryError::template(
                            "joins can only be declared at statement level",
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Emits literal text, placing the scope's join slot where the FROM list ends.
    fn emit_text(
        &mut self,
        scope: usize,
        text: &str,
        transitions: &[Transition],
        top: bool,
    ) {
        let mut placed_at = None;
        if top {
            for transition in transitions.iter().filter(|t| t.depth == 0) {
                let state = self.scopes[scope].slot;
                if transition.clause.is_from_region() {
                    if state == SlotState::Idle {
                        self.scopes[scope].slot = SlotState::Open;
                    }
                } else if state == SlotState::Open {
                    placed_at = Some(text[..transition.offset].trim_end().len());
                    self.scopes[scope].slot = SlotState::Placed;
                    break;
                }
            }
        }
        match placed_at {
            Some(pos) => {
                if pos > 0 {
                    self.push_text(&text[..pos]);
                }
                self.out.push(Chunk::Slot(scope));
                self.push_text(&text[pos..]);
            }
            None => self.push_text(text),
        }
    }

    fn emit_declared(&mut self, scope: usize, node: usize) {
        let n = self.node(scope, node);
        let text = if self.scopes[scope].dml {
            n.descriptor.table().to_owned()
        } else {
            format!("{} {}", n.descriptor.table(), n.alias)
        };
        if !self.scopes[scope].dml && self.scopes[scope].slot == SlotState::Idle {
            self.scopes[scope].slot = SlotState::Open;
        }
        self.push_text(text);
    }

    fn emit_subquery(&mut self, scope: usize, template: &Template) -> Result<()> {
        self.push_text("(");
        self.compile_scope(Some(scope), template)?;
        self.push_text(")");
        Ok(())
    }

    fn emit_inline(&mut self, scope: usize, template: &Template, clause: Clause) -> Result<()> {
        let mut tracker = ClauseTracker::starting(clause);
        self.emit(scope, template.segments(), None, &mut tracker)?;
        tracker.finish()
    }

    /// Expands an entity usage into its column list, following non-deferred
    /// relations (and explicitly joined deferred ones) into their targets.
    fn expand_select(&mut self, current: usize, scope: usize, node: usize) -> Result<()> {
        let mut items = Vec::new();
        let mut projection = Vec::new();
        self.expand_node(current, scope, node, String::new(), 0, None, &mut items, &mut projection)?;
        if current == 0 && self.projection.is_none() {
            self.projection = Some(projection);
        }
        self.push_text(items.join(", "));
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn expand_node(
        &mut self,
        current: usize,
        scope: usize,
        node: usize,
        prefix: String,
        depth: usize,
        parent_columns: Option<Vec<String>>,
        items: &mut Vec<String>,
        projection: &mut Vec<ProjectedColumn>,
    ) -> Result<()> {
        let descriptor = Arc::clone(&self.node(scope, node).descriptor);
        for (idx, column) in descriptor.columns().iter().enumerate() {
            if let Some(rel_idx) = column.relation {
                let relation = descriptor.relation(rel_idx);
                if relation.columns[0] != idx {
                    continue;
                }
                let key = self.child_key(scope, node, rel_idx);
                let joined = self.scopes[scope].paths.contains_key(&key);
                let rel_path = if prefix.is_empty() {
                    relation.path.clone()
                } else {
                    format!("{prefix}.{}", relation.path)
                };
                if (relation.deferred && !joined) || self.scopes[scope].dml {
                    for &owning in &relation.columns {
                        let name = &descriptor.column(owning).name;
                        items.push(self.column_sql(current, scope, node, name));
                        projection.push(ProjectedColumn {
                            node: prefix.clone(),
                            entity: descriptor.name().to_owned(),
                            column: name.clone(),
                            parent_column: None,
                        });
                    }
                    continue;
                }
                if depth + 1 > self.ctx.config().max_join_depth {
                    return Err(QueryError::PathRecursion {
                        path: rel_path,
                        max: self.ctx.config().max_join_depth,
                    });
                }
                let child = self.join_relation(scope, node, rel_idx)?;
                let owning: Vec<String> = relation
                    .columns
                    .iter()
                    .map(|&c| descriptor.column(c).name.clone())
                    .collect();
                self.expand_node(
                    current,
                    scope,
                    child,
                    rel_path,
                    depth + 1,
                    Some(owning),
                    items,
                    projection,
                )?;
                continue;
            }
            items.push(self.column_sql(current, scope, node, &column.name));
            let parent_column = parent_columns.as_ref().and_then(|owning| {
                descriptor
                    .identity()
                    .iter()
                    .position(|&i| i == idx)
                    .and_then(|pos| owning.get(pos).cloned())
            });
            projection.push(ProjectedColumn {
                node: prefix.clone(),
                entity: descriptor.name().to_owned(),
                column: column.name.clone(),
                parent_column,
            });
        }
        Ok(())
    }

    // ----- predicates ---------------------------------------------------

    fn emit_predicate(&mut self, scope: usize, predicate: &Predicate, nested: bool) -> Result<()> {
        match predicate {
            Predicate::Compare {
                target,
                op,
                operands,
            } => {
                let lhs = match target {
                    Target::Column(column) => {
                        let (columns, resolved) = self.resolve_columns(scope, column)?;
                        Lhs::Columns(columns, Some(resolved))
                    }
                    Target::Expr(expr) => Lhs::Expr(expr),
                };
                self.emit_compare(scope, &lhs, *op, operands)
            }
            Predicate::And(args) => self.emit_junction(scope, args, " AND ", "1 = 1", nested),
            Predicate::Or(args) => self.emit_junction(scope, args, " OR ", "1 = 0", nested),
            Predicate::Not(inner) => {
                self.push_text("NOT (");
                self.emit_predicate(scope, inner, false)?;
                self.push_text(")");
                Ok(())
            }
            Predicate::Raw(template) => {
                if nested {
                    self.push_text("(");
                }
                self.emit_inline(scope, template, Clause::Where)?;
                if nested {
                    self.push_text(")");
                }
                Ok(())
            }
            Predicate::Exists { query, negated } => {
                self.push_text(if *negated { "NOT EXISTS " } else { "EXISTS " });
                self.emit_subquery(scope, query)
            }
            Predicate::InQuery {
                target,
                query,
                negated,
            } => {
                let (columns, _) = self.resolve_columns(scope, target)?;
                if columns.len() != 1 {
                    return Err(QueryError::template(format!(
                        "'{}' maps to {} columns; IN over a sub-query needs exactly one",
                        target.path,
                        columns.len()
                    )));
                }
                let keyword = if *negated { " NOT IN " } else { " IN " };
                self.push_text(format!("{}{keyword}", columns[0].0));
                self.emit_subquery(scope, query)
            }
            Predicate::Matches { record, path } => self.emit_matches(scope, record, path.as_ref()),
        }
    }

    fn emit_junction(
        &mut self,
        scope: usize,
        args: &[Predicate],
        separator: &str,
        empty: &str,
        nested: bool,
    ) -> Result<()> {
        match args {
            [] => {
                self.push_text(empty);
                Ok(())
            }
            [single] => self.emit_predicate(scope, single, nested),
            _ => {
                if nested {
                    self.push_text("(");
                }
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        self.push_text(separator);
                    }
                    self.emit_predicate(scope, arg, true)?;
                }
                if nested {
                    self.push_text(")");
                }
                Ok(())
            }
        }
    }

    fn emit_lhs(&mut self, scope: usize, lhs: &Lhs<'_>, i: usize) -> Result<()> {
        match lhs {
            Lhs::Columns(columns, _) => {
                self.push_text(columns[i].0.clone());
                Ok(())
            }
            Lhs::Expr(expr) => self.emit_inline(scope, expr, Clause::Where),
        }
    }

    /// Values an entity operand contributes to a comparison.
    fn entity_values(&self, lhs: &Lhs<'_>, record: &Record) -> Result<Vec<Value>> {
        let resolved = match lhs {
            Lhs::Columns(_, Some(resolved)) => resolved,
            _ => {
                let descriptor = self.ctx.descriptor(&record.entity)?;
                return descriptor.identity_values(record);
            }
        };
        match resolved.leaf {
            Leaf::Relation(rel_idx) => {
                let relation = resolved.descriptor.relation(rel_idx);
                if relation.target != record.entity {
                    return Err(QueryError::template(format!(
                        "'{}' record compared with relation '{}' to '{}'",
                        record.entity, relation.path, relation.target
                    )));
                }
                self.ctx.descriptor(&record.entity)?.identity_values(record)
            }
            Leaf::Identity | Leaf::Entity => {
                if resolved.descriptor.name() != record.entity {
                    return Err(QueryError::template(format!(
                        "'{}' record compared with '{}' identity",
                        record.entity,
                        resolved.descriptor.name()
                    )));
                }
                resolved.descriptor.identity_values(record)
            }
            Leaf::Column | Leaf::Inline => resolved
                .columns
                .iter()
                .map(|&idx| {
                    let name = &resolved.descriptor.column(idx).name;
                    record.get(name).cloned().ok_or_else(|| {
                        QueryError::InvalidArgument(format!(
                            "{} record lacks column '{name}'",
                            record.entity
                        ))
                    })
                })
                .collect(),
        }
    }

    fn operand_tuples(&self, lhs: &Lhs<'_>, operands: &[Operand]) -> Result<Vec<Vec<BoundParam>>> {
        let width = lhs.width();
        let scalar = || -> Result<()> {
            if width != 1 {
                return Err(QueryError::template(format!(
                    "scalar value compared with a path of {width} columns"
                )));
            }
            Ok(())
        };
        let mut tuples = Vec::new();
        for operand in operands {
            match operand {
                Operand::Value(value) => {
                    scalar()?;
                    tuples.push(vec![BoundParam {
                        value: value.clone(),
                        hint: lhs.hint(0),
                    }]);
                }
                Operand::Typed(param) => {
                    scalar()?;
                    tuples.push(vec![param.clone()]);
                }
                Operand::List(values) => {
                    scalar()?;
                    tuples.extend(values.iter().map(|value| {
                        vec![BoundParam {
                            value: value.clone(),
                            hint: lhs.hint(0),
                        }]
                    }));
                }
                Operand::Entity(record) => {
                    let values = self.entity_values(lhs, record)?;
                    if values.len() != width {
                        return Err(QueryError::template(format!(
                            "'{}' record supplies {} value(s) for {width} column(s)",
                            record.entity,
                            values.len()
                        )));
                    }
                    tuples.push(
                        values
                            .into_iter()
                            .enumerate()
                            .map(|(i, value)| BoundParam {
                                value,
                                hint: lhs.hint(i),
                            })
                            .collect(),
                    );
                }
            }
        }
        Ok(tuples)
    }

    fn emit_tuple_eq(&mut self, scope: usize, lhs: &Lhs<'_>, tuple: Vec<BoundParam>) -> Result<()> {
        let width = tuple.len();
        if width > 1 {
            self.push_text("(");
        }
        for (i, param) in tuple.into_iter().enumerate() {
            if i > 0 {
                self.push_text(" AND ");
            }
            self.emit_lhs(scope, lhs, i)?;
            self.push_text(" = ");
            self.out.push(Chunk::Param(param));
        }
        if width > 1 {
            self.push_text(")");
        }
        Ok(())
    }

    fn emit_compare(
        &mut self,
        scope: usize,
        lhs: &Lhs<'_>,
        op: Operator,
        operands: &[Operand],
    ) -> Result<()> {
        let width = lhs.width();
        if width == 0 {
            return Err(QueryError::template("comparison target maps to no column"));
        }
        if op.arity() == Some(0) {
            if !operands.is_empty() {
                return Err(QueryError::template(format!("{op:?} takes no value")));
            }
            let suffix = match op {
                Operator::IsNull => " IS NULL",
                Operator::IsNotNull => " IS NOT NULL",
                Operator::IsTrue => " IS TRUE",
                _ => " IS FALSE",
            };
            if width > 1 {
                if matches!(op, Operator::IsTrue | Operator::IsFalse) {
                    return Err(QueryError::template(format!(
                        "{op:?} needs a single-column path"
                    )));
                }
                self.push_text("(");
            }
            for i in 0..width {
                if i > 0 {
                    self.push_text(" AND ");
                }
                self.emit_lhs(scope, lhs, i)?;
                self.push_text(suffix);
            }
            if width > 1 {
                self.push_text(")");
            }
            return Ok(());
        }

        let mut tuples = self.operand_tuples(lhs, operands)?;
        match op {
            Operator::In | Operator::NotIn => {
                let negated = op == Operator::NotIn;
                if tuples.is_empty() {
                    self.push_text(if negated { "1 = 1" } else { "1 = 0" });
                    return Ok(());
                }
                if width == 1 {
                    self.emit_lhs(scope, lhs, 0)?;
                    self.push_text(if negated { " NOT IN (" } else { " IN (" });
                    for (i, tuple) in tuples.into_iter().enumerate() {
                        if i > 0 {
                            self.push_text(", ");
                        }
                        self.out.extend(tuple.into_iter().map(Chunk::Param));
                    }
                    self.push_text(")");
                    return Ok(());
                }
                self.push_text(if negated { "NOT (" } else { "(" });
                for (i, tuple) in tuples.into_iter().enumerate() {
                    if i > 0 {
                        self.push_text(" OR ");
                    }
                    self.emit_tuple_eq(scope, lhs, tuple)?;
                }
                self.push_text(")");
                Ok(())
            }
            Operator::Between => {
                if width != 1 {
                    return Err(QueryError::template("BETWEEN needs a single-column path"));
                }
                if tuples.len() != 2 {
                    return Err(QueryError::template(format!(
                        "BETWEEN takes exactly two values, got {}",
                        tuples.len()
                    )));
                }
                let high = tuples.pop().into_iter().flatten();
                let low = tuples.pop().into_iter().flatten();
                self.emit_lhs(scope, lhs, 0)?;
                self.push_text(" BETWEEN ");
                self.out.extend(low.map(Chunk::Param));
                self.push_text(" AND ");
                self.out.extend(high.map(Chunk::Param));
                Ok(())
            }
            _ => {
                let sql_op = op.binary_sql().unwrap_or("=");
                match tuples.len() {
                    0 => {
                        return Err(QueryError::template(format!(
                            "{op:?} against an empty collection is undefined"
                        )))
                    }
                    1 => {}
                    n => {
                        return Err(QueryError::template(format!(
                            "{op:?} expects a single value, got {n}"
                        )))
                    }
                }
                let tuple = tuples.remove(0);
                if width == 1 {
                    self.emit_lhs(scope, lhs, 0)?;
                    self.push_text(format!(" {sql_op} "));
                    self.out.extend(tuple.into_iter().map(Chunk::Param));
                    return Ok(());
                }
                match op {
                    Operator::Equals => self.emit_tuple_eq(scope, lhs, tuple),
                    Operator::NotEquals => {
                        self.push_text("NOT ");
                        self.emit_tuple_eq(scope, lhs, tuple)
                    }
                    _ => Err(QueryError::template(format!(
                        "{op:?} is not supported on a path of {width} columns"
                    ))),
                }
            }
        }
    }

    /// Emits a predicate selecting root rows related to `record`.
    fn emit_matches(
        &mut self,
        scope: usize,
        record: &Record,
        path: Option<&Metamodel>,
    ) -> Result<()> {
        let root = self.root_of(scope)?;
        let root_desc = Arc::clone(&self.node(scope, root).descriptor);
        let entity = Operand::Entity(record.clone());
        if let Some(path) = path {
            self.graph()
                .auto_join(&root_desc, &record.entity, self.strategy(), Some(path))?;
            let column = ColumnRef::new(path.clone()).inner();
            return self.emit_predicate(
                scope,
                &Predicate::compare(column, Operator::Equals, vec![entity]),
                false,
            );
        }
        if root_desc.name() == record.entity {
            return self.emit_predicate(
                scope,
                &Predicate::compare(ColumnRef::new(Metamodel::root()).inner(), Operator::Equals, vec![entity]),
                false,
            );
        }
        match self
            .graph()
            .auto_join(&root_desc, &record.entity, self.strategy(), None)
        {
            Ok(path) => self.emit_predicate(
                scope,
                &Predicate::compare(ColumnRef::new(path).inner(), Operator::Equals, vec![entity]),
                false,
            ),
            Err(QueryError::PathResolution { .. }) => {
                self.emit_reverse_match(scope, root, &root_desc, record)
            }
            Err(err) => Err(err),
        }
    }

    /// `record` references the root: compare the root identity with the
    /// record's owning columns.
    fn emit_reverse_match(
        &mut self,
        scope: usize,
        root: usize,
        root_desc: &Arc<EntityDescriptor>,
        record: &Record,
    ) -> Result<()> {
        let descriptor = self.ctx.descriptor(&record.entity)?;
        let relations: Vec<usize> = descriptor
            .relations()
            .iter()
            .enumerate()
            .filter(|(_, r)| r.target == root_desc.name())
            .map(|(i, _)| i)
            .collect();
        let rel_idx = match relations.as_slice() {
            [single] => *single,
            [] => {
                return Err(QueryError::path(
                    &record.entity,
                    format!("no foreign-key path relates it to '{}'", root_desc.name()),
                ))
            }
            many => {
                let candidates: Vec<Metamodel> = many
                    .iter()
                    .map(|&i| Metamodel::parse(&descriptor.relation(i).path))
                    .collect();
                return Err(ambiguity(
                    root_desc.name(),
                    &candidates,
                    "pass the relation path to match through",
                ));
            }
        };
        check_relation_arity(&descriptor, rel_idx, root_desc)?;
        let values: Vec<BoundParam> = descriptor
            .relation(rel_idx)
            .columns
            .iter()
            .zip(root_desc.identity_columns())
            .map(|(&owning, id)| {
                let name = &descriptor.column(owning).name;
                record
                    .get(name)
                    .cloned()
                    .map(|value| BoundParam {
                        value,
                        hint: id.sql_type,
                    })
                    .ok_or_else(|| {
                        QueryError::InvalidArgument(format!(
                            "{} record lacks column '{name}'",
                            record.entity
                        ))
                    })
            })
            .collect::<Result<_>>()?;
        let columns = root_desc
            .identity_columns()
            .map(|c| (self.column_sql(scope, scope, root, &c.name), c.sql_type))
            .collect();
        self.emit_tuple_eq(scope, &Lhs::Columns(columns, None), values)
    }

    // ----- finishing ------------------------------------------------------

    fn render_slot(&self, scope: usize) -> Vec<Chunk> {
        let sc = &self.scopes[scope];
        let mut nodes: Vec<&Node> = sc
            .nodes
            .iter()
            .filter(|n| matches!(n.origin, Origin::Auto | Origin::Path | Origin::Entity))
            .collect();
        nodes.sort_by_key(|n| n.order);
        let mut chunks = Vec::new();
        for node in nodes {
            chunks.push(Chunk::Text(format!(
                " {} {} {}",
                node.kind.keyword(),
                node.descriptor.table(),
                node.alias
            )));
            if node.kind == JoinKind::Cross {
                continue;
            }
            chunks.push(Chunk::Text(" ON ".to_owned()));
            match (node.parent, node.relation) {
                (Some(parent), Some(relation)) => {
                    chunks.push(Chunk::Text(fk_condition(
                        &sc.nodes[parent],
                        node,
                        relation,
                    )));
                }
                _ => chunks.extend(node.on.iter().cloned()),
            }
        }
        chunks
    }

    fn finish(self, top: usize) -> Result<Statement> {
        let mut slots: FxHashMap<usize, Vec<Chunk>> = FxHashMap::default();
        for (id, scope) in self.scopes.iter().enumerate() {
            let joined = scope
                .nodes
                .iter()
                .any(|n| matches!(n.origin, Origin::Auto | Origin::Path | Origin::Entity));
            if joined && scope.slot != SlotState::Placed {
                return Err(QueryError::template(
                    "statement needs joins but has no FROM list to attach them to",
                ));
            }
            slots.insert(id, self.render_slot(id));
        }
        let style = self.ctx.config().placeholder;
        let mut sql = String::new();
        let mut params = Vec::new();
        flatten(&self.out, &slots, style, &mut sql, &mut params);

        let kind = match self.first_clause {
            Some(Clause::Select) => StatementKind::Select,
            Some(Clause::Into) => StatementKind::Insert,
            Some(Clause::Update) => StatementKind::Update,
            Some(Clause::Delete) => StatementKind::Delete,
            _ => StatementKind::Other,
        };
        let root = self.scopes[top]
            .root
            .map(|r| self.scopes[top].nodes[r].descriptor.name().to_owned());
        Ok(Statement {
            sql,
            params,
            kind,
            root,
            projection: self.projection.unwrap_or_default(),
            version_checked: false,
            expects_row: false,
            returning: Vec::new(),
        })
    }
}

/// `child.id = owner.fk` for a relation owned by `owner` pointing at `child`.
fn fk_condition(owner: &Node, child: &Node, relation: usize) -> String {
    let relation = owner.descriptor.relation(relation);
    relation
        .columns
        .iter()
        .zip(child.descriptor.identity_columns())
        .map(|(&fk, id)| {
            format!(
                "{}.{} = {}.{}",
                child.alias,
                id.name,
                owner.alias,
                owner.descriptor.column(fk).name
            )
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn flatten(
    chunks: &[Chunk],
    slots: &FxHashMap<usize, Vec<Chunk>>,
    style: PlaceholderStyle,
    sql: &mut String,
    params: &mut Vec<BoundParam>,
) {
    for chunk in chunks {
        match chunk {
            Chunk::Text(text) => sql.push_str(text),
            Chunk::Param(param) => {
                params.push(param.clone());
                match style {
                    PlaceholderStyle::Positional => sql.push('?'),
                    PlaceholderStyle::Numbered => {
                        sql.push('$');
                        sql.push_str(&params.len().to_string());
                    }
                }
            }
            Chunk::Slot(scope) => {
                if let Some(slot) = slots.get(scope) {
                    flatten(slot, slots, style, sql, params);
                }
            }
        }
    }
}

fn spec_label(spec: &JoinSpec) -> String {
    match spec {
        JoinSpec::Path { path, .. } => path.dotted(),
        JoinSpec::Entity { entity, .. } => entity.clone(),
    }
}

/// Reserves every explicit alias of the statement, nested scopes included,
/// so generated aliases never collide with them.
fn collect_aliases(template: &Template, aliases: &mut AliasTable) -> Result<()> {
    for segment in template.segments() {
        match segment {
            Segment::From {
                alias: Some(alias), ..
            } => aliases.reserve(alias)?,
            Segment::Table(entity) | Segment::Select(entity) | Segment::Alias(entity) => {
                reserve_entity(entity, aliases)?;
            }
            Segment::Column(column) => {
                if let Some(anchor) = &column.anchor {
                    reserve_entity(anchor, aliases)?;
                }
            }
            Segment::Predicate(predicate) | Segment::Condition(predicate) => {
                collect_predicate_aliases(predicate, aliases)?
            }
            Segment::Subquery(inner) => collect_aliases(inner, aliases)?,
            Segment::Join(spec) => match spec {
                JoinSpec::Path { alias, .. } => {
                    if let Some(alias) = alias {
                        aliases.reserve(alias)?;
                    }
                }
                JoinSpec::Entity { alias, on, .. } => {
                    if let Some(alias) = alias {
                        aliases.reserve(alias)?;
                    }
                    match on {
                        JoinOn::Template(on) => collect_aliases(on, aliases)?,
                        JoinOn::Relation(Some(anchor)) => reserve_entity(anchor, aliases)?,
                        _ => {}
                    }
                }
            },
            _ => {}
        }
    }
    Ok(())
}

fn reserve_entity(entity: &EntityRef, aliases: &mut AliasTable) -> Result<()> {
    match &entity.alias {
        Some(alias) => aliases.reserve(alias),
        None => Ok(()),
    }
}

fn collect_predicate_aliases(predicate: &Predicate, aliases: &mut AliasTable) -> Result<()> {
    match predicate {
        Predicate::Compare { target, .. } => match target {
            Target::Column(column) => match &column.anchor {
                Some(anchor) => reserve_entity(anchor, aliases),
                None => Ok(()),
            },
            Target::Expr(expr) => collect_aliases(expr, aliases),
        },
        Predicate::And(args) | Predicate::Or(args) => args
            .iter()
            .try_for_each(|arg| collect_predicate_aliases(arg, aliases)),
        Predicate::Not(inner) => collect_predicate_aliases(inner, aliases),
        Predicate::Raw(template) | Predicate::Exists { query: template, .. } => {
            collect_aliases(template, aliases)
        }
        Predicate::InQuery { target, query, .. } => {
            if let Some(anchor) = &target.anchor {
                reserve_entity(anchor, aliases)?;
            }
            collect_aliases(query, aliases)
        }
        Predicate::Matches { .. } => Ok(()),
    }
}
