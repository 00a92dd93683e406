//! Root-anchored navigation paths and their resolution against descriptors.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::error::{QueryError, Result};
use crate::model::descriptor::{ColumnIdxs, Field, FieldKind};
use crate::model::{EntityDescriptor, Registry};

/// A navigation expression rooted at an entity: relation hops, inline hops,
/// and finally a column, an inline component, or a relation.
///
/// The empty path denotes the entity itself (its identity columns).
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct Metamodel {
    segments: Vec<String>,
}

impl Metamodel {
    /// The empty path.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses a dotted path (`pet1.owner.address.city`).
    pub fn parse(dotted: &str) -> Self {
        Self {
            segments: dotted
                .split('.')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }

    /// Appends a segment (or several, when `segment` is itself dotted).
    pub fn then(mut self, segment: impl AsRef<str>) -> Self {
        self.segments.extend(
            segment
                .as_ref()
                .split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_owned),
        );
        self
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Dotted form, `""` for the root.
    pub fn dotted(&self) -> String {
        self.segments.join(".")
    }
}

impl fmt::Display for Metamodel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dotted())
    }
}

impl From<&str> for Metamodel {
    fn from(dotted: &str) -> Self {
        Metamodel::parse(dotted)
    }
}

impl From<String> for Metamodel {
    fn from(dotted: String) -> Self {
        Metamodel::parse(&dotted)
    }
}

impl From<&Metamodel> for Metamodel {
    fn from(path: &Metamodel) -> Self {
        path.clone()
    }
}

/// One foreign-key traversal of a resolved path.
#[derive(Clone, Debug)]
pub struct Hop {
    /// Entity owning the relation.
    pub owner: Arc<EntityDescriptor>,
    /// Relation index on `owner`.
    pub relation: usize,
    /// Relation target.
    pub target: Arc<EntityDescriptor>,
    /// Cumulative relation path from the anchor (`pet1.owner`).
    pub path: String,
}

/// What a resolved path ends on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Leaf {
    /// Empty path: identity of the anchor.
    Identity,
    Column,
    Inline,
    /// Owning columns of the relation, without a join to its target.
    Relation(usize),
    /// The target entity of the last hop (node resolution).
    Entity,
}

/// Result of resolving a [`Metamodel`] against a root descriptor.
#[derive(Clone, Debug)]
pub struct ResolvedPath {
    pub hops: SmallVec<[Hop; 2]>,
    /// Descriptor owning `columns`.
    pub descriptor: Arc<EntityDescriptor>,
    pub columns: ColumnIdxs,
    pub leaf: Leaf,
}

impl ResolvedPath {
    /// Relation path of the node owning the leaf columns, `""` for the anchor.
    pub fn node_path(&self) -> &str {
        self.hops.last().map_or("", |hop| hop.path.as_str())
    }
}

enum Step {
    Column(usize),
    Relation(usize),
    Inline(ColumnIdxs),
}

/// Resolves metamodel paths, loading relation targets through the registry.
pub struct PathResolver<'a> {
    registry: &'a Registry,
    max_depth: usize,
}

impl<'a> PathResolver<'a> {
    pub fn new(registry: &'a Registry, max_depth: usize) -> Self {
        Self {
            registry,
            max_depth,
        }
    }

    /// Resolves `path` to the columns it denotes plus the joins it needs.
    pub fn resolve(&self, root: &Arc<EntityDescriptor>, path: &Metamodel) -> Result<ResolvedPath> {
        self.walk(root, path, false)
    }

    /// Resolves `path` to an entity node: every relation, including the last
    /// segment, is traversed.
    pub fn resolve_node(
        &self,
        root: &Arc<EntityDescriptor>,
        path: &Metamodel,
    ) -> Result<ResolvedPath> {
        self.walk(root, path, true)
    }

    fn walk(
        &self,
        root: &Arc<EntityDescriptor>,
        path: &Metamodel,
        as_node: bool,
    ) -> Result<ResolvedPath> {
        let mut descriptor = Arc::clone(root);
        let mut hops: SmallVec<[Hop; 2]> = SmallVec::new();
        if path.is_empty() {
            return Ok(ResolvedPath {
                hops,
                columns: descriptor.identity().iter().copied().collect(),
                descriptor,
                leaf: Leaf::Identity,
            });
        }

        let segments = path.segments();
        let mut inline_prefix: Vec<&str> = Vec::new();
        for (i, segment) in segments.iter().enumerate() {
            let last = i + 1 == segments.len();
            let step = {
                let field = lookup(descriptor.fields(), &inline_prefix, segment).ok_or_else(|| {
                    QueryError::path(
                        path.dotted(),
                        format!("'{}' has no field '{segment}'", descriptor.name()),
                    )
                })?;
                match &field.kind {
                    FieldKind::Column(idx) => Step::Column(*idx),
                    FieldKind::Relation(idx) => Step::Relation(*idx),
                    FieldKind::Inline { fields, .. } => {
                        Step::Inline(inline_columns(&descriptor, fields))
                    }
                }
            };
            match step {
                Step::Column(idx) => {
                    if !last {
                        return Err(QueryError::path(
                            path.dotted(),
                            format!("column '{segment}' cannot be navigated further"),
                        ));
                    }
                    if as_node {
                        return Err(QueryError::path(
                            path.dotted(),
                            format!("'{segment}' is a column, not a relation"),
                        ));
                    }
                    return Ok(ResolvedPath {
                        hops,
                        descriptor,
                        columns: std::iter::once(idx).collect(),
                        leaf: Leaf::Column,
                    });
                }
                Step::Inline(columns) => {
                    if last {
                        if as_node {
                            return Err(QueryError::path(
                                path.dotted(),
                                format!("'{segment}' is an inline component, not a relation"),
                            ));
                        }
                        return Ok(ResolvedPath {
                            hops,
                            descriptor,
                            columns,
                            leaf: Leaf::Inline,
                        });
                    }
                    inline_prefix.push(segment);
                }
                Step::Relation(rel_idx) => {
                    if last && !as_node {
                        let columns = descriptor.relation(rel_idx).columns.clone();
                        return Ok(ResolvedPath {
                            hops,
                            descriptor,
                            columns,
                            leaf: Leaf::Relation(rel_idx),
                        });
                    }
                    if hops.len() == self.max_depth {
                        return Err(QueryError::PathRecursion {
                            path: path.dotted(),
                            max: self.max_depth,
                        });
                    }
                    let relation = descriptor.relation(rel_idx);
                    let target = self.registry.resolve(&relation.target)?;
                    check_relation_arity(&descriptor, rel_idx, &target)?;
                    let hop_path = match hops.last() {
                        Some(prev) => format!("{}.{}", prev.path, relation.path),
                        None => relation.path.clone(),
                    };
                    hops.push(Hop {
                        owner: Arc::clone(&descriptor),
                        relation: rel_idx,
                        target: Arc::clone(&target),
                        path: hop_path,
                    });
                    descriptor = target;
                    inline_prefix.clear();
                }
            }
        }

        // Only reachable when the path ends on a traversed relation.
        Ok(ResolvedPath {
            hops,
            columns: descriptor.identity().iter().copied().collect(),
            descriptor,
            leaf: Leaf::Entity,
        })
    }
}

/// Fails unless the relation's owning columns line up with the target identity.
pub(crate) fn check_relation_arity(
    owner: &EntityDescriptor,
    relation: usize,
    target: &EntityDescriptor,
) -> Result<()> {
    let relation = owner.relation(relation);
    if relation.columns.len() != target.identity().len() {
        return Err(QueryError::mapping(
            owner.name(),
            format!(
                "relation '{}' has {} owning column(s) but '{}' has {} identity column(s)",
                relation.path,
                relation.columns.len(),
                target.name(),
                target.identity().len()
            ),
        ));
    }
    Ok(())
}

fn lookup<'f>(fields: &'f [Field], prefix: &[&str], name: &str) -> Option<&'f Field> {
    let mut fields = fields;
    for segment in prefix {
        match &fields.iter().find(|f| f.name == *segment)?.kind {
            FieldKind::Inline { fields: nested, .. } => fields = nested,
            _ => return None,
        }
    }
    fields.iter().find(|f| f.name == name)
}

fn inline_columns(descriptor: &EntityDescriptor, fields: &[Field]) -> ColumnIdxs {
    fn collect(descriptor: &EntityDescriptor, fields: &[Field], out: &mut ColumnIdxs) {
        for field in fields {
            match &field.kind {
                FieldKind::Column(idx) => out.push(*idx),
                FieldKind::Relation(idx) => out.extend(descriptor.relation(*idx).columns.iter().copied()),
                FieldKind::Inline { fields, .. } => collect(descriptor, fields, out),
            }
        }
    }
    let mut out = ColumnIdxs::new();
    collect(descriptor, fields, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Catalog, ComponentDecl, EntityDecl};

    fn registry() -> Registry {
        Registry::from_catalog(
            Catalog::new()
                .with(
                    EntityDecl::new("owner", "owner")
                        .id("id")
                        .column("last_name")
                        .inline(
                            "address",
                            ComponentDecl::new("Address").column("street").column("city"),
                        ),
                )
                .with(
                    EntityDecl::new("pet", "pet")
                        .id("id")
                        .column("name")
                        .relation("owner", "owner"),
                )
                .with(
                    EntityDecl::new("employee", "employee")
                        .id("id")
                        .optional_relation("manager", "employee"),
                ),
        )
    }

    #[test]
    fn parses_and_formats() {
        let path = Metamodel::parse("pet1.owner.city");
        assert_eq!(path.len(), 3);
        assert_eq!(path.to_string(), "pet1.owner.city");
        assert_eq!(Metamodel::root().then("pet1").then("owner.city"), path);
        assert!(Metamodel::parse("").is_empty());
    }

    #[test]
    fn resolves_column_through_relation_and_inline() {
        let registry = registry();
        let resolver = PathResolver::new(&registry, 8);
        let pet = registry.resolve("pet").expect("pet");
        let resolved = resolver
            .resolve(&pet, &"owner.address.city".into())
            .expect("path resolves");
        assert_eq!(resolved.hops.len(), 1);
        assert_eq!(resolved.node_path(), "owner");
        assert_eq!(resolved.descriptor.name(), "owner");
        assert_eq!(resolved.leaf, Leaf::Column);
        assert_eq!(resolved.descriptor.column(resolved.columns[0]).name, "city");
    }

    #[test]
    fn relation_leaf_needs_no_join() {
        let registry = registry();
        let resolver = PathResolver::new(&registry, 8);
        let pet = registry.resolve("pet").expect("pet");
        let resolved = resolver.resolve(&pet, &"owner".into()).expect("resolves");
        assert!(resolved.hops.is_empty());
        assert_eq!(resolved.leaf, Leaf::Relation(0));
        assert_eq!(pet.column(resolved.columns[0]).name, "owner_id");

        let node = resolver.resolve_node(&pet, &"owner".into()).expect("node");
        assert_eq!(node.hops.len(), 1);
        assert_eq!(node.leaf, Leaf::Entity);
    }

    #[test]
    fn inline_leaf_yields_all_component_columns() {
        let registry = registry();
        let resolver = PathResolver::new(&registry, 8);
        let owner = registry.resolve("owner").expect("owner");
        let resolved = resolver.resolve(&owner, &"address".into()).expect("resolves");
        assert_eq!(resolved.leaf, Leaf::Inline);
        assert_eq!(resolved.columns.len(), 2);
    }

    #[test]
    fn unknown_segment_is_a_resolution_error() {
        let registry = registry();
        let resolver = PathResolver::new(&registry, 8);
        let pet = registry.resolve("pet").expect("pet");
        let err = resolver.resolve(&pet, &"owner.phone".into()).unwrap_err();
        assert_eq!(err.code(), "PathResolutionError");
        let err = resolver.resolve(&pet, &"name.first".into()).unwrap_err();
        assert_eq!(err.code(), "PathResolutionError");
    }

    #[test]
    fn self_reference_beyond_bound_is_recursion_error() {
        let registry = registry();
        let resolver = PathResolver::new(&registry, 2);
        let employee = registry.resolve("employee").expect("employee");
        resolver
            .resolve(&employee, &"manager.manager.id".into())
            .expect("two hops fit");
        let err = resolver
            .resolve(&employee, &"manager.manager.manager.id".into())
            .unwrap_err();
        assert_eq!(err.code(), "PathRecursionError");
    }
}
