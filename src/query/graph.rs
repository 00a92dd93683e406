//! Foreign-key graph search used for automatic joins.

use std::sync::Arc;

use rustc_hash::FxHashSet;
use tracing::debug;

use crate::config::AliasResolveStrategy;
use crate::error::{QueryError, Result};
use crate::model::{EntityDescriptor, Registry};
use crate::query::metamodel::Metamodel;

/// Breadth-first search over non-deferred foreign-key relations.
///
/// Relations are expanded in flattened declaration order: relations declared
/// inside an inline component sit at the position of the inline field.
pub struct JoinGraph<'a> {
    registry: &'a Registry,
    max_depth: usize,
}

impl<'a> JoinGraph<'a> {
    pub fn new(registry: &'a Registry, max_depth: usize) -> Self {
        Self {
            registry,
            max_depth,
        }
    }

    /// All shortest relation paths from `root` to an entity of type `target`,
    /// in discovery order. The root itself is the empty path.
    pub fn candidates(&self, root: &Arc<EntityDescriptor>, target: &str) -> Result<Vec<Metamodel>> {
        if root.name() == target {
            return Ok(vec![Metamodel::root()]);
        }
        let mut visited: FxHashSet<String> = FxHashSet::default();
        visited.insert(root.name().to_owned());
        let mut frontier = vec![(Arc::clone(root), Metamodel::root())];
        for _ in 0..self.max_depth {
            let mut next = Vec::new();
            let mut found = Vec::new();
            let mut reached: FxHashSet<String> = FxHashSet::default();
            for (descriptor, path) in &frontier {
                for relation in descriptor.relations().iter().filter(|r| !r.deferred) {
                    if visited.contains(&relation.target) {
                        continue;
                    }
                    let child_path = path.clone().then(&relation.path);
                    if relation.target == target {
                        found.push(child_path);
                        continue;
                    }
                    let child = self.registry.resolve(&relation.target)?;
                    reached.insert(relation.target.clone());
                    next.push((child, child_path));
                }
            }
            if !found.is_empty() {
                return Ok(found);
            }
            if next.is_empty() {
                return Err(QueryError::path(
                    target,
                    format!("no foreign-key path from '{}'", root.name()),
                ));
            }
            visited.extend(reached);
            frontier = next;
        }
        Err(QueryError::PathRecursion {
            path: format!("{} -> {target}", root.name()),
            max: self.max_depth,
        })
    }

    /// Picks the join path from `root` to `target` under `strategy`.
    ///
    /// An explicit `qualifier` is returned as-is unless the strategy is
    /// [`AliasResolveStrategy::Fail`] and the target is ambiguous.
    pub fn auto_join(
        &self,
        root: &Arc<EntityDescriptor>,
        target: &str,
        strategy: AliasResolveStrategy,
        qualifier: Option<&Metamodel>,
    ) -> Result<Metamodel> {
        if let Some(qualifier) = qualifier {
            if strategy == AliasResolveStrategy::Fail {
                // A target only reachable through deferred relations has no
                // automatic candidates; the qualifier alone decides then.
                if let Ok(candidates) = self.candidates(root, target) {
                    if candidates.len() > 1 {
                        return Err(ambiguity(
                            target,
                            &candidates,
                            "the fail strategy rejects every ambiguous reference",
                        ));
                    }
                }
            }
            return Ok(qualifier.clone());
        }
        let mut candidates = self.candidates(root, target)?;
        if candidates.len() == 1 {
            return Ok(candidates.remove(0));
        }
        match strategy {
            AliasResolveStrategy::First => {
                debug!(
                    root = %root.name(),
                    target = %target,
                    chosen = %candidates[0],
                    candidates = candidates.len(),
                    "graph.auto_join.ambiguous"
                );
                Ok(candidates.remove(0))
            }
            AliasResolveStrategy::All => Err(ambiguity(
                target,
                &candidates,
                "qualify the reference with a relation path",
            )),
            AliasResolveStrategy::Fail => Err(ambiguity(
                target,
                &candidates,
                "the fail strategy rejects every ambiguous reference",
            )),
        }
    }
}

pub(crate) fn ambiguity(target: &str, candidates: &[Metamodel], message: &str) -> QueryError {
    QueryError::AliasAmbiguity {
        entity: target.to_owned(),
        candidates: candidates.iter().map(Metamodel::dotted).collect(),
        message: message.to_owned(),
    }
}
