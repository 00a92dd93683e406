//! Handles for deferred relations: the target's identity until it is
//! explicitly fetched.

use crate::error::{QueryError, Result};
use crate::exec::{Session, StatementExecutor};
use crate::model::EntityDescriptor;
use crate::query::predicate::Operand;
use crate::value::{Record, Value};

/// A related entity that is either known only by identity or loaded.
#[derive(Clone, Debug, PartialEq)]
pub enum Ref {
    Unresolved { entity: String, id: Vec<Value> },
    Resolved(Record),
}

impl Ref {
    /// Handle for a single-column identity.
    pub fn unresolved(entity: impl Into<String>, id: impl Into<Value>) -> Self {
        Ref::Unresolved {
            entity: entity.into(),
            id: vec![id.into()],
        }
    }

    /// Handle for the target of `relation` on a loaded `record`, read from
    /// its owning columns. `None` when every owning column is null.
    pub fn from_relation(
        descriptor: &EntityDescriptor,
        record: &Record,
        relation: &str,
    ) -> Result<Option<Self>> {
        let Some(rel) = descriptor.relations().iter().find(|r| r.path == relation) else {
            return Err(QueryError::path(
                relation,
                format!("'{}' has no relation '{relation}'", descriptor.name()),
            ));
        };
        let id: Vec<Value> = rel
            .columns
            .iter()
            .map(|&idx| {
                record
                    .get(&descriptor.column(idx).name)
                    .cloned()
                    .unwrap_or(Value::Null)
            })
            .collect();
        if id.iter().all(Value::is_null) {
            return Ok(None);
        }
        Ok(Some(Ref::Unresolved {
            entity: rel.target.clone(),
            id,
        }))
    }

    pub fn entity(&self) -> &str {
        match self {
            Ref::Unresolved { entity, .. } => entity,
            Ref::Resolved(record) => &record.entity,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Ref::Resolved(_))
    }

    /// The loaded record, if fetched.
    pub fn get(&self) -> Option<&Record> {
        match self {
            Ref::Resolved(record) => Some(record),
            Ref::Unresolved { .. } => None,
        }
    }

    /// Loads the target row by identity on first call; later calls return
    /// the cached record.
    pub fn fetch<E: StatementExecutor>(&mut self, session: &mut Session<E>) -> Result<&Record> {
        if let Ref::Unresolved { entity, id } = self {
            let record = load(session, entity, id)?;
            *self = Ref::Resolved(record);
        }
        match self {
            Ref::Resolved(record) => Ok(record),
            Ref::Unresolved { entity, .. } => Err(QueryError::EntityNotFound {
                entity: entity.clone(),
            }),
        }
    }
}

fn load<E: StatementExecutor>(session: &mut Session<E>, entity: &str, id: &[Value]) -> Result<Record> {
    let descriptor = session.context().descriptor(entity)?;
    if descriptor.identity().len() != id.len() {
        return Err(QueryError::InvalidArgument(format!(
            "'{entity}' identity has {} column(s), handle carries {}",
            descriptor.identity().len(),
            id.len()
        )));
    }
    let key = descriptor
        .identity_columns()
        .zip(id)
        .fold(Record::new(entity), |key, (column, value)| {
            key.with(column.name.clone(), value.clone())
        });
    session
        .find_by_id(entity, Operand::Entity(key))?
        .ok_or_else(|| QueryError::EntityNotFound {
            entity: entity.to_owned(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityDecl;

    #[test]
    fn handle_reads_owning_columns() {
        let employee = EntityDescriptor::from_decl(
            &EntityDecl::new("employee", "employee")
                .id("id")
                .deferred_relation("manager", "employee"),
        )
        .expect("valid");
        let record = Record::new("employee").with("id", 2i64).with("manager_id", 1i64);
        let handle = Ref::from_relation(&employee, &record, "manager")
            .expect("relation exists")
            .expect("manager set");
        assert_eq!(handle, Ref::unresolved("employee", 1i64));
        assert!(!handle.is_resolved());

        let top = Record::new("employee").with("id", 1i64).with("manager_id", Value::Null);
        assert!(Ref::from_relation(&employee, &top, "manager")
            .expect("relation exists")
            .is_none());
        assert_eq!(
            Ref::from_relation(&employee, &top, "boss").unwrap_err().code(),
            "PathResolutionError"
        );
    }
}
