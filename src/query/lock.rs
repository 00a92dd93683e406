//! Optimistic locking: version predicates on record updates and deletes, and
//! classification of zero-row results.

use tracing::warn;

use crate::error::{QueryError, Result};
use crate::model::EntityDescriptor;
use crate::query::compiler::Statement;
use crate::query::predicate::Predicate;
use crate::query::template::ColumnRef;
use crate::value::{BoundParam, Record, Value};

/// `version = <current>` for records of a versioned entity, `None` otherwise.
pub fn version_predicate(descriptor: &EntityDescriptor, record: &Record) -> Result<Option<Predicate>> {
    let Some(column) = descriptor.version_column() else {
        return Ok(None);
    };
    let path = ColumnRef::new(column.path.as_str()).inner();
    match record.get(&column.name) {
        None => Err(QueryError::InvalidArgument(format!(
            "{} record lacks version column '{}'",
            descriptor.name(),
            column.name
        ))),
        Some(Value::Null) => Ok(Some(Predicate::is_null(path))),
        Some(value) => Ok(Some(Predicate::eq(path, value.clone()))),
    }
}

/// Value the version column takes after a successful write.
pub fn next_version(current: &Value) -> Result<Value> {
    match current {
        Value::Null => Ok(Value::Int(1)),
        Value::Int(v) => v
            .checked_add(1)
            .map(Value::Int)
            .ok_or_else(|| QueryError::InvalidArgument("version counter overflow".into())),
        other => Err(QueryError::InvalidArgument(format!(
            "version value {other} is not an integer"
        ))),
    }
}

/// `SET` parameter for the version column of `record`, if versioned.
pub(crate) fn version_increment(
    descriptor: &EntityDescriptor,
    record: &Record,
) -> Result<Option<(String, BoundParam)>> {
    let Some(column) = descriptor.version_column() else {
        return Ok(None);
    };
    let current = record.get(&column.name).cloned().unwrap_or(Value::Null);
    let next = next_version(&current)?;
    Ok(Some((
        column.name.clone(),
        BoundParam {
            value: next,
            hint: column.sql_type,
        },
    )))
}

/// Maps the affected-row count of a record update/delete to its outcome:
/// zero rows is a conflict when the version was checked, a missing row
/// otherwise.
pub fn check_affected(statement: &Statement, affected: u64) -> Result<()> {
    if affected > 0 || !statement.expects_row {
        return Ok(());
    }
    let entity = statement.root.clone().unwrap_or_default();
    if statement.version_checked {
        warn!(entity = %entity, "lock.version.conflict");
        return Err(QueryError::ConcurrencyConflict { entity });
    }
    Err(QueryError::EntityNotFound { entity })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityDecl;
    use crate::query::compiler::StatementKind;

    fn versioned() -> EntityDescriptor {
        EntityDescriptor::from_decl(
            &EntityDecl::new("doc", "doc").id("id").column("body").version("version"),
        )
        .expect("valid")
    }

    fn statement(version_checked: bool) -> Statement {
        Statement {
            sql: String::new(),
            params: Vec::new(),
            kind: StatementKind::Update,
            root: Some("doc".into()),
            projection: Vec::new(),
            version_checked,
            expects_row: true,
            returning: Vec::new(),
        }
    }

    #[test]
    fn predicate_compares_current_version() {
        let record = Record::new("doc").with("id", 1i64).with("version", 4i64);
        let predicate = version_predicate(&versioned(), &record)
            .expect("valid")
            .expect("versioned");
        assert_eq!(predicate, Predicate::eq(ColumnRef::new("version").inner(), 4i64));
        let unversioned =
            EntityDescriptor::from_decl(&EntityDecl::new("tag", "tag").id("id")).expect("valid");
        assert!(version_predicate(&unversioned, &record).expect("valid").is_none());
    }

    #[test]
    fn increments_version() {
        assert_eq!(next_version(&Value::Int(4)).expect("int"), Value::Int(5));
        assert_eq!(next_version(&Value::Null).expect("null"), Value::Int(1));
        assert!(next_version(&Value::from("x")).is_err());
    }

    #[test]
    fn zero_rows_classify_by_version_check() {
        assert_eq!(
            check_affected(&statement(true), 0).unwrap_err().code(),
            "ConcurrencyConflictError"
        );
        assert_eq!(
            check_affected(&statement(false), 0).unwrap_err().code(),
            "EntityNotFound"
        );
        check_affected(&statement(true), 1).expect("row written");
    }
}
