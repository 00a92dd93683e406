//! Insert, update and delete builders.

use std::sync::Arc;

use crate::context::Context;
use crate::error::{QueryError, Result};
use crate::model::EntityDescriptor;
use crate::query::compiler::{Compiler, Statement};
use crate::query::lock::{version_increment, version_predicate};
use crate::query::metamodel::Metamodel;
use crate::query::predicate::{Operand, Predicate};
use crate::query::template::{ColumnRef, Segment, Template};
use crate::value::{BoundParam, Record, Value};

fn check_entity(descriptor: &EntityDescriptor, record: &Record) -> Result<()> {
    if record.entity != descriptor.name() {
        return Err(QueryError::InvalidArgument(format!(
            "{} record handed to a '{}' statement",
            record.entity,
            descriptor.name()
        )));
    }
    Ok(())
}

fn identity_predicate(record: &Record) -> Predicate {
    Predicate::eq(
        ColumnRef::new(Metamodel::root()).inner(),
        Operand::Entity(record.clone()),
    )
}

/// Multi-row `INSERT`.
#[derive(Clone, Debug)]
pub struct InsertBuilder {
    entity: String,
    records: Vec<Record>,
}

impl InsertBuilder {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            records: Vec::new(),
        }
    }

    pub fn record(mut self, record: Record) -> Self {
        self.records.push(record);
        self
    }

    pub fn records(mut self, records: impl IntoIterator<Item = Record>) -> Self {
        self.records.extend(records);
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Compiles one statement inserting every record.
    ///
    /// Generated identity columns are left to the database and, when
    /// `returning_keys` is set, read back through `RETURNING`. A record that
    /// already carries a generated key is a mapping error.
    pub fn to_statement(&self, ctx: &Context) -> Result<Statement> {
        if self.records.is_empty() {
            return Err(QueryError::InvalidArgument(format!(
                "insert into '{}' needs at least one record",
                self.entity
            )));
        }
        let descriptor = ctx.descriptor(&self.entity)?;
        let generated = descriptor.has_generated_identity();
        for record in &self.records {
            check_entity(&descriptor, record)?;
            if generated && !descriptor.is_new(record) {
                return Err(QueryError::mapping(
                    descriptor.name(),
                    "explicit key supplied for a database-generated identity",
                ));
            }
        }
        let columns: Vec<_> = descriptor
            .columns()
            .iter()
            .filter(|c| c.insertable && !c.generated)
            .collect();
        if columns.is_empty() {
            return Err(QueryError::mapping(
                descriptor.name(),
                "entity has no insertable column",
            ));
        }

        // Columns no record sets are left to their database defaults.
        let columns: Vec<_> = columns
            .into_iter()
            .filter(|c| {
                c.primary_key
                    || c.version
                    || self.records.iter().any(|r| r.get(&c.name).is_some())
            })
            .collect();
        let mut template = Template::new()
            .sql("INSERT INTO ")
            .table(self.entity.as_str());
        if columns.is_empty() {
            if self.records.len() > 1 {
                return Err(QueryError::InvalidArgument(format!(
                    "multi-row insert into '{}' sets no column",
                    self.entity
                )));
            }
            template = template.sql(" DEFAULT VALUES");
            return self.finish(ctx, &descriptor, template);
        }
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        template = template.sql(format!(" ({}) VALUES ", names.join(", ")));
        for (row, record) in self.records.iter().enumerate() {
            template = template.sql(if row == 0 { "(" } else { ", (" });
            for (i, column) in columns.iter().enumerate() {
                if i > 0 {
                    template = template.sql(", ");
                }
                let value = match record.get(&column.name) {
                    Some(value) => value.clone(),
                    None if column.version => Value::Int(0),
                    None => Value::Null,
                };
                template = template.push(Segment::Param(BoundParam {
                    value,
                    hint: column.sql_type,
                }));
            }
            template = template.sql(")");
        }
        self.finish(ctx, &descriptor, template)
    }

    fn finish(
        &self,
        ctx: &Context,
        descriptor: &EntityDescriptor,
        mut template: Template,
    ) -> Result<Statement> {
        let generated = descriptor.has_generated_identity();
        let returning: Vec<String> = if generated && ctx.config().returning_keys {
            descriptor.identity_columns().map(|c| c.name.clone()).collect()
        } else {
            Vec::new()
        };
        if !returning.is_empty() {
            template = template.sql(format!(" RETURNING {}", returning.join(", ")));
        }
        let mut statement = Compiler::new(ctx).compile(&template)?;
        statement.returning = returning;
        Ok(statement)
    }
}

#[derive(Clone, Debug)]
enum UpdateTarget {
    Record(Record),
    Filter {
        assignments: Vec<(ColumnRef, Operand)>,
        predicate: Option<Predicate>,
        unsafe_all: bool,
    },
}

/// `UPDATE` of one record or of every row matching a filter.
#[derive(Clone, Debug)]
pub struct UpdateBuilder {
    entity: String,
    target: UpdateTarget,
    error: Option<String>,
}

impl UpdateBuilder {
    /// Bulk update over `entity`; needs [`set`](Self::set) plus a filter or
    /// [`unsafe_all`](Self::unsafe_all).
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            target: UpdateTarget::Filter {
                assignments: Vec::new(),
                predicate: None,
                unsafe_all: false,
            },
            error: None,
        }
    }

    /// Writes every updatable column present in `record`, located by
    /// identity and guarded by its version when the entity has one.
    pub fn for_record(record: Record) -> Self {
        Self {
            entity: record.entity.clone(),
            target: UpdateTarget::Record(record),
            error: None,
        }
    }

    pub fn set(mut self, path: impl Into<ColumnRef>, value: impl Into<Operand>) -> Self {
        match &mut self.target {
            UpdateTarget::Filter { assignments, .. } => {
                let path: ColumnRef = path.into();
                assignments.push((path.inner(), value.into()));
            }
            UpdateTarget::Record(_) => {
                self.error.get_or_insert_with(|| "set() does not apply to a record update".into());
            }
        }
        self
    }

    /// Restricts the update. Only one unconditioned filter is allowed.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        match &mut self.target {
            UpdateTarget::Filter { predicate: slot, .. } => {
                if slot.is_some() {
                    self.error
                        .get_or_insert_with(|| "multiple unconditioned filters".into());
                } else {
                    *slot = Some(predicate);
                }
            }
            UpdateTarget::Record(_) => {
                self.error
                    .get_or_insert_with(|| "filter() does not apply to a record update".into());
            }
        }
        self
    }

    /// Allows the update to touch every row.
    pub fn unsafe_all(mut self) -> Self {
        if let UpdateTarget::Filter { unsafe_all, .. } = &mut self.target {
            *unsafe_all = true;
        }
        self
    }

    pub fn to_statement(&self, ctx: &Context) -> Result<Statement> {
        if let Some(message) = &self.error {
            return Err(QueryError::template(message.clone()));
        }
        let descriptor = ctx.descriptor(&self.entity)?;
        match &self.target {
            UpdateTarget::Record(record) => record_update(ctx, &descriptor, record),
            UpdateTarget::Filter {
                assignments,
                predicate,
                unsafe_all,
            } => {
                if assignments.is_empty() {
                    return Err(QueryError::template(format!(
                        "update of '{}' assigns no column",
                        self.entity
                    )));
                }
                let mut template = Template::new()
                    .sql("UPDATE ")
                    .table(self.entity.as_str())
                    .sql(" SET ");
                for (i, (path, value)) in assignments.iter().enumerate() {
                    if i > 0 {
                        template = template.sql(", ");
                    }
                    template = template.column(path.clone()).sql(" = ");
                    template = push_operand(template, value)?;
                }
                template = where_clause(template, predicate.as_ref(), *unsafe_all, "update")?;
                Compiler::new(ctx).compile(&template)
            }
        }
    }
}

fn push_operand(template: Template, operand: &Operand) -> Result<Template> {
    match operand {
        Operand::Value(value) => Ok(template.param(value.clone())),
        Operand::Typed(param) => Ok(template.push(Segment::Param(
            param.clone(),
        ))),
        _ => Err(QueryError::template(
            "an assignment takes a single value",
        )),
    }
}

fn where_clause(
    template: Template,
    predicate: Option<&Predicate>,
    unsafe_all: bool,
    verb: &str,
) -> Result<Template> {
    match predicate {
        Some(predicate) => Ok(template.sql(" WHERE ").condition(predicate.clone())),
        None if unsafe_all => Ok(template),
        None => Err(QueryError::template(format!(
            "{verb} without a filter; call unsafe_all() to touch every row"
        ))),
    }
}

fn record_update(ctx: &Context, descriptor: &Arc<EntityDescriptor>, record: &Record) -> Result<Statement> {
    check_entity(descriptor, record)?;
    let mut template = Template::new()
        .sql("UPDATE ")
        .table(descriptor.name())
        .sql(" SET ");
    let mut assigned = 0usize;
    for column in descriptor.columns() {
        if !column.updatable || column.primary_key || column.generated || column.version {
            continue;
        }
        let Some(value) = record.get(&column.name) else {
            continue;
        };
        if assigned > 0 {
            template = template.sql(", ");
        }
        template = template.sql(format!("{} = ", column.name)).push(
            Segment::Param(BoundParam {
                value: value.clone(),
                hint: column.sql_type,
            }),
        );
        assigned += 1;
    }
    if let Some((name, next)) = version_increment(descriptor, record)? {
        if assigned > 0 {
            template = template.sql(", ");
        }
        template = template
            .sql(format!("{name} = "))
            .push(Segment::Param(next));
        assigned += 1;
    }
    if assigned == 0 {
        return Err(QueryError::InvalidArgument(format!(
            "{} record carries no updatable column",
            descriptor.name()
        )));
    }
    let version = version_predicate(descriptor, record)?;
    let mut predicate = identity_predicate(record);
    if let Some(version) = &version {
        predicate = predicate.and(version.clone());
    }
    template = template.sql(" WHERE ").condition(predicate);
    let mut statement = Compiler::new(ctx).compile(&template)?;
    statement.version_checked = version.is_some();
    statement.expects_row = true;
    Ok(statement)
}

/// `DELETE` of one record or of every row matching a filter.
#[derive(Clone, Debug)]
pub struct DeleteBuilder {
    entity: String,
    record: Option<Record>,
    predicate: Option<Predicate>,
    unsafe_all: bool,
    error: Option<String>,
}

impl DeleteBuilder {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            record: None,
            predicate: None,
            unsafe_all: false,
            error: None,
        }
    }

    /// Deletes `record` by identity, guarded by its version when versioned.
    pub fn for_record(record: Record) -> Self {
        Self {
            entity: record.entity.clone(),
            record: Some(record),
            predicate: None,
            unsafe_all: false,
            error: None,
        }
    }

    /// Restricts the delete. Only one unconditioned filter is allowed.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        if self.record.is_some() {
            self.error
                .get_or_insert_with(|| "filter() does not apply to a record delete".into());
        } else if self.predicate.is_some() {
            self.error
                .get_or_insert_with(|| "multiple unconditioned filters".into());
        } else {
            self.predicate = Some(predicate);
        }
        self
    }

    /// Allows the delete to remove every row.
    pub fn unsafe_all(mut self) -> Self {
        self.unsafe_all = true;
        self
    }

    pub fn to_statement(&self, ctx: &Context) -> Result<Statement> {
        if let Some(message) = &self.error {
            return Err(QueryError::template(message.clone()));
        }
        let descriptor = ctx.descriptor(&self.entity)?;
        let template = Template::new()
            .sql("DELETE FROM ")
            .table(descriptor.name());
        let Some(record) = &self.record else {
            let template = where_clause(template, self.predicate.as_ref(), self.unsafe_all, "delete")?;
            return Compiler::new(ctx).compile(&template);
        };
        check_entity(&descriptor, record)?;
        let version = version_predicate(&descriptor, record)?;
        let mut predicate = identity_predicate(record);
        if let Some(version) = &version {
            predicate = predicate.and(version.clone());
        }
        let mut statement =
            Compiler::new(ctx).compile(&template.sql(" WHERE ").condition(predicate))?;
        statement.version_checked = version.is_some();
        statement.expects_row = true;
        Ok(statement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompileConfig;
    use crate::model::{Catalog, EntityDecl};
    use crate::query::compiler::StatementKind;

    fn ctx() -> Context {
        Context::from_catalog(
            Catalog::new()
                .with(EntityDecl::new("owner", "owner").id("id").column("last_name"))
                .with(
                    EntityDecl::new("pet", "pet")
                        .id("id")
                        .column("name")
                        .relation("owner", "owner")
                        .version("version"),
                )
                .with(EntityDecl::new("tag", "tag").key("code").column("label")),
            CompileConfig::default(),
        )
    }

    #[test]
    fn multi_row_insert_omits_generated_identity() {
        let ctx = ctx();
        let stmt = InsertBuilder::new("pet")
            .record(Record::new("pet").with("name", "Leo").with("owner_id", 1i64))
            .record(Record::new("pet").with("name", "Max").with("owner_id", 2i64))
            .to_statement(&ctx)
            .expect("compiles");
        assert_eq!(
            stmt.sql,
            "INSERT INTO pet (name, owner_id, version) VALUES (?, ?, ?), (?, ?, ?) RETURNING id"
        );
        assert_eq!(stmt.kind, StatementKind::Insert);
        assert_eq!(stmt.params.len(), 6);
        assert_eq!(stmt.params[2].value, Value::Int(0));
        assert_eq!(stmt.returning, ["id"]);
    }

    #[test]
    fn explicit_key_for_generated_identity_is_a_mapping_error() {
        let err = InsertBuilder::new("pet")
            .record(Record::new("pet").with("id", 9i64).with("name", "Leo"))
            .to_statement(&ctx())
            .unwrap_err();
        assert_eq!(err.code(), "MappingError");
        let err = InsertBuilder::new("pet").to_statement(&ctx()).unwrap_err();
        assert_eq!(err.code(), "InvalidArgument");
    }

    #[test]
    fn caller_assigned_keys_are_inserted() {
        let stmt = InsertBuilder::new("tag")
            .record(Record::new("tag").with("code", "vip").with("label", "VIP"))
            .to_statement(&ctx())
            .expect("compiles");
        assert_eq!(stmt.sql, "INSERT INTO tag (code, label) VALUES (?, ?)");
        assert!(stmt.returning.is_empty());
    }

    #[test]
    fn unset_columns_are_left_to_database_defaults() {
        let stmt = InsertBuilder::new("pet")
            .record(Record::new("pet").with("name", "Leo"))
            .to_statement(&ctx())
            .expect("compiles");
        assert_eq!(
            stmt.sql,
            "INSERT INTO pet (name, version) VALUES (?, ?) RETURNING id"
        );
        assert_eq!(stmt.params[1].value, Value::Int(0));

        let stmt = InsertBuilder::new("tag")
            .record(Record::new("tag").with("code", "vip"))
            .to_statement(&ctx())
            .expect("compiles");
        assert_eq!(stmt.sql, "INSERT INTO tag (code) VALUES (?)");

        // Mixed rows bind NULL where a record lacks a column another one sets.
        let stmt = InsertBuilder::new("tag")
            .record(Record::new("tag").with("code", "a").with("label", "A"))
            .record(Record::new("tag").with("code", "b"))
            .to_statement(&ctx())
            .expect("compiles");
        assert_eq!(stmt.sql, "INSERT INTO tag (code, label) VALUES (?, ?), (?, ?)");
        assert_eq!(stmt.params[3].value, Value::Null);
    }

    #[test]
    fn record_update_checks_and_bumps_version() {
        let record = Record::new("pet")
            .with("id", 4i64)
            .with("name", "Rex")
            .with("owner_id", 1i64)
            .with("version", 2i64);
        let stmt = UpdateBuilder::for_record(record)
            .to_statement(&ctx())
            .expect("compiles");
        assert_eq!(
            stmt.sql,
            "UPDATE pet SET name = ?, owner_id = ?, version = ? WHERE id = ? AND version = ?"
        );
        let values: Vec<_> = stmt.params.iter().map(|p| p.value.clone()).collect();
        assert_eq!(
            values,
            [Value::from("Rex"), Value::Int(1), Value::Int(3), Value::Int(4), Value::Int(2)]
        );
        assert!(stmt.version_checked);
        assert!(stmt.expects_row);
    }

    #[test]
    fn bulk_update_and_delete_need_filter_or_opt_in() {
        let ctx = ctx();
        let err = UpdateBuilder::new("pet")
            .set("name", "x")
            .to_statement(&ctx)
            .unwrap_err();
        assert_eq!(err.code(), "SqlTemplateException");
        let stmt = UpdateBuilder::new("pet")
            .set("name", "x")
            .filter(Predicate::eq("owner", 3i64))
            .to_statement(&ctx)
            .expect("filtered");
        assert_eq!(stmt.sql, "UPDATE pet SET name = ? WHERE owner_id = ?");
        let stmt = DeleteBuilder::new("pet")
            .unsafe_all()
            .to_statement(&ctx)
            .expect("opted in");
        assert_eq!(stmt.sql, "DELETE FROM pet");
        assert_eq!(stmt.kind, StatementKind::Delete);
        let err = DeleteBuilder::new("pet").to_statement(&ctx).unwrap_err();
        assert_eq!(err.code(), "SqlTemplateException");
    }

    #[test]
    fn record_delete_without_version_expects_a_row() {
        let stmt = DeleteBuilder::for_record(Record::new("tag").with("code", "vip"))
            .to_statement(&ctx())
            .expect("compiles");
        assert_eq!(stmt.sql, "DELETE FROM tag WHERE code = ?");
        assert!(!stmt.version_checked);
        assert!(stmt.expects_row);
    }
}
