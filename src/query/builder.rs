//! Fluent select builder.
//!
//! Every call consumes the builder and returns the next state, so a state
//! handed out earlier is never changed; clone a builder to branch it. Errors
//! are sticky: the first misuse is kept and reported by the terminal call.

use crate::context::Context;
use crate::error::{QueryError, Result};
use crate::query::compiler::{Compiler, Statement};
use crate::query::metamodel::Metamodel;
use crate::query::predicate::{Operand, Operator, Predicate};
use crate::query::template::{ColumnRef, EntityRef, JoinKind, JoinSpec, Segment, Template};
use crate::value::{Record, Value};

/// What the select list returns.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Projection {
    /// Every column of the root entity, joined relations included.
    #[default]
    Entity,
    /// Explicit column paths.
    Columns(Vec<ColumnRef>),
    /// Caller-written select list.
    Template(Template),
}

/// Sort direction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Order {
    Asc,
    Desc,
}

/// Row lock requested with the select.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LockMode {
    Update,
    Share,
}

/// Immutable select-statement builder rooted at one entity.
#[derive(Clone, Debug)]
pub struct QueryBuilder {
    root: String,
    alias: Option<String>,
    joins: Vec<JoinSpec>,
    predicate: Option<Predicate>,
    projection: Projection,
    distinct: bool,
    group_by: Vec<ColumnRef>,
    having: Option<Predicate>,
    order_by: Vec<(ColumnRef, Order)>,
    limit: Option<u64>,
    offset: Option<u64>,
    lock: Option<LockMode>,
    error: Option<String>,
}

impl QueryBuilder {
    /// Starts a select over `entity`.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            root: entity.into(),
            alias: None,
            joins: Vec::new(),
            predicate: None,
            projection: Projection::Entity,
            distinct: false,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            lock: None,
            error: None,
        }
    }

    /// Root entity name.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Current predicate tree, if any filter was added.
    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }

    /// Gives the root table an explicit alias.
    pub fn aliased(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Adds an explicit join.
    pub fn join(mut self, join: JoinSpec) -> Self {
        if self.error.is_some() {
            return self;
        }
        self.joins.push(join);
        self
    }

    /// Inner-joins a relation path; required before filtering through a
    /// deferred relation.
    pub fn join_path(self, path: impl Into<Metamodel>) -> Self {
        self.join(JoinSpec::path(path, JoinKind::Inner))
    }

    /// Left-joins a relation path.
    pub fn left_join_path(self, path: impl Into<Metamodel>) -> Self {
        self.join(JoinSpec::path(path, JoinKind::Left))
    }

    /// Sets the filter. Only one unconditioned filter is allowed; further
    /// conditions go through [`and_where`](Self::and_where) or
    /// [`or_where`](Self::or_where).
    pub fn filter(mut self, predicate: Predicate) -> Self {
        if self.error.is_some() {
            return self;
        }
        if self.predicate.is_some() {
            self.error = Some(MULTIPLE_FILTERS.into());
            return self;
        }
        self.predicate = Some(predicate);
        self
    }

    /// Sets the filter from a predicate built in `build`. Like
    /// [`filter`](Self::filter) it takes one condition; several must be
    /// combined with [`PredicateBuilder::and_group`] or
    /// [`PredicateBuilder::or_group`].
    pub fn filter_with<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&mut PredicateBuilder),
    {
        if self.error.is_some() {
            return self;
        }
        match PredicateBuilder::build_group(PredicateMode::Single, build) {
            Ok(predicate) => self.filter(predicate),
            Err(message) => {
                self.error = Some(message);
                self
            }
        }
    }

    /// Filters on the root identity. `value` may be an entity record for
    /// composite identities.
    pub fn where_id(self, value: impl Into<Operand>) -> Self {
        self.filter(Predicate::eq(ColumnRef::new(Metamodel::root()), value))
    }

    /// Filters with a caller-written condition.
    pub fn where_raw(self, template: Template) -> Self {
        self.filter(Predicate::raw(template))
    }

    /// Filters on root rows related to `record` through its identity or
    /// foreign keys.
    pub fn where_matches(self, record: Record) -> Self {
        self.filter(Predicate::matches(record))
    }

    /// Like [`where_matches`](Self::where_matches) through an explicit
    /// relation path.
    pub fn where_matches_via(self, record: Record, path: impl Into<Metamodel>) -> Self {
        self.filter(Predicate::matches_via(record, path))
    }

    /// ANDs a condition onto the filter.
    pub fn and_where(mut self, predicate: Predicate) -> Self {
        if self.error.is_some() {
            return self;
        }
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    /// ORs a condition onto the filter.
    pub fn or_where(mut self, predicate: Predicate) -> Self {
        if self.error.is_some() {
            return self;
        }
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => existing.or(predicate),
            None => predicate,
        });
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Replaces the entity projection with explicit columns.
    pub fn columns<I, C>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<ColumnRef>,
    {
        if self.error.is_some() {
            return self;
        }
        let columns: Vec<ColumnRef> = columns.into_iter().map(Into::into).collect();
        if columns.is_empty() {
            self.error = Some("column projection requires at least one column".into());
            return self;
        }
        self.projection = Projection::Columns(columns);
        self
    }

    /// Replaces the entity projection with a caller-written select list.
    pub fn project(mut self, template: Template) -> Self {
        self.projection = Projection::Template(template);
        self
    }

    pub fn group_by(mut self, column: impl Into<ColumnRef>) -> Self {
        self.group_by.push(column.into());
        self
    }

    pub fn having(mut self, predicate: Predicate) -> Self {
        if self.error.is_some() {
            return self;
        }
        if self.group_by.is_empty() {
            self.error = Some("having requires a group_by column".into());
            return self;
        }
        self.having = Some(match self.having.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    pub fn order_by(mut self, column: impl Into<ColumnRef>) -> Self {
        self.order_by.push((column.into(), Order::Asc));
        self
    }

    pub fn order_by_desc(mut self, column: impl Into<ColumnRef>) -> Self {
        self.order_by.push((column.into(), Order::Desc));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Appends `FOR UPDATE`.
    pub fn for_update(mut self) -> Self {
        self.lock = Some(LockMode::Update);
        self
    }

    /// Appends `FOR SHARE`.
    pub fn for_share(mut self) -> Self {
        self.lock = Some(LockMode::Share);
        self
    }

    fn check(&self) -> Result<()> {
        match &self.error {
            Some(message) => Err(QueryError::template(message.clone())),
            None => Ok(()),
        }
    }

    fn root_ref(&self) -> EntityRef {
        let root = EntityRef::new(self.root.clone()).inner();
        match &self.alias {
            Some(alias) => root.aliased(alias.clone()),
            None => root,
        }
    }

    /// FROM list, joins, and WHERE clause.
    fn body(&self) -> Template {
        let mut template = Template::new().sql(" FROM ");
        template.push_mut(Segment::From {
            entity: self.root.clone(),
            alias: self.alias.clone(),
        });
        for join in &self.joins {
            template.push_mut(Segment::Join(join.clone()));
        }
        if let Some(predicate) = &self.predicate {
            template = template.sql(" WHERE ").condition(predicate.clone());
        }
        template
    }

    fn grouping(&self, mut template: Template) -> Template {
        template = push_columns(template, " GROUP BY ", &self.group_by);
        if let Some(having) = &self.having {
            template = template.sql(" HAVING ").condition(having.clone());
        }
        template
    }

    fn projection(&self) -> Template {
        let head = Template::new().sql(if self.distinct {
            "SELECT DISTINCT "
        } else {
            "SELECT "
        });
        match &self.projection {
            Projection::Entity => head.select(self.root_ref()),
            Projection::Columns(columns) => push_columns(head, "", columns),
            Projection::Template(template) => head.append(template.clone()),
        }
    }

    /// The fragment sequence of the full select.
    pub fn to_template(&self) -> Result<Template> {
        self.check()?;
        let mut template = self.grouping(self.projection().append(self.body()));
        if !self.order_by.is_empty() {
            template = template.sql(" ORDER BY ");
            for (i, (column, order)) in self.order_by.iter().enumerate() {
                if i > 0 {
                    template = template.sql(", ");
                }
                template = template.column(column.clone()).sql(match order {
                    Order::Asc => " ASC",
                    Order::Desc => " DESC",
                });
            }
        }
        if let Some(limit) = self.limit {
            template = template.sql(" LIMIT ").param(to_i64(limit)?);
        }
        if let Some(offset) = self.offset {
            if self.limit.is_none() {
                // Offset alone is not valid in every dialect.
                template = template.sql(" LIMIT ").param(-1i64);
            }
            template = template.sql(" OFFSET ").param(to_i64(offset)?);
        }
        match self.lock {
            Some(LockMode::Update) => template = template.sql(" FOR UPDATE"),
            Some(LockMode::Share) => template = template.sql(" FOR SHARE"),
            None => {}
        }
        Ok(template)
    }

    /// Compiles the select.
    pub fn to_statement(&self, ctx: &Context) -> Result<Statement> {
        Compiler::new(ctx).compile(&self.to_template()?)
    }

    /// Compiles `SELECT COUNT(*)` over the same rows. Ordering, pagination
    /// and locking do not apply.
    pub fn to_count_statement(&self, ctx: &Context) -> Result<Statement> {
        self.check()?;
        let template = if self.group_by.is_empty() && !self.distinct {
            Template::new().sql("SELECT COUNT(*)").append(self.body())
        } else {
            let inner = self.grouping(self.projection().append(self.body()));
            Template::new()
                .sql("SELECT COUNT(*) FROM ")
                .subquery(inner)
                .sql(" counted")
        };
        Compiler::new(ctx).compile(&template)
    }

    /// Compiles `SELECT EXISTS (SELECT 1 ...)`.
    pub fn to_exists_statement(&self, ctx: &Context) -> Result<Statement> {
        self.exists_statement(ctx, false)
    }

    /// Compiles `SELECT NOT EXISTS (SELECT 1 ...)`.
    pub fn to_not_exists_statement(&self, ctx: &Context) -> Result<Statement> {
        self.exists_statement(ctx, true)
    }

    fn exists_statement(&self, ctx: &Context, negated: bool) -> Result<Statement> {
        self.check()?;
        let inner = self.grouping(Template::new().sql("SELECT 1").append(self.body()));
        let template = Template::new()
            .sql(if negated {
                "SELECT NOT EXISTS "
            } else {
                "SELECT EXISTS "
            })
            .subquery(inner);
        Compiler::new(ctx).compile(&template)
    }

    /// The WHERE predicate wrapped for use as a sub-query.
    pub(crate) fn as_subquery(&self) -> Result<Template> {
        self.check()?;
        Ok(self.grouping(Template::new().sql("SELECT 1").append(self.body())))
    }
}

fn push_columns(mut template: Template, prefix: &str, columns: &[ColumnRef]) -> Template {
    if columns.is_empty() {
        return template;
    }
    if !prefix.is_empty() {
        template = template.sql(prefix);
    }
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            template = template.sql(", ");
        }
        template = template.column(column.clone());
    }
    template
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| QueryError::InvalidArgument(format!("{value} does not fit a SQL integer")))
}

const MULTIPLE_FILTERS: &str =
    "multiple unconditioned filters; combine them with and_where, or_where or a predicate group";

#[derive(Clone, Copy, Debug)]
enum PredicateMode {
    /// Root of `filter_with`: exactly one condition, no implicit junction.
    Single,
    And,
    Or,
}

/// Collects conditions for one predicate group.
pub struct PredicateBuilder {
    mode: PredicateMode,
    predicates: Vec<Predicate>,
    error: Option<String>,
}

impl PredicateBuilder {
    fn with_mode(mode: PredicateMode) -> Self {
        Self {
            mode,
            predicates: Vec::new(),
            error: None,
        }
    }

    fn build_group<F>(mode: PredicateMode, build: F) -> std::result::Result<Predicate, String>
    where
        F: FnOnce(&mut PredicateBuilder),
    {
        let mut nested = PredicateBuilder::with_mode(mode);
        build(&mut nested);
        if let Some(message) = nested.error {
            return Err(message);
        }
        let mut predicates = nested.predicates;
        match predicates.len() {
            0 => Err("predicate group must emit at least one predicate".into()),
            1 => Ok(predicates.remove(0)),
            _ => match nested.mode {
                PredicateMode::Single => Err(MULTIPLE_FILTERS.into()),
                PredicateMode::And => Ok(Predicate::And(predicates)),
                PredicateMode::Or => Ok(Predicate::Or(predicates)),
            },
        }
    }

    fn record_error(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(message);
        }
    }

    /// Adds a prebuilt predicate.
    pub fn push(&mut self, predicate: Predicate) -> &mut Self {
        if matches!(self.mode, PredicateMode::Single) && !self.predicates.is_empty() {
            self.record_error(MULTIPLE_FILTERS.into());
        }
        if self.error.is_none() {
            self.predicates.push(predicate);
        }
        self
    }

    pub fn eq(&mut self, path: impl Into<ColumnRef>, value: impl Into<Operand>) -> &mut Self {
        self.push(Predicate::eq(path, value))
    }

    pub fn ne(&mut self, path: impl Into<ColumnRef>, value: impl Into<Operand>) -> &mut Self {
        self.push(Predicate::ne(path, value))
    }

    pub fn lt(&mut self, path: impl Into<ColumnRef>, value: impl Into<Operand>) -> &mut Self {
        self.push(Predicate::lt(path, value))
    }

    pub fn le(&mut self, path: impl Into<ColumnRef>, value: impl Into<Operand>) -> &mut Self {
        self.push(Predicate::le(path, value))
    }

    pub fn gt(&mut self, path: impl Into<ColumnRef>, value: impl Into<Operand>) -> &mut Self {
        self.push(Predicate::gt(path, value))
    }

    pub fn ge(&mut self, path: impl Into<ColumnRef>, value: impl Into<Operand>) -> &mut Self {
        self.push(Predicate::ge(path, value))
    }

    pub fn like(&mut self, path: impl Into<ColumnRef>, pattern: impl Into<Value>) -> &mut Self {
        self.push(Predicate::like(path, pattern))
    }

    /// `IN` over a literal collection; an empty collection matches nothing.
    pub fn in_list<I, V>(&mut self, path: impl Into<ColumnRef>, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.push(Predicate::in_list(path, values))
    }

    /// `NOT IN` over a literal collection; an empty collection matches everything.
    pub fn not_in_list<I, V>(&mut self, path: impl Into<ColumnRef>, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.push(Predicate::not_in_list(path, values))
    }

    pub fn between(
        &mut self,
        path: impl Into<ColumnRef>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> &mut Self {
        self.push(Predicate::between(path, low, high))
    }

    pub fn is_null(&mut self, path: impl Into<ColumnRef>) -> &mut Self {
        self.push(Predicate::is_null(path))
    }

    pub fn is_not_null(&mut self, path: impl Into<ColumnRef>) -> &mut Self {
        self.push(Predicate::is_not_null(path))
    }

    pub fn is_true(&mut self, path: impl Into<ColumnRef>) -> &mut Self {
        self.push(Predicate::compare(path, Operator::IsTrue, Vec::new()))
    }

    pub fn is_false(&mut self, path: impl Into<ColumnRef>) -> &mut Self {
        self.push(Predicate::compare(path, Operator::IsFalse, Vec::new()))
    }

    /// Rows related to `record`.
    pub fn matches(&mut self, record: Record) -> &mut Self {
        self.push(Predicate::matches(record))
    }

    pub fn matches_via(&mut self, record: Record, path: impl Into<Metamodel>) -> &mut Self {
        self.push(Predicate::matches_via(record, path))
    }

    /// `EXISTS` over another builder's rows; outer references use
    /// [`ColumnRef::outer`].
    pub fn exists(&mut self, query: &QueryBuilder) -> &mut Self {
        match query.as_subquery() {
            Ok(template) => self.push(Predicate::exists(template)),
            Err(err) => {
                self.record_error(err.to_string());
                self
            }
        }
    }

    pub fn not_exists(&mut self, query: &QueryBuilder) -> &mut Self {
        match query.as_subquery() {
            Ok(template) => self.push(Predicate::not_exists(template)),
            Err(err) => {
                self.record_error(err.to_string());
                self
            }
        }
    }

    /// `path IN (SELECT column ...)`.
    pub fn in_query(
        &mut self,
        path: impl Into<ColumnRef>,
        query: &QueryBuilder,
        column: impl Into<ColumnRef>,
    ) -> &mut Self {
        let sub = query.clone().columns([column.into()]);
        match sub.to_template() {
            Ok(template) => self.push(Predicate::in_query(path, template)),
            Err(err) => {
                self.record_error(err.to_string());
                self
            }
        }
    }

    pub fn raw(&mut self, template: Template) -> &mut Self {
        self.push(Predicate::raw(template))
    }

    /// Nests a group combined with AND.
    pub fn and_group<F>(&mut self, build: F) -> &mut Self
    where
        F: FnOnce(&mut PredicateBuilder),
    {
        self.group(PredicateMode::And, false, build)
    }

    /// Nests a group combined with OR.
    pub fn or_group<F>(&mut self, build: F) -> &mut Self
    where
        F: FnOnce(&mut PredicateBuilder),
    {
        self.group(PredicateMode::Or, false, build)
    }

    /// Nests an AND group and negates it.
    pub fn not_group<F>(&mut self, build: F) -> &mut Self
    where
        F: FnOnce(&mut PredicateBuilder),
    {
        self.group(PredicateMode::And, true, build)
    }

    fn group<F>(&mut self, mode: PredicateMode, negate: bool, build: F) -> &mut Self
    where
        F: FnOnce(&mut PredicateBuilder),
    {
        match PredicateBuilder::build_group(mode, build) {
            Ok(predicate) if negate => self.push(predicate.not()),
            Ok(predicate) => self.push(predicate),
            Err(message) => {
                self.record_error(message);
                self
            }
        }
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
                        .nullable_column("birth_date")
                        .relation("owner", "owner"),
                ),
            CompileConfig::default(),
        )
    }

    #[test]
    fn builds_entity_select_with_filters() {
        let ctx = ctx();
        let stmt = QueryBuilder::new("pet")
            .filter(Predicate::eq("owner.last_name", "Davis"))
            .and_where(Predicate::is_not_null("birth_date"))
            .order_by("name")
            .limit(10)
            .to_statement(&ctx)
            .expect("compiles");
        assert_eq!(
            stmt.sql,
            "SELECT p.id, p.name, p.birth_date, o.id, o.last_name FROM pet p \
             INNER JOIN owner o ON o.id = p.owner_id \
             WHERE o.last_name = ? AND p.birth_date IS NOT NULL ORDER BY p.name ASC LIMIT ?"
        );
        assert_eq!(stmt.params.len(), 2);
        assert_eq!(stmt.kind, StatementKind::Select);
    }

    #[test]
    fn second_unconditioned_filter_is_rejected() {
        let ctx = ctx();
        let err = QueryBuilder::new("pet")
            .filter(Predicate::eq("name", "Leo"))
            .where_id(3i64)
            .to_statement(&ctx)
            .unwrap_err();
        assert_eq!(err.code(), "SqlTemplateException");
        assert!(err.to_string().contains("multiple unconditioned filters"));
    }

    #[test]
    fn states_are_independent() {
        let ctx = ctx();
        let base = QueryBuilder::new("owner").columns(["last_name"]);
        let filtered = base.clone().where_id(1i64);
        let plain = base.to_statement(&ctx).expect("plain");
        let with_id = filtered.to_statement(&ctx).expect("filtered");
        assert_eq!(plain.sql, "SELECT o.last_name FROM owner o");
        assert_eq!(with_id.sql, "SELECT o.last_name FROM owner o WHERE o.id = ?");
    }

    #[test]
    fn or_groups_and_empty_in() {
        let ctx = ctx();
        let stmt = QueryBuilder::new("pet")
            .columns(["id"])
            .filter_with(|p| {
                p.and_group(|all| {
                    all.or_group(|g| {
                        g.eq("name", "Leo").in_list("id", Vec::<i64>::new());
                    });
                    all.is_null("birth_date");
                });
            })
            .to_statement(&ctx)
            .expect("compiles");
        assert_eq!(
            stmt.sql,
            "SELECT p.id FROM pet p WHERE (p.name = ? OR 1 = 0) AND p.birth_date IS NULL"
        );
    }

    #[test]
    fn ungrouped_conditions_in_filter_with_are_rejected() {
        let err = QueryBuilder::new("pet")
            .filter_with(|p| {
                p.eq("name", "a");
                p.eq("name", "b");
            })
            .to_statement(&ctx())
            .unwrap_err();
        assert_eq!(err.code(), "SqlTemplateException");

        let err = QueryBuilder::new("pet")
            .filter(Predicate::eq("name", "a"))
            .filter_with(|p| {
                p.eq("name", "b");
            })
            .to_statement(&ctx())
            .unwrap_err();
        assert_eq!(err.code(), "SqlTemplateException");
    }

    #[test]
    fn count_and_exists_statements() {
        let ctx = ctx();
        let query = QueryBuilder::new("pet").filter(Predicate::eq("owner", 1i64));
        let count = query.to_count_statement(&ctx).expect("count");
        assert_eq!(count.sql, "SELECT COUNT(*) FROM pet p WHERE p.owner_id = ?");
        let exists = query.to_exists_statement(&ctx).expect("exists");
        assert_eq!(
            exists.sql,
            "SELECT EXISTS (SELECT 1 FROM pet p WHERE p.owner_id = ?)"
        );
        let missing = query.to_not_exists_statement(&ctx).expect("not exists");
        assert!(missing.sql.starts_with("SELECT NOT EXISTS ("));
    }

    #[test]
    fn correlated_exists_subquery() {
        let ctx = ctx();
        let with_pets = QueryBuilder::new("pet")
            .filter(Predicate::raw(
                Template::new()
                    .column("owner")
                    .sql(" = ")
                    .column(ColumnRef::new("id").outer()),
            ));
        let stmt = QueryBuilder::new("owner")
            .columns(["last_name"])
            .filter_with(|p| {
                p.exists(&with_pets);
            })
            .to_statement(&ctx)
            .expect("compiles");
        assert_eq!(
            stmt.sql,
            "SELECT o.last_name FROM owner o WHERE EXISTS \
             (SELECT 1 FROM pet p WHERE p.owner_id = o.id)"
        );
    }

    #[test]
    fn having_without_group_by_is_rejected() {
        let err = QueryBuilder::new("pet")
            .having(Predicate::raw(Template::new().sql("COUNT(*) > 1")))
            .to_template()
            .unwrap_err();
        assert_eq!(err.code(), "SqlTemplateException");
    }
}
